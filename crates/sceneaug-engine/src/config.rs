use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::non_empty_env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_INPUT_MIME_TYPE: &str = "image/jpeg";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 120.0;

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            bail!("API key is empty");
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f64,
    pub response_modalities: Vec<String>,
    /// Declared MIME type of the source image, `image/jpeg` unless changed.
    /// `None` infers it from the file extension instead.
    pub input_mime_type: Option<String>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
            temperature: DEFAULT_TEMPERATURE,
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            input_mime_type: Some(DEFAULT_INPUT_MIME_TYPE.to_string()),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Resolves the config from process environment variables.
    ///
    /// Fails when neither `GEMINI_API_KEY` nor `GOOGLE_API_KEY` is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw_key) = API_KEY_VARS.iter().find_map(|key| lookup(key)) else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let mut config = Self::new(ApiKey::new(raw_key)?);
        if let Some(api_base) = lookup("GEMINI_API_BASE")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
        {
            config.api_base = api_base;
        }
        let timeout_s = lookup("SCENEAUG_REQUEST_TIMEOUT")
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
            .clamp(15.0, 600.0);
        config.request_timeout = Duration::from_secs_f64(timeout_s);
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_input_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.input_mime_type = Some(mime_type.into());
        self
    }

    pub fn with_inferred_input_mime_type(mut self) -> Self {
        self.input_mime_type = None;
        self
    }

    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}
