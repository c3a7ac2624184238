use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::EditError;

pub fn encode_image(path: &Path) -> Result<String, EditError> {
    match fs::read(path) {
        Ok(bytes) => Ok(BASE64.encode(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(EditError::MissingInput(path.to_path_buf()))
        }
        Err(err) => Err(EditError::Io(err)),
    }
}

pub fn decode_image(data: &str) -> Result<Vec<u8>, EditError> {
    Ok(BASE64.decode(data.trim().as_bytes())?)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
