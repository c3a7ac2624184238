use std::ops::RangeInclusive;

use rand::Rng;

pub const BICYCLE_RANGE: RangeInclusive<u32> = 5..=10;
pub const PEDESTRIAN_RANGE: RangeInclusive<u32> = 7..=12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneCounts {
    pub bicycles: u32,
    pub pedestrians: u32,
}

impl SceneCounts {
    pub fn draw<R: Rng>(rng: &mut R) -> Self {
        Self {
            bicycles: rng.gen_range(BICYCLE_RANGE),
            pedestrians: rng.gen_range(PEDESTRIAN_RANGE),
        }
    }
}

pub fn build_edit_prompt(counts: &SceneCounts) -> String {
    [
        "I have an imbalanced dataset and I need more images with pedestrians and bicycles.".to_string(),
        format!(
            "Please add {} pedestrians and {} bicycles to this street scene.",
            counts.pedestrians, counts.bicycles
        ),
        "Ensure the objects are proportionate to the scene and blend naturally with the environment.".to_string(),
        "Make sure that the pedestrians are walking on the sidewalks and crossing at crosswalks.".to_string(),
        "Make sure that the bicycles are on the road and in bike lanes where available.".to_string(),
        "Make sure that the bicycles are ridden by people wearing helmets.".to_string(),
        "Make sure that objects that are far away are smaller in size to maintain perspective.".to_string(),
        "Also, include a few cars to maintain realism. The total number of vehicles should create a realistic traffic scene.".to_string(),
    ]
    .join(" ")
}
