// src/models.rs
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::RestyleError;

/// Fixed style catalog. Every key resolves to exactly one base prompt in
/// `prompts`; unknown keys are rejected at the boundary instead of silently
/// proceeding with an empty prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKey {
    Modern,
    Scandi,
    Industrial,
    Minimal,
    Boho,
}

impl StyleKey {
    pub fn parse(value: &str) -> Result<Self, RestyleError> {
        match value {
            "modern" => Ok(StyleKey::Modern),
            "scandi" => Ok(StyleKey::Scandi),
            "industrial" => Ok(StyleKey::Industrial),
            "minimal" => Ok(StyleKey::Minimal),
            "boho" => Ok(StyleKey::Boho),
            other => Err(RestyleError::Validation(format!("unknown style: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StyleKey::Modern => "modern",
            StyleKey::Scandi => "scandi",
            StyleKey::Industrial => "industrial",
            StyleKey::Minimal => "minimal",
            StyleKey::Boho => "boho",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Direct,
    Intelligent,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self, RestyleError> {
        match value {
            "direct" => Ok(Mode::Direct),
            "intelligent" => Ok(Mode::Intelligent),
            other => Err(RestyleError::Validation(format!(
                "mode must be \"direct\" or \"intelligent\", got: {other}"
            ))),
        }
    }
}

/// One restyle request as delivered by the upload layer. All fields are
/// validated at the boundary; `num_outputs` is a request, not a guarantee.
#[derive(Debug, Clone)]
pub struct RestyleRequest {
    pub image: Bytes,
    pub style: StyleKey,
    pub intensity: f32,
    pub num_outputs: u32,
    pub mode: Mode,
}

/// Structured room description produced by the vision stage. Every field is
/// defaulted so a partially-populated model response still parses; a fully
/// unparsable response is substituted by [`RoomAnalysis::fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomAnalysis {
    pub room_type: String,
    pub current_style: String,
    pub suggestions: Vec<String>,
    pub color_palette: Vec<String>,
    pub lighting: String,
    pub furniture: Vec<String>,
    pub improvements: Vec<String>,
}

impl Default for RoomAnalysis {
    fn default() -> Self {
        Self {
            room_type: String::new(),
            current_style: String::new(),
            suggestions: Vec::new(),
            color_palette: Vec::new(),
            lighting: String::new(),
            furniture: Vec::new(),
            improvements: Vec::new(),
        }
    }
}

impl RoomAnalysis {
    /// Neutral analysis used when the vision model returns text that cannot
    /// be parsed. The pipeline continues with these values rather than
    /// aborting.
    pub fn fallback() -> Self {
        Self {
            room_type: "unknown".to_string(),
            current_style: "mixed".to_string(),
            suggestions: vec![
                "Improve lighting".to_string(),
                "Add plants".to_string(),
                "Organize space".to_string(),
            ],
            color_palette: vec![
                "neutral".to_string(),
                "white".to_string(),
                "brown".to_string(),
            ],
            lighting: "moderate".to_string(),
            furniture: vec!["seating".to_string(), "table".to_string()],
            improvements: vec![
                "color coordination".to_string(),
                "lighting enhancement".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub provider: String,
    pub processing_time_ms: u64,
    pub style_applied: StyleKey,
    pub intensity: f32,
    pub mode_used: Mode,
}

/// One generated variant; `seed` is a display seed for the gallery, not the
/// diffusion seed used upstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOutput {
    pub data_url: String,
    pub seed: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestyleResult {
    pub images: Vec<StyleOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<RoomAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligent_prompt: Option<String>,
    pub metadata: ProcessingMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_key_round_trips_through_catalog_names() {
        for name in ["modern", "scandi", "industrial", "minimal", "boho"] {
            assert_eq!(StyleKey::parse(name).unwrap().as_str(), name);
        }
        assert!(matches!(
            StyleKey::parse("brutalist"),
            Err(RestyleError::Validation(_))
        ));
    }

    #[test]
    fn mode_rejects_unknown_values() {
        assert_eq!(Mode::parse("direct").unwrap(), Mode::Direct);
        assert_eq!(Mode::parse("intelligent").unwrap(), Mode::Intelligent);
        assert!(Mode::parse("smart").is_err());
    }

    #[test]
    fn room_analysis_parses_camel_case_with_missing_fields() {
        let analysis: RoomAnalysis =
            serde_json::from_str(r#"{"roomType":"bedroom","colorPalette":["blue"]}"#).unwrap();
        assert_eq!(analysis.room_type, "bedroom");
        assert_eq!(analysis.color_palette, vec!["blue".to_string()]);
        assert!(analysis.furniture.is_empty());
    }
}
