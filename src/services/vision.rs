// src/services/vision.rs
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::errors::{ProviderFault, RestyleError};
use crate::models::{RoomAnalysis, StyleKey};
use crate::prompts;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const VISION_MODEL: &str = "gpt-4o-mini";
const PROMPT_MODEL: &str = "gpt-4";
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(60);
const SYNTHESIZE_TIMEOUT: Duration = Duration::from_secs(30);

const ANALYSIS_INSTRUCTION: &str = "Analyze this interior space and provide a detailed JSON response with:
1. roomType: Type of room (living room, bedroom, kitchen, etc.)
2. currentStyle: Current design style (modern, traditional, eclectic, etc.)
3. suggestions: Array of 3-5 specific improvement suggestions
4. colorPalette: Array of current dominant colors
5. lighting: Description of current lighting situation
6. furniture: Array of main furniture pieces visible
7. improvements: Array of specific areas that could be enhanced

IMPORTANT: Return ONLY valid JSON, no markdown formatting, no code blocks, no additional text.";

const DESIGNER_SYSTEM_PROMPT: &str = "You are an expert interior designer. Create detailed, \
     specific prompts for AI image generation that will transform rooms into the requested \
     style while maintaining the room's structure and layout.";

/// The two-stage room intelligence capability: structural analysis of the
/// photo, then synthesis of a style-specific generation prompt.
#[async_trait]
pub trait RoomIntelligence: Send + Sync {
    async fn analyze_room(&self, image: &[u8]) -> Result<RoomAnalysis, RestyleError>;

    async fn synthesize_prompt(
        &self,
        analysis: &RoomAnalysis,
        style: StyleKey,
        intensity: f32,
    ) -> Result<String, RestyleError>;
}

/// OpenAI-backed implementation. The constructor requires the credential up
/// front; without it the hybrid branch is simply unavailable.
#[derive(Debug)]
pub struct VisionService {
    api_key: String,
    client: Client,
}

impl VisionService {
    pub fn new(config: &AppConfig, client: Client) -> Result<Self, RestyleError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| RestyleError::Configuration("OPENAI_API_KEY is not set".into()))?;

        Ok(Self { api_key, client })
    }

    /// One chat completion raced against a deadline; returns the first
    /// choice's message content.
    async fn chat(&self, deadline: Duration, body: Value) -> Result<String, RestyleError> {
        let request = async {
            let response = self
                .client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| openai_error(ProviderFault::Remote, format!("request failed: {e}")))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(openai_error(
                    ProviderFault::RateLimited,
                    "OpenAI returned 429".into(),
                ));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(openai_error(
                    ProviderFault::Remote,
                    format!("OpenAI returned {status}: {body}"),
                ));
            }

            let payload: Value = response.json().await.map_err(|e| {
                openai_error(
                    ProviderFault::MalformedResponse,
                    format!("unparsable completion body: {e}"),
                )
            })?;

            payload
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    openai_error(
                        ProviderFault::MalformedResponse,
                        "completion has no message content".into(),
                    )
                })
        };

        match tokio::time::timeout(deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(openai_error(
                ProviderFault::Timeout,
                format!("call exceeded {}s deadline", deadline.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl RoomIntelligence for VisionService {
    /// Submits the original (not normalized) photo with the structured-output
    /// instruction. A malformed-but-present response degrades to the neutral
    /// fallback analysis; only transport failures propagate.
    async fn analyze_room(&self, image: &[u8]) -> Result<RoomAnalysis, RestyleError> {
        let base64_image = general_purpose::STANDARD.encode(image);

        let body = json!({
            "model": VISION_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": ANALYSIS_INSTRUCTION },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{base64_image}") }
                    }
                ]
            }],
            "max_tokens": 1000,
            "temperature": 0.3,
        });

        let content = self.chat(ANALYZE_TIMEOUT, body).await?;
        let analysis = parse_room_analysis(&content);
        info!(
            "room analysis completed: roomType={}, currentStyle={}",
            analysis.room_type, analysis.current_style
        );
        Ok(analysis)
    }

    async fn synthesize_prompt(
        &self,
        analysis: &RoomAnalysis,
        style: StyleKey,
        intensity: f32,
    ) -> Result<String, RestyleError> {
        let user_prompt = format!(
            "Based on this room analysis:
- Room Type: {}
- Current Style: {}
- Current Colors: {}
- Current Furniture: {}
- Lighting: {}

Create a detailed prompt to transform this into {} style with {}.

Focus on:
- Specific furniture styles and materials
- Color schemes and textures
- Lighting and ambiance
- Decorative elements and accessories
- Wall treatments and finishes

Keep the room layout and basic structure intact. Provide only the transformation prompt, no explanations.",
            analysis.room_type,
            analysis.current_style,
            analysis.color_palette.join(", "),
            analysis.furniture.join(", "),
            analysis.lighting,
            style.as_str(),
            prompts::intensity_description(intensity),
        );

        let body = json!({
            "model": PROMPT_MODEL,
            "messages": [
                { "role": "system", "content": DESIGNER_SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt }
            ],
            "max_tokens": 300,
            "temperature": 0.7,
        });

        let content = self.chat(SYNTHESIZE_TIMEOUT, body).await?;
        let prompt = content.trim().to_string();
        if prompt.is_empty() {
            return Err(openai_error(
                ProviderFault::MalformedResponse,
                "prompt synthesis returned empty content".into(),
            ));
        }
        Ok(prompt)
    }
}

/// Parses the vision model's analysis text, tolerating markdown fences. An
/// unparsable response substitutes the fixed neutral fallback instead of
/// failing the pipeline.
pub(crate) fn parse_room_analysis(content: &str) -> RoomAnalysis {
    let cleaned = strip_code_fences(content);
    match serde_json::from_str(cleaned) {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!("room analysis was not valid JSON ({e}), using fallback analysis");
            RoomAnalysis::fallback()
        }
    }
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_prefix
        .strip_suffix("```")
        .unwrap_or(without_prefix)
        .trim()
}

fn openai_error(fault: ProviderFault, message: String) -> RestyleError {
    RestyleError::Provider {
        provider: "OpenAI",
        fault,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_parses_plain_json() {
        let parsed = parse_room_analysis(
            r#"{"roomType":"living room","currentStyle":"eclectic","lighting":"bright"}"#,
        );
        assert_eq!(parsed.room_type, "living room");
        assert_eq!(parsed.current_style, "eclectic");
    }

    #[test]
    fn analysis_strips_markdown_fences() {
        let fenced = "```json\n{\"roomType\":\"kitchen\",\"currentStyle\":\"modern\"}\n```";
        let parsed = parse_room_analysis(fenced);
        assert_eq!(parsed.room_type, "kitchen");

        let bare_fence = "```\n{\"roomType\":\"bedroom\"}\n```";
        assert_eq!(parse_room_analysis(bare_fence).room_type, "bedroom");
    }

    #[test]
    fn unparsable_analysis_becomes_the_fallback() {
        let parsed = parse_room_analysis("The room looks lovely, thanks for asking!");
        assert_eq!(parsed, RoomAnalysis::fallback());
        assert_eq!(parsed.room_type, "unknown");
        assert_eq!(parsed.current_style, "mixed");
    }

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let err = VisionService::new(&AppConfig::default(), Client::new()).unwrap_err();
        assert!(matches!(err, RestyleError::Configuration(_)));
    }
}
