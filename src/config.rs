// src/config.rs
use std::env;

/// Process-wide configuration, loaded once at startup and passed into each
/// component's constructor. Components never read the environment directly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub replicate_api_token: Option<String>,
    pub openai_api_key: Option<String>,
    /// Longest allowed side of a normalized image, in pixels.
    pub max_image_side: u32,
    /// Hard payload ceiling for the primary normalization path.
    pub max_payload_bytes: usize,
    /// Softer ceiling applied right before handing an image to a generation call.
    pub pre_send_payload_bytes: usize,
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            openai_api_key: None,
            max_image_side: 1024,
            max_payload_bytes: 20 * 1024 * 1024,
            pre_send_payload_bytes: 4 * 1024 * 1024,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            replicate_api_token: non_empty_var("REPLICATE_API_TOKEN"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            max_image_side: env::var("MAX_IMAGE_SIDE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_image_side),
            bind_addr: env::var("PORT")
                .map(|p| format!("0.0.0.0:{}", p))
                .unwrap_or_else(|_| defaults.bind_addr.clone()),
            ..defaults
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_constraints() {
        let config = AppConfig::default();
        assert_eq!(config.max_image_side, 1024);
        assert_eq!(config.max_payload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.pre_send_payload_bytes, 4 * 1024 * 1024);
        assert!(config.replicate_api_token.is_none());
    }
}
