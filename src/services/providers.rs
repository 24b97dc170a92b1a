// src/services/providers.rs
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::{debug, info, warn};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::errors::{ProviderFault, RestyleError};
use crate::services::ImageProcessor;

/// Per-provider cap on requested outputs; each candidate is one remote
/// prediction.
pub const CANDIDATE_CAP: u32 = 2;

const REPLICATE_PREDICTIONS_URL: &str = "https://api.replicate.com/v1/predictions";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, ugly, cartoon, anime, painting, \
     sketch, people, text, watermark, border, frame";

/// Capability over one remote image-generation model: given a normalized
/// image and a prompt, produce up to `num_outputs` candidate images encoded
/// as data URLs.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        image: &[u8],
        prompt: &str,
        num_outputs: u32,
    ) -> Result<Vec<String>, RestyleError>;
}

/// The closed set of Replicate models we drive. Adding a model is a new
/// variant plus a registry entry in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateModel {
    SdxlImg2Img,
    Sd15Img2Img,
}

impl ReplicateModel {
    pub fn name(&self) -> &'static str {
        match self {
            ReplicateModel::SdxlImg2Img => "Replicate SDXL img2img",
            ReplicateModel::Sd15Img2Img => "Replicate SD 1.5 img2img",
        }
    }

    fn version(&self) -> &'static str {
        match self {
            ReplicateModel::SdxlImg2Img => {
                "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b"
            }
            ReplicateModel::Sd15Img2Img => {
                "30c1d0b916a6f8efce20493a5b39ad6a4710c63cfa5c146e6b25b2046119ae23"
            }
        }
    }

    fn request_timeout(&self) -> Duration {
        match self {
            ReplicateModel::SdxlImg2Img => Duration::from_secs(120),
            ReplicateModel::Sd15Img2Img => Duration::from_secs(90),
        }
    }

    fn input(&self, image_data_url: &str, prompt: &str, iteration: u32) -> Value {
        let seed: u32 = rand::thread_rng().gen_range(0..100_000);
        match self {
            ReplicateModel::SdxlImg2Img => json!({
                "image": image_data_url,
                "prompt": format!(
                    "Interior design transformation: {prompt}. Professional interior photography, \
                     high quality, realistic lighting, maintain room structure and layout"
                ),
                "negative_prompt": NEGATIVE_PROMPT,
                // Progressive strength so each candidate transforms a bit further.
                "strength": 0.5 + f64::from(iteration) * 0.1,
                "guidance_scale": 7.5,
                "num_inference_steps": 25,
                "seed": seed,
            }),
            ReplicateModel::Sd15Img2Img => json!({
                "image": image_data_url,
                "prompt": format!(
                    "Transform this interior to: {prompt}. Keep the room layout and structure, \
                     only change style, colors, furniture and decor"
                ),
                "num_inference_steps": 20,
                "guidance_scale": 7.5,
                "image_guidance_scale": 1.5,
                "seed": seed,
            }),
        }
    }
}

/// One Replicate-backed generation provider. Construction requires the API
/// token up front; a missing credential is a configuration error, never a
/// deferred runtime failure.
#[derive(Debug)]
pub struct ReplicateProvider {
    model: ReplicateModel,
    api_token: String,
    client: Client,
    processor: Arc<ImageProcessor>,
}

impl ReplicateProvider {
    pub fn new(
        model: ReplicateModel,
        config: &AppConfig,
        client: Client,
        processor: Arc<ImageProcessor>,
    ) -> Result<Self, RestyleError> {
        let api_token = config
            .replicate_api_token
            .clone()
            .ok_or_else(|| RestyleError::Configuration("REPLICATE_API_TOKEN is not set".into()))?;

        Ok(Self {
            model,
            api_token,
            client,
            processor,
        })
    }
}

#[async_trait]
impl GenerationProvider for ReplicateProvider {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    async fn generate(
        &self,
        image: &[u8],
        prompt: &str,
        num_outputs: u32,
    ) -> Result<Vec<String>, RestyleError> {
        let start = Instant::now();
        let optimized = self.processor.optimize_for_generation(image);
        let image_data_url = to_data_url(&optimized);

        debug!(
            "{}: starting transformation, {} bytes prepared, prompt: {}",
            self.name(),
            optimized.len(),
            prompt
        );

        let results = collect_candidates(self.name(), num_outputs, |iteration| {
            let input = self.model.input(&image_data_url, prompt, iteration);
            run_prediction(
                &self.client,
                &self.api_token,
                self.name(),
                self.model.version(),
                input,
                self.model.request_timeout(),
            )
        })
        .await?;

        info!(
            "{}: transformation completed, {} output(s) in {}ms",
            self.name(),
            results.len(),
            start.elapsed().as_millis()
        );

        Ok(results)
    }
}

/// Sequential per-candidate loop. A failed candidate is logged and skipped;
/// the loop always runs through the capped count and only fails with
/// `NoOutputProduced` when every candidate failed.
pub(crate) async fn collect_candidates<F, Fut>(
    provider: &'static str,
    num_outputs: u32,
    mut attempt: F,
) -> Result<Vec<String>, RestyleError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<String, RestyleError>>,
{
    let cap = num_outputs.clamp(1, CANDIDATE_CAP);
    let mut results = Vec::new();

    for iteration in 0..cap {
        match attempt(iteration).await {
            Ok(data_url) => {
                debug!("{provider}: candidate {} succeeded", iteration + 1);
                results.push(data_url);
            }
            Err(e) => {
                warn!("{provider}: candidate {} failed: {e}", iteration + 1);
            }
        }
    }

    if results.is_empty() {
        Err(RestyleError::NoOutputProduced { provider })
    } else {
        Ok(results)
    }
}

/// One remote prediction raced against the model's deadline. A timed-out
/// future is dropped on the spot, so a late result can never merge into the
/// response.
async fn run_prediction(
    client: &Client,
    api_token: &str,
    provider: &'static str,
    version: &str,
    input: Value,
    deadline: Duration,
) -> Result<String, RestyleError> {
    match tokio::time::timeout(
        deadline,
        execute_prediction(client, api_token, provider, version, input),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(RestyleError::Provider {
            provider,
            fault: ProviderFault::Timeout,
            message: format!("prediction exceeded {}s deadline", deadline.as_secs()),
        }),
    }
}

async fn execute_prediction(
    client: &Client,
    api_token: &str,
    provider: &'static str,
    version: &str,
    input: Value,
) -> Result<String, RestyleError> {
    let response = client
        .post(REPLICATE_PREDICTIONS_URL)
        .bearer_auth(api_token)
        .json(&json!({ "version": version, "input": input }))
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let mut prediction = read_prediction_body(provider, response).await?;

    loop {
        let status = prediction
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match status.as_str() {
            "succeeded" => break,
            "failed" | "canceled" => {
                let detail = prediction
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("prediction failed without detail");
                return Err(classify_remote_failure(provider, detail.to_string()));
            }
            _ => {
                let poll_url = prediction
                    .pointer("/urls/get")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| malformed(provider, "prediction is missing its poll URL"))?;

                tokio::time::sleep(POLL_INTERVAL).await;

                let response = client
                    .get(&poll_url)
                    .bearer_auth(api_token)
                    .send()
                    .await
                    .map_err(|e| transport_error(provider, e))?;
                prediction = read_prediction_body(provider, response).await?;
            }
        }
    }

    let output_url = prediction
        .get("output")
        .and_then(first_output_url)
        .ok_or_else(|| malformed(provider, "prediction succeeded without an output URL"))?;

    let image_bytes = tokio::time::timeout(FETCH_TIMEOUT, fetch_image(client, provider, &output_url))
        .await
        .map_err(|_| RestyleError::Provider {
            provider,
            fault: ProviderFault::Timeout,
            message: format!("output fetch exceeded {}s", FETCH_TIMEOUT.as_secs()),
        })??;

    Ok(to_data_url(&image_bytes))
}

async fn read_prediction_body(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<Value, RestyleError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RestyleError::Provider {
            provider,
            fault: ProviderFault::RateLimited,
            message: "Replicate returned 429".into(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_remote_failure(
            provider,
            format!("Replicate returned {status}: {body}"),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| malformed(provider, &format!("unparsable prediction body: {e}")))
}

async fn fetch_image(
    client: &Client,
    provider: &'static str,
    url: &str,
) -> Result<Vec<u8>, RestyleError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if !response.status().is_success() {
        return Err(RestyleError::Provider {
            provider,
            fault: ProviderFault::Remote,
            message: format!("output fetch returned {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;
    Ok(bytes.to_vec())
}

/// The model output is either a bare URL string or an array of them; the
/// first entry wins.
fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
        Value::Array(items) => items.first().and_then(first_output_url),
        _ => None,
    }
}

fn to_data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )
}

fn transport_error(provider: &'static str, e: reqwest::Error) -> RestyleError {
    let fault = if e.is_timeout() {
        ProviderFault::Timeout
    } else {
        ProviderFault::Remote
    };
    RestyleError::Provider {
        provider,
        fault,
        message: e.to_string(),
    }
}

fn malformed(provider: &'static str, message: &str) -> RestyleError {
    RestyleError::Provider {
        provider,
        fault: ProviderFault::MalformedResponse,
        message: message.to_string(),
    }
}

/// Relabel known upstream failure texts into provider fault kinds.
fn classify_remote_failure(provider: &'static str, message: String) -> RestyleError {
    let fault = if message.contains("CUDA out of memory") {
        ProviderFault::ResourceExhausted
    } else if message.contains("rate_limit") || message.contains("429") {
        ProviderFault::RateLimited
    } else if message.contains("timed out") {
        ProviderFault::Timeout
    } else {
        ProviderFault::Remote
    };

    RestyleError::Provider {
        provider,
        fault,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn candidate_loop_keeps_going_past_failures() {
        let calls = Cell::new(0u32);
        let results = collect_candidates("stub", 2, |iteration| {
            calls.set(calls.get() + 1);
            async move {
                if iteration == 0 {
                    Err(RestyleError::Provider {
                        provider: "stub",
                        fault: ProviderFault::Timeout,
                        message: "candidate timed out".into(),
                    })
                } else {
                    Ok(format!("data:image/jpeg;base64,candidate-{iteration}"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(results, vec!["data:image/jpeg;base64,candidate-1".to_string()]);
    }

    #[tokio::test]
    async fn candidate_loop_caps_requested_count() {
        let calls = Cell::new(0u32);
        let results = collect_candidates("stub", 5, |iteration| {
            calls.set(calls.get() + 1);
            async move { Ok(format!("url-{iteration}")) }
        })
        .await
        .unwrap();

        assert_eq!(calls.get(), CANDIDATE_CAP);
        assert_eq!(results.len(), CANDIDATE_CAP as usize);
    }

    #[tokio::test]
    async fn candidate_loop_with_zero_successes_is_no_output() {
        let err = collect_candidates("stub", 2, |_| async {
            Err(RestyleError::Provider {
                provider: "stub",
                fault: ProviderFault::Remote,
                message: "boom".into(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RestyleError::NoOutputProduced { provider: "stub" }
        ));
    }

    #[test]
    fn remote_failures_are_relabeled() {
        assert_eq!(
            classify_remote_failure("stub", "CUDA out of memory on worker".into()).fault(),
            Some(ProviderFault::ResourceExhausted)
        );
        assert_eq!(
            classify_remote_failure("stub", "rate_limit exceeded".into()).fault(),
            Some(ProviderFault::RateLimited)
        );
        assert_eq!(
            classify_remote_failure("stub", "request timed out".into()).fault(),
            Some(ProviderFault::Timeout)
        );
        assert_eq!(
            classify_remote_failure("stub", "something else".into()).fault(),
            Some(ProviderFault::Remote)
        );
    }

    #[test]
    fn first_output_url_handles_both_shapes() {
        assert_eq!(
            first_output_url(&json!("https://example.com/a.jpg")),
            Some("https://example.com/a.jpg".to_string())
        );
        assert_eq!(
            first_output_url(&json!(["https://example.com/b.jpg", "https://example.com/c.jpg"])),
            Some("https://example.com/b.jpg".to_string())
        );
        assert_eq!(first_output_url(&json!({})), None);
        assert_eq!(first_output_url(&json!([])), None);
    }

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let config = AppConfig::default();
        let err = ReplicateProvider::new(
            ReplicateModel::SdxlImg2Img,
            &config,
            Client::new(),
            Arc::new(ImageProcessor::new(&config)),
        )
        .unwrap_err();
        assert!(matches!(err, RestyleError::Configuration(_)));
    }
}
