// src/services/orchestrator.rs
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use rand::Rng;
use reqwest::Client;

use crate::config::AppConfig;
use crate::errors::RestyleError;
use crate::models::{
    Mode, ProcessingMetadata, RestyleRequest, RestyleResult, RoomAnalysis, StyleOutput,
};
use crate::prompts;
use crate::services::image_processor::ImageProcessor;
use crate::services::providers::{GenerationProvider, ReplicateModel, ReplicateProvider};
use crate::services::vision::{RoomIntelligence, VisionService};

/// Output of the hybrid pipeline before the result envelope is assembled.
struct HybridOutcome {
    images: Vec<String>,
    analysis: RoomAnalysis,
    prompt: String,
    provider: String,
}

/// Top-level request orchestrator. Owns the ordered provider registry, the
/// optional vision stage, and the normalizer; everything is built once from
/// configuration and shared read-only across requests.
pub struct RestyleService {
    providers: Vec<Arc<dyn GenerationProvider>>,
    vision: Option<Arc<dyn RoomIntelligence>>,
    processor: Arc<ImageProcessor>,
}

impl RestyleService {
    pub fn new(config: &AppConfig) -> Result<Self, RestyleError> {
        let client = Client::new();
        let processor = Arc::new(ImageProcessor::new(config));

        // Ordered registry: primary first, fallback second. Adding a provider
        // is an edit here, not a new conditional branch in the pipeline.
        let mut providers: Vec<Arc<dyn GenerationProvider>> = Vec::new();
        if config.replicate_api_token.is_some() {
            for model in [ReplicateModel::SdxlImg2Img, ReplicateModel::Sd15Img2Img] {
                providers.push(Arc::new(ReplicateProvider::new(
                    model,
                    config,
                    client.clone(),
                    processor.clone(),
                )?));
            }
        }
        if providers.is_empty() {
            return Err(RestyleError::Configuration(
                "no generation provider configured; set REPLICATE_API_TOKEN".into(),
            ));
        }

        let vision: Option<Arc<dyn RoomIntelligence>> = if config.openai_api_key.is_some() {
            Some(Arc::new(VisionService::new(config, client)?))
        } else {
            None
        };

        Ok(Self {
            providers,
            vision,
            processor,
        })
    }

    /// Pure configuration probe for external layers; never touches the
    /// network.
    pub fn is_intelligent_mode_available(&self) -> bool {
        self.vision.is_some()
    }

    /// Runs one restyle request end to end: normalize, pick the hybrid or
    /// direct branch, and assemble the result envelope. The hybrid branch
    /// degrades to direct on any failure; only the direct branch exhausting
    /// every provider is terminal.
    pub async fn process(&self, request: RestyleRequest) -> Result<RestyleResult, RestyleError> {
        let start = Instant::now();
        let normalized = self.processor.normalize(&request.image)?;

        if request.mode == Mode::Intelligent {
            if let Some(vision) = &self.vision {
                match self.run_hybrid(vision.as_ref(), &request, &normalized).await {
                    Ok(outcome) => {
                        info!(
                            "hybrid restyle completed: {} image(s) in {}ms",
                            outcome.images.len(),
                            start.elapsed().as_millis()
                        );
                        return Ok(assemble_result(
                            outcome.images,
                            Some(outcome.analysis),
                            Some(outcome.prompt),
                            outcome.provider,
                            Mode::Intelligent,
                            &request,
                            start,
                        ));
                    }
                    Err(e) => {
                        warn!("{e}, falling back to direct mode");
                    }
                }
            } else {
                warn!("intelligent mode requested without vision credentials, using direct mode");
            }
        }

        let prompt = prompts::build_prompt(request.style, request.intensity);
        match run_chain(&self.providers, &normalized, &prompt, request.num_outputs).await {
            Ok((images, provider)) => {
                info!(
                    "direct restyle completed via {}: {} image(s) in {}ms",
                    provider,
                    images.len(),
                    start.elapsed().as_millis()
                );
                Ok(assemble_result(
                    images,
                    None,
                    None,
                    provider,
                    Mode::Direct,
                    &request,
                    start,
                ))
            }
            Err(e) => {
                error!("direct restyle failed: {e}");
                Err(RestyleError::GenerationUnavailable)
            }
        }
    }

    /// The two-stage pipeline: analyze the original photo, synthesize a
    /// style prompt from the analysis, generate with the primary provider
    /// only. Any link failing collapses into `HybridPipelineFailed`; the
    /// caller decides whether to degrade.
    async fn run_hybrid(
        &self,
        vision: &dyn RoomIntelligence,
        request: &RestyleRequest,
        normalized: &[u8],
    ) -> Result<HybridOutcome, RestyleError> {
        let analysis = vision
            .analyze_room(&request.image)
            .await
            .map_err(|e| RestyleError::HybridPipelineFailed(format!("room analysis: {e}")))?;

        let prompt = vision
            .synthesize_prompt(&analysis, request.style, request.intensity)
            .await
            .map_err(|e| RestyleError::HybridPipelineFailed(format!("prompt synthesis: {e}")))?;

        // Hybrid uses the primary provider only.
        let primary = &self.providers[0];
        let images = primary
            .generate(normalized, &prompt, request.num_outputs)
            .await
            .map_err(|e| RestyleError::HybridPipelineFailed(format!("generation: {e}")))?;

        Ok(HybridOutcome {
            images,
            analysis,
            prompt,
            provider: format!("Hybrid (GPT-4 Vision + {})", primary.name()),
        })
    }
}

#[cfg(test)]
impl RestyleService {
    pub(crate) fn from_parts(
        providers: Vec<Arc<dyn GenerationProvider>>,
        vision: Option<Arc<dyn RoomIntelligence>>,
        processor: Arc<ImageProcessor>,
    ) -> Self {
        Self {
            providers,
            vision,
            processor,
        }
    }
}

/// Strictly sequential fallback chain: first provider that yields at least
/// one image wins, and the result is tagged with its name. Providers are
/// never raced concurrently since each invocation bills a remote model.
pub(crate) async fn run_chain(
    providers: &[Arc<dyn GenerationProvider>],
    image: &[u8],
    prompt: &str,
    num_outputs: u32,
) -> Result<(Vec<String>, String), RestyleError> {
    let mut last_error: Option<RestyleError> = None;

    for provider in providers {
        match provider.generate(image, prompt, num_outputs).await {
            Ok(images) => return Ok((images, provider.name().to_string())),
            Err(e) => {
                warn!("{} failed: {e}, trying next provider", provider.name());
                last_error = Some(e);
            }
        }
    }

    Err(RestyleError::AllProvidersExhausted {
        last: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no providers configured".to_string()),
    })
}

fn assemble_result(
    images: Vec<String>,
    analysis: Option<RoomAnalysis>,
    intelligent_prompt: Option<String>,
    provider: String,
    mode_used: Mode,
    request: &RestyleRequest,
    start: Instant,
) -> RestyleResult {
    let images = images
        .into_iter()
        .map(|data_url| StyleOutput {
            data_url,
            seed: rand::thread_rng().gen_range(0..1_000_000),
        })
        .collect();

    RestyleResult {
        images,
        analysis,
        intelligent_prompt,
        metadata: ProcessingMetadata {
            provider,
            processing_time_ms: start.elapsed().as_millis() as u64,
            style_applied: request.style,
            intensity: request.intensity,
            mode_used,
        },
    }
}
