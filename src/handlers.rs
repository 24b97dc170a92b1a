// src/handlers.rs
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::Bytes;
use futures_util::TryStreamExt;
use log::info;
use uuid::Uuid;

use crate::{
    AppState,
    errors::RestyleError,
    models::{Mode, RestyleRequest, StyleKey},
};

pub async fn restyle(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();

    let mut image: Option<Bytes> = None;
    let mut style = StyleKey::Modern;
    let mut intensity = 0.5_f32;
    let mut num_outputs = 3_u32;
    let mut mode = Mode::Direct;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();

        let mut buffer = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "image" => image = Some(Bytes::from(buffer)),
            "styleKey" => style = StyleKey::parse(&text_field(buffer, "styleKey")?)?,
            "intensity" => intensity = parse_intensity(&text_field(buffer, "intensity")?)?,
            "numOutputs" => num_outputs = parse_num_outputs(&text_field(buffer, "numOutputs")?)?,
            "mode" => mode = Mode::parse(&text_field(buffer, "mode")?)?,
            _ => {}
        }
    }

    let image = image
        .ok_or_else(|| RestyleError::Validation("no image file provided".to_string()))?;

    info!(
        "[{request_id}] restyle request: {} bytes, style={}, intensity={intensity}, \
         numOutputs={num_outputs}, mode={mode:?}",
        image.len(),
        style.as_str(),
    );

    let result = data
        .restyle_service
        .process(RestyleRequest {
            image,
            style,
            intensity,
            num_outputs,
            mode,
        })
        .await?;

    info!(
        "[{request_id}] restyle completed: {} image(s) via {} in {}ms",
        result.images.len(),
        result.metadata.provider,
        result.metadata.processing_time_ms,
    );

    Ok(HttpResponse::Ok().json(result))
}

/// Read-only capability probe; reports whether the hybrid branch is
/// configured without touching any remote API.
pub async fn capabilities(data: web::Data<AppState>) -> HttpResponse {
    let intelligent = data.restyle_service.is_intelligent_mode_available();
    HttpResponse::Ok().json(serde_json::json!({
        "openai": intelligent,
        "intelligentAnalysis": intelligent,
    }))
}

fn text_field(buffer: Vec<u8>, name: &str) -> Result<String, RestyleError> {
    String::from_utf8(buffer)
        .map(|s| s.trim().to_string())
        .map_err(|_| RestyleError::Validation(format!("field {name} is not valid UTF-8")))
}

fn parse_intensity(value: &str) -> Result<f32, RestyleError> {
    let intensity: f32 = value.parse().map_err(|_| {
        RestyleError::Validation("intensity must be a number between 0 and 1".to_string())
    })?;
    if !(0.0..=1.0).contains(&intensity) {
        return Err(RestyleError::Validation(
            "intensity must be a number between 0 and 1".to_string(),
        ));
    }
    Ok(intensity)
}

fn parse_num_outputs(value: &str) -> Result<u32, RestyleError> {
    let num: u32 = value.parse().map_err(|_| {
        RestyleError::Validation("number of outputs must be between 1 and 5".to_string())
    })?;
    if !(1..=5).contains(&num) {
        return Err(RestyleError::Validation(
            "number of outputs must be between 1 and 5".to_string(),
        ));
    }
    Ok(num)
}
