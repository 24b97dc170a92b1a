// src/prompts.rs
//! The single owned style catalog. Both the direct path and the hybrid
//! path's degrade logic resolve prompts here.

use crate::models::StyleKey;

pub fn base_prompt(style: StyleKey) -> &'static str {
    match style {
        StyleKey::Modern => {
            "Modern minimalist interior design with clean lines, neutral colors, and contemporary furniture"
        }
        StyleKey::Scandi => {
            "Scandinavian interior design with light wood, white walls, cozy textures, and hygge atmosphere"
        }
        StyleKey::Industrial => {
            "Industrial interior design with exposed brick, metal fixtures, concrete floors, and urban aesthetics"
        }
        StyleKey::Minimal => {
            "Minimal interior design with uncluttered spaces, clean lines, and carefully chosen elements"
        }
        StyleKey::Boho => {
            "Bohemian interior design with colorful textiles, eclectic furniture, plants, and artistic decorations"
        }
    }
}

/// Qualifier appended to the static prompt in direct mode. Tiers are strict:
/// >0.7 dramatic, >0.5 moderate, everything else subtle.
pub fn intensity_qualifier(intensity: f32) -> &'static str {
    if intensity > 0.7 {
        "dramatic transformation, bold changes"
    } else if intensity > 0.5 {
        "moderate transformation, balanced changes"
    } else {
        "subtle transformation, gentle enhancements"
    }
}

/// Prose variant of the same tiers, fed to the prompt-synthesis model.
pub fn intensity_description(intensity: f32) -> &'static str {
    if intensity > 0.7 {
        "dramatic and bold transformation"
    } else if intensity > 0.5 {
        "moderate but noticeable changes"
    } else {
        "subtle and refined enhancements"
    }
}

pub fn build_prompt(style: StyleKey, intensity: f32) -> String {
    format!("{}, {}", base_prompt(style), intensity_qualifier(intensity))
}
