// src/services/mod.rs
pub mod image_processor;
pub mod orchestrator;
pub mod providers;
pub mod vision;

pub use image_processor::ImageProcessor;
pub use orchestrator::RestyleService;
