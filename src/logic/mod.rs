//! Logic Module - Business Logic & Engines
//!
//! Chứa các engines xử lý: feature extraction, registry, training, serving.
//!
//! ## Architecture
//! - `features/` - Request feature extraction (decoder, layouts, word lists)
//! - `model/` - ONNX inference, model cache, threat type predictor
//! - `registry/` - SQLite model registry + artifact directory
//! - `dataset/` - Labelled request → CSV training dataset
//! - `training/` - Training orchestrator + decision engine
//! - `control_plane/` - HTTP client + change watcher
//! - `notify/` - Batched threat analysis submission
//! - `service` - Owned service object wiring everything together

pub mod config;
pub mod schedule;

pub mod features;
pub mod model;
pub mod registry;
pub mod dataset;
pub mod training;
pub mod control_plane;
pub mod notify;

pub mod service;
