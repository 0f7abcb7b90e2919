//! Control Plane Module - Service to backend communication
//!
//! This module handles:
//! - Model metadata refresh (`/models`, `/models/selected`)
//! - Change polling (`/changes`)
//! - Training data + results (`/requests`, `/model/results`)
//! - Threat analysis submission (`/submit-analysis`)

pub mod client;
pub mod watcher;
#[cfg(test)]
pub(crate) mod fake;

pub use client::{
    AnalysisSink, ChangeSignal, ControlPlane, ControlPlaneError, HttpControlPlane, LabelledRequest, ModelResults,
};
pub use watcher::ChangeWatcher;
