//! Features Module - Request Feature Extraction Engine
//!
//! Tách logic trích xuất features khỏi serving/training.
//! - `decoder` - recursive payload decoding to a fixed point
//! - `layout` - injection table + runtime schema per extraction mode
//! - `vector` - fixed-schema feature record
//! - `wordlists` - bad-word lists (flat + per category)
//! - `extractor` - request → vector

pub mod decoder;
pub mod layout;
pub mod vector;
pub mod wordlists;
pub mod extractor;


// Re-export common types
pub use extractor::{FeatureExtractor, RequestDescriptor};
pub use layout::{ExtractionMode, FeatureLayout};
pub use vector::FeatureVector;
pub use wordlists::BadWords;
