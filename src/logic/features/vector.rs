//! Feature Vector - Core data structure for ML input
//!
//! **Fixed-schema feature record**
//!
//! Every vector is bound to the `FeatureLayout` it was built against, so
//! a key is never missing: absent tokens are explicit zeros.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::layout::FeatureLayout;

// ============================================================================
// FEATURE VECTOR
// ============================================================================

/// Ordered name → count record
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    layout: Arc<FeatureLayout>,
    values: Vec<u32>,
    /// 0 = benign, 1 = malicious. Only set in training contexts.
    label: Option<u8>,
}

impl FeatureVector {
    /// Create a new zeroed feature vector for a layout
    pub fn zeroed(layout: Arc<FeatureLayout>) -> Self {
        let values = vec![0; layout.len()];
        Self { layout, values, label: None }
    }

    /// Layout this vector was built against
    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Get values as slice (layout order)
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Get feature by name
    pub fn get(&self, name: &str) -> Option<u32> {
        self.layout.index_of(name).map(|i| self.values[i])
    }

    /// Add to a feature by index
    pub fn add_at(&mut self, index: usize, amount: u32) {
        if let Some(v) = self.values.get_mut(index) {
            *v = v.saturating_add(amount);
        }
    }

    /// Add to a feature by name. Returns false for unknown keys.
    pub fn add(&mut self, name: &str, amount: u32) -> bool {
        match self.layout.index_of(name) {
            Some(i) => {
                self.add_at(i, amount);
                true
            }
            None => false,
        }
    }

    /// Iterate (name, value) pairs in layout order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.layout
            .names()
            .iter()
            .map(|s| s.as_str())
            .zip(self.values.iter().copied())
    }

    /// Model input row
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }

    /// Attach a training label
    pub fn with_label(mut self, label: u8) -> Self {
        self.label = Some(label);
        self
    }

    pub fn label(&self) -> Option<u8> {
        self.label
    }

    /// Strip the label before serving
    pub fn without_label(mut self) -> Self {
        self.label = None;
        self
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.label.is_some());
        let mut map = serializer.serialize_map(Some(self.values.len() + extra))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        if let Some(label) = self.label {
            map.serialize_entry("label", &label)?;
        }
        map.end()
    }
}
