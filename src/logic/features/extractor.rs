//! Request Feature Extractor
//!
//! Raw request `{url, headers, body}` → fixed-schema `FeatureVector`.
//!
//! Both modes share the injection-character block, so one request can be
//! scored by either model family.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::decoder;
use super::layout::{
    ExtractionMode, FeatureLayout, BADWORD_CATEGORY_PREFIX, BADWORD_KEY, INJECTION_CHARACTERS,
};
use super::vector::FeatureVector;
use super::wordlists::BadWords;

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());

// ============================================================================
// REQUEST DESCRIPTOR
// ============================================================================

/// Raw HTTP request fragments
///
/// Missing fields deserialize to empty strings; structured values (e.g. a
/// headers object) are serialized to JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    #[serde(default, deserialize_with = "lenient_text")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub headers: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub body: String,
}

impl RequestDescriptor {
    pub fn new(url: impl Into<String>, headers: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: headers.into(),
            body: body.into(),
        }
    }

    /// Sections in counting order
    pub fn sections(&self) -> [&str; 3] {
        [&self.url, &self.headers, &self.body]
    }

    /// url + headers + body joined for keyword scoring
    pub fn joined(&self) -> String {
        format!("{} {} {}", self.url, self.headers, self.body)
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

/// String stays as-is, null is empty, anything else becomes JSON
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Feature extractor with layouts fixed at construction
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    words: BadWords,
    anomaly_layout: Arc<FeatureLayout>,
    type_layout: Arc<FeatureLayout>,
    max_depth: usize,
}

impl FeatureExtractor {
    pub fn new(words: BadWords, max_depth: usize) -> Self {
        let anomaly_layout = Arc::new(FeatureLayout::anomaly());
        let type_layout = Arc::new(FeatureLayout::threat_type(&words.categories()));
        Self {
            words,
            anomaly_layout,
            type_layout,
            max_depth,
        }
    }

    /// Layout for a mode
    pub fn layout(&self, mode: ExtractionMode) -> &Arc<FeatureLayout> {
        match mode {
            ExtractionMode::Anomaly => &self.anomaly_layout,
            ExtractionMode::ThreatType => &self.type_layout,
        }
    }

    /// Extract a feature vector
    pub fn extract(&self, request: &RequestDescriptor, mode: ExtractionMode) -> FeatureVector {
        let mut vector = FeatureVector::zeroed(self.layout(mode).clone());

        for section in request.sections() {
            let text = section.replace('\n', " ").to_lowercase();
            count_injection_characters(&text, &mut vector);
        }

        let blob = decoder::decode(&request.joined(), self.max_depth);
        let tokens = token_counts(&blob);

        match mode {
            ExtractionMode::Anomaly => {
                vector.add(BADWORD_KEY, count_bad_words(&tokens, &self.words.common));
            }
            ExtractionMode::ThreatType => {
                for (category, words) in &self.words.by_type {
                    let key = format!("{}{}", BADWORD_CATEGORY_PREFIX, category);
                    vector.add(&key, count_bad_words(&tokens, words));
                }
            }
        }

        vector
    }

    /// Labelled anomaly-mode row for training datasets
    pub fn extract_labelled(&self, request: &RequestDescriptor, label: u8) -> FeatureVector {
        self.extract(request, ExtractionMode::Anomaly).with_label(label)
    }
}

/// Non-overlapping substring counts, accumulated into the injection block
fn count_injection_characters(text: &str, vector: &mut FeatureVector) {
    for (index, (_, token)) in INJECTION_CHARACTERS.iter().enumerate() {
        let count = text.matches(token).count();
        if count > 0 {
            vector.add_at(index, count as u32);
        }
    }
}

fn token_counts(text: &str) -> HashMap<&str, u32> {
    let mut counts = HashMap::new();
    for token in RE_NON_WORD.split(text).filter(|t| !t.is_empty()) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

fn count_bad_words(tokens: &HashMap<&str, u32>, words: &[String]) -> u32 {
    words
        .iter()
        .filter_map(|w| tokens.get(w.as_str()))
        .sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(BadWords::builtin(), 5)
    }

    #[test]
    fn test_descriptor_missing_fields() {
        let req: RequestDescriptor = serde_json::from_str(r#"{"url": "/a"}"#).unwrap();
        assert_eq!(req.url, "/a");
        assert_eq!(req.headers, "");
        assert_eq!(req.body, "");
    }

    #[test]
    fn test_descriptor_structured_headers() {
        let req: RequestDescriptor =
            serde_json::from_str(r#"{"url": null, "headers": {"Host": "x"}, "body": 5}"#).unwrap();
        assert_eq!(req.url, "");
        assert_eq!(req.headers, r#"{"Host":"x"}"#);
        assert_eq!(req.body, "5");
    }

    #[test]
    fn test_injection_counts_per_section() {
        let req = RequestDescriptor::new("/a?x='1'", "A: <b>", "c=--");
        let v = extractor().extract(&req, ExtractionMode::Anomaly);
        assert_eq!(v.get("single_quote"), Some(2));
        assert_eq!(v.get("less_than"), Some(1));
        assert_eq!(v.get("double_dash"), Some(1));
        assert_eq!(v.get("dash"), Some(2));
        assert_eq!(v.get("equals"), Some(2));
        assert_eq!(v.get("file_path_root"), Some(1));
        assert_eq!(v.get("backtick"), Some(0));
    }

    #[test]
    fn test_newlines_folded_before_counting() {
        let req = RequestDescriptor::new("", "A: b\nC: d", "");
        let v = extractor().extract(&req, ExtractionMode::Anomaly);
        assert_eq!(v.get("newline"), Some(0));
        assert_eq!(v.get("space"), Some(3));
    }

    #[test]
    fn test_badword_decoded_before_matching() {
        let req = RequestDescriptor::new("/search?q=%2553ELECT%20*%20FROM%20users", "", "");
        let v = extractor().extract(&req, ExtractionMode::Anomaly);
        // select + from
        assert_eq!(v.get(BADWORD_KEY), Some(2));
    }

    #[test]
    fn test_modes_share_injection_block() {
        let req = RequestDescriptor::new(
            "/search?query=select+*+from+users",
            "Host: example.com\nUser-Agent: curl/7.68.0",
            "<script>alert(1)</script>",
        );
        let ex = extractor();
        let flat = ex.extract(&req, ExtractionMode::Anomaly);
        let typed = ex.extract(&req, ExtractionMode::ThreatType);

        let n = INJECTION_CHARACTERS.len();
        assert_eq!(&flat.values()[..n], &typed.values()[..n]);
        assert!(flat.get(BADWORD_KEY).unwrap() >= 2);
        assert!(typed.get("badword_xss").unwrap() >= 2);
        assert!(typed.get("badword_sql").unwrap() >= 1);
        assert!(typed.get(BADWORD_KEY).is_none());
    }

    #[test]
    fn test_empty_request_all_zero() {
        let ex = extractor();
        for mode in [ExtractionMode::Anomaly, ExtractionMode::ThreatType] {
            let v = ex.extract(&RequestDescriptor::default(), mode);
            assert_eq!(v.values().len(), ex.layout(mode).len());
            // joined blob is "  " → normalized to a single space, no words
            assert!(v.iter().all(|(name, value)| name == "space" || value == 0));
        }
    }

    #[test]
    fn test_labelled_row() {
        let v = extractor().extract_labelled(&RequestDescriptor::new("/", "", ""), 1);
        assert_eq!(v.label(), Some(1));
    }
}
