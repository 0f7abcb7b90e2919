//! Model Types
//!
//! Core types cho primary/secondary classification.
//! KHÔNG chứa logic - chỉ data structures.

use serde::{Deserialize, Serialize};

// ============================================================================
// PRIMARY VERDICT
// ============================================================================

/// Primary classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Anomaly,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Normal => "Normal",
            Verdict::Anomaly => "Anomaly",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Primary prediction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: Verdict,
    /// P(normal) 0.0 - 1.0
    pub normal: f32,
    /// P(anomaly) 0.0 - 1.0
    pub anomaly: f32,
    pub model_id: String,
    pub model_name: String,
    pub inference_time_us: u64,
}

impl PredictionResult {
    /// Build from class probabilities (`[p_normal, p_anomaly]` or `[p_anomaly]`)
    pub fn from_probabilities(probs: &[f32]) -> Option<(Verdict, f32, f32)> {
        let (normal, anomaly) = match probs {
            [p] => (1.0 - p, *p),
            [n, a, ..] => (*n, *a),
            [] => return None,
        };
        let verdict = if anomaly > normal { Verdict::Anomaly } else { Verdict::Normal };
        Some((verdict, normal, anomaly))
    }
}

// ============================================================================
// SECONDARY (THREAT TYPE)
// ============================================================================

/// Attack category predicted for anomalous requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatType {
    CommandInjection,
    DirectoryTraversal,
    FileInclusion,
    LdapInjection,
    NoSqlInjection,
    OpenRedirect,
    SqlInjection,
    ServerSideTemplateInjection,
    CrossSiteScripting,
    XmlExternalEntity,
}

impl ThreatType {
    /// Class id as emitted by the type model (1-based)
    pub fn from_class_id(id: u32) -> Option<Self> {
        let t = match id {
            1 => ThreatType::CommandInjection,
            2 => ThreatType::DirectoryTraversal,
            3 => ThreatType::FileInclusion,
            4 => ThreatType::LdapInjection,
            5 => ThreatType::NoSqlInjection,
            6 => ThreatType::OpenRedirect,
            7 => ThreatType::SqlInjection,
            8 => ThreatType::ServerSideTemplateInjection,
            9 => ThreatType::CrossSiteScripting,
            10 => ThreatType::XmlExternalEntity,
            _ => return None,
        };
        Some(t)
    }

    /// Label reported to the control plane
    pub fn label(&self) -> &'static str {
        match self {
            ThreatType::CommandInjection => "Command Injection",
            ThreatType::DirectoryTraversal => "Directory Traversal",
            ThreatType::FileInclusion => "File Inclusion",
            ThreatType::LdapInjection => "LDAP Injection",
            ThreatType::NoSqlInjection => "NoSQL Injection",
            ThreatType::OpenRedirect => "Open Redirect",
            ThreatType::SqlInjection => "SQL Injection",
            ThreatType::ServerSideTemplateInjection => "Server-Side Template Injection",
            ThreatType::CrossSiteScripting => "Cross-Site Scripting (XSS)",
            ThreatType::XmlExternalEntity => "XML External Entity (XXE)",
        }
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Secondary prediction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatPrediction {
    pub threat_type: ThreatType,
    pub confidence: f32,
}
