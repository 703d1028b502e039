use std::sync::Arc;

use tracing::debug;

use magpie_common::{ContentRecord, QualityRules};

use crate::traits::{Detection, LanguageDetector};

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    TooShort { len: usize, min: usize },
    BannedToken(String),
    SymbolHeavy(f32),
    WrongLanguage(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooShort { len, min } => write!(f, "body too short ({len} < {min})"),
            RejectReason::BannedToken(t) => write!(f, "banned token {t:?}"),
            RejectReason::SymbolHeavy(r) => write!(f, "non-text ratio {r:.2}"),
            RejectReason::WrongLanguage(l) => write!(f, "non-target language {l}"),
        }
    }
}

/// Minimum-content and language policy applied before persistence.
///
/// Language is deliberately lenient: an unknown or low-confidence
/// detection passes, only a definite non-target detection rejects.
/// Dropping good content because detection mis-fired costs more than
/// letting an occasional foreign record through to downstream review.
pub struct QualityGate {
    rules: QualityRules,
    banned_lower: Vec<String>,
    detector: Arc<dyn LanguageDetector>,
}

impl QualityGate {
    pub fn new(rules: &QualityRules, detector: Arc<dyn LanguageDetector>) -> Self {
        Self {
            rules: rules.clone(),
            banned_lower: rules.banned_tokens.iter().map(|t| t.to_lowercase()).collect(),
            detector,
        }
    }

    pub fn accept(&self, record: &ContentRecord) -> GateDecision {
        let len = record.body.chars().count();
        if len < self.rules.min_body_len {
            return GateDecision::Reject(RejectReason::TooShort {
                len,
                min: self.rules.min_body_len,
            });
        }

        let body_lower = record.body.to_lowercase();
        for token in &self.banned_lower {
            if body_lower.contains(token.as_str()) {
                return GateDecision::Reject(RejectReason::BannedToken(token.clone()));
            }
        }

        let ratio = symbol_ratio(&record.body);
        if ratio > self.rules.max_symbol_ratio {
            return GateDecision::Reject(RejectReason::SymbolHeavy(ratio));
        }

        match self.detector.detect(&record.body) {
            Detection {
                language: Some(lang),
                confidence,
            } if lang != self.rules.target_language
                && confidence >= self.rules.min_confidence =>
            {
                GateDecision::Reject(RejectReason::WrongLanguage(lang))
            }
            detection => {
                if detection.language.is_none() {
                    debug!(
                        url = record.canonical_url.as_str(),
                        "Language unknown, passing through"
                    );
                }
                GateDecision::Accept
            }
        }
    }
}

/// Fraction of non-whitespace characters that are not alphanumeric.
/// High values mean the extractor captured markup or boilerplate
/// rather than prose.
fn symbol_ratio(body: &str) -> f32 {
    let mut total = 0usize;
    let mut symbols = 0usize;
    for c in body.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if !c.is_alphanumeric() {
            symbols += 1;
        }
    }
    if total == 0 {
        return 1.0;
    }
    symbols as f32 / total as f32
}

/// Offline trigram-based detection via whatlang.
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Detection {
        match whatlang::detect(text) {
            Some(info) => Detection {
                language: Some(info.lang().code().to_string()),
                confidence: info.confidence() as f32,
            },
            None => Detection::unknown(),
        }
    }
}
