//! Shallow shape validation for LLM output.
//!
//! This is a guard against a bad completion, not a full schema validator:
//! only key presence is checked, values are left to the lenient typed
//! decode that follows.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("not a JSON object")]
    NotAnObject,
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportShape {
    ChunkSummary,
    ExecutiveReport,
    Digest,
}

const CHUNK_SUMMARY_KEYS: &[&str] = &[
    "chunk_id",
    "date",
    "timezone",
    "participants",
    "highlights",
    "issues",
    "decisions",
    "actions",
    "blockers",
    "questions",
    "timeline",
    "evidence_quotes",
    "char_counts",
    "tokens_estimate",
];

const EXECUTIVE_REPORT_KEYS: &[&str] = &[
    "chat_id",
    "date",
    "verdict",
    "health_score",
    "client_mood",
    "summary",
    "incidents",
    "warnings",
    "decisions",
    "open_questions",
    "sla",
    "timeline",
    "notable_quotes",
    "quality_flags",
    "trimming_report",
    "char_counts",
    "tokens_estimate",
];

const DIGEST_KEYS: &[&str] = &[
    "date",
    "verdict",
    "scoreboard",
    "score_avg",
    "top_attention",
    "themes",
    "risks",
    "sla",
    "quality_flags",
    "trimming_report",
];

impl ReportShape {
    pub fn name(&self) -> &'static str {
        match self {
            ReportShape::ChunkSummary => "chunk_summary",
            ReportShape::ExecutiveReport => "executive_report",
            ReportShape::Digest => "digest",
        }
    }

    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            ReportShape::ChunkSummary => CHUNK_SUMMARY_KEYS,
            ReportShape::ExecutiveReport => EXECUTIVE_REPORT_KEYS,
            ReportShape::Digest => DIGEST_KEYS,
        }
    }

    /// Checks that every required key is present. Extra keys pass.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        let Some(obj) = value.as_object() else {
            return Err(SchemaViolation::NotAnObject);
        };
        for &key in self.required_keys() {
            if !obj.contains_key(key) {
                return Err(SchemaViolation::MissingKey(key));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_object(shape: ReportShape) -> Value {
        let mut obj = serde_json::Map::new();
        for key in shape.required_keys() {
            obj.insert((*key).to_string(), json!(null));
        }
        Value::Object(obj)
    }

    #[test]
    fn key_counts_match_shapes() {
        assert_eq!(ReportShape::ChunkSummary.required_keys().len(), 14);
        assert_eq!(ReportShape::ExecutiveReport.required_keys().len(), 17);
        assert_eq!(ReportShape::Digest.required_keys().len(), 10);
    }

    #[test]
    fn full_object_passes_all_shapes() {
        for shape in [
            ReportShape::ChunkSummary,
            ReportShape::ExecutiveReport,
            ReportShape::Digest,
        ] {
            assert_eq!(shape.validate(&full_object(shape)), Ok(()));
        }
    }

    #[test]
    fn extra_keys_still_pass() {
        let mut value = full_object(ReportShape::Digest);
        value
            .as_object_mut()
            .unwrap()
            .insert("extra".into(), json!(42));
        assert_eq!(ReportShape::Digest.validate(&value), Ok(()));
    }

    #[test]
    fn any_single_missing_key_fails() {
        for shape in [
            ReportShape::ChunkSummary,
            ReportShape::ExecutiveReport,
            ReportShape::Digest,
        ] {
            for &missing in shape.required_keys() {
                let mut value = full_object(shape);
                value.as_object_mut().unwrap().remove(missing);
                assert_eq!(
                    shape.validate(&value),
                    Err(SchemaViolation::MissingKey(missing)),
                    "shape {} key {missing}",
                    shape.name()
                );
            }
        }
    }

    #[test]
    fn non_object_fails() {
        assert_eq!(
            ReportShape::ChunkSummary.validate(&json!([1, 2])),
            Err(SchemaViolation::NotAnObject)
        );
        assert_eq!(
            ReportShape::ChunkSummary.validate(&json!("text")),
            Err(SchemaViolation::NotAnObject)
        );
    }

    #[test]
    fn values_are_not_checked() {
        // Presence-only by design: wrong types still pass this layer.
        let mut value = full_object(ReportShape::ExecutiveReport);
        value
            .as_object_mut()
            .unwrap()
            .insert("health_score".into(), json!("not a number"));
        assert_eq!(ReportShape::ExecutiveReport.validate(&value), Ok(()));
    }
}
