//! Output Recovery Parser
//!
//! Engines print progress text around their JSON result and occasionally
//! leave a trailing comma behind. Recovery tries progressively looser
//! strategies over the captured lines and keeps the first JSON object that
//! parses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use zoneopt_core::OutputError;

/// Number of characters of captured output quoted in a parse failure.
pub const PREVIEW_CHARS: usize = 1000;

static TRAILING_COMMA: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r",\s*([}\]])").ok());

/// How a document was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// The whole output is one JSON object.
    Strict,
    /// The span from the first `{` to the last `}`.
    Bounded,
    /// The bounded span with trailing commas removed.
    Repaired,
}

impl RecoveryStrategy {
    /// Strategies in the order they are attempted.
    pub const ORDER: [RecoveryStrategy; 3] = [
        RecoveryStrategy::Strict,
        RecoveryStrategy::Bounded,
        RecoveryStrategy::Repaired,
    ];

    fn attempt(self, text: &str) -> Option<Value> {
        let candidate = match self {
            RecoveryStrategy::Strict => text.to_string(),
            RecoveryStrategy::Bounded => bounded(text)?.to_string(),
            RecoveryStrategy::Repaired => {
                let regex = TRAILING_COMMA.as_ref()?;
                regex.replace_all(bounded(text)?, "$1").into_owned()
            }
        };
        serde_json::from_str::<Value>(candidate.trim())
            .ok()
            .filter(Value::is_object)
    }
}

/// A structured document recovered from engine output.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub document: Value,
    pub strategy: RecoveryStrategy,
}

/// Recover the engine's JSON object from its captured stdout lines.
pub fn recover_document(lines: &[String]) -> Result<Recovered, OutputError> {
    let text = lines.join("\n");
    for strategy in RecoveryStrategy::ORDER {
        if let Some(document) = strategy.attempt(&text) {
            if strategy != RecoveryStrategy::Strict {
                tracing::debug!(?strategy, "Engine output recovered from noisy text");
            }
            return Ok(Recovered { document, strategy });
        }
    }
    Err(OutputError::Unrecoverable {
        preview: preview(&text),
    })
}

/// The slice from the first `{` through the last `}`.
fn bounded(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// The first [`PREVIEW_CHARS`] characters of `text`.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_strict_parse() {
        let recovered = recover_document(&lines("{\"success\": true, \"n\": 1}")).unwrap();
        assert_eq!(recovered.strategy, RecoveryStrategy::Strict);
        assert_eq!(recovered.document, json!({"success": true, "n": 1}));
    }

    #[test]
    fn test_multiline_json_is_strict() {
        let recovered = recover_document(&lines("{\n  \"a\": [1,\n 2]\n}")).unwrap();
        assert_eq!(recovered.strategy, RecoveryStrategy::Strict);
    }

    #[test]
    fn test_bounded_parse_skips_diagnostics() {
        let text = "Loading raster...\nGeneration 10/50\n{\"success\": true}\nDone.";
        let recovered = recover_document(&lines(text)).unwrap();
        assert_eq!(recovered.strategy, RecoveryStrategy::Bounded);
        assert_eq!(recovered.document, json!({"success": true}));
    }

    #[test]
    fn test_repaired_parse_strips_trailing_commas() {
        let text = "progress 100%\n{\"a\": [1, 2,], \"b\": {\"c\": 3,},}";
        let recovered = recover_document(&lines(text)).unwrap();
        assert_eq!(recovered.strategy, RecoveryStrategy::Repaired);
        assert_eq!(recovered.document, json!({"a": [1, 2], "b": {"c": 3}}));
    }

    #[test]
    fn test_no_braces_is_unrecoverable() {
        let err = recover_document(&lines("Traceback (most recent call last):\nValueError")).unwrap_err();
        match err {
            OutputError::Unrecoverable { preview } => assert!(preview.starts_with("Traceback")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_object_json_is_rejected() {
        assert!(recover_document(&lines("[1, 2, 3]")).is_err());
        assert!(recover_document(&lines("42")).is_err());
    }

    #[test]
    fn test_empty_output_is_unrecoverable() {
        assert!(recover_document(&[]).is_err());
    }

    #[test]
    fn test_preview_is_truncated() {
        let noise = "x".repeat(5000);
        let OutputError::Unrecoverable { preview } = recover_document(&[noise]).unwrap_err() else {
            panic!("expected unrecoverable");
        };
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn document() -> impl Strategy<Value = Value> {
            proptest::collection::btree_map("[a-z]{1,8}", 0i64..1000, 1..6).prop_map(|fields| {
                Value::Object(fields.into_iter().map(|(k, v)| (k, json!(v))).collect())
            })
        }

        proptest! {
            #[test]
            fn prop_noise_and_trailing_commas_recover_same_value(
                doc in document(),
                before in "[a-zA-Z0-9 .%:]{0,40}",
                after in "[a-zA-Z0-9 .%:]{0,40}",
            ) {
                let pure = serde_json::to_string(&doc).unwrap();
                let trailing = format!("{},}}", &pure[..pure.len() - 1]);

                let strict = recover_document(&[pure.clone()]).unwrap().document;
                let noisy = recover_document(&[before.clone(), pure, after.clone()]).unwrap().document;
                let repaired = recover_document(&[before, trailing, after]).unwrap().document;

                prop_assert_eq!(&strict, &doc);
                prop_assert_eq!(&noisy, &doc);
                prop_assert_eq!(&repaired, &doc);
            }
        }
    }
}
