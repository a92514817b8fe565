//! Caller context and raw payload validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sovledger_core::config::PipelineConfig;
use sovledger_core::entry::{bind_columns, QUANTUM_SIG_KEY, TAGS_KEY};
use sovledger_core::telemetry::ECG_KEY;
use thiserror::Error;

/// Device identifier recorded when the caller does not supply one
pub const DEFAULT_DEVICE_ID: &str = "ROOT_CONSOLE";

/// Origin key used when the caller's network origin is unknown
pub const UNKNOWN_ORIGIN: &str = "unknown";

const DID_LEN: (usize, usize) = (3, 255);
const PUBKEY_LEN: (usize, usize) = (16, 512);
const SIGNATURE_LEN: (usize, usize) = (32, 1024);
const QUANTUM_SIG_LEN: (usize, usize) = (64, 2048);
const DEVICE_ID_MAX: usize = 128;

/// How strongly the identity collaborator verified the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssuranceLevel {
    #[default]
    Low,
    Substantial,
    High,
}

/// Pre-verified identity context supplied with every commit
///
/// Signatures are trusted as supplied; only presence and shape are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub assurance_level: AssuranceLevel,
}

impl CallerContext {
    pub fn new(
        did: impl Into<String>,
        pubkey: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            did: did.into(),
            pubkey: pubkey.into(),
            signature: signature.into(),
            ..Self::default()
        }
    }

    pub fn with_assurance(mut self, level: AssuranceLevel) -> Self {
        self.assurance_level = level;
        self
    }
}

/// Audit metadata about where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerProfile {
    /// Network origin, used as the reputation key
    pub origin: Option<String>,
    /// Correlation token mixed into the commit salt
    pub trace_id: Option<String>,
    pub user_agent: Option<String>,
}

impl CallerProfile {
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..Self::default()
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn origin_key(&self) -> &str {
        self.origin
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or(UNKNOWN_ORIGIN)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} must be between {min} and {max} characters, got {actual}")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("at most {max} tags allowed, got {actual}")]
    TooManyTags { max: usize, actual: usize },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A commit request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCommit {
    /// Uppercase action label
    pub action: String,
    /// Normalised payload, not yet sanitized
    pub payload: Map<String, Value>,
    pub tags: Vec<String>,
    pub quantum_signature: Option<String>,
}

fn check_len(
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
) -> Result<(), ValidationError> {
    let actual = value.chars().count();
    if actual == 0 {
        return Err(ValidationError::MissingField(field));
    }
    if actual < min || actual > max {
        return Err(ValidationError::Length {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

/// Check the caller context carries a usable identity
pub fn validate_context(ctx: &CallerContext) -> Result<(), ValidationError> {
    check_len("did", ctx.did.trim(), DID_LEN)?;
    check_len("pubkey", ctx.pubkey.trim(), PUBKEY_LEN)?;
    check_len("signature", ctx.signature.trim(), SIGNATURE_LEN)?;
    if let Some(device_id) = &ctx.device_id {
        check_len("device_id", device_id.trim(), (1, DEVICE_ID_MAX))?;
    }
    Ok(())
}

/// Validate a raw payload and caller context.
///
/// `action`, `tags` and `quantum_sig` are normalised in place and also
/// returned as their own entry fields, so the digest covers both copies.
pub fn validate(
    raw: Value,
    ctx: &CallerContext,
    limits: &PipelineConfig,
) -> Result<ValidatedCommit, ValidationError> {
    let mut payload = match raw {
        Value::Object(map) => map,
        _ => return Err(ValidationError::PayloadNotObject),
    };

    let action = match payload.get("action") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("action")),
        Some(Value::String(action)) => action.trim().to_uppercase(),
        Some(_) => {
            return Err(ValidationError::Invalid {
                field: "action",
                reason: "must be a string".to_string(),
            })
        }
    };
    check_len("action", &action, (1, limits.max_action_len))?;
    if !action
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::Invalid {
            field: "action",
            reason: "only letters, digits and underscores are allowed".to_string(),
        });
    }

    validate_context(ctx)?;

    match payload.get(ECG_KEY) {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => {
            return Err(ValidationError::Invalid {
                field: "ecg",
                reason: "must be an object".to_string(),
            })
        }
    }

    let tags = match payload.remove(TAGS_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            if items.len() > limits.max_tags {
                return Err(ValidationError::TooManyTags {
                    max: limits.max_tags,
                    actual: items.len(),
                });
            }
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(tag) => {
                        let tag = tag.trim().to_string();
                        check_len("tag", &tag, (1, limits.max_tag_len))?;
                        Ok(tag)
                    }
                    _ => Err(ValidationError::Invalid {
                        field: "tags",
                        reason: "tags must be strings".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        Some(_) => {
            return Err(ValidationError::Invalid {
                field: "tags",
                reason: "must be an array".to_string(),
            })
        }
    };

    let quantum_signature = match payload.remove(QUANTUM_SIG_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(sig)) => {
            let sig = sig.trim().to_string();
            check_len("quantum_sig", &sig, QUANTUM_SIG_LEN)?;
            Some(sig)
        }
        Some(_) => {
            return Err(ValidationError::Invalid {
                field: "quantum_sig",
                reason: "must be a string".to_string(),
            })
        }
    };

    bind_columns(&mut payload, &action, &tags, quantum_signature.as_deref());

    Ok(ValidatedCommit {
        action,
        payload,
        tags,
        quantum_signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CallerContext {
        CallerContext::new(
            "did:example:alice",
            "ed25519:alice-public-key-0001",
            "a".repeat(64),
        )
    }

    #[test]
    fn test_valid_payload() {
        let commit = validate(
            json!({"action": " update_profile ", "tags": ["ui", "profile"], "data": {"name": "A"}}),
            &ctx(),
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(commit.action, "UPDATE_PROFILE");
        assert_eq!(commit.tags, vec!["ui", "profile"]);
        assert_eq!(commit.payload["action"], "UPDATE_PROFILE");
        assert_eq!(commit.payload["tags"], json!(["ui", "profile"]));
        assert!(commit.payload.contains_key("data"));
        assert!(!commit.payload.contains_key("quantum_sig"));
        assert_eq!(commit.quantum_signature, None);
    }

    #[test]
    fn test_missing_action() {
        let result = validate(json!({"data": 1}), &ctx(), &PipelineConfig::default());
        assert_eq!(result, Err(ValidationError::MissingField("action")));

        let result = validate(json!({"action": "   "}), &ctx(), &PipelineConfig::default());
        assert_eq!(result, Err(ValidationError::MissingField("action")));
    }

    #[test]
    fn test_non_object_payload() {
        let result = validate(json!(["action"]), &ctx(), &PipelineConfig::default());
        assert_eq!(result, Err(ValidationError::PayloadNotObject));
    }

    #[test]
    fn test_missing_identity_fields() {
        let mut context = ctx();
        context.signature.clear();
        assert_eq!(
            validate_context(&context),
            Err(ValidationError::MissingField("signature"))
        );

        let context = CallerContext::new("did:example:alice", "short", "a".repeat(64));
        assert!(matches!(
            validate_context(&context),
            Err(ValidationError::Length { field: "pubkey", .. })
        ));
    }

    #[test]
    fn test_tag_limits() {
        let limits = PipelineConfig::default();
        let many: Vec<String> = (0..21).map(|i| format!("t{}", i)).collect();
        assert_eq!(
            validate(json!({"action": "A", "tags": many}), &ctx(), &limits),
            Err(ValidationError::TooManyTags { max: 20, actual: 21 })
        );
        assert!(matches!(
            validate(json!({"action": "A", "tags": ["x".repeat(33)]}), &ctx(), &limits),
            Err(ValidationError::Length { field: "tag", .. })
        ));
    }

    #[test]
    fn test_quantum_signature_bounds() {
        let limits = PipelineConfig::default();
        let commit = validate(
            json!({"action": "A", "quantum_sig": "q".repeat(64)}),
            &ctx(),
            &limits,
        )
        .unwrap();
        assert_eq!(commit.quantum_signature.as_deref().map(str::len), Some(64));
        assert_eq!(commit.payload["quantum_sig"], Value::from("q".repeat(64)));

        assert!(validate(json!({"action": "A", "quantum_sig": "q"}), &ctx(), &limits).is_err());
    }

    #[test]
    fn test_ecg_must_be_an_object() {
        let limits = PipelineConfig::default();
        assert!(validate(
            json!({"action": "A", "ecg": {"intensity": 0.4}}),
            &ctx(),
            &limits
        )
        .is_ok());
        assert!(matches!(
            validate(json!({"action": "A", "ecg": 0.4}), &ctx(), &limits),
            Err(ValidationError::Invalid { field: "ecg", .. })
        ));
    }

    #[test]
    fn test_action_charset() {
        let result = validate(
            json!({"action": "DROP TABLE"}),
            &ctx(),
            &PipelineConfig::default(),
        );
        assert!(matches!(
            result,
            Err(ValidationError::Invalid { field: "action", .. })
        ));
    }

    #[test]
    fn test_origin_key_defaults() {
        assert_eq!(CallerProfile::default().origin_key(), UNKNOWN_ORIGIN);
        assert_eq!(CallerProfile::from_origin("10.0.0.1").origin_key(), "10.0.0.1");
    }
}
