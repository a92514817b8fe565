//! Caller telemetry carried alongside ledger entries.
//!
//! Telemetry is read from the sanitized payload, so it is covered by the
//! entry digest. The derived columns are lenient: a missing or unreadable
//! signal becomes `0.0`, and anything outside `[0, 1]` is clamped.

use serde_json::{Map, Value};

/// Payload key holding free-form telemetry
pub const TELEMETRY_KEY: &str = "telemetry";

/// Payload key holding the ECG signal object
pub const ECG_KEY: &str = "ecg";

/// Pattern recorded when the caller sends none
pub const DEFAULT_ECG_PATTERN: &str = "stable";

/// Longest pattern label kept
pub const MAX_ECG_PATTERN_LEN: usize = 32;

/// Clamp a loosely typed signal into `[0, 1]`.
///
/// Numbers and numeric strings are accepted; anything else, including NaN,
/// reads as `0.0`.
pub fn clamp_unit(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if !v.is_nan() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Telemetry columns of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub data: Map<String, Value>,
    pub ecg_intensity: f64,
    pub ecg_entropy: f64,
    pub ecg_pattern: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            data: Map::new(),
            ecg_intensity: 0.0,
            ecg_entropy: 0.0,
            ecg_pattern: DEFAULT_ECG_PATTERN.to_string(),
        }
    }
}

impl Telemetry {
    /// Derive the telemetry columns from a payload.
    ///
    /// ECG readings come from the `ecg` object (`intensity`, `entropy`,
    /// `pattern`), falling back to top-level `ecg_*` keys.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let data = match payload.get(TELEMETRY_KEY) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let ecg = match payload.get(ECG_KEY) {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };
        let signal = |name: &str| {
            ecg.and_then(|m| m.get(name))
                .or_else(|| payload.get(&format!("ecg_{}", name)))
        };

        let ecg_pattern = match signal("pattern") {
            Some(Value::String(p)) if !p.trim().is_empty() => {
                p.trim().chars().take(MAX_ECG_PATTERN_LEN).collect()
            }
            _ => DEFAULT_ECG_PATTERN.to_string(),
        };

        Self {
            data,
            ecg_intensity: clamp_unit(signal("intensity")),
            ecg_entropy: clamp_unit(signal("entropy")),
            ecg_pattern,
        }
    }
}
