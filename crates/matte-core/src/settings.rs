//! Settings-blob parsing.
//!
//! Configuration arrives from the host as a generic key-value blob.  The
//! core inspects exactly one key: the selected provider enumerant.

use serde::Deserialize;

/// Settings key for the selected provider.
pub const KEY_PROVIDER: &str = "provider";

/// Reserved enumerant meaning "resolve a concrete provider automatically".
pub const PROVIDER_AUTOMATIC: i64 = 0;

/// The subset of the host settings blob the core understands.
///
/// Unknown keys are ignored; a missing `provider` key defaults to automatic
/// selection.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    /// Selected provider enumerant (see `matte-providers`).
    pub provider: i64,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            provider: PROVIDER_AUTOMATIC,
        }
    }
}

impl EffectSettings {
    /// Parse the host settings blob, falling back to defaults for anything
    /// missing or malformed.  Configuration updates must never fail the
    /// pipeline.
    pub fn from_blob(blob: &serde_json::Value) -> Self {
        serde_json::from_value(blob.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{EffectSettings, PROVIDER_AUTOMATIC};
    use serde_json::json;

    #[test]
    fn missing_provider_key_defaults_to_automatic() {
        let s = EffectSettings::from_blob(&json!({ "unrelated": true }));
        assert_eq!(s.provider, PROVIDER_AUTOMATIC);
    }

    #[test]
    fn provider_key_is_read_as_integer_enumerant() {
        let s = EffectSettings::from_blob(&json!({ "provider": 1 }));
        assert_eq!(s.provider, 1);
    }

    #[test]
    fn malformed_blob_falls_back_to_defaults() {
        let s = EffectSettings::from_blob(&json!([1, 2, 3]));
        assert_eq!(s.provider, PROVIDER_AUTOMATIC);
    }
}
