//! Stable provider identities.
//!
//! The numeric values are persisted in host settings blobs and must never be
//! renumbered.

use std::fmt;

/// Identity of a matte provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ProviderId {
    /// No provider; the pipeline passes frames through untouched.
    Invalid = -1,
    /// Resolve to the best available provider at apply time.
    Automatic = 0,
    /// Accelerated background segmentation.
    BackgroundSegmentation = 1,
}

impl ProviderId {
    /// Concrete providers in descending preference order, used to resolve
    /// [`ProviderId::Automatic`].
    pub const PRIORITY: [ProviderId; 1] = [ProviderId::BackgroundSegmentation];

    /// Decode a persisted settings value.  Unknown values map to `Invalid`
    /// rather than failing, so stale settings from a newer version degrade
    /// to pass-through.
    pub fn from_settings(value: i64) -> Self {
        match value {
            0 => ProviderId::Automatic,
            1 => ProviderId::BackgroundSegmentation,
            _ => ProviderId::Invalid,
        }
    }

    /// Persisted settings value.
    pub fn as_settings(self) -> i64 {
        self as i64
    }

    /// Whether this id names a concrete provider implementation.
    pub fn is_concrete(self) -> bool {
        !matches!(self, ProviderId::Invalid | ProviderId::Automatic)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderId::Invalid => "invalid",
            ProviderId::Automatic => "automatic",
            ProviderId::BackgroundSegmentation => "background segmentation",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderId;

    #[test]
    fn settings_round_trip() {
        for id in [
            ProviderId::Invalid,
            ProviderId::Automatic,
            ProviderId::BackgroundSegmentation,
        ] {
            assert_eq!(ProviderId::from_settings(id.as_settings()), id);
        }
    }

    #[test]
    fn unknown_settings_degrade_to_invalid() {
        assert_eq!(ProviderId::from_settings(99), ProviderId::Invalid);
        assert_eq!(ProviderId::from_settings(-2), ProviderId::Invalid);
    }
}
