//! Typed error hierarchy for the effect pipeline.
//!
//! Uses `thiserror` for library-grade errors.  Host-integration glue should
//! wrap these in its own reporting at the plugin boundary.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`MatteError::error_code`]
//! for structured telemetry without string parsing.

/// All errors originating from the effect-pipeline core.
#[derive(Debug, thiserror::Error)]
pub enum MatteError {
    // ── GPU resources ────────────────────────────────────────────────
    /// A GPU buffer allocation, mapping, unmapping, or deallocation failed.
    #[error("resource failure in {call}: {detail} (status {code})")]
    Resource {
        call: &'static str,
        code: i32,
        detail: String,
    },

    // ── Accelerator provider ─────────────────────────────────────────
    /// An accelerator configure/transfer/run entry point returned non-success.
    #[error("provider failure in {call}: {detail} (status {code})")]
    Provider {
        call: &'static str,
        code: i32,
        detail: String,
    },

    /// The provider returned no usable result for this frame.
    #[error("provider '{provider}' did not return a result")]
    NoResult { provider: String },

    // ── Runtime availability ─────────────────────────────────────────
    /// The accelerator runtime or required hardware is absent.  Degrades the
    /// whole provider family, not a single instance.
    #[error("accelerator runtime unavailable: {0}")]
    Unavailable(String),

    // ── Host boundary ────────────────────────────────────────────────
    /// A host-compositor call (capture, copy, composite, present) failed.
    #[error("host compositor failure in {call}: {detail}")]
    Host {
        call: &'static str,
        detail: String,
    },

    // ── Contract violations ──────────────────────────────────────────
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl MatteError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: GPU resources
    /// - 2xx: accelerator provider
    /// - 3xx: runtime availability
    /// - 4xx: host boundary
    /// - 6xx: invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Resource { .. } => 100,
            Self::Provider { .. } => 200,
            Self::NoResult { .. } => 201,
            Self::Unavailable(_) => 300,
            Self::Host { .. } => 400,
            Self::InvariantViolation(_) => 600,
        }
    }

    /// Whether the pipeline can keep running after logging this error.
    ///
    /// Recoverable errors cause a single frame to pass through unmodified;
    /// unrecoverable ones take the provider out of service until the next
    /// switch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoResult { .. } | Self::Host { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MatteError>;

#[cfg(test)]
mod tests {
    use super::MatteError;

    #[test]
    fn error_codes_are_grouped_by_category() {
        let resource = MatteError::Resource {
            call: "alloc_image",
            code: -3,
            detail: "out of memory".into(),
        };
        let provider = MatteError::Provider {
            call: "run_effect",
            code: -13,
            detail: "cuda error".into(),
        };
        assert_eq!(resource.error_code() / 100, 1);
        assert_eq!(provider.error_code() / 100, 2);
        assert_eq!(MatteError::Unavailable("no runtime".into()).error_code(), 300);
    }

    #[test]
    fn frame_level_errors_are_recoverable() {
        assert!(MatteError::NoResult {
            provider: "background-segmentation".into()
        }
        .is_recoverable());
        assert!(!MatteError::Unavailable("missing library".into()).is_recoverable());
    }
}
