//! Runtime configuration.

/// Per-thread settings for the reactive runtime.
///
/// Installed with [`Runtime::configure`](crate::reactive::Runtime::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Panic on lifecycle defects such as disposing an adapter twice.
    ///
    /// When false the defect is logged and reported as an error value.
    pub strict_disposal: bool,
}

impl RuntimeConfig {
    /// Configuration that reports lifecycle defects without panicking.
    pub fn lenient() -> Self {
        Self {
            strict_disposal: false,
        }
    }

    /// Configuration that panics on lifecycle defects.
    pub fn strict() -> Self {
        Self {
            strict_disposal: true,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_disposal: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_follows_build_profile() {
        assert_eq!(
            RuntimeConfig::default().strict_disposal,
            cfg!(debug_assertions)
        );
        assert!(!RuntimeConfig::lenient().strict_disposal);
        assert!(RuntimeConfig::strict().strict_disposal);
    }
}
