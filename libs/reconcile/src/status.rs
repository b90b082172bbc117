//! Convergence classification written back to declared objects.

use serde::{Deserialize, Serialize};

/// How far a declared object is from its desired infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// The last pass completed without applying anything.
    Converged,

    /// The last pass applied changes or was canceled to wait on the provider.
    Converging,

    /// Passes keep failing; someone needs to look.
    NotConverged,

    /// No pass has finished yet.
    #[default]
    Unknown,
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Converging => "converging",
            Self::NotConverged => "not_converged",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
