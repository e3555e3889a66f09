/*!
 * Load Status
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one (caller, module) session
///
/// ```text
/// LoadPending ──► Loaded ──► Unloaded
///      │                       ▲
///      └──► LoadFailed ────────┘ (no-op unload)
///
/// any state ──► Unloaded on sandbox death
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    LoadPending,
    Loaded,
    LoadFailed,
    Unloaded,
}

impl LoadStatus {
    /// Pending or loaded: the session still occupies its key
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::LoadPending | Self::Loaded)
    }

    /// No further transition is possible except a forced unload
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoadFailed | Self::Unloaded)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LoadPending => "load_pending",
            Self::Loaded => "loaded",
            Self::LoadFailed => "load_failed",
            Self::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
