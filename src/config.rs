/*!
 * Core Configuration
 *
 * Defaults, environment overrides and JSON documents for the sandbox core.
 * Allow-lists themselves are not configured here: they arrive through the
 * property source (restrictions) or an allow-list resource (verification).
 */

use crate::core::errors::SandboxResult;
use crate::core::limits::{
    DEFAULT_PROPERTY_NAMESPACE, DEFAULT_SURFACE_REQUEST_TIMEOUT, DEFAULT_VERIFICATION_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Broadcast actions only the platform may send
pub const DEFAULT_PROTECTED_BROADCASTS: &[&str] = &[
    "android.intent.action.SCREEN_ON",
    "android.intent.action.SCREEN_OFF",
    "android.intent.action.USER_PRESENT",
    "android.intent.action.TIME_TICK",
    "android.intent.action.TIME_SET",
    "android.intent.action.TIMEZONE_CHANGED",
    "android.intent.action.BATTERY_CHANGED",
    "android.intent.action.BATTERY_LOW",
    "android.intent.action.BATTERY_OKAY",
    "android.intent.action.ACTION_POWER_CONNECTED",
    "android.intent.action.ACTION_POWER_DISCONNECTED",
    "android.intent.action.CONFIGURATION_CHANGED",
    "android.intent.action.LOCALE_CHANGED",
    "android.intent.action.AIRPLANE_MODE",
];

/// Bytecode verification settings
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Verify module bytecode before trusting it
    pub enabled: bool,
    /// Deadline for one verification job, measured from enqueue
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
    /// Class namespaces (dotted prefixes) checked against the allow-list.
    /// Empty means every externally referenced class is checked.
    pub restricted_namespaces: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_VERIFICATION_TIMEOUT,
            restricted_namespaces: Vec::new(),
        }
    }
}

/// Session lifecycle settings
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "surface_request_timeout_ms")]
    pub surface_request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            surface_request_timeout: DEFAULT_SURFACE_REQUEST_TIMEOUT,
        }
    }
}

/// Restriction engine settings that are not part of the pushed allow-lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionConfig {
    /// Namespace the restriction properties are read from
    pub property_namespace: String,
    /// Broadcast actions a receiver may always register for when no allow-list is set
    pub protected_broadcasts: Vec<String>,
    /// Packages whose services the sandbox may always start or bind
    pub exempt_service_packages: Vec<String>,
    /// Web view provider package; its developer/safe-mode providers stay reachable
    pub webview_package: Option<String>,
}

impl Default for RestrictionConfig {
    fn default() -> Self {
        Self {
            property_namespace: DEFAULT_PROPERTY_NAMESPACE.to_string(),
            protected_broadcasts: DEFAULT_PROTECTED_BROADCASTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exempt_service_packages: Vec::new(),
            webview_package: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxCoreConfig {
    pub verification: VerificationConfig,
    pub sessions: SessionConfig,
    pub restrictions: RestrictionConfig,
}

impl SandboxCoreConfig {
    /// Defaults with `SDKSANDBOX_*` environment overrides applied
    ///
    /// Environment variables:
    /// - SDKSANDBOX_VERIFICATION_ENABLED: true/false
    /// - SDKSANDBOX_VERIFICATION_TIMEOUT_MS: job deadline
    /// - SDKSANDBOX_RESTRICTED_NAMESPACES: comma separated class prefixes
    /// - SDKSANDBOX_SURFACE_TIMEOUT_MS: surface package request deadline
    /// - SDKSANDBOX_PROPERTY_NAMESPACE: restriction property namespace
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Parse a full JSON document; missing sections keep their defaults
    pub fn from_json_str(json: &str) -> SandboxResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SandboxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SDKSANDBOX_VERIFICATION_ENABLED") {
            match value.parse::<bool>() {
                Ok(enabled) => self.verification.enabled = enabled,
                Err(_) => warn!(value = %value, "Ignoring invalid SDKSANDBOX_VERIFICATION_ENABLED"),
            }
        }
        if let Some(ms) = parse_millis(&lookup, "SDKSANDBOX_VERIFICATION_TIMEOUT_MS") {
            self.verification.timeout = ms;
        }
        if let Some(value) = lookup("SDKSANDBOX_RESTRICTED_NAMESPACES") {
            self.verification.restricted_namespaces = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ms) = parse_millis(&lookup, "SDKSANDBOX_SURFACE_TIMEOUT_MS") {
            self.sessions.surface_request_timeout = ms;
        }
        if let Some(namespace) = lookup("SDKSANDBOX_PROPERTY_NAMESPACE") {
            self.restrictions.property_namespace = namespace;
        }
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    match value.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!(key = key, value = %value, "Ignoring invalid duration override");
            None
        }
    }
}
