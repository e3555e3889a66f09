/*!
 * Restriction Settings
 *
 * Reads restriction properties from the policy source and keeps them as one
 * immutable snapshot. A change notification rebuilds the snapshot from the
 * changed keys and publishes it with a single atomic swap.
 */

use super::proto::{
    ActivityAllowlists, AllowedActivities, AllowedBroadcastReceivers, AllowedContentProviders,
    AllowedServices, BroadcastReceiverAllowlists, ContentProviderAllowlists, ServiceAllowlists,
};
use super::rules::{parse_patterns, FieldPattern, RestrictionRule};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::sync::RcuCell;
use crate::core::types::TargetSdkVersion;
use ahash::RandomState;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use dashmap::DashMap;
use parking_lot::Mutex;
use prost::Message;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Property keys read from the restriction namespace
pub mod keys {
    pub const ENFORCE_RESTRICTIONS: &str = "sdksandbox_enforce_restrictions";
    pub const APPLY_NEXT_RESTRICTIONS: &str = "apply_sdk_sandbox_next_restrictions";
    pub const SERVICES_ALLOWLIST: &str = "services_allowlist_per_targetSdkVersion";
    pub const NEXT_SERVICE_ALLOWLIST: &str = "sdksandbox_next_service_allowlist";
    pub const ACTIVITY_ALLOWLIST: &str = "sdksandbox_activity_allowlist_per_targetSdkVersion";
    pub const NEXT_ACTIVITY_ALLOWLIST: &str = "sdksandbox_next_activity_allowlist";
    pub const BROADCASTRECEIVER_ALLOWLIST: &str =
        "sdksandbox_broadcastreceiver_allowlist_per_targetSdkVersion";
    pub const NEXT_BROADCASTRECEIVER_ALLOWLIST: &str = "sdksandbox_next_broadcastreceiver_allowlist";
    pub const CONTENTPROVIDER_ALLOWLIST: &str = "contentprovider_allowlist_per_targetSdkVersion";
    pub const NEXT_CONTENTPROVIDER_ALLOWLIST: &str = "sdksandbox_next_contentprovider_allowlist";

    pub const ALL: &[&str] = &[
        ENFORCE_RESTRICTIONS,
        APPLY_NEXT_RESTRICTIONS,
        SERVICES_ALLOWLIST,
        NEXT_SERVICE_ALLOWLIST,
        ACTIVITY_ALLOWLIST,
        NEXT_ACTIVITY_ALLOWLIST,
        BROADCASTRECEIVER_ALLOWLIST,
        NEXT_BROADCASTRECEIVER_ALLOWLIST,
        CONTENTPROVIDER_ALLOWLIST,
        NEXT_CONTENTPROVIDER_ALLOWLIST,
    ];
}

const DEFAULT_ENFORCE_RESTRICTIONS: bool = true;
const DEFAULT_APPLY_NEXT_RESTRICTIONS: bool = false;

/// Standard alphabet, padding optional on decode and omitted on encode
const PROPERTY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Policy/config source collaborator
pub trait PropertySource: Send + Sync {
    fn get_property(&self, namespace: &str, key: &str) -> Option<String>;
}

/// In-memory property source
#[derive(Debug, Default)]
pub struct MemoryPropertySource {
    values: DashMap<(String, String), String, RandomState>,
}

impl MemoryPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, namespace: &str, key: &str, value: impl Into<String>) {
        self.values
            .insert((namespace.to_string(), key.to_string()), value.into());
    }

    pub fn remove(&self, namespace: &str, key: &str) -> Option<String> {
        self.values
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|(_, value)| value)
    }
}

impl PropertySource for MemoryPropertySource {
    fn get_property(&self, namespace: &str, key: &str) -> Option<String> {
        self.values
            .get(&(namespace.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }
}

/// Lists keyed by target SDK version
pub type VersionedAllowlist<T> = BTreeMap<TargetSdkVersion, T>;

/// One consistent view of every restriction property
///
/// `None` means the property is unset, which is not the same as an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictionSettings {
    pub enforce_restrictions: bool,
    pub apply_next_restrictions: bool,
    pub services: Option<VersionedAllowlist<Vec<RestrictionRule>>>,
    pub next_services: Option<Vec<RestrictionRule>>,
    pub activities: Option<VersionedAllowlist<Vec<FieldPattern>>>,
    pub next_activities: Option<Vec<FieldPattern>>,
    pub broadcast_receivers: Option<VersionedAllowlist<BTreeSet<String>>>,
    pub next_broadcast_receivers: Option<BTreeSet<String>>,
    pub content_providers: Option<VersionedAllowlist<Vec<FieldPattern>>>,
    pub next_content_providers: Option<Vec<FieldPattern>>,
}

impl Default for RestrictionSettings {
    fn default() -> Self {
        Self {
            enforce_restrictions: DEFAULT_ENFORCE_RESTRICTIONS,
            apply_next_restrictions: DEFAULT_APPLY_NEXT_RESTRICTIONS,
            services: None,
            next_services: None,
            activities: None,
            next_activities: None,
            broadcast_receivers: None,
            next_broadcast_receivers: None,
            content_providers: None,
            next_content_providers: None,
        }
    }
}

impl RestrictionSettings {
    /// Apply one raw property value
    ///
    /// On error the field keeps its current value.
    fn apply(&mut self, key: &str, raw: Option<&str>) -> SandboxResult<()> {
        match key {
            keys::ENFORCE_RESTRICTIONS => {
                self.enforce_restrictions = parse_flag(raw, DEFAULT_ENFORCE_RESTRICTIONS)?;
            }
            keys::APPLY_NEXT_RESTRICTIONS => {
                self.apply_next_restrictions = parse_flag(raw, DEFAULT_APPLY_NEXT_RESTRICTIONS)?;
            }
            keys::SERVICES_ALLOWLIST => {
                self.services = decode_document::<ServiceAllowlists>(raw)?.map(|doc| {
                    doc.allowlist_per_target_sdk
                        .into_iter()
                        .map(|(sdk, list)| (sdk, service_rules(&list)))
                        .collect()
                });
            }
            keys::NEXT_SERVICE_ALLOWLIST => {
                self.next_services =
                    decode_document::<AllowedServices>(raw)?.map(|list| service_rules(&list));
            }
            keys::ACTIVITY_ALLOWLIST => {
                self.activities = decode_document::<ActivityAllowlists>(raw)?.map(|doc| {
                    doc.allowlist_per_target_sdk
                        .into_iter()
                        .map(|(sdk, list)| (sdk, parse_patterns(&list.actions)))
                        .collect()
                });
            }
            keys::NEXT_ACTIVITY_ALLOWLIST => {
                self.next_activities = decode_document::<AllowedActivities>(raw)?
                    .map(|list| parse_patterns(&list.actions));
            }
            keys::BROADCASTRECEIVER_ALLOWLIST => {
                self.broadcast_receivers =
                    decode_document::<BroadcastReceiverAllowlists>(raw)?.map(|doc| {
                        doc.allowlist_per_target_sdk
                            .into_iter()
                            .map(|(sdk, list)| (sdk, list.intent_actions.into_iter().collect()))
                            .collect()
                    });
            }
            keys::NEXT_BROADCASTRECEIVER_ALLOWLIST => {
                self.next_broadcast_receivers = decode_document::<AllowedBroadcastReceivers>(raw)?
                    .map(|list| list.intent_actions.into_iter().collect());
            }
            keys::CONTENTPROVIDER_ALLOWLIST => {
                self.content_providers =
                    decode_document::<ContentProviderAllowlists>(raw)?.map(|doc| {
                        doc.allowlist_per_target_sdk
                            .into_iter()
                            .map(|(sdk, list)| (sdk, parse_patterns(&list.authorities)))
                            .collect()
                    });
            }
            keys::NEXT_CONTENTPROVIDER_ALLOWLIST => {
                self.next_content_providers = decode_document::<AllowedContentProviders>(raw)?
                    .map(|list| parse_patterns(&list.authorities));
            }
            _ => debug!(key, "Ignoring unknown restriction property"),
        }
        Ok(())
    }
}

fn service_rules(list: &AllowedServices) -> Vec<RestrictionRule> {
    list.allowed_services.iter().map(RestrictionRule::from).collect()
}

fn parse_flag(raw: Option<&str>, default: bool) -> SandboxResult<bool> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(SandboxError::CorruptFormat(format!(
            "expected a boolean, got {:?}",
            value
        ))),
    }
}

/// Decode a base64 protobuf property value; empty or absent yields `None`
pub fn decode_document<M: Message + Default>(raw: Option<&str>) -> SandboxResult<Option<M>> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let bytes = PROPERTY_ENGINE.decode(raw)?;
    Ok(Some(M::decode(bytes.as_slice())?))
}

/// Encode a document the way the policy source publishes it
pub fn encode_document<M: Message>(document: &M) -> String {
    PROPERTY_ENGINE.encode(document.encode_to_vec())
}

/// Snapshot holder fed by the property source
pub struct RestrictionSettingsStore {
    source: Arc<dyn PropertySource>,
    namespace: String,
    snapshot: RcuCell<RestrictionSettings>,
    /// Serializes rebuilds; readers never take it
    writer: Mutex<()>,
}

impl RestrictionSettingsStore {
    /// Create the store and read every property once
    ///
    /// Malformed properties are logged and left at their defaults.
    pub fn new(source: Arc<dyn PropertySource>, namespace: impl Into<String>) -> Self {
        let store = Self {
            source,
            namespace: namespace.into(),
            snapshot: RcuCell::new(RestrictionSettings::default()),
            writer: Mutex::new(()),
        };
        if let Err(e) = store.reload() {
            warn!(namespace = %store.namespace, error = %e, "Initial restriction load incomplete");
        }
        store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current snapshot (lock-free)
    #[inline]
    pub fn snapshot(&self) -> Arc<RestrictionSettings> {
        self.snapshot.load()
    }

    /// Re-read every known property
    pub fn reload(&self) -> SandboxResult<()> {
        self.rebuild(keys::ALL.iter().copied())
    }

    /// Change notification from the policy source
    ///
    /// Keys from other namespaces are ignored. Every well-formed changed key
    /// is published together; malformed keys keep their previous value and
    /// are reported in the returned error.
    pub fn on_properties_changed<S: AsRef<str>>(
        &self,
        namespace: &str,
        changed_keys: &[S],
    ) -> SandboxResult<()> {
        if namespace != self.namespace {
            debug!(namespace, "Ignoring properties from foreign namespace");
            return Ok(());
        }
        self.rebuild(
            changed_keys
                .iter()
                .map(AsRef::as_ref)
                .filter(|key| keys::ALL.contains(key)),
        )
    }

    fn rebuild<'a>(&self, changed: impl Iterator<Item = &'a str>) -> SandboxResult<()> {
        let _guard = self.writer.lock();
        let mut next = (*self.snapshot.load()).clone();
        let mut rejected = Vec::new();
        let mut applied = 0usize;

        for key in changed {
            let raw = self.source.get_property(&self.namespace, key);
            match next.apply(key, raw.as_deref()) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(key, error = %e, "Malformed restriction property, keeping previous value");
                    rejected.push(key.to_string());
                }
            }
        }

        if applied > 0 {
            info!(
                namespace = %self.namespace,
                applied,
                enforce = next.enforce_restrictions,
                apply_next = next.apply_next_restrictions,
                "Restriction settings swapped"
            );
            self.snapshot.store(next);
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::CorruptFormat(format!(
                "malformed restriction properties: {}",
                rejected.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for RestrictionSettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictionSettingsStore")
            .field("namespace", &self.namespace)
            .field("snapshot", &self.snapshot.load())
            .finish()
    }
}
