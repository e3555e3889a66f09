/*!
 * Sandbox Restrictions
 *
 * Allow-lists for actions attempted from inside the isolated process:
 * activity starts, service starts and binds, broadcasts, receiver
 * registration and content provider access.
 */

pub mod audit;
pub mod engine;
pub mod proto;
pub mod rules;
pub mod settings;

pub use audit::{AuditEvent, AuditSeverity, AuditStats, RestrictionAuditLog};
pub use engine::{
    Decision, DecisionReason, RestrictionPolicyEngine, DEFAULT_ACTIVITY_ALLOWED_ACTIONS,
    DEFAULT_CONTENT_PROVIDER_ALLOWED_AUTHORITIES,
};
pub use rules::{
    matches_any, ComponentName, DispatchDescriptor, FieldPattern, Intent, RestrictionRule,
    WILDCARD,
};
pub use settings::{
    decode_document, encode_document, keys, MemoryPropertySource, PropertySource,
    RestrictionSettings, RestrictionSettingsStore, VersionedAllowlist,
};
