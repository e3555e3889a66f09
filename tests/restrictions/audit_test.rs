/*!
 * Restriction Audit Tests
 */

use crate::engine_with;
use sdksandbox_core::core::limits::MAX_AUDIT_EVENTS_PER_UID;
use sdksandbox_core::monitoring::NoopTelemetry;
use sdksandbox_core::restrictions::{
    AuditEvent, AuditSeverity, Decision, DecisionReason, DispatchDescriptor, Intent,
    MemoryPropertySource, RestrictionAuditLog,
};
use std::sync::Arc;

fn provider(authority: &str) -> DispatchDescriptor {
    DispatchDescriptor::AccessContentProvider {
        authority: authority.to_string(),
    }
}

#[test]
fn test_severity_reflects_descriptor() {
    let denied = Decision::deny(DecisionReason::NoMatchingRule);

    let send = AuditEvent::new(
        1,
        34,
        DispatchDescriptor::SendBroadcast(Intent::new().with_action("com.example.PING")),
        denied,
    );
    assert_eq!(send.severity, AuditSeverity::Critical);

    let read = AuditEvent::new(1, 34, provider("com.android.contacts"), denied);
    assert_eq!(read.severity, AuditSeverity::Warning);

    let empty = AuditEvent::new(
        1,
        34,
        DispatchDescriptor::RegisterReceiver { actions: vec![] },
        Decision::deny(DecisionReason::EmptyFilter),
    );
    assert_eq!(empty.severity, AuditSeverity::Info);

    let allowed = AuditEvent::new(
        1,
        34,
        provider("settings"),
        Decision::allow(DecisionReason::DefaultAllowed),
    );
    assert_eq!(allowed.severity, AuditSeverity::Info);
    assert!(!allowed.is_denied());
}

#[test]
fn test_enforce_populates_log() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = engine_with(&source, Arc::new(NoopTelemetry));

    let _ = engine.enforce(&provider("settings"), 34, 20_001);
    let _ = engine.enforce(&provider("com.android.contacts"), 34, 20_001);
    let _ = engine.enforce(&provider("com.android.contacts"), 34, 20_002);
    let _ = engine.enforce(&provider("com.android.calendar"), 34, 20_002);

    let audit = engine.audit();
    assert_eq!(audit.uids_with_denials(), vec![(20_002, 2), (20_001, 1)]);

    let recent = audit.recent(1);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].descriptor, provider("com.android.calendar"));

    let first_uid = audit.for_uid(20_001, 10);
    assert_eq!(first_uid.len(), 2);
    assert!(first_uid[0].is_denied());
    assert!(!first_uid[1].is_denied());

    let stats = audit.stats();
    assert_eq!(stats.total_events, 4);
    assert_eq!(stats.total_denials, 3);
    assert_eq!(stats.uids_tracked, 2);
}

#[test]
fn test_per_uid_log_bounded() {
    let log = RestrictionAuditLog::new();
    let denied = Decision::deny(DecisionReason::NoMatchingRule);
    for _ in 0..MAX_AUDIT_EVENTS_PER_UID + 25 {
        log.log(AuditEvent::new(7, 34, provider("com.android.contacts"), denied));
    }

    assert_eq!(log.for_uid(7, usize::MAX).len(), MAX_AUDIT_EVENTS_PER_UID);
    assert_eq!(log.denial_count(7), (MAX_AUDIT_EVENTS_PER_UID + 25) as u64);

    log.clear_uid(7);
    assert_eq!(log.denial_count(7), 0);
    assert!(log.for_uid(7, 10).is_empty());
}

#[test]
fn test_events_serialize() {
    let event = AuditEvent::new(
        3,
        34,
        provider("com.android.contacts"),
        Decision::deny(DecisionReason::NoMatchingRule),
    );
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["descriptor"]["kind"], "access_content_provider");
    assert_eq!(json["decision"]["reason"], "no_matching_rule");
    assert_eq!(json["severity"], "warning");
    assert!(json["logged_at"].is_i64());
}
