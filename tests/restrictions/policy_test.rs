/*!
 * Restriction Policy Tests
 * Per-kind evaluation against versioned and next allow-lists
 */

use crate::{engine_with, NS, WEBVIEW};
use sdksandbox_core::monitoring::{NoopTelemetry, RecordingTelemetry};
use sdksandbox_core::restrictions::proto::{
    ActivityAllowlists, AllowedActivities, AllowedBroadcastReceivers, AllowedContentProviders,
    AllowedService, AllowedServices, BroadcastReceiverAllowlists, ContentProviderAllowlists,
    ServiceAllowlists,
};
use sdksandbox_core::restrictions::{
    encode_document, keys, ComponentName, Decision, DecisionReason, DispatchDescriptor, Intent,
    MemoryPropertySource, RestrictionPolicyEngine,
};
use sdksandbox_core::{LatencyStage, SandboxError};
use std::collections::HashMap;
use std::sync::Arc;

const TARGET: i32 = 34;

fn quiet_engine(source: &Arc<MemoryPropertySource>) -> RestrictionPolicyEngine {
    engine_with(source, Arc::new(NoopTelemetry))
}

fn rule(action: &str, package: &str, class: &str, component_package: &str) -> AllowedService {
    AllowedService {
        action: action.to_string(),
        package_name: package.to_string(),
        component_class_name: class.to_string(),
        component_package_name: component_package.to_string(),
    }
}

fn set_next_services(source: &MemoryPropertySource, rules: Vec<AllowedService>) {
    source.set(
        NS,
        keys::NEXT_SERVICE_ALLOWLIST,
        encode_document(&AllowedServices {
            allowed_services: rules,
        }),
    );
    source.set(NS, keys::APPLY_NEXT_RESTRICTIONS, "true");
}

fn set_services(source: &MemoryPropertySource, target: i32, rules: Vec<AllowedService>) {
    source.set(
        NS,
        keys::SERVICES_ALLOWLIST,
        encode_document(&ServiceAllowlists {
            allowlist_per_target_sdk: HashMap::from([(
                target,
                AllowedServices {
                    allowed_services: rules,
                },
            )]),
        }),
    );
}

fn bind(intent: Intent) -> DispatchDescriptor {
    DispatchDescriptor::StartOrBindService(intent)
}

fn receiver(actions: &[&str]) -> DispatchDescriptor {
    DispatchDescriptor::RegisterReceiver {
        actions: actions.iter().map(|a| a.to_string()).collect(),
    }
}

fn provider(authority: &str) -> DispatchDescriptor {
    DispatchDescriptor::AccessContentProvider {
        authority: authority.to_string(),
    }
}

fn activity(action: &str) -> DispatchDescriptor {
    DispatchDescriptor::StartActivity(Intent::new().with_action(action))
}

// ============================================================================
// Services
// ============================================================================

#[test]
fn test_all_wildcard_rule_allows_everything() {
    let source = Arc::new(MemoryPropertySource::new());
    set_next_services(&source, vec![rule("*", "*", "*", "*")]);
    let engine = quiet_engine(&source);

    let intents = [
        Intent::new(),
        Intent::new().with_action("com.pkg.BIND"),
        Intent::new().with_package("com.other"),
        Intent::new().with_component(ComponentName::new("com.pkg", "com.pkg.Service")),
    ];
    for intent in intents {
        assert_eq!(
            engine.evaluate(&bind(intent), TARGET),
            Decision::allow(DecisionReason::RuleMatched)
        );
    }
}

#[test]
fn test_single_literal_field_restricts_that_field() {
    let source = Arc::new(MemoryPropertySource::new());
    set_next_services(&source, vec![rule("com.pkg.BIND", "*", "*", "*")]);
    let engine = quiet_engine(&source);

    assert!(engine.is_action_allowed(&bind(Intent::new().with_action("com.pkg.BIND")), TARGET));
    assert!(engine.is_action_allowed(
        &bind(
            Intent::new()
                .with_action("com.pkg.BIND")
                .with_package("com.anything")
        ),
        TARGET
    ));
    assert_eq!(
        engine.evaluate(&bind(Intent::new().with_action("com.pkg.OTHER")), TARGET),
        Decision::deny(DecisionReason::NoMatchingRule)
    );
    // An unset field only matches a wildcard
    assert!(!engine.is_action_allowed(&bind(Intent::new().with_package("com.pkg")), TARGET));
}

#[test]
fn test_component_rule() {
    let source = Arc::new(MemoryPropertySource::new());
    set_services(
        &source,
        TARGET,
        vec![rule("*", "*", "com.pkg.Service", "com.pkg")],
    );
    let engine = quiet_engine(&source);

    let exact = Intent::new().with_component(ComponentName::new("com.pkg", "com.pkg.Service"));
    let other_class = Intent::new().with_component(ComponentName::new("com.pkg", "com.pkg.Other"));
    assert!(engine.is_action_allowed(&bind(exact.clone()), TARGET));
    assert!(!engine.is_action_allowed(&bind(other_class), TARGET));
    // Buckets are per target SDK
    assert_eq!(
        engine.evaluate(&bind(exact), TARGET + 1),
        Decision::deny(DecisionReason::NoRuleSet)
    );
}

#[test]
fn test_next_services_replace_versioned_even_when_unset() {
    let source = Arc::new(MemoryPropertySource::new());
    set_services(&source, TARGET, vec![rule("*", "*", "*", "*")]);
    source.set(NS, keys::APPLY_NEXT_RESTRICTIONS, "true");
    let engine = quiet_engine(&source);

    assert_eq!(
        engine.evaluate(&bind(Intent::new().with_package("com.pkg")), TARGET),
        Decision::deny(DecisionReason::NoRuleSet)
    );
}

#[test]
fn test_exempt_component_always_allowed() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);

    let webview = bind(
        Intent::new().with_component(ComponentName::new(WEBVIEW, "org.chromium.Service")),
    );
    assert_eq!(
        engine.evaluate(&webview, TARGET),
        Decision::allow(DecisionReason::ExemptPackage)
    );
    let component = bind(
        Intent::new()
            .with_package("com.other")
            .with_component(ComponentName::new(WEBVIEW, "org.chromium.Service")),
    );
    assert!(engine.is_action_allowed(&component, TARGET));
}

#[test]
fn test_package_only_intent_to_exempt_package_checked() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);

    let package_only = bind(Intent::new().with_action("any.ACTION").with_package(WEBVIEW));
    assert_eq!(
        engine.evaluate(&package_only, TARGET),
        Decision::deny(DecisionReason::NoRuleSet)
    );

    let component_elsewhere = bind(
        Intent::new()
            .with_package(WEBVIEW)
            .with_component(ComponentName::new("com.other", "com.other.Service")),
    );
    assert!(!engine.is_action_allowed(&component_elsewhere, TARGET));
}

#[test]
fn test_enforcement_disabled() {
    let source = Arc::new(MemoryPropertySource::new());
    source.set(NS, keys::ENFORCE_RESTRICTIONS, "false");
    let engine = quiet_engine(&source);

    for descriptor in [
        bind(Intent::new().with_package("com.pkg")),
        activity("android.intent.action.CALL"),
        provider("com.example.contacts"),
        receiver(&["com.example.PING"]),
    ] {
        assert_eq!(
            engine.evaluate(&descriptor, TARGET),
            Decision::allow(DecisionReason::EnforcementDisabled),
            "{}",
            descriptor
        );
    }

    // Neither an empty filter nor an outgoing broadcast depends on the flag
    assert_eq!(
        engine.evaluate(&receiver(&[]), TARGET),
        Decision::deny(DecisionReason::EmptyFilter)
    );
    assert!(!engine.is_action_allowed(
        &DispatchDescriptor::SendBroadcast(Intent::new().with_action("com.example.PING")),
        TARGET
    ));
}

// ============================================================================
// Activities
// ============================================================================

#[test]
fn test_activity_allowlist_bucket_and_next() {
    let source = Arc::new(MemoryPropertySource::new());
    source.set(
        NS,
        keys::ACTIVITY_ALLOWLIST,
        encode_document(&ActivityAllowlists {
            allowlist_per_target_sdk: HashMap::from([(
                TARGET,
                AllowedActivities {
                    actions: vec!["com.example.action.*".to_string()],
                },
            )]),
        }),
    );
    let engine = quiet_engine(&source);

    assert!(engine.is_action_allowed(&activity("com.example.action.OPEN"), TARGET));
    // A configured bucket replaces the defaults
    assert!(!engine.is_action_allowed(&activity("android.intent.action.VIEW"), TARGET));
    // Another target falls back to the defaults
    assert_eq!(
        engine.evaluate(&activity("android.intent.action.VIEW"), TARGET - 1),
        Decision::allow(DecisionReason::DefaultAllowed)
    );

    source.set(
        NS,
        keys::NEXT_ACTIVITY_ALLOWLIST,
        encode_document(&AllowedActivities {
            actions: vec!["android.intent.action.DIAL".to_string()],
        }),
    );
    source.set(NS, keys::APPLY_NEXT_RESTRICTIONS, "true");
    engine
        .settings()
        .on_properties_changed(NS, &[keys::NEXT_ACTIVITY_ALLOWLIST, keys::APPLY_NEXT_RESTRICTIONS])
        .unwrap();

    assert!(engine.is_action_allowed(&activity("android.intent.action.DIAL"), TARGET));
    assert!(!engine.is_action_allowed(&activity("com.example.action.OPEN"), TARGET));
}

#[test]
fn test_activity_without_action_allowed() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);
    assert_eq!(
        engine.evaluate(&DispatchDescriptor::StartActivity(Intent::new()), TARGET),
        Decision::allow(DecisionReason::NoAction)
    );
}

// ============================================================================
// Broadcast receivers
// ============================================================================

#[test]
fn test_receivers_without_allowlist_limited_to_protected() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);

    assert_eq!(
        engine.evaluate(
            &receiver(&["android.intent.action.SCREEN_ON", "android.intent.action.SCREEN_OFF"]),
            TARGET
        ),
        Decision::allow(DecisionReason::ProtectedBroadcastsOnly)
    );
    assert!(!engine.is_action_allowed(
        &receiver(&["android.intent.action.SCREEN_ON", "com.example.PING"]),
        TARGET
    ));
}

#[test]
fn test_receivers_need_every_action_listed() {
    let source = Arc::new(MemoryPropertySource::new());
    source.set(
        NS,
        keys::BROADCASTRECEIVER_ALLOWLIST,
        encode_document(&BroadcastReceiverAllowlists {
            allowlist_per_target_sdk: HashMap::from([(
                TARGET,
                AllowedBroadcastReceivers {
                    intent_actions: vec!["com.example.A".to_string(), "com.example.B".to_string()],
                },
            )]),
        }),
    );
    let engine = quiet_engine(&source);

    assert!(engine.is_action_allowed(&receiver(&["com.example.A", "com.example.B"]), TARGET));
    assert!(!engine.is_action_allowed(&receiver(&["com.example.A", "com.example.C"]), TARGET));
    // Protected broadcasts are not implied once a list is set
    assert!(!engine.is_action_allowed(&receiver(&["android.intent.action.SCREEN_ON"]), TARGET));

    source.set(
        NS,
        keys::NEXT_BROADCASTRECEIVER_ALLOWLIST,
        encode_document(&AllowedBroadcastReceivers {
            intent_actions: vec!["com.example.C".to_string()],
        }),
    );
    source.set(NS, keys::APPLY_NEXT_RESTRICTIONS, "true");
    engine.settings().reload().unwrap();
    assert!(engine.is_action_allowed(&receiver(&["com.example.C"]), TARGET));
    assert!(!engine.is_action_allowed(&receiver(&["com.example.A"]), TARGET));
}

// ============================================================================
// Content providers
// ============================================================================

#[test]
fn test_content_provider_defaults_and_webview() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);

    assert_eq!(
        engine.evaluate(&provider("settings"), TARGET),
        Decision::allow(DecisionReason::DefaultAllowed)
    );
    assert!(!engine.is_action_allowed(&provider("com.android.contacts"), TARGET));
    assert_eq!(
        engine.evaluate(
            &provider(&format!("{}.DeveloperModeContentProvider", WEBVIEW)),
            TARGET
        ),
        Decision::allow(DecisionReason::WebViewProvider)
    );
}

#[test]
fn test_content_provider_allowlist_and_test_entries() {
    let source = Arc::new(MemoryPropertySource::new());
    source.set(
        NS,
        keys::CONTENTPROVIDER_ALLOWLIST,
        encode_document(&ContentProviderAllowlists {
            allowlist_per_target_sdk: HashMap::from([(
                TARGET,
                AllowedContentProviders {
                    authorities: vec!["com.example.*".to_string()],
                },
            )]),
        }),
    );
    let engine = quiet_engine(&source);

    assert!(engine.is_action_allowed(&provider("com.example.media"), TARGET));
    assert!(!engine.is_action_allowed(&provider("settings"), TARGET));

    engine.append_test_content_provider_allowlist(["settings"]);
    assert_eq!(
        engine.evaluate(&provider("settings"), TARGET),
        Decision::allow(DecisionReason::TestAllowlist)
    );
    engine.clear_test_allowlists();
    assert!(!engine.is_action_allowed(&provider("settings"), TARGET));
}

#[test]
fn test_next_content_providers_only_when_set() {
    let source = Arc::new(MemoryPropertySource::new());
    source.set(NS, keys::APPLY_NEXT_RESTRICTIONS, "true");
    let engine = quiet_engine(&source);

    // Flag on but no next list: defaults still apply
    assert!(engine.is_action_allowed(&provider("downloads"), TARGET));

    source.set(
        NS,
        keys::NEXT_CONTENTPROVIDER_ALLOWLIST,
        encode_document(&AllowedContentProviders {
            authorities: vec!["com.example.media".to_string()],
        }),
    );
    engine
        .settings()
        .on_properties_changed(NS, &[keys::NEXT_CONTENTPROVIDER_ALLOWLIST])
        .unwrap();
    assert!(engine.is_action_allowed(&provider("com.example.media"), TARGET));
    assert!(!engine.is_action_allowed(&provider("downloads"), TARGET));
}

// ============================================================================
// Enforcement
// ============================================================================

#[test]
fn test_send_broadcast_uses_test_allowlist_only() {
    let source = Arc::new(MemoryPropertySource::new());
    let engine = quiet_engine(&source);
    let send = DispatchDescriptor::SendBroadcast(Intent::new().with_action("com.example.PING"));

    assert!(!engine.is_action_allowed(&send, TARGET));
    engine.append_test_send_broadcast_allowlist(["com.example.PING"]);
    assert_eq!(
        engine.evaluate(&send, TARGET),
        Decision::allow(DecisionReason::TestAllowlist)
    );
}

#[test]
fn test_enforce_reports_and_rejects() {
    let source = Arc::new(MemoryPropertySource::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let engine = engine_with(&source, telemetry.clone());

    engine
        .enforce(&activity("android.intent.action.VIEW"), TARGET, 20_001)
        .unwrap();
    let err = engine
        .enforce(&provider("com.android.contacts"), TARGET, 20_001)
        .unwrap_err();
    match err {
        SandboxError::SecurityViolation(message) => {
            assert!(message.contains("com.android.contacts"), "{}", message)
        }
        other => panic!("expected SecurityViolation, got {:?}", other),
    }

    let records = telemetry.records_for(LatencyStage::EnforceRestriction);
    assert_eq!(records.len(), 2);
    assert!(records[0].success);
    assert!(!records[1].success);
    assert_eq!(engine.audit().denial_count(20_001), 1);
}
