/*!
 * Restriction Policy Engine
 *
 * Decides whether an action attempted from inside the sandbox may proceed.
 * Every decision reads one settings snapshot, so a concurrent property push
 * is observed either entirely or not at all.
 */

use super::audit::{AuditEvent, RestrictionAuditLog};
use super::rules::{matches_any, parse_patterns, DispatchDescriptor, FieldPattern, Intent};
use super::settings::{RestrictionSettings, RestrictionSettingsStore, VersionedAllowlist};
use crate::config::RestrictionConfig;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::sync::RcuCell;
use crate::core::types::{TargetSdkVersion, Uid};
use crate::monitoring::{LatencyStage, StageSpan, TelemetrySink};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Activity actions allowed when no allow-list bucket applies
pub const DEFAULT_ACTIVITY_ALLOWED_ACTIONS: &[&str] = &[
    "android.intent.action.VIEW",
    "android.intent.action.DIAL",
    "android.intent.action.EDIT",
    "android.intent.action.INSERT",
];

/// Content provider authorities allowed when no allow-list bucket applies
pub const DEFAULT_CONTENT_PROVIDER_ALLOWED_AUTHORITIES: &[&str] =
    &["settings", "com.android.textclassifier.icons", "downloads"];

/// Web view providers reachable regardless of the allow-lists
const WEBVIEW_PROVIDER_SUFFIXES: &[&str] =
    &[".DeveloperModeContentProvider", ".SafeModeContentProvider"];

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    EnforcementDisabled,
    ExemptPackage,
    NoAction,
    RuleMatched,
    DefaultAllowed,
    WebViewProvider,
    TestAllowlist,
    ProtectedBroadcastsOnly,
    EmptyFilter,
    NoRuleSet,
    NoMatchingRule,
}

impl DecisionReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EnforcementDisabled => "enforcement disabled",
            Self::ExemptPackage => "exempt package",
            Self::NoAction => "no action",
            Self::RuleMatched => "rule matched",
            Self::DefaultAllowed => "default allowed",
            Self::WebViewProvider => "web view provider",
            Self::TestAllowlist => "test allow-list",
            Self::ProtectedBroadcastsOnly => "protected broadcasts only",
            Self::EmptyFilter => "empty filter",
            Self::NoRuleSet => "no rule set",
            Self::NoMatchingRule => "no matching rule",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl Decision {
    pub const fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub const fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    const fn when(allowed: bool, allow: DecisionReason, deny: DecisionReason) -> Self {
        if allowed {
            Self::allow(allow)
        } else {
            Self::deny(deny)
        }
    }
}

/// Runtime allow-lists installed by test tooling
#[derive(Debug, Clone, Default)]
struct TestAllowlists {
    content_providers: Vec<FieldPattern>,
    send_broadcasts: Vec<FieldPattern>,
}

/// Evaluates dispatch descriptors against the restriction settings
pub struct RestrictionPolicyEngine {
    settings: Arc<RestrictionSettingsStore>,
    exempt_service_packages: AHashSet<String>,
    protected_broadcasts: AHashSet<String>,
    webview_authorities: Vec<String>,
    test_allowlists: RcuCell<TestAllowlists>,
    audit: Arc<RestrictionAuditLog>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RestrictionPolicyEngine {
    pub fn new(
        settings: Arc<RestrictionSettingsStore>,
        config: &RestrictionConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let mut exempt_service_packages: AHashSet<String> =
            config.exempt_service_packages.iter().cloned().collect();
        let webview_authorities = match config.webview_package.as_deref() {
            Some(package) => {
                exempt_service_packages.insert(package.to_string());
                WEBVIEW_PROVIDER_SUFFIXES
                    .iter()
                    .map(|suffix| format!("{}{}", package, suffix))
                    .collect()
            }
            None => Vec::new(),
        };

        info!(
            namespace = %settings.namespace(),
            exempt = exempt_service_packages.len(),
            protected = config.protected_broadcasts.len(),
            "Restriction policy engine initialized"
        );

        Self {
            settings,
            exempt_service_packages,
            protected_broadcasts: config.protected_broadcasts.iter().cloned().collect(),
            webview_authorities,
            test_allowlists: RcuCell::new(TestAllowlists::default()),
            audit: Arc::new(RestrictionAuditLog::new()),
            telemetry,
        }
    }

    pub fn settings(&self) -> &Arc<RestrictionSettingsStore> {
        &self.settings
    }

    pub fn audit(&self) -> &Arc<RestrictionAuditLog> {
        &self.audit
    }

    /// Side-effect free check
    pub fn is_action_allowed(
        &self,
        descriptor: &DispatchDescriptor,
        target_sdk: TargetSdkVersion,
    ) -> bool {
        self.evaluate(descriptor, target_sdk).allowed
    }

    pub fn evaluate(
        &self,
        descriptor: &DispatchDescriptor,
        target_sdk: TargetSdkVersion,
    ) -> Decision {
        let settings = self.settings.snapshot();
        match descriptor {
            DispatchDescriptor::StartOrBindService(intent) => {
                self.evaluate_service(&settings, intent, target_sdk)
            }
            DispatchDescriptor::StartActivity(intent) => {
                evaluate_activity(&settings, intent, target_sdk)
            }
            DispatchDescriptor::RegisterReceiver { actions } => {
                self.evaluate_receiver(&settings, actions, target_sdk)
            }
            DispatchDescriptor::AccessContentProvider { authority } => {
                self.evaluate_content_provider(&settings, authority, target_sdk)
            }
            DispatchDescriptor::SendBroadcast(intent) => Decision::when(
                matches_any(&self.test_allowlists.load().send_broadcasts, intent.action()),
                DecisionReason::TestAllowlist,
                DecisionReason::NoMatchingRule,
            ),
        }
    }

    /// Evaluate, audit and report one attempted action
    ///
    /// A denial is returned as [`SandboxError::SecurityViolation`].
    pub fn enforce(
        &self,
        descriptor: &DispatchDescriptor,
        target_sdk: TargetSdkVersion,
        caller_uid: Uid,
    ) -> SandboxResult<()> {
        let span = StageSpan::new(
            LatencyStage::EnforceRestriction,
            caller_uid,
            Arc::clone(&self.telemetry),
        );
        let decision = self.evaluate(descriptor, target_sdk);
        self.audit.log(AuditEvent::new(
            caller_uid,
            target_sdk,
            descriptor.clone(),
            decision,
        ));
        span.finish(decision.allowed);

        if decision.allowed {
            debug!(
                uid = caller_uid,
                target_sdk,
                descriptor = %descriptor,
                reason = %decision.reason,
                "Action allowed"
            );
            return Ok(());
        }

        warn!(
            uid = caller_uid,
            target_sdk,
            descriptor = %descriptor,
            reason = %decision.reason,
            "Action denied by sandbox restrictions"
        );
        Err(SandboxError::SecurityViolation(format!(
            "{} may not be performed from sandbox uid {} ({})",
            descriptor, caller_uid, decision.reason
        )))
    }

    pub fn append_test_content_provider_allowlist<I, S>(&self, authorities: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = parse_patterns(authorities);
        self.test_allowlists.update(|current| {
            let mut next = current.clone();
            next.content_providers.extend(added.iter().cloned());
            next
        });
    }

    pub fn append_test_send_broadcast_allowlist<I, S>(&self, actions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = parse_patterns(actions);
        self.test_allowlists.update(|current| {
            let mut next = current.clone();
            next.send_broadcasts.extend(added.iter().cloned());
            next
        });
    }

    pub fn clear_test_allowlists(&self) {
        self.test_allowlists.store(TestAllowlists::default());
    }

    fn evaluate_service(
        &self,
        settings: &RestrictionSettings,
        intent: &Intent,
        target_sdk: TargetSdkVersion,
    ) -> Decision {
        if !settings.enforce_restrictions {
            return Decision::allow(DecisionReason::EnforcementDisabled);
        }
        // Only an explicit component is exempt; a bare package still goes
        // through the allow-list
        if intent
            .component_package()
            .is_some_and(|package| self.exempt_service_packages.contains(package))
        {
            return Decision::allow(DecisionReason::ExemptPackage);
        }

        // The next set replaces the versioned one even when unset
        let rules = if settings.apply_next_restrictions {
            settings.next_services.as_deref()
        } else {
            settings
                .services
                .as_ref()
                .and_then(|buckets| buckets.get(&target_sdk))
                .map(Vec::as_slice)
        };
        let Some(rules) = rules else {
            return Decision::deny(DecisionReason::NoRuleSet);
        };

        Decision::when(
            rules.iter().any(|rule| rule.matches(intent)),
            DecisionReason::RuleMatched,
            DecisionReason::NoMatchingRule,
        )
    }

    fn evaluate_receiver(
        &self,
        settings: &RestrictionSettings,
        actions: &[String],
        target_sdk: TargetSdkVersion,
    ) -> Decision {
        if actions.is_empty() {
            return Decision::deny(DecisionReason::EmptyFilter);
        }
        if !settings.enforce_restrictions {
            return Decision::allow(DecisionReason::EnforcementDisabled);
        }

        let allowed = if settings.apply_next_restrictions {
            settings.next_broadcast_receivers.as_ref()
        } else {
            settings
                .broadcast_receivers
                .as_ref()
                .and_then(|buckets| buckets.get(&target_sdk))
        };

        match allowed {
            Some(allowed) => Decision::when(
                actions.iter().all(|action| allowed.contains(action)),
                DecisionReason::RuleMatched,
                DecisionReason::NoMatchingRule,
            ),
            None => Decision::when(
                actions
                    .iter()
                    .all(|action| self.protected_broadcasts.contains(action)),
                DecisionReason::ProtectedBroadcastsOnly,
                DecisionReason::NoRuleSet,
            ),
        }
    }

    fn evaluate_content_provider(
        &self,
        settings: &RestrictionSettings,
        authority: &str,
        target_sdk: TargetSdkVersion,
    ) -> Decision {
        if !settings.enforce_restrictions {
            return Decision::allow(DecisionReason::EnforcementDisabled);
        }
        if self.webview_authorities.iter().any(|a| a == authority) {
            return Decision::allow(DecisionReason::WebViewProvider);
        }
        if matches_any(&self.test_allowlists.load().content_providers, Some(authority)) {
            return Decision::allow(DecisionReason::TestAllowlist);
        }

        select_patterns(
            settings.apply_next_restrictions,
            settings.next_content_providers.as_deref(),
            settings.content_providers.as_ref(),
            target_sdk,
        )
        .map(|patterns| {
            Decision::when(
                matches_any(patterns, Some(authority)),
                DecisionReason::RuleMatched,
                DecisionReason::NoMatchingRule,
            )
        })
        .unwrap_or_else(|| {
            Decision::when(
                DEFAULT_CONTENT_PROVIDER_ALLOWED_AUTHORITIES.contains(&authority),
                DecisionReason::DefaultAllowed,
                DecisionReason::NoMatchingRule,
            )
        })
    }
}

fn evaluate_activity(
    settings: &RestrictionSettings,
    intent: &Intent,
    target_sdk: TargetSdkVersion,
) -> Decision {
    if !settings.enforce_restrictions {
        return Decision::allow(DecisionReason::EnforcementDisabled);
    }
    let Some(action) = intent.action() else {
        return Decision::allow(DecisionReason::NoAction);
    };

    select_patterns(
        settings.apply_next_restrictions,
        settings.next_activities.as_deref(),
        settings.activities.as_ref(),
        target_sdk,
    )
    .map(|patterns| {
        Decision::when(
            matches_any(patterns, Some(action)),
            DecisionReason::RuleMatched,
            DecisionReason::NoMatchingRule,
        )
    })
    .unwrap_or_else(|| {
        Decision::when(
            DEFAULT_ACTIVITY_ALLOWED_ACTIONS.contains(&action),
            DecisionReason::DefaultAllowed,
            DecisionReason::NoMatchingRule,
        )
    })
}

/// Next set when flagged and present, otherwise the target bucket
fn select_patterns<'a>(
    apply_next: bool,
    next: Option<&'a [FieldPattern]>,
    versioned: Option<&'a VersionedAllowlist<Vec<FieldPattern>>>,
    target_sdk: TargetSdkVersion,
) -> Option<&'a [FieldPattern]> {
    if apply_next {
        if let Some(next) = next {
            return Some(next);
        }
    }
    versioned
        .and_then(|buckets| buckets.get(&target_sdk))
        .map(Vec::as_slice)
}

impl fmt::Debug for RestrictionPolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestrictionPolicyEngine")
            .field("settings", &self.settings)
            .field("exempt_service_packages", &self.exempt_service_packages)
            .field("protected_broadcasts", &self.protected_broadcasts.len())
            .finish()
    }
}
