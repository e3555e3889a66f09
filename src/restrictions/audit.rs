/*!
 * Restriction Audit Trail
 * Enforcement decisions per sandbox uid, with denial tallies per dispatch kind
 */

use super::engine::{Decision, DecisionReason};
use super::rules::DispatchDescriptor;
use crate::core::limits::{MAX_AUDIT_EVENTS, MAX_AUDIT_EVENTS_PER_UID};
use crate::core::types::{TargetSdkVersion, Uid};
use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

/// How much attention a decision deserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditSeverity {
    /// Denied outbound actions leave the sandbox boundary and are critical;
    /// a receiver registered without actions is a caller mistake
    pub fn classify(descriptor: &DispatchDescriptor, decision: &Decision) -> Self {
        if decision.allowed {
            return Self::Info;
        }
        match (descriptor, decision.reason) {
            (DispatchDescriptor::SendBroadcast(_), _)
            | (DispatchDescriptor::StartOrBindService(_), _) => Self::Critical,
            (_, DecisionReason::EmptyFilter) => Self::Info,
            _ => Self::Warning,
        }
    }
}

/// One enforcement decision
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditEvent {
    pub caller_uid: Uid,
    pub target_sdk: TargetSdkVersion,
    pub descriptor: DispatchDescriptor,
    pub decision: Decision,
    pub severity: AuditSeverity,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub logged_at: SystemTime,
}

impl AuditEvent {
    pub fn new(
        caller_uid: Uid,
        target_sdk: TargetSdkVersion,
        descriptor: DispatchDescriptor,
        decision: Decision,
    ) -> Self {
        Self {
            caller_uid,
            target_sdk,
            severity: AuditSeverity::classify(&descriptor, &decision),
            descriptor,
            decision,
            logged_at: SystemTime::now(),
        }
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        !self.decision.allowed
    }

    /// Dispatch kind, e.g. `start_activity`
    #[inline]
    pub fn kind(&self) -> &'static str {
        self.descriptor.kind()
    }
}

/// Decisions taken for one sandbox uid
#[derive(Default)]
struct UidTrail {
    events: VecDeque<AuditEvent>,
    denials: u64,
    denials_by_kind: AHashMap<&'static str, u64>,
}

impl UidTrail {
    fn record(&mut self, event: AuditEvent) {
        if event.is_denied() {
            self.denials += 1;
            *self.denials_by_kind.entry(event.kind()).or_insert(0) += 1;
        }
        if self.events.len() >= MAX_AUDIT_EVENTS_PER_UID {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Bounded log of enforcement decisions
///
/// Keeps the latest decisions across all uids, the latest per uid, and
/// per-uid denial tallies that survive ring eviction.
pub struct RestrictionAuditLog {
    recent: RwLock<VecDeque<AuditEvent>>,
    trails: DashMap<Uid, UidTrail, RandomState>,
}

impl RestrictionAuditLog {
    pub fn new() -> Self {
        Self {
            recent: RwLock::new(VecDeque::with_capacity(MAX_AUDIT_EVENTS)),
            trails: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn log(&self, event: AuditEvent) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_AUDIT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        self.trails.entry(event.caller_uid).or_default().record(event);
    }

    /// Most recent decisions first
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.recent.read().iter().rev().take(limit).cloned().collect()
    }

    /// Most recent decisions for `uid` first
    pub fn for_uid(&self, uid: Uid, limit: usize) -> Vec<AuditEvent> {
        self.trails
            .get(&uid)
            .map(|trail| trail.events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn denial_count(&self, uid: Uid) -> u64 {
        self.trails.get(&uid).map_or(0, |trail| trail.denials)
    }

    /// Denials of `uid` per dispatch kind, most frequent first
    pub fn denials_by_kind(&self, uid: Uid) -> Vec<(&'static str, u64)> {
        let Some(trail) = self.trails.get(&uid) else {
            return Vec::new();
        };
        let mut kinds: Vec<(&'static str, u64)> = trail
            .denials_by_kind
            .iter()
            .map(|(kind, count)| (*kind, *count))
            .collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        kinds
    }

    /// Uids with at least one denial, highest count first
    pub fn uids_with_denials(&self) -> Vec<(Uid, u64)> {
        let mut uids: Vec<(Uid, u64)> = self
            .trails
            .iter()
            .filter(|trail| trail.denials > 0)
            .map(|trail| (*trail.key(), trail.denials))
            .collect();
        uids.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        uids
    }

    /// Forget a uid, e.g. once its sandbox is gone
    pub fn clear_uid(&self, uid: Uid) {
        self.trails.remove(&uid);
    }

    pub fn clear_all(&self) {
        self.recent.write().clear();
        self.trails.clear();
    }

    pub fn stats(&self) -> AuditStats {
        let mut stats = AuditStats {
            total_events: self.recent.read().len(),
            uids_tracked: self.trails.len(),
            ..AuditStats::default()
        };
        for trail in self.trails.iter() {
            stats.total_denials += trail.denials;
            for (kind, count) in &trail.denials_by_kind {
                *stats.denials_by_kind.entry(kind.to_string()).or_insert(0) += count;
            }
        }
        stats
    }
}

impl Default for RestrictionAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub total_denials: u64,
    pub uids_tracked: usize,
    pub denials_by_kind: BTreeMap<String, u64>,
}
