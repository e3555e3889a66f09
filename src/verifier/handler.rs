/*!
 * API Verification Handler
 * Checks each segment's referenced methods against an API allow-list
 */

use super::allowlist::ApiAllowlist;
use super::container::DexEntry;
use super::dex::{DexSymbols, MethodRef};
use super::queue::VerificationHandler;
use crate::core::errors::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The first symbol that was not allowed, and where it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub segment: DexEntry,
    pub symbol: MethodRef,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} references disallowed API {}", self.segment, self.symbol)
    }
}

/// Result of a finished verification job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    /// Segments handed to the allow-list check, including a rejected one
    pub segments_checked: usize,
    pub failure: Option<VerificationFailure>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Failure reason suitable for a load error message
    pub fn describe(&self) -> String {
        match &self.failure {
            Some(failure) => failure.to_string(),
            None if self.passed => "verification passed".to_string(),
            None => "verification failed".to_string(),
        }
    }
}

type Reply = Box<dyn FnOnce(SandboxResult<Verdict>) + Send + 'static>;

/// Allow-list check for one job; reports one [`Verdict`] or error
pub struct ApiVerificationHandler {
    allowlist: Arc<ApiAllowlist>,
    namespaces: Vec<String>,
    segments_checked: usize,
    failure: Option<VerificationFailure>,
    reply: Reply,
}

impl ApiVerificationHandler {
    /// `namespaces` limits the check to classes under those dotted
    /// prefixes; empty checks every referenced class.
    pub fn new<F>(allowlist: Arc<ApiAllowlist>, namespaces: Vec<String>, reply: F) -> Self
    where
        F: FnOnce(SandboxResult<Verdict>) + Send + 'static,
    {
        Self {
            allowlist,
            namespaces,
            segments_checked: 0,
            failure: None,
            reply: Box::new(reply),
        }
    }

    fn in_scope(&self, method: &MethodRef) -> bool {
        self.namespaces.is_empty()
            || self
                .namespaces
                .iter()
                .any(|prefix| method.class.starts_with(prefix.as_str()))
    }
}

impl VerificationHandler for ApiVerificationHandler {
    fn verify(&mut self, segment: &DexEntry, symbols: &DexSymbols) -> bool {
        self.segments_checked += 1;
        let rejected = symbols
            .methods()
            .find(|method| self.in_scope(method) && !self.allowlist.is_allowed(method));

        match rejected {
            Some(method) => {
                self.failure = Some(VerificationFailure {
                    segment: segment.clone(),
                    symbol: method.clone(),
                });
                false
            }
            None => true,
        }
    }

    fn on_complete(self: Box<Self>, passed: bool) {
        let verdict = Verdict {
            passed,
            segments_checked: self.segments_checked,
            failure: self.failure,
        };
        (self.reply)(Ok(verdict));
    }

    fn on_error(self: Box<Self>, error: SandboxError) {
        (self.reply)(Err(error));
    }
}
