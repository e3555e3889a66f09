/*!
 * Bytecode Verifier
 *
 * Decides whether every API a sandboxed module references is on the
 * platform allow-list for the module's target SDK.
 *
 * Pipeline: `SymbolExtractor` enumerates and parses segments,
 * `VerificationQueue` runs jobs on one worker, `ApiVerificationHandler`
 * checks each segment against an `ApiAllowlist` trie.
 */

pub mod allowlist;
pub mod container;
pub mod dex;
pub mod handler;
pub mod queue;
pub mod trie;

pub use allowlist::{
    AllowedApi, AllowedApisList, AllowedApisPerTargetSdk, AllowlistCatalog, ApiAllowlist,
    ParameterTypes,
};
pub use container::{segment_index, DexEntry, SymbolExtractor};
pub use dex::{DexSymbols, FieldRef, MethodRef};
pub use handler::{ApiVerificationHandler, Verdict, VerificationFailure};
pub use queue::{JobHandle, JobOptions, VerificationHandler, VerificationQueue, VerificationTicket};
pub use trie::{AllowlistTrie, PathToken};

use crate::config::VerificationConfig;
use crate::core::dispatch::CallbackExecutor;
use crate::core::errors::SandboxResult;
use crate::core::sync::RcuCell;
use crate::core::types::{TargetSdkVersion, Uid};
use crate::monitoring::{LatencyStage, StageSpan, TelemetrySink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Module verification service
///
/// Owns its queue and an atomically replaceable allow-list catalog.
pub struct SdkDexVerifier {
    queue: VerificationQueue,
    catalog: RcuCell<AllowlistCatalog>,
    config: VerificationConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SdkDexVerifier {
    pub fn new(
        catalog: AllowlistCatalog,
        config: VerificationConfig,
        executor: Arc<dyn CallbackExecutor>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> SandboxResult<Self> {
        Ok(Self {
            queue: VerificationQueue::new(executor)?,
            catalog: RcuCell::new(catalog),
            config,
            telemetry,
        })
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn queue(&self) -> &VerificationQueue {
        &self.queue
    }

    /// Replace the allow-list catalog for jobs queued from now on
    pub fn update_allowlist(&self, catalog: AllowlistCatalog) {
        info!(versions = ?catalog.versions(), "API allow-list replaced");
        self.catalog.store(catalog);
    }

    /// Decode and install a serialized catalog; a malformed document keeps
    /// the current one
    pub fn load_allowlist_document(&self, bytes: &[u8]) -> SandboxResult<()> {
        match AllowlistCatalog::decode(bytes) {
            Ok(catalog) => {
                self.update_allowlist(catalog);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Rejected API allow-list document, keeping previous");
                Err(e)
            }
        }
    }

    pub fn catalog(&self) -> Arc<AllowlistCatalog> {
        self.catalog.load()
    }

    /// Queue verification of `container`; `reply` runs once on the dispatch context
    ///
    /// Fails synchronously with `NotFound` when no allow-list covers `target_sdk`.
    pub fn verify_module<F>(
        &self,
        container: impl Into<PathBuf>,
        label: impl Into<String>,
        target_sdk: TargetSdkVersion,
        caller_uid: Uid,
        reply: F,
    ) -> SandboxResult<JobHandle>
    where
        F: FnOnce(SandboxResult<Verdict>) + Send + 'static,
    {
        let allowlist = self.catalog.load().select(target_sdk)?;
        let span = StageSpan::new(
            LatencyStage::VerifyModule,
            caller_uid,
            Arc::clone(&self.telemetry),
        );
        let handler = ApiVerificationHandler::new(
            allowlist,
            self.config.restricted_namespaces.clone(),
            move |result: SandboxResult<Verdict>| {
                span.finish(matches!(&result, Ok(verdict) if verdict.passed));
                reply(result);
            },
        );

        Ok(self.queue.queue_job_with(
            container,
            label,
            Box::new(handler),
            JobOptions::with_timeout(self.config.timeout),
        ))
    }

    /// Queue verification and return a ticket for the verdict
    pub fn verify(
        &self,
        container: impl Into<PathBuf>,
        label: impl Into<String>,
        target_sdk: TargetSdkVersion,
        caller_uid: Uid,
    ) -> SandboxResult<VerificationTicket<Verdict>> {
        let (sender, receiver) = flume::bounded(1);
        let job = self.verify_module(container, label, target_sdk, caller_uid, move |result| {
            let _ = sender.send(result);
        })?;
        Ok(VerificationTicket::new(job, receiver))
    }
}
