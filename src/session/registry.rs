/*!
 * Session Registry
 * Arena of load sessions keyed by (caller, module)
 */

use super::session::{LoadSdkSession, SessionOptions};
use super::transport::{LoadCallback, LoadSdkError, LoadSdkErrorCode, Params};
use crate::core::types::{CallingInfo, SdkProviderInfo};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Stable address of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub calling_info: CallingInfo,
    pub module_name: String,
}

impl SessionKey {
    pub fn new(calling_info: CallingInfo, module_name: impl Into<String>) -> Self {
        Self {
            calling_info,
            module_name: module_name.into(),
        }
    }
}

/// Owns every session; sessions mutate only through their own methods
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionKey, Arc<LoadSdkSession>, RandomState>>,
    options: SessionOptions,
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        info!("Session registry initialized");
        Self {
            sessions: Arc::new(DashMap::with_hasher(RandomState::new())),
            options,
        }
    }

    /// Create the session for a load request
    ///
    /// A pending or loaded session under the same key rejects the request
    /// with `AlreadyLoaded`. A failed or unloaded one is replaced by a fresh
    /// session; terminal sessions are never reused.
    pub fn open_session(
        &self,
        calling_info: CallingInfo,
        provider: SdkProviderInfo,
        params: Params,
        callback: Arc<dyn LoadCallback>,
    ) -> Result<Arc<LoadSdkSession>, LoadSdkError> {
        let key = SessionKey::new(calling_info.clone(), provider.module_name.clone());

        match self.sessions.entry(key) {
            Entry::Occupied(mut occupied) => {
                let status = occupied.get().status();
                if status.is_live() {
                    return Err(LoadSdkError::new(
                        LoadSdkErrorCode::AlreadyLoaded,
                        format!(
                            "module {} is already {} for {}",
                            provider.module_name, status, calling_info
                        ),
                    ));
                }
                debug!(
                    caller = %calling_info,
                    module = %provider.module_name,
                    previous = %status,
                    "Replacing finished session"
                );
                let session = self.create(calling_info, provider, params, callback);
                occupied.insert(Arc::clone(&session));
                Ok(session)
            }
            Entry::Vacant(vacant) => {
                let session = self.create(calling_info, provider, params, callback);
                vacant.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    fn create(
        &self,
        calling_info: CallingInfo,
        provider: SdkProviderInfo,
        params: Params,
        callback: Arc<dyn LoadCallback>,
    ) -> Arc<LoadSdkSession> {
        LoadSdkSession::new(calling_info, provider, params, callback, self.options.clone())
    }

    pub fn get(&self, calling_info: &CallingInfo, module_name: &str) -> Option<Arc<LoadSdkSession>> {
        self.sessions
            .get(&SessionKey::new(calling_info.clone(), module_name))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Every session of one caller, in module name order
    pub fn sessions_for(&self, calling_info: &CallingInfo) -> Vec<Arc<LoadSdkSession>> {
        let mut sessions: Vec<(String, Arc<LoadSdkSession>)> = self
            .sessions
            .iter()
            .filter(|entry| &entry.key().calling_info == calling_info)
            .map(|entry| (entry.key().module_name.clone(), Arc::clone(entry.value())))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions.into_iter().map(|(_, session)| session).collect()
    }

    /// Deliver the death of a caller's sandbox to all of its sessions
    ///
    /// Returns the number of sessions notified.
    pub fn on_sandbox_death(&self, calling_info: &CallingInfo) -> usize {
        // Collected first so no shard lock is held while callbacks run
        let sessions = self.sessions_for(calling_info);
        for session in &sessions {
            session.on_sandbox_death();
        }
        info!(caller = %calling_info, sessions = sessions.len(), "Sandbox death delivered");
        sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
