/*!
 * SDK Sandbox Core Library
 *
 * Bytecode verification, load session lifecycle and restriction enforcement
 * for modules running in an isolated sandbox process.
 */

pub mod config;
pub mod core;
pub mod manager;
pub mod monitoring;
pub mod restrictions;
pub mod session;
pub mod verifier;

// Re-exports
pub use config::SandboxCoreConfig;
pub use core::{
    ApplicationInfo, CallbackExecutor, CallingInfo, HandlerThread, SandboxError, SandboxResult,
    SdkProviderInfo, TargetSdkVersion, TokioExecutor, Uid,
};
pub use manager::{LoadSdkRequest, SdkSandboxManager};
pub use monitoring::{init_tracing, LatencyStage, TelemetrySink};
pub use restrictions::{DispatchDescriptor, Intent, RestrictionPolicyEngine};
pub use session::{LoadSdkSession, LoadStatus, SessionRegistry};
pub use verifier::{AllowlistCatalog, AllowlistTrie, SdkDexVerifier, SymbolExtractor};
