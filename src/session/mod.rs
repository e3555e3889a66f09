/*!
 * Load Sessions
 * Per (caller, module) lifecycle state machine and its registry
 */

mod registry;
#[allow(clippy::module_inception)]
mod session;
mod state;
mod transport;

pub use registry::{SessionKey, SessionRegistry};
pub use session::{LoadSdkSession, SessionOptions};
pub use state::LoadStatus;
pub use transport::{
    LoadCallback, LoadRequest, LoadSdkError, LoadSdkErrorCode, Params, SandboxLatencyInfo,
    SandboxLoadErrorCode, SandboxStatus, SandboxTransport, SandboxedSdk, SurfacePackage,
    SurfacePackageCallback, SurfacePackageError, SurfacePackageErrorCode, SurfaceRequest,
    UnloadCallback,
};
