/*!
 * Core Module
 * Fundamental types, limits, error handling and dispatch contexts
 */

pub mod dispatch;
pub mod errors;
pub mod limits;
pub mod sync;
pub mod types;

// Re-export for convenience
pub use dispatch::{CallbackExecutor, HandlerThread, Task, TokioExecutor};
pub use errors::*;
pub use sync::RcuCell;
pub use types::*;
