/*!
 * Synchronization Primitives
 * Snapshot publication for read-mostly policy documents
 */

mod rcu;

pub use rcu::RcuCell;
