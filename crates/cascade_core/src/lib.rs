//! cascade core types
//!
//! Pure data model for the call-graph replay engine: identifiers, trace
//! packets and their validated decoding. No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod store;
pub mod time;
pub mod transaction;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{DataOpId, NodeId, TxnId};
pub use store::{OpType, StoreKind};
pub use time::Timestamp;
pub use transaction::{Call, CallAction, CallMode, DataOp, StartingPoint, Transaction};
