//! CASCADE Transaction Log
//!
//! Append-only CSV records of what each node did with each transaction,
//! with size-based rotation. One writer is shared per node.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod rotation;
pub mod writer;

pub use record::{EntryKind, LogRecord};
pub use rotation::{RotationPolicy, backup_path};
pub use writer::{LogError, TxnLog};
