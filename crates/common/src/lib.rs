// mindsync-common: domain types shared by the mindsync crates

pub mod projection;
pub mod time;
pub mod types;

pub use projection::{Projection, ProjectionError};
pub use types::{Document, Node, OpLogEntry, OperationKind};
