//! Integration layer: the contract between the core and protocol adapters.

pub mod context;
pub mod protocol;
pub mod table;

pub use context::{ProtocolContext, ProtocolEvent};
pub use protocol::{BoxedProtocol, ConfigurableProtocol, Protocol};
pub use table::ProtocolTable;
