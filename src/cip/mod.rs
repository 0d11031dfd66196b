//! Common Industrial Protocol layer.
//!
//! - [`epath`]: path segments addressing objects and tag elements
//! - [`message_router`]: request/reply framing and service codes
//! - [`unconnected_send`]: routing through the Connection Manager
//! - [`connection_manager`]: Forward Open / Forward Close
//! - [`data_types`]: elementary type codes

pub mod connection_manager;
pub mod data_types;
pub mod epath;
pub mod message_router;
pub mod unconnected_send;

pub use data_types::DataType;
pub use epath::{EPath, LogicalType, PortLink};
pub use message_router::{services, MessageRouterReply};
