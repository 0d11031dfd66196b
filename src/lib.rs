//! # EtherNet/IP and CIP client
//!
//! A Rust library for reading and writing tags on Allen-Bradley Logix
//! controllers over EtherNet/IP, using the Common Industrial Protocol.
//!
//! ## Features
//!
//! - **Symbolic tags**: atomic types, arrays, bits, strings and user-defined structures
//! - **Batching**: tag groups packed into Multiple Service Packet requests
//! - **Large values**: fragmented reads and writes handled transparently
//! - **Scheduling**: per-purpose priority queues and a subscription scan loop
//! - **Messaging**: unconnected (routed Unconnected Send) or Class 3 connected
//! - **Discovery**: ListIdentity/ListServices, including UDP broadcast
//! - **No panics**: all errors returned as `Result<T, EnipError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use enip_cip::{Controller, ControllerConfig, Tag, TagValue};
//!
//! #[tokio::main]
//! async fn main() -> enip_cip::Result<()> {
//!     // CPU in slot 0 behind the Ethernet module at 192.168.1.10
//!     let plc = Controller::new(ControllerConfig::new().with_slot(0));
//!     plc.connect("192.168.1.10").await?;
//!
//!     let props = plc.properties();
//!     println!("{} v{}", props.identity.product_name, props.identity.version());
//!
//!     // Read a DINT
//!     let counter = Arc::new(Tag::new("Program:MainProgram.counter")?);
//!     plc.read_tag(&counter, None).await?;
//!     println!("counter = {:?}", counter.controller_value());
//!
//!     // Write it back incremented
//!     if let Some(TagValue::Dint(n)) = counter.controller_value() {
//!         plc.write_tag(&counter, Some(TagValue::Dint(n + 1)), None).await?;
//!     }
//!
//!     plc.disconnect().await
//! }
//! ```
//!
//! ## Tag Names
//!
//! | Form | Example |
//! |------|---------|
//! | Controller scope | `counter`, `motor.speed` |
//! | Program scope | `Program:MainProgram.counter` |
//! | Array element | `values[3]`, `grid[1,2]` |
//! | Bit of an integer | `status.4` |
//! | Module tag | `Local:1:I.Data` |
//!
//! Names are validated up front; see [`tag::validate_tag_name`].
//!
//! ## Structures
//!
//! Structure layouts are described with [`TemplateDefinition`] and
//! registered with the controller. Values decode to [`StructValue`].
//!
//! ```
//! use enip_cip::cip::DataType;
//! use enip_cip::{TemplateDefinition, TemplateRegistry};
//!
//! let mut registry = TemplateRegistry::new();
//! let motor = registry
//!     .register(
//!         TemplateDefinition::new("Motor")
//!             .member("running", DataType::BOOL)
//!             .member("speed", DataType::REAL)
//!             .member("name", "STRING"),
//!     )
//!     .unwrap();
//! assert_eq!(motor.members()[2].offset_bits, 64);
//! ```
//!
//! ## Scanning
//!
//! ```no_run
//! use std::sync::Arc;
//! use enip_cip::{Controller, ControllerConfig, Tag, TagEvent};
//!
//! # async fn run() -> enip_cip::Result<()> {
//! let plc = Controller::new(ControllerConfig::new());
//! plc.connect("192.168.1.10").await?;
//!
//! let tag = Arc::new(Tag::new("temperature")?);
//! let mut events = tag.subscribe();
//! plc.subscribe(tag);
//!
//! let scanner = plc.clone();
//! tokio::spawn(async move { scanner.scan().await });
//!
//! while let Ok(event) = events.recv().await {
//!     if let TagEvent::Changed { name, value, .. } = event {
//!         println!("{name} -> {value:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`encapsulation`]: 24-byte header, Common Packet Format, session commands
//! - [`cip`]: EPATH segments, Message Router, Unconnected Send, Connection Manager
//! - [`template`]: type layouts and the structure codec
//! - [`tag`] and [`tag_group`]: request builders and reply decoding
//! - [`session`]: the encapsulation session over one byte stream
//! - [`queue`]: the priority task queue
//! - [`controller`]: everything above behind one handle

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cip;
pub mod codec;
pub mod controller;
pub mod encapsulation;
mod error;
pub mod identity;
pub mod queue;
pub mod session;
pub mod tag;
pub mod tag_group;
pub mod template;
pub mod transport;
pub mod utils;
mod value;

pub use cip::{DataType, EPath};
pub use controller::{Controller, ControllerConfig};
pub use error::{cip_status_description, EnipError, Result};
pub use identity::{ControllerProperties, DeviceIdentity, FaultStatus, ServiceInfo};
pub use session::{Session, SessionConfig, SessionEvent, SessionState};
pub use tag::{Tag, TagBuilder, TagError, TagEvent};
pub use tag_group::TagGroup;
pub use template::{Template, TemplateDefinition, TemplateRegistry, TypeRef};
pub use value::{StructValue, TagValue};
