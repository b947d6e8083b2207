//! # s7commplus
//!
//! S7CommPlus client for Siemens S7-1200 and S7-1500 controllers.
//!
//! The crate speaks the TLS secured variant of the protocol (V3 framing) on
//! top of ISO-on-TCP, including session setup, password legitimation, tag
//! reads and writes, change subscriptions and alarm notifications.
//!
//! ## Features
//!
//! - **Async**: tokio based transport, one request in flight per session
//! - **Pluggable TLS**: bring any engine through [`TlsEngine`]
//! - **Legitimation**: legacy SHA-1 challenge and modern AES-256-CBC flows
//! - **Subscriptions**: cyclic tag updates with credit flow control
//! - **Alarms**: alarm instances joined with their texts from the text library
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use s7commplus::{ClientConfig, ItemAddress, PlcTag, S7Client, Softdatatype};
//!
//! #[tokio::main]
//! async fn main() -> s7commplus::Result<()> {
//!     let config = ClientConfig::new("192.168.0.1:102").password("secret");
//!     let mut client = S7Client::connect_tcp(config, Box::new(MyTlsEngine::new())).await?;
//!
//!     let address = ItemAddress::data_block(1, &[2]);
//!     let mut tags = vec![PlcTag::new("counter", address, Softdatatype::DInt)];
//!     client.read_tags(&mut tags).await?;
//!     println!("counter = {:?}", tags[0].value);
//!
//!     client.disconnect().await
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! ```text
//! TCP (102) -> TPKT -> COTP DT -> TLS -> S7CommPlus frame
//!
//! Frame:
//! +------+---------+------------+-----------------+------+---------+------------+
//! | 0x72 | version | length:u16 | PDU             | 0x72 | version | 0x0000     |
//! +------+---------+------------+-----------------+------+---------+------------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod alarm;
pub mod client;
pub mod codec;
pub mod error;
pub mod iso;
pub mod legitimation;
pub mod pdu;
pub mod subscription;
pub mod tag;
pub mod transport;
pub mod types;

// Re-export main types
pub use alarm::{AlarmCatalog, AlarmSubscription, AlarmSubscriptionConfig, Dai};
pub use client::{ClientConfig, ConnectionState, S7Client, SessionContext};
pub use codec::{Frame, S7CommPlusCodec};
pub use error::{ErrorKind, Result, S7Error};
pub use legitimation::{DeviceVersion, LegitimationMode};
pub use pdu::{FunctionCode, Notification, ProtocolVersion};
pub use subscription::{CreditControl, Subscription, SubscriptionConfig};
pub use tag::{PlcTag, TagStatus};
pub use transport::{IsoTransport, TlsEngine, Transport};
pub use types::*;
