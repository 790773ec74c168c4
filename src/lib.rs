//! # iec60870
//!
//! An asynchronous Rust implementation of the IEC 60870-5 telecontrol
//! protocol family: the CS101 (serial, FT 1.2) and CS104 (TCP/IP)
//! companion standards used across power-utility SCADA systems.
//!
//! ## Layout
//!
//! - [`error`], [`common`], [`codec`], [`time`], [`object`], [`asdu`] —
//!   transport-independent codec: information objects, ASDUs, CP24/CP56
//!   time tags, and the application-layer parameter sets that fix wire
//!   layout for a session. Always available.
//! - [`apci`], [`queue`], [`client104`], [`server104`] (feature
//!   `iec104`, default on) — the CS104 APCI engine: I/S/U frames, the
//!   k/w sliding window, and the client/server connection tasks built
//!   on top of it. Re-exported as [`iec104`] for a shorter import path.
//! - [`ft12`], [`link101`], [`iec101`] (feature `iec101`, default on) —
//!   CS101: FT 1.2 serial framing, the unbalanced/balanced link-layer
//!   state machines, and the master/slave orchestration built on them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use iec60870::iec104::{Client, ClientConfig};
//! use iec60870::asdu::Asdu;
//! use iec60870::object::{InformationObject, IoBody, TypeId};
//! use iec60870::common::{ApplicationLayerParameters, CauseOfTransmission};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default().with_address("192.168.1.100", 2404);
//!     let client = Client::connect(config).await?;
//!     client.start_dt().await?;
//!
//!     let alp = ApplicationLayerParameters::default();
//!     let mut interrogation = Asdu::new(
//!         TypeId::CIcNa1,
//!         false,
//!         CauseOfTransmission::Activation,
//!         false,
//!         false,
//!         None,
//!         1,
//!     );
//!     interrogation.add_io(
//!         InformationObject { ioa: 0, body: IoBody::InterrogationCommand { qoi: 20 } },
//!         &alp,
//!     )?;
//!     client.send_asdu(interrogation).await?;
//!
//!     while let Some(asdu) = client.receive().await? {
//!         println!("received {:?}", asdu);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod common;
pub mod codec;
pub mod time;
pub mod object;
pub mod asdu;

#[cfg(feature = "iec104")]
pub mod apci;
#[cfg(feature = "iec104")]
pub mod queue;
#[cfg(feature = "iec104")]
pub mod client104;
#[cfg(feature = "iec104")]
pub mod server104;

#[cfg(feature = "iec101")]
pub mod ft12;
#[cfg(feature = "iec101")]
pub mod link101;
#[cfg(feature = "iec101")]
pub mod iec101;

pub use crate::error::{IecError, IecResult};
pub use crate::common::{CauseOfTransmission, QualityDescriptor};
pub use crate::object::{InformationObject, IoBody, TypeId};
pub use crate::asdu::Asdu;

/// Shorter import path for the CS104 (TCP/IP) client/server, gathering
/// [`crate::apci`], [`crate::client104`], and [`crate::server104`]
/// under the name operators actually call the standard by.
#[cfg(feature = "iec104")]
pub mod iec104 {
    pub use crate::apci::ConnectionEvent;
    pub use crate::client104::{Client, ClientConfig};
    pub use crate::server104::{Plugin, RedundancyGroup, Server, ServerConfig, ServerMode, TlsConfig};
}
