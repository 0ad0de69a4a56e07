//! High-throughput synchronous FIFO streaming from FTDI USB bridges.
//!
//! FT2232H-class chips in synchronous 245 FIFO mode can sustain close to the
//! full USB 2.0 bulk bandwidth, but only if the host keeps enough bulk IN
//! transfers queued at all times. This crate keeps a fixed pool of transfers
//! in flight, strips the chip's per-packet status header, and hands the
//! payload to a consumer callback as each transfer completes.
//!
//! # Getting Started
//!
//! ## Callback Mode
//!
//! ```no_run
//! use ftdi_fifo::{open_device, BitMode, CallbackResult, DeviceSelector, Interface, StreamConfig, StreamEvent};
//!
//! let conn = open_device(&DeviceSelector::Any).unwrap();
//! conn.reset().unwrap();
//! conn.set_mode(Interface::A, BitMode::SyncFifo, 0xff, 0).unwrap();
//!
//! let config = StreamConfig::new(64, 16).with_layout(conn.info().caps.layout());
//! let mut received = 0u64;
//! let exit = conn.read_stream(Interface::A, config, |event, progress| {
//!     match event {
//!         StreamEvent::Data { payload, .. } => received += payload.len() as u64,
//!         StreamEvent::Periodical => {
//!             println!("{:.1} MB/s", progress.current_rate / 1e6);
//!         }
//!         StreamEvent::Cleanup => {}
//!     }
//!     if received >= 100 << 20 {
//!         CallbackResult::Stop
//!     } else {
//!         CallbackResult::Continue
//!     }
//! });
//! println!("stream ended: {:?}", exit);
//! ```
//!
//! ## Channel Mode
//!
//! Run the stream on a background thread and iterate over decoded chunks:
//!
//! ```no_run
//! use ftdi_fifo::{open_device, DeviceSelector, Interface, StreamConfig};
//!
//! let conn = open_device(&DeviceSelector::Any).unwrap();
//! let receiver = conn
//!     .claim()
//!     .unwrap()
//!     .into_receiver(Interface::A, StreamConfig::default(), 32)
//!     .unwrap();
//!
//! for chunk in receiver.take(1000) {
//!     println!("{} bytes", chunk.payload.len());
//! }
//! ```
//!
//! # Features
//!
//! - `ftdi` (default): nusb-backed hardware backend
//! - `serde`: Serialize/Deserialize for configuration types
//!
//! Without `ftdi`, the crate still provides the stream engine, which can be
//! driven by any [`TransferBackend`].

pub mod backend;
pub mod connection;
pub mod discovery;
mod error;
pub mod framing;
pub mod pool;
pub mod progress;
pub mod protocols;
pub mod receiver;
pub mod stream;
pub mod types;

// Crate-level error types
pub use error::{Error, Result};

// Transport seams
pub use backend::{Completion, DeviceBackend, RawBuffer, Rejected, TransferBackend};

// Core types
pub use types::{
    BitMode, CallbackResult, ChipCaps, DeviceInfo, Interface, RunExit, StreamConfig, StreamEvent,
    StreamStats, TransferFailure,
};

pub use connection::{baud_divisor, BaudDivisor, Connection, Session};
pub use discovery::{DeviceSelector, KnownDevice, KNOWN_DEVICES};
pub use framing::{PacketLayout, PacketStatus};
pub use pool::TransferPool;
pub use progress::{ProgressInfo, ProgressTracker};
pub use receiver::{Chunk, ChunkReceiver};
pub use stream::{Phase, StreamControl, StreamEngine};

#[cfg(feature = "ftdi")]
pub use protocols::ftdi::{self, BulkInTransport, FtdiDevice};

// =============================================================================
// Device Discovery Functions
// =============================================================================

/// List attached devices found in the known device table.
#[cfg(feature = "ftdi")]
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    protocols::ftdi::list_devices()
}

/// Open the first known device matching `selector`.
#[cfg(feature = "ftdi")]
pub fn open_device(selector: &DeviceSelector) -> Result<Connection<FtdiDevice>> {
    Connection::open(selector)
}
