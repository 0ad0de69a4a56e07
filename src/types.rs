//! Core types for FIFO streaming.
//!
//! Configuration (`StreamConfig`), chip identity (`DeviceInfo`, `ChipCaps`),
//! and the vocabulary shared between the stream engine and its consumer
//! (`StreamEvent`, `CallbackResult`, `RunExit`, `StreamStats`).

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::framing::{PacketLayout, PacketStatus};

// =============================================================================
// Chip Interfaces and Modes
// =============================================================================

/// One of the independent channels of a multi-channel FTDI chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Interface {
    #[default]
    A,
    B,
}

impl Interface {
    /// Vendor request index (1-based).
    pub fn index(self) -> u16 {
        match self {
            Interface::A => 1,
            Interface::B => 2,
        }
    }

    /// USB interface number (0-based).
    pub fn number(self) -> u8 {
        self.index() as u8 - 1
    }

    /// Bulk IN endpoint address.
    pub fn endpoint_in(self) -> u8 {
        0x81 + self.number() * 2
    }

    /// Bulk OUT endpoint address.
    pub fn endpoint_out(self) -> u8 {
        0x02 + self.number() * 2
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::A => f.write_str("A"),
            Interface::B => f.write_str("B"),
        }
    }
}

/// Chip operating mode selected with the set-bitmode request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum BitMode {
    #[default]
    Reset = 0,
    BitBang = 1 << 0,
    Mpsse = 1 << 1,
    SyncBitBang = 1 << 2,
    Mcu = 1 << 3,
    Opto = 1 << 4,
    Cbus = 1 << 5,
    /// Synchronous 245 FIFO; bulk data maps straight onto the FIFO pins.
    SyncFifo = 1 << 6,
}

impl BitMode {
    /// Raw mode byte as sent in the high byte of the request value.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Device Identity
// =============================================================================

/// Chip capabilities that change how the byte stream is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipCaps {
    /// Native bulk packet size in bytes.
    pub packet_size: usize,
    /// Firmware streams without the per-packet status header.
    pub alternate_header: bool,
}

impl ChipCaps {
    /// FT2232H-class bridge: 512-byte packets with a 2-byte status header.
    pub const FT2232H: ChipCaps = ChipCaps {
        packet_size: crate::framing::FTDI_PACKET_SIZE,
        alternate_header: false,
    };

    /// The packet layout the stream decoder should use for this chip.
    pub fn layout(&self) -> PacketLayout {
        if self.alternate_header {
            PacketLayout::headerless(self.packet_size)
        } else {
            PacketLayout::new(self.packet_size, crate::framing::FTDI_HEADER_SIZE)
        }
    }
}

impl Default for ChipCaps {
    fn default() -> Self {
        Self::FT2232H
    }
}

/// Information about a discovered or opened device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Human-readable name from the known device table or product string.
    pub name: String,
    /// Serial number string, if the device reports one.
    pub serial: Option<String>,
    /// Framing capabilities.
    pub caps: ChipCaps,
}

impl DeviceInfo {
    /// Stable identifier of the form `vvvv:pppp[:serial]`.
    pub fn stable_id(&self) -> String {
        match &self.serial {
            Some(serial) => format!(
                "{:04x}:{:04x}:{}",
                self.vendor_id, self.product_id, serial
            ),
            None => format!("{:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.stable_id())
    }
}

// =============================================================================
// Transfer Status
// =============================================================================

/// Why a bulk transfer did not complete normally.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TransferFailure {
    /// The transfer was cancelled before it completed.
    #[error("transfer cancelled")]
    Cancelled,
    /// The endpoint halted.
    #[error("endpoint stalled")]
    Stall,
    /// The device was unplugged.
    #[error("device disconnected")]
    Disconnected,
    /// Host controller or hardware fault.
    #[error("hardware fault")]
    Fault,
    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Stream Configuration
// =============================================================================

/// Default interval between periodic callbacks.
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound on the size of a single bulk transfer.
pub const DEFAULT_MAX_TRANSFER_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for a streaming session.
///
/// The pool holds `num_transfers` buffers of
/// `packets_per_transfer * layout.packet_size` bytes each, all kept in flight.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamConfig {
    /// Native packets per transfer buffer.
    pub packets_per_transfer: usize,

    /// Pool depth; number of transfers kept in flight concurrently.
    pub num_transfers: usize,

    /// Packet framing of the incoming byte stream.
    pub layout: PacketLayout,

    /// Interval between `StreamEvent::Periodical` callbacks (default: 100ms).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub periodic_interval: Duration,

    /// Maximum time to wait for cancelled transfers to report back (default: 1s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub drain_timeout: Duration,

    /// Upper bound on a single transfer buffer (default: 16 MiB).
    pub max_transfer_size: usize,
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            packets_per_transfer: 64,
            num_transfers: 16,
            layout: PacketLayout::default(),
            periodic_interval: DEFAULT_PERIODIC_INTERVAL,
            drain_timeout: Duration::from_secs(1),
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
        }
    }
}

impl StreamConfig {
    /// Create a configuration with the given buffer geometry.
    pub fn new(packets_per_transfer: usize, num_transfers: usize) -> Self {
        Self {
            packets_per_transfer,
            num_transfers,
            ..Default::default()
        }
    }

    /// Set the packet layout (builder pattern).
    pub fn with_layout(mut self, layout: PacketLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the periodic callback interval (builder pattern).
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = interval;
        self
    }

    /// Set the drain timeout (builder pattern).
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the maximum transfer size (builder pattern).
    pub fn with_max_transfer_size(mut self, bytes: usize) -> Self {
        self.max_transfer_size = bytes;
        self
    }

    /// Size in bytes of each raw transfer buffer.
    pub fn transfer_size(&self) -> usize {
        self.packets_per_transfer
            .saturating_mul(self.layout.packet_size)
    }

    /// Check the configuration against a transport limit.
    pub fn validate(&self, transport_max: usize) -> crate::Result<()> {
        use crate::Error;

        if self.packets_per_transfer == 0 {
            return Err(Error::invalid_config("packets_per_transfer must be >= 1"));
        }
        if self.num_transfers == 0 {
            return Err(Error::invalid_config("num_transfers must be >= 1"));
        }
        self.layout.validate()?;
        if self.periodic_interval.is_zero() {
            return Err(Error::invalid_config("periodic_interval must be non-zero"));
        }

        let limit = self.max_transfer_size.min(transport_max);
        let size = self.transfer_size();
        if size > limit {
            return Err(Error::invalid_config(format!(
                "transfer size {} ({} packets of {} bytes) exceeds limit of {} bytes",
                size, self.packets_per_transfer, self.layout.packet_size, limit
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Consumer Callback Vocabulary
// =============================================================================

/// An event delivered to the stream consumer.
#[derive(Debug)]
pub enum StreamEvent<'a> {
    /// Decoded payload from one completed transfer.
    Data {
        /// Payload bytes with all status headers removed, in packet order.
        payload: &'a [u8],
        /// Status header of the last packet in the transfer, if the layout has one.
        status: Option<PacketStatus>,
    },
    /// Fired once per periodic interval while streaming.
    Periodical,
    /// Fired exactly once after all transfers have been accounted for.
    Cleanup,
}

impl StreamEvent<'_> {
    /// Payload bytes for `Data` events.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            StreamEvent::Data { payload, .. } => Some(*payload),
            _ => None,
        }
    }
}

/// What the consumer wants the engine to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallbackResult {
    /// Keep streaming.
    #[default]
    Continue,
    /// Stop the session; in-flight transfers are cancelled and drained.
    Stop,
}

/// How a stream session ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// The consumer returned `CallbackResult::Stop`.
    CallbackEnded,
    /// The consumer callback panicked; treated as a stop request.
    CallbackPanicked,
    /// Stop was requested via `StreamControl::stop()`.
    Stopped,
    /// The channel receiver was dropped.
    ReceiverClosed,
}

/// Counters accumulated over a stream session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Transfers that completed successfully.
    pub transfers_completed: u64,
    /// Raw bytes received, headers included.
    pub raw_bytes: u64,
    /// Decoded payload bytes delivered to the consumer.
    pub payload_bytes: u64,
    /// Number of `Data` callbacks.
    pub data_callbacks: u64,
    /// Number of `Periodical` callbacks.
    pub periodic_callbacks: u64,
    /// Completions that arrived during drain and were discarded.
    pub discarded_transfers: u64,
    /// Most recent packet status header seen.
    pub last_status: Option<PacketStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_endpoints() {
        assert_eq!(Interface::A.endpoint_in(), 0x81);
        assert_eq!(Interface::A.endpoint_out(), 0x02);
        assert_eq!(Interface::B.endpoint_in(), 0x83);
        assert_eq!(Interface::B.endpoint_out(), 0x04);
        assert_eq!(Interface::A.index(), 1);
        assert_eq!(Interface::B.number(), 1);
    }

    #[test]
    fn test_bitmode_bits() {
        assert_eq!(BitMode::Reset.bits(), 0x00);
        assert_eq!(BitMode::BitBang.bits(), 0x01);
        assert_eq!(BitMode::SyncFifo.bits(), 0x40);
    }

    #[test]
    fn test_chip_caps_layout() {
        let layout = ChipCaps::FT2232H.layout();
        assert_eq!(layout.packet_size, 512);
        assert_eq!(layout.header_size, 2);

        let patched = ChipCaps {
            packet_size: 512,
            alternate_header: true,
        };
        assert_eq!(patched.layout().header_size, 0);
    }

    #[test]
    fn test_stable_id() {
        let mut info = DeviceInfo {
            vendor_id: 0x0403,
            product_id: 0x6010,
            name: "FT2232H".into(),
            serial: None,
            caps: ChipCaps::default(),
        };
        assert_eq!(info.stable_id(), "0403:6010");
        info.serial = Some("FT12345".into());
        assert_eq!(info.stable_id(), "0403:6010:FT12345");
    }

    #[test]
    fn test_stream_config_transfer_size() {
        let config = StreamConfig::new(8, 4);
        assert_eq!(config.transfer_size(), 4096);
        assert!(config.validate(usize::MAX).is_ok());
    }

    #[test]
    fn test_stream_config_rejects_zero_geometry() {
        assert!(StreamConfig::new(0, 4).validate(usize::MAX).is_err());
        assert!(StreamConfig::new(8, 0).validate(usize::MAX).is_err());
    }

    #[test]
    fn test_stream_config_respects_transport_limit() {
        let config = StreamConfig::new(8, 4);
        assert!(config.validate(4096).is_ok());
        assert!(config.validate(4095).is_err());

        let capped = StreamConfig::new(8, 4).with_max_transfer_size(2048);
        assert!(capped.validate(usize::MAX).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stream_config_serde_roundtrip() {
        let config = StreamConfig::new(32, 8)
            .with_periodic_interval(Duration::from_millis(250))
            .with_drain_timeout(Duration::from_secs(3));

        let json = serde_json::to_string(&config).expect("serialize to JSON");
        let restored: StreamConfig = serde_json::from_str(&json).expect("deserialize from JSON");

        assert_eq!(restored, config);
    }
}
