//! Native packet framing of the FIFO byte stream.
//!
//! Every native packet read from the bulk IN endpoint starts with a 2-byte
//! status header (modem status, line status) followed by payload. A transfer
//! buffer is a concatenation of such packets, so the header recurs at every
//! packet boundary regardless of transfer length. Decoding removes the
//! headers and compacts the payload in place.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Native bulk packet size of FT2232H-class chips.
pub const FTDI_PACKET_SIZE: usize = 512;

/// Size of the status header at the start of every native packet.
pub const FTDI_HEADER_SIZE: usize = 2;

/// Size and header length of native packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PacketLayout {
    /// Bytes per native packet, header included.
    pub packet_size: usize,
    /// Bytes of status header at the start of each packet.
    pub header_size: usize,
}

impl Default for PacketLayout {
    fn default() -> Self {
        Self::new(FTDI_PACKET_SIZE, FTDI_HEADER_SIZE)
    }
}

impl PacketLayout {
    pub const fn new(packet_size: usize, header_size: usize) -> Self {
        Self {
            packet_size,
            header_size,
        }
    }

    /// Layout for firmware that streams raw payload without status headers.
    pub const fn headerless(packet_size: usize) -> Self {
        Self::new(packet_size, 0)
    }

    /// Payload bytes carried by one packet.
    pub fn payload_size(&self) -> usize {
        self.packet_size - self.header_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            return Err(Error::invalid_config("packet_size must be non-zero"));
        }
        if self.header_size >= self.packet_size {
            return Err(Error::invalid_config(format!(
                "header of {} bytes leaves no payload in a {}-byte packet",
                self.header_size, self.packet_size
            )));
        }
        Ok(())
    }

    fn check_length(&self, length: usize) -> Result<usize> {
        if length % self.packet_size != 0 {
            return Err(Error::Framing {
                length,
                packet_size: self.packet_size,
            });
        }
        Ok(length / self.packet_size)
    }

    /// Status header of the last packet in `raw`.
    ///
    /// Must be read before [`strip_in_place`](Self::strip_in_place), which
    /// overwrites the headers.
    pub fn last_status(&self, raw: &[u8]) -> Option<PacketStatus> {
        if self.header_size < FTDI_HEADER_SIZE || raw.len() < self.packet_size {
            return None;
        }
        let start = (raw.len() / self.packet_size - 1) * self.packet_size;
        Some(PacketStatus::new(raw[start], raw[start + 1]))
    }

    /// Remove every packet header from `raw`, compacting payload to the front.
    ///
    /// Returns the decoded payload length; `raw[..len]` holds the payload in
    /// packet order. A length that is not a whole number of packets is a
    /// framing error and leaves `raw` untouched.
    pub fn strip_in_place(&self, raw: &mut [u8]) -> Result<usize> {
        let packets = self.check_length(raw.len())?;
        let payload = self.payload_size();
        if self.header_size == 0 {
            return Ok(raw.len());
        }

        for i in 0..packets {
            let src = i * self.packet_size + self.header_size;
            raw.copy_within(src..src + payload, i * payload);
        }
        Ok(packets * payload)
    }

    /// Decode `raw` into a scratch vector without modifying the source.
    pub fn decode_into(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        self.check_length(raw.len())?;
        let before = out.len();
        for packet in raw.chunks_exact(self.packet_size) {
            out.extend_from_slice(&packet[self.header_size..]);
        }
        Ok(out.len() - before)
    }
}

/// The two status bytes at the start of each native packet.
///
/// Exposed as flags only; what the lines mean depends on the attached device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketStatus {
    /// First header byte: modem status lines.
    pub modem: u8,
    /// Second header byte: line status.
    pub line: u8,
}

impl PacketStatus {
    pub const CTS: u8 = 0x10;
    pub const DSR: u8 = 0x20;
    pub const RI: u8 = 0x40;
    pub const RLSD: u8 = 0x80;

    pub const DATA_READY: u8 = 0x01;
    pub const OVERRUN: u8 = 0x02;
    pub const PARITY_ERROR: u8 = 0x04;
    pub const FRAMING_ERROR: u8 = 0x08;
    pub const BREAK: u8 = 0x10;
    pub const TX_HOLDING_EMPTY: u8 = 0x20;
    pub const TX_EMPTY: u8 = 0x40;
    pub const FIFO_ERROR: u8 = 0x80;

    pub const fn new(modem: u8, line: u8) -> Self {
        Self { modem, line }
    }

    /// Test a modem status flag.
    pub fn modem_flag(&self, mask: u8) -> bool {
        self.modem & mask != 0
    }

    /// Test a line status flag.
    pub fn line_flag(&self, mask: u8) -> bool {
        self.line & mask != 0
    }

    /// Any of the receive error flags is set.
    pub fn has_error(&self) -> bool {
        self.line_flag(
            Self::OVERRUN | Self::PARITY_ERROR | Self::FRAMING_ERROR | Self::BREAK | Self::FIFO_ERROR,
        )
    }

    /// Both header bytes as a little-endian word.
    pub fn as_u16(&self) -> u16 {
        u16::from_le_bytes([self.modem, self.line])
    }
}
