//! Device connection with a single logical owner.
//!
//! A [`Connection`] wraps an opened device. Every operation, whether a
//! one-shot control request or a whole streaming session, first claims the
//! connection through a [`SessionToken`]. Claiming a connection that is
//! already claimed fails immediately with [`Error::Busy`] instead of blocking,
//! so a control request can never interleave with an active stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::DeviceBackend;
use crate::error::{Error, Result};
use crate::progress::ProgressInfo;
use crate::stream::StreamEngine;
use crate::types::{BitMode, CallbackResult, DeviceInfo, Interface, RunExit, StreamConfig, StreamEvent};

/// Timeout applied to every control request and synchronous transfer.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

pub(crate) const SIO_RESET_REQUEST: u8 = 0x00;
pub(crate) const SIO_RESET_SIO: u16 = 0x0000;
pub(crate) const SIO_SET_BAUD_REQUEST: u8 = 0x03;
pub(crate) const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;

/// H-series base clock.
const H_CLOCK: u32 = 120_000_000;
/// Legacy 3 MHz baud generator clock (48 MHz / 16).
const C_CLOCK: u32 = 48_000_000;

// =============================================================================
// Session Token
// =============================================================================

/// Proof that the holder exclusively owns a connection.
///
/// Dropping the token releases the claim.
#[derive(Debug)]
pub struct SessionToken {
    claimed: Arc<AtomicBool>,
}

impl SessionToken {
    fn acquire(claimed: &Arc<AtomicBool>) -> Result<Self> {
        claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(Self {
            claimed: claimed.clone(),
        })
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}

// =============================================================================
// Connection
// =============================================================================

/// An opened device with an exclusivity guard.
pub struct Connection<D: DeviceBackend> {
    device: Mutex<D>,
    info: DeviceInfo,
    claimed: Arc<AtomicBool>,
}

impl<D: DeviceBackend> Connection<D> {
    /// Wrap an opened device.
    pub fn new(device: D) -> Self {
        let info = device.info().clone();
        Self {
            device: Mutex::new(device),
            info,
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identity of the connected device.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Whether a session currently owns the connection.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Claim the connection for a sequence of operations.
    pub fn claim(&self) -> Result<Session<'_, D>> {
        let token = SessionToken::acquire(&self.claimed)?;
        Ok(Session { conn: self, token })
    }

    /// Release the device handle.
    ///
    /// Fails with `Busy` if a detached stream engine still holds the session;
    /// the handle itself is dropped either way.
    pub fn close(self) -> Result<()> {
        let _token = SessionToken::acquire(&self.claimed)?;
        log::debug!("closing {}", self.info);
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.claim()?.reset()
    }

    pub fn set_mode(
        &self,
        interface: Interface,
        mode: BitMode,
        pin_directions: u8,
        baud_rate: u32,
    ) -> Result<()> {
        self.claim()?
            .set_mode(interface, mode, pin_directions, baud_rate)
    }

    pub fn write_byte_sync(&self, interface: Interface, byte: u8) -> Result<()> {
        self.claim()?.write_byte_sync(interface, byte)
    }

    pub fn read_byte_sync(&self, interface: Interface) -> Result<u8> {
        self.claim()?.read_byte_sync(interface)
    }

    pub fn write(&self, interface: Interface, data: &[u8]) -> Result<usize> {
        self.claim()?.write(interface, data)
    }

    /// Stream from `interface` until the callback stops or a transfer fails.
    ///
    /// The connection stays claimed for the whole session. See
    /// [`StreamEngine::run`] for the callback contract.
    pub fn read_stream<F>(
        &self,
        interface: Interface,
        config: StreamConfig,
        callback: F,
    ) -> Result<RunExit>
    where
        F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
    {
        self.claim()?.read_stream(interface, config, callback)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Exclusive access to a connection; released on drop.
pub struct Session<'a, D: DeviceBackend> {
    conn: &'a Connection<D>,
    token: SessionToken,
}

impl<D: DeviceBackend> Session<'_, D> {
    fn device(&self) -> MutexGuard<'_, D> {
        // The token already serializes access; a poisoned lock only means a
        // previous holder panicked mid-request.
        self.conn
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset the chip's serial engine on every interface.
    pub fn reset(&self) -> Result<()> {
        let mut device = self.device();
        for interface in [Interface::A, Interface::B] {
            device.control_out(SIO_RESET_REQUEST, SIO_RESET_SIO, interface.index())?;
        }
        log::debug!("reset {}", self.conn.info);
        Ok(())
    }

    /// Select the bit mode and pin directions, then the baud rate.
    ///
    /// A `baud_rate` of zero leaves the baud generator untouched, which is
    /// the usual choice for synchronous FIFO mode.
    pub fn set_mode(
        &self,
        interface: Interface,
        mode: BitMode,
        pin_directions: u8,
        baud_rate: u32,
    ) -> Result<()> {
        let mut device = self.device();
        let value = u16::from(mode.bits()) << 8 | u16::from(pin_directions);
        device.control_out(SIO_SET_BITMODE_REQUEST, value, interface.index())?;

        if baud_rate > 0 {
            let divisor = baud_divisor(baud_rate)?;
            device.control_out(
                SIO_SET_BAUD_REQUEST,
                divisor.value,
                divisor.index | interface.index(),
            )?;
            log::debug!(
                "interface {}: {:?} dirs={:#04x} baud={} (actual {})",
                interface,
                mode,
                pin_directions,
                baud_rate,
                divisor.actual_baud
            );
        } else {
            log::debug!("interface {}: {:?} dirs={:#04x}", interface, mode, pin_directions);
        }
        Ok(())
    }

    /// Write a single byte on the interface's bulk OUT endpoint.
    pub fn write_byte_sync(&self, interface: Interface, byte: u8) -> Result<()> {
        let written = self.device().write_bulk(interface, &[byte])?;
        if written != 1 {
            return Err(Error::ProtocolViolation("single-byte write was short"));
        }
        Ok(())
    }

    /// Read one byte in bit-bang mode.
    ///
    /// The chip answers with its 2 status bytes followed by the pin state.
    pub fn read_byte_sync(&self, interface: Interface) -> Result<u8> {
        let mut packet = [0u8; 3];
        let read = self.device().read_bulk(interface, &mut packet)?;
        if read != packet.len() {
            return Err(Error::Framing {
                length: read,
                packet_size: packet.len(),
            });
        }
        Ok(packet[2])
    }

    /// Blocking bulk write of `data`.
    pub fn write(&self, interface: Interface, data: &[u8]) -> Result<usize> {
        self.device().write_bulk(interface, data)
    }

    /// Run a streaming session while holding this claim.
    pub fn read_stream<F>(
        &self,
        interface: Interface,
        config: StreamConfig,
        callback: F,
    ) -> Result<RunExit>
    where
        F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
    {
        let transport = self.device().bulk_in(interface)?;
        let mut engine = StreamEngine::new(transport, config);
        engine.run(callback)
    }

    /// Turn the claim into a stream engine that owns it.
    ///
    /// The connection stays claimed until the engine is dropped, which lets
    /// the engine run on another thread (see [`ChunkReceiver`](crate::ChunkReceiver)).
    pub fn into_stream(
        self,
        interface: Interface,
        config: StreamConfig,
    ) -> Result<StreamEngine<D::Transport>> {
        let transport = self.device().bulk_in(interface)?;
        Ok(StreamEngine::new(transport, config).with_token(self.token))
    }
}

// =============================================================================
// Baud Rate Divisor
// =============================================================================

/// Encoded baud divisor for the set-baud request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaudDivisor {
    /// Request value (low 16 bits of the divisor).
    pub value: u16,
    /// Request index high byte; OR in the interface index.
    pub index: u16,
    /// Baud rate the divisor actually produces.
    pub actual_baud: u32,
}

/// Compute the divisor for an H-series chip.
///
/// Rates above what the 3 MHz generator can divide down use the 12 MHz
/// (120 MHz / 10) generator, flagged by bit 17 of the divisor.
pub fn baud_divisor(baud: u32) -> Result<BaudDivisor> {
    if baud == 0 {
        return Err(Error::invalid_config("baud rate must be > 0"));
    }

    let (actual_baud, encoded) = if u64::from(baud) * 10 > u64::from(H_CLOCK / 0x3fff) {
        let (actual, encoded) = to_clock_bits(baud, H_CLOCK, 10);
        (actual, encoded | 0x20000)
    } else {
        to_clock_bits(baud, C_CLOCK, 16)
    };

    Ok(BaudDivisor {
        value: (encoded & 0xffff) as u16,
        index: ((encoded >> 8) & 0xff00) as u16,
        actual_baud,
    })
}

fn to_clock_bits(baud: u32, clock: u32, clock_div: u32) -> (u32, u32) {
    const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

    if baud >= clock / clock_div {
        return (clock / clock_div, 0);
    }
    if baud >= clock / (clock_div + clock_div / 2) {
        return (clock / (clock_div + clock_div / 2), 1);
    }
    if baud >= clock / (2 * clock_div) {
        return (clock / (2 * clock_div), 2);
    }

    let base = u64::from(clock) * 16 / u64::from(clock_div);
    let divisor = base / u64::from(baud);
    let mut best_div = if divisor & 1 == 1 {
        divisor / 2 + 1
    } else {
        divisor / 2
    };
    if best_div > 0x20000 {
        best_div = 0x1ffff;
    }

    let doubled = base / best_div;
    let actual = if doubled & 1 == 1 {
        doubled / 2 + 1
    } else {
        doubled / 2
    };
    let encoded = (best_div >> 3) as u32 | (FRAC_CODE[(best_div & 7) as usize] << 14);
    (actual as u32, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{alloc_zeroed, Completion, Rejected, TransferBackend};
    use crate::types::ChipCaps;

    #[derive(Default)]
    struct NullTransport;

    impl TransferBackend for NullTransport {
        type Buffer = Vec<u8>;

        fn allocate(&mut self, len: usize) -> Result<Vec<u8>> {
            alloc_zeroed(len)
        }

        fn submit(&mut self, _slot: usize, _buffer: Vec<u8>) -> std::result::Result<(), Rejected<Vec<u8>>> {
            Ok(())
        }

        fn wait_completion(&mut self, _timeout: Duration) -> Option<Completion<Vec<u8>>> {
            None
        }

        fn cancel_all(&mut self) {}
    }

    struct RecordingDevice {
        info: DeviceInfo,
        requests: Vec<(u8, u16, u16)>,
    }

    impl RecordingDevice {
        fn new() -> Self {
            Self {
                info: DeviceInfo {
                    vendor_id: 0x0403,
                    product_id: 0x6010,
                    name: "test".into(),
                    serial: None,
                    caps: ChipCaps::default(),
                },
                requests: Vec::new(),
            }
        }
    }

    impl DeviceBackend for RecordingDevice {
        type Transport = NullTransport;

        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn control_out(&mut self, request: u8, value: u16, index: u16) -> Result<()> {
            self.requests.push((request, value, index));
            Ok(())
        }

        fn write_bulk(&mut self, _interface: Interface, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }

        fn read_bulk(&mut self, _interface: Interface, buf: &mut [u8]) -> Result<usize> {
            buf[..3].copy_from_slice(&[0x31, 0x60, 0xA5]);
            Ok(3)
        }

        fn bulk_in(&mut self, _interface: Interface) -> Result<NullTransport> {
            Ok(NullTransport)
        }
    }

    fn requests(conn: &Connection<RecordingDevice>) -> Vec<(u8, u16, u16)> {
        let session = conn.claim().unwrap();
        let requests = session.device().requests.clone();
        requests
    }

    #[test]
    fn test_second_claim_fails_fast() {
        let conn = Connection::new(RecordingDevice::new());
        let session = conn.claim().unwrap();
        assert!(conn.is_claimed());
        assert!(matches!(conn.claim(), Err(Error::Busy)));
        assert!(matches!(conn.reset(), Err(Error::Busy)));
        drop(session);
        assert!(!conn.is_claimed());
        assert!(conn.reset().is_ok());
    }

    #[test]
    fn test_set_mode_sync_fifo() {
        let conn = Connection::new(RecordingDevice::new());
        conn.set_mode(Interface::A, BitMode::SyncFifo, 0xff, 0).unwrap();
        assert_eq!(requests(&conn), vec![(SIO_SET_BITMODE_REQUEST, 0x40ff, 1)]);
    }

    #[test]
    fn test_set_mode_with_baud() {
        let conn = Connection::new(RecordingDevice::new());
        conn.set_mode(Interface::B, BitMode::BitBang, 0x0f, 3_000_000)
            .unwrap();
        assert_eq!(
            requests(&conn),
            vec![
                (SIO_SET_BITMODE_REQUEST, 0x010f, 2),
                (SIO_SET_BAUD_REQUEST, 0x0004, 0x0200 | 2),
            ]
        );
    }

    #[test]
    fn test_reset_touches_both_interfaces() {
        let conn = Connection::new(RecordingDevice::new());
        conn.reset().unwrap();
        assert_eq!(
            requests(&conn),
            vec![(SIO_RESET_REQUEST, 0, 1), (SIO_RESET_REQUEST, 0, 2)]
        );
    }

    #[test]
    fn test_read_byte_sync_skips_status() {
        let conn = Connection::new(RecordingDevice::new());
        assert_eq!(conn.read_byte_sync(Interface::A).unwrap(), 0xA5);
        assert!(conn.write_byte_sync(Interface::A, 0x12).is_ok());
    }

    #[test]
    fn test_detached_engine_holds_claim() {
        let conn = Connection::new(RecordingDevice::new());
        let engine = conn
            .claim()
            .unwrap()
            .into_stream(Interface::A, StreamConfig::new(8, 4))
            .unwrap();
        assert!(matches!(conn.write(Interface::A, &[1, 2]), Err(Error::Busy)));
        drop(engine);
        assert_eq!(conn.write(Interface::A, &[1, 2]).unwrap(), 2);
    }

    #[test]
    fn test_close_releases() {
        let conn = Connection::new(RecordingDevice::new());
        assert!(conn.close().is_ok());
    }

    #[test]
    fn test_baud_divisor_high_speed() {
        let d = baud_divisor(12_000_000).unwrap();
        assert_eq!(d.value, 0);
        assert_eq!(d.index, 0x0200);
        assert_eq!(d.actual_baud, 12_000_000);

        let d = baud_divisor(3_000_000).unwrap();
        assert_eq!(d.value, 0x0004);
        assert_eq!(d.index, 0x0200);
        assert_eq!(d.actual_baud, 3_000_000);
    }

    #[test]
    fn test_baud_divisor_low_speed_uses_legacy_clock() {
        let d = baud_divisor(300).unwrap();
        assert_eq!(d.index & 0x0200, 0);
        assert_eq!(d.actual_baud, 300);
        assert!(baud_divisor(0).is_err());
    }
}
