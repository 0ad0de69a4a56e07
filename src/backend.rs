//! Transport seams between the stream engine and a USB stack.
//!
//! The engine never touches the USB stack directly. It talks to a
//! [`TransferBackend`] for asynchronous bulk IN transfers and, through
//! [`Connection`](crate::Connection), to a [`DeviceBackend`] for control
//! requests and synchronous bulk I/O.
//!
//! # Buffer Ownership
//!
//! `submit` takes the buffer by value: while a transfer is in flight the
//! transport owns its memory and the engine cannot touch it. The buffer comes
//! back by value inside the matching [`Completion`], which is the only way for
//! the engine to regain it.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{Interface, TransferFailure};

// =============================================================================
// Transfer Buffers
// =============================================================================

/// Storage handed to the transport for one bulk IN transfer.
pub trait RawBuffer: Send {
    /// The bytes the transport filled in. The engine only reads the first
    /// `Completion::actual_len` bytes.
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl RawBuffer for Vec<u8> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhausted { bytes: len })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

// =============================================================================
// TransferBackend Trait
// =============================================================================

/// A finished transfer, handing its buffer back to the engine.
#[derive(Debug)]
pub struct Completion<B> {
    /// Slot index given to `submit`.
    pub slot: usize,
    /// The submitted buffer.
    pub buffer: B,
    /// Bytes actually received.
    pub actual_len: usize,
    /// Outcome of the transfer.
    pub status: std::result::Result<(), TransferFailure>,
}

/// A submission the transport refused; the buffer is returned unused.
#[derive(Debug)]
pub struct Rejected<B> {
    pub buffer: B,
    pub error: Error,
}

/// Asynchronous bulk IN transport.
///
/// # Contract
///
/// 1. Every successfully submitted buffer is eventually returned exactly once
///    through `wait_completion`, either completed, failed, or cancelled.
/// 2. `cancel_all` does not return buffers itself; cancelled transfers still
///    report through `wait_completion` with `TransferFailure::Cancelled`.
/// 3. Completions may arrive in any order across slots.
pub trait TransferBackend {
    /// Buffer type this transport transfers into.
    type Buffer: RawBuffer;

    /// Largest single transfer the transport accepts.
    fn max_transfer_size(&self) -> usize {
        usize::MAX
    }

    /// Allocate a buffer suitable for a `len`-byte IN transfer.
    fn allocate(&mut self, len: usize) -> Result<Self::Buffer>;

    /// Queue a read into `buffer`, tagged with `slot`.
    fn submit(
        &mut self,
        slot: usize,
        buffer: Self::Buffer,
    ) -> std::result::Result<(), Rejected<Self::Buffer>>;

    /// Wait up to `timeout` for the next finished transfer.
    ///
    /// This is where completion dispatch happens; the engine's consumer
    /// callback runs on the thread calling this method.
    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion<Self::Buffer>>;

    /// Request cancellation of every pending transfer.
    fn cancel_all(&mut self);
}

// =============================================================================
// DeviceBackend Trait
// =============================================================================

/// An opened device: control requests, synchronous bulk I/O, and a factory for
/// streaming transports.
pub trait DeviceBackend: Send {
    /// Streaming transport for one interface's bulk IN endpoint.
    type Transport: TransferBackend;

    /// Identity of the opened device.
    fn info(&self) -> &crate::types::DeviceInfo;

    /// Vendor OUT control request without a data stage.
    fn control_out(&mut self, request: u8, value: u16, index: u16) -> Result<()>;

    /// Blocking bulk write to the interface's OUT endpoint.
    fn write_bulk(&mut self, interface: Interface, data: &[u8]) -> Result<usize>;

    /// Blocking bulk read from the interface's IN endpoint.
    fn read_bulk(&mut self, interface: Interface, buf: &mut [u8]) -> Result<usize>;

    /// Open the streaming transport for the interface's IN endpoint.
    fn bulk_in(&mut self, interface: Interface) -> Result<Self::Transport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed() {
        let mut buffer = alloc_zeroed(4096).unwrap();
        assert_eq!(buffer.len(), 4096);
        assert!(buffer.bytes_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_zeroed_reports_exhaustion() {
        let err = alloc_zeroed(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { bytes } if bytes == usize::MAX));
    }
}
