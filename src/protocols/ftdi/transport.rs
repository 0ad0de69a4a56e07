//! Asynchronous bulk IN streaming over an nusb endpoint.

use std::collections::VecDeque;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In};
use nusb::Endpoint;

use super::error::transfer_failure;
use crate::backend::{Completion, RawBuffer, Rejected, TransferBackend};
use crate::error::Result;

impl RawBuffer for Buffer {
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self[..]
    }
}

/// Streaming transport over one interface's bulk IN endpoint.
///
/// nusb completes transfers on an endpoint in submission order, so slot
/// indices are matched to completions with a FIFO.
pub struct BulkInTransport {
    ep: Endpoint<Bulk, In>,
    slots: VecDeque<usize>,
}

impl BulkInTransport {
    pub fn new(ep: Endpoint<Bulk, In>) -> Self {
        Self {
            ep,
            slots: VecDeque::new(),
        }
    }

    /// Endpoint max packet size as reported by the descriptor.
    pub fn max_packet_size(&self) -> usize {
        self.ep.max_packet_size()
    }

    /// Transfers submitted and not yet reaped.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

impl TransferBackend for BulkInTransport {
    type Buffer = Buffer;

    fn allocate(&mut self, len: usize) -> Result<Buffer> {
        Ok(Buffer::new(len))
    }

    fn submit(&mut self, slot: usize, buffer: Buffer) -> std::result::Result<(), Rejected<Buffer>> {
        // Failures surface through the completion.
        self.ep.submit(buffer);
        self.slots.push_back(slot);
        Ok(())
    }

    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion<Buffer>> {
        let completion = self.ep.wait_next_complete(timeout)?;
        let Some(slot) = self.slots.pop_front() else {
            log::error!("completion without a submitted slot; dropping buffer");
            return None;
        };
        Some(Completion {
            slot,
            buffer: completion.buffer,
            actual_len: completion.actual_len,
            status: completion.status.map_err(transfer_failure),
        })
    }

    fn cancel_all(&mut self) {
        log::debug!("cancelling {} pending transfers", self.slots.len());
        self.ep.cancel_all();
    }
}
