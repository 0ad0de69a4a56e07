//! Scripted mock device and transport for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftdi_fifo::backend::alloc_zeroed;
use ftdi_fifo::{
    ChipCaps, Completion, DeviceBackend, DeviceInfo, Error, Interface, Rejected, Result,
    TransferBackend, TransferFailure,
};

pub const PACKET: usize = 512;
pub const PAYLOAD: usize = 510;

/// One scripted completion.
#[derive(Clone, Debug)]
pub enum Reply {
    Data(Vec<u8>),
    Fail(TransferFailure),
}

/// A transfer of `packets` packets, each with the `31 60` status header and
/// a payload of `fill` bytes.
pub fn transfer(packets: usize, fill: u8) -> Vec<u8> {
    let mut raw = Vec::with_capacity(packets * PACKET);
    for _ in 0..packets {
        raw.extend_from_slice(&[0x31, 0x60]);
        raw.resize(raw.len() + PAYLOAD, fill);
    }
    raw
}

/// What the transport saw, shared with the test body.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub submits: usize,
    pub submits_after_cancel: usize,
    pub cancel_calls: usize,
    pub max_pending: usize,
}

/// Transport that answers submitted transfers from a script, in order.
///
/// Once the script runs out it goes quiet until cancelled; cancelled
/// transfers come back one per wait.
pub struct MockTransport {
    pending: VecDeque<(usize, Vec<u8>)>,
    script: VecDeque<Reply>,
    cancelled: bool,
    log: Arc<Mutex<TransportLog>>,
}

impl MockTransport {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            pending: VecDeque::new(),
            script: script.into_iter().collect(),
            cancelled: false,
            log: Arc::new(Mutex::new(TransportLog::default())),
        }
    }

    /// `count` copies of the same full transfer.
    pub fn repeating(count: usize, raw: Vec<u8>) -> Self {
        Self::new(std::iter::repeat(Reply::Data(raw)).take(count))
    }

    pub fn log(&self) -> Arc<Mutex<TransportLog>> {
        self.log.clone()
    }
}

impl TransferBackend for MockTransport {
    type Buffer = Vec<u8>;

    fn allocate(&mut self, len: usize) -> Result<Vec<u8>> {
        alloc_zeroed(len)
    }

    fn submit(
        &mut self,
        slot: usize,
        buffer: Vec<u8>,
    ) -> std::result::Result<(), Rejected<Vec<u8>>> {
        let mut log = self.log.lock().unwrap();
        log.submits += 1;
        if self.cancelled {
            log.submits_after_cancel += 1;
        }
        self.pending.push_back((slot, buffer));
        log.max_pending = log.max_pending.max(self.pending.len());
        Ok(())
    }

    fn wait_completion(&mut self, _timeout: Duration) -> Option<Completion<Vec<u8>>> {
        if self.cancelled {
            let (slot, buffer) = self.pending.pop_front()?;
            return Some(Completion {
                slot,
                buffer,
                actual_len: 0,
                status: Err(TransferFailure::Cancelled),
            });
        }
        if self.pending.is_empty() || self.script.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            return None;
        }

        let (slot, mut buffer) = self.pending.pop_front()?;
        Some(match self.script.pop_front()? {
            Reply::Data(raw) => {
                buffer[..raw.len()].copy_from_slice(&raw);
                Completion {
                    slot,
                    buffer,
                    actual_len: raw.len(),
                    status: Ok(()),
                }
            }
            Reply::Fail(failure) => Completion {
                slot,
                buffer,
                actual_len: 0,
                status: Err(failure),
            },
        })
    }

    fn cancel_all(&mut self) {
        self.log.lock().unwrap().cancel_calls += 1;
        self.cancelled = true;
    }
}

/// Device that records control requests and bulk writes.
pub struct MockDevice {
    info: DeviceInfo,
    pub requests: Arc<Mutex<Vec<(u8, u16, u16)>>>,
    pub writes: Arc<Mutex<Vec<(Interface, Vec<u8>)>>>,
    transports: VecDeque<MockTransport>,
}

impl MockDevice {
    pub fn new(caps: ChipCaps) -> Self {
        Self {
            info: DeviceInfo {
                vendor_id: 0x0403,
                product_id: 0x6010,
                name: "FT2232H".into(),
                serial: Some("MOCK0001".into()),
                caps,
            },
            requests: Arc::default(),
            writes: Arc::default(),
            transports: VecDeque::new(),
        }
    }

    /// Queue a transport for the next `bulk_in` call.
    pub fn with_transport(mut self, transport: MockTransport) -> Self {
        self.transports.push_back(transport);
        self
    }
}

impl DeviceBackend for MockDevice {
    type Transport = MockTransport;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16) -> Result<()> {
        self.requests.lock().unwrap().push((request, value, index));
        Ok(())
    }

    fn write_bulk(&mut self, interface: Interface, data: &[u8]) -> Result<usize> {
        self.writes.lock().unwrap().push((interface, data.to_vec()));
        Ok(data.len())
    }

    fn read_bulk(&mut self, _interface: Interface, buf: &mut [u8]) -> Result<usize> {
        let reply = [0x31, 0x60, 0x5A];
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn bulk_in(&mut self, _interface: Interface) -> Result<MockTransport> {
        self.transports.pop_front().ok_or(Error::NotFound)
    }
}
