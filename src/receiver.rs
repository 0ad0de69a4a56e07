//! Channel-based consumption of a stream.
//!
//! [`ChunkReceiver`] runs a [`StreamEngine`] on its own thread and forwards
//! every decoded transfer through a bounded channel. The channel bound is the
//! backpressure: when the consumer falls behind, the engine blocks in its
//! callback and stops resubmitting transfers until there is room again.
//!
//! Dropping the receiver stops the stream, waits for the drain, and joins the
//! thread.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::backend::{DeviceBackend, TransferBackend};
use crate::connection::Session;
use crate::error::{Error, Result};
use crate::framing::PacketStatus;
use crate::progress::ProgressInfo;
use crate::stream::{StreamControl, StreamEngine};
use crate::types::{CallbackResult, Interface, RunExit, StreamConfig, StreamEvent};

const THREAD_NAME: &str = "ftdi-fifo-stream";

/// One decoded transfer.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Payload with packet headers removed.
    pub payload: Vec<u8>,
    /// Status header of the transfer's last packet.
    pub status: Option<PacketStatus>,
    /// Progress snapshot taken when the transfer completed.
    pub progress: ProgressInfo,
}

/// Receives decoded chunks from a stream running on a background thread.
pub struct ChunkReceiver {
    rx: Option<Receiver<Chunk>>,
    control: StreamControl,
    handle: Option<JoinHandle<Result<RunExit>>>,
}

impl ChunkReceiver {
    /// Start `engine` on a new thread, buffering at most `capacity` chunks.
    pub fn spawn<T>(mut engine: StreamEngine<T>, capacity: usize) -> Result<Self>
    where
        T: TransferBackend + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let control = engine.control();

        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || pump(&mut engine, tx))
            .map_err(|e| Error::io("spawning stream thread", e))?;

        Ok(Self {
            rx: Some(rx),
            control,
            handle: Some(handle),
        })
    }

    /// Block until the next chunk arrives.
    ///
    /// Returns `None` once the stream has ended; call [`finish`](Self::finish)
    /// to learn why.
    pub fn recv(&self) -> Option<Chunk> {
        self.rx.as_ref()?.recv().ok()
    }

    /// Handle for stopping the stream from elsewhere.
    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    /// Stop the stream and wait for it to drain.
    pub fn finish(mut self) -> Result<RunExit> {
        self.shutdown()
            .unwrap_or(Err(Error::ProtocolViolation("stream thread already joined")))
    }

    fn shutdown(&mut self) -> Option<Result<RunExit>> {
        self.control.stop();
        // Unblocks a send waiting on a full channel.
        self.rx.take();
        let handle = self.handle.take()?;
        Some(handle.join().unwrap_or_else(|_| {
            log::error!("stream thread panicked");
            Err(Error::ProtocolViolation("stream thread panicked"))
        }))
    }
}

impl Iterator for ChunkReceiver {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.recv()
    }
}

impl Drop for ChunkReceiver {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.shutdown() {
            log::warn!("stream ended with error: {}", e);
        }
    }
}

fn pump<T: TransferBackend>(engine: &mut StreamEngine<T>, tx: SyncSender<Chunk>) -> Result<RunExit> {
    let mut receiver_gone = false;
    let exit = engine.run(|event, progress| {
        let StreamEvent::Data { payload, status } = event else {
            return CallbackResult::Continue;
        };
        let chunk = Chunk {
            payload: payload.to_vec(),
            status,
            progress: *progress,
        };
        if tx.send(chunk).is_ok() {
            CallbackResult::Continue
        } else {
            receiver_gone = true;
            CallbackResult::Stop
        }
    })?;

    if receiver_gone && exit == RunExit::CallbackEnded {
        log::debug!("receiver dropped; stream stopped");
        return Ok(RunExit::ReceiverClosed);
    }
    Ok(exit)
}

impl<D> Session<'_, D>
where
    D: DeviceBackend,
    D::Transport: Send + 'static,
{
    /// Stream `interface` on a background thread.
    ///
    /// The connection stays claimed until the receiver is dropped or finished.
    pub fn into_receiver(
        self,
        interface: Interface,
        config: StreamConfig,
        capacity: usize,
    ) -> Result<ChunkReceiver> {
        ChunkReceiver::spawn(self.into_stream(interface, config)?, capacity)
    }
}
