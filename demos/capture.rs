//! Capture a synchronous FIFO stream to a file.
//!
//! Puts the selected interface into sync FIFO mode and streams until the
//! requested number of payload bytes has arrived, printing throughput once
//! per periodic interval.
//!
//! Run with: `cargo run --example capture -- --bytes 100000000 --output dump.bin`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ftdi_fifo::{
    list_devices, open_device, BitMode, CallbackResult, DeviceSelector, Interface, Result,
    StreamConfig, StreamEvent,
};

#[derive(Parser)]
#[command(about = "Stream data from an FTDI FT2232H in synchronous FIFO mode")]
struct Args {
    /// Device to open: `vvvv:pppp` or a serial number (default: first known device)
    #[arg(short, long, default_value = "")]
    device: DeviceSelector,

    /// Chip interface to stream from
    #[arg(short, long, value_enum, default_value_t = Channel::A)]
    interface: Channel,

    /// Native packets per transfer
    #[arg(long, default_value_t = 64)]
    packets: usize,

    /// Transfers kept in flight
    #[arg(long, default_value_t = 16)]
    transfers: usize,

    /// Stop after this many payload bytes (0 = no limit; output is flushed once per second)
    #[arg(short, long, default_value_t = 0)]
    bytes: u64,

    /// Write payload to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, ValueEnum)]
enum Channel {
    A,
    B,
}

impl From<Channel> for Interface {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::A => Interface::A,
            Channel::B => Interface::B,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let devices = list_devices()?;
    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    for info in &devices {
        println!("  Found: {}", info);
    }

    let conn = open_device(&args.device)?;
    let interface = Interface::from(args.interface);
    conn.reset()?;
    conn.set_mode(interface, BitMode::SyncFifo, 0xff, 0)?;

    let config = StreamConfig::new(args.packets, args.transfers)
        .with_layout(conn.info().caps.layout())
        .with_periodic_interval(Duration::from_secs(1));

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).map_err(|e| ftdi_fifo::Error::io("creating output file", e))?,
        )),
        None => None,
    };

    println!("\nStreaming from {} interface {}...\n", conn.info(), interface);

    let mut received = 0u64;
    let mut write_error = None;
    let exit = conn.read_stream(interface, config, |event, progress| {
        match event {
            StreamEvent::Data { payload, status } => {
                if let Some(status) = status.filter(|s| s.has_error()) {
                    log::warn!("line status error: {:#06x}", status.as_u16());
                }
                received += payload.len() as u64;
                if let Some(out) = output.as_mut() {
                    if let Err(e) = out.write_all(payload) {
                        write_error = Some(e);
                        return CallbackResult::Stop;
                    }
                }
                if args.bytes > 0 && received >= args.bytes {
                    return CallbackResult::Stop;
                }
            }
            StreamEvent::Periodical => {
                // Interrupting the process loses at most one interval of output.
                if let Some(out) = output.as_mut() {
                    if let Err(e) = out.flush() {
                        write_error = Some(e);
                        return CallbackResult::Stop;
                    }
                }
                println!(
                    "{:10.3} MB total, {:7.3} MB/s now, {:7.3} MB/s average",
                    progress.total_bytes() as f64 / 1e6,
                    progress.current_rate / 1e6,
                    progress.total_rate / 1e6
                );
            }
            StreamEvent::Cleanup => {}
        }
        CallbackResult::Continue
    })?;

    if let Some(e) = write_error {
        return Err(ftdi_fifo::Error::io("writing output file", e));
    }
    if let Some(mut out) = output {
        out.flush()
            .map_err(|e| ftdi_fifo::Error::io("flushing output file", e))?;
    }

    println!("\nStream ended: {:?}", exit);
    println!("Payload bytes: {}", received);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_defaults_and_help() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["capture"]).unwrap();
        assert_eq!(args.bytes, 0);
        assert_eq!(args.device, DeviceSelector::Any);
        assert!(args.output.is_none());

        let help = Args::command()
            .get_arguments()
            .find(|arg| arg.get_id() == "bytes")
            .and_then(|arg| arg.get_help())
            .map(|help| help.to_string())
            .unwrap_or_default();
        assert!(help.contains("no limit"));
        assert!(!help.contains("Ctrl+C"));
    }
}
