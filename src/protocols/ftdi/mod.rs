//! FTDI synchronous FIFO hardware backend over nusb.
//!
//! [`FtdiDevice`] implements [`DeviceBackend`](crate::DeviceBackend) for
//! control requests and blocking bulk I/O; [`BulkInTransport`] implements
//! [`TransferBackend`](crate::TransferBackend) for streaming.

mod device;
mod error;
mod transport;

pub use device::FtdiDevice;
pub use error::{Error, Result};
pub use transport::BulkInTransport;

use nusb::MaybeFuture;

use crate::types::DeviceInfo;

/// List attached devices found in the known device table.
pub fn list_devices() -> crate::Result<Vec<DeviceInfo>> {
    let devices: Vec<DeviceInfo> = nusb::list_devices()
        .wait()
        .map_err(Error::from)?
        .filter_map(|dev| device::describe(&dev))
        .collect();
    log::debug!("found {} known devices", devices.len());
    Ok(devices)
}
