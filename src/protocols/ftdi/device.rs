//! nusb-backed device handle.

use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::MaybeFuture;

use super::error::{transfer_failure, Error};
use super::transport::BulkInTransport;
use crate::backend::DeviceBackend;
use crate::connection::{Connection, COMMAND_TIMEOUT};
use crate::discovery::{lookup, DeviceSelector};
use crate::types::{DeviceInfo, Interface};

/// An opened FTDI-class device.
///
/// Interfaces are claimed on first use, detaching any kernel driver bound to
/// them.
pub struct FtdiDevice {
    info: DeviceInfo,
    device: nusb::Device,
    interfaces: [Option<nusb::Interface>; 2],
}

impl FtdiDevice {
    /// Open the first known device matching `selector`.
    pub fn open(selector: &DeviceSelector) -> crate::Result<Self> {
        let candidates = nusb::list_devices().wait().map_err(Error::from)?;
        for dev in candidates {
            let Some(info) = describe(&dev) else {
                continue;
            };
            if selector.matches(&info) {
                return Self::from_device_info(&dev, info);
            }
        }
        log::debug!("no device matched {}", selector);
        Err(crate::Error::NotFound)
    }

    fn from_device_info(dev: &nusb::DeviceInfo, info: DeviceInfo) -> crate::Result<Self> {
        let device = dev.open().wait().map_err(Error::from)?;
        log::info!("opened {}", info);
        Ok(Self {
            info,
            device,
            interfaces: [None, None],
        })
    }

    fn interface(&mut self, interface: Interface) -> crate::Result<&nusb::Interface> {
        let entry = &mut self.interfaces[usize::from(interface.number())];
        if entry.is_none() {
            let claimed = self
                .device
                .detach_and_claim_interface(interface.number())
                .wait()
                .map_err(Error::from)?;
            log::debug!("claimed interface {}", interface);
            *entry = Some(claimed);
        }
        entry
            .as_ref()
            .ok_or(crate::Error::ProtocolViolation("interface claim vanished"))
    }
}

/// Describe an attached device if it is in the known device table.
pub(crate) fn describe(dev: &nusb::DeviceInfo) -> Option<DeviceInfo> {
    lookup(dev.vendor_id(), dev.product_id())
        .map(|known| known.info(dev.serial_number().map(str::to_string)))
}

impl DeviceBackend for FtdiDevice {
    type Transport = BulkInTransport;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16) -> crate::Result<()> {
        // Vendor requests carry the target interface in the low byte of the
        // index; route them through that interface's claim.
        let target = if index & 0xff == Interface::B.index() {
            Interface::B
        } else {
            Interface::A
        };
        self.interface(target)?
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data: &[],
                },
                COMMAND_TIMEOUT,
            )
            .wait()
            .map_err(Error::from)?;
        Ok(())
    }

    fn write_bulk(&mut self, interface: Interface, data: &[u8]) -> crate::Result<usize> {
        let mut ep = self
            .interface(interface)?
            .endpoint::<Bulk, Out>(interface.endpoint_out())
            .map_err(Error::from)?;

        let mut buffer = Buffer::new(data.len());
        buffer.extend_from_slice(data);
        let completion = ep.transfer_blocking(buffer, COMMAND_TIMEOUT);
        completion
            .status
            .map_err(|e| crate::Error::Transfer(transfer_failure(e)))?;
        Ok(completion.actual_len)
    }

    fn read_bulk(&mut self, interface: Interface, buf: &mut [u8]) -> crate::Result<usize> {
        let mut ep = self
            .interface(interface)?
            .endpoint::<Bulk, In>(interface.endpoint_in())
            .map_err(Error::from)?;

        // IN requests must be a whole number of packets.
        let packet = ep.max_packet_size().max(1);
        let request = buf.len().div_ceil(packet).max(1) * packet;
        let completion = ep.transfer_blocking(Buffer::new(request), COMMAND_TIMEOUT);
        completion
            .status
            .map_err(|e| crate::Error::Transfer(transfer_failure(e)))?;

        let n = completion.actual_len.min(buf.len());
        buf[..n].copy_from_slice(&completion.buffer[..n]);
        Ok(n)
    }

    fn bulk_in(&mut self, interface: Interface) -> crate::Result<BulkInTransport> {
        let packet_size = self.info.caps.packet_size;
        let ep = self
            .interface(interface)?
            .endpoint::<Bulk, In>(interface.endpoint_in())
            .map_err(Error::from)?;
        let transport = BulkInTransport::new(ep);
        if transport.max_packet_size() != packet_size {
            log::warn!(
                "endpoint packet size {} differs from expected {}; is the bus running at high speed?",
                transport.max_packet_size(),
                packet_size
            );
        }
        Ok(transport)
    }
}

impl Connection<FtdiDevice> {
    /// Open the first known device matching `selector`.
    pub fn open(selector: &DeviceSelector) -> crate::Result<Self> {
        FtdiDevice::open(selector).map(Connection::new)
    }
}
