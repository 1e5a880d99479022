use crate::device_ids::UsbId;
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;

/// What we need to know about a device before opening it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub id: UsbId,
    pub manufacturer_index: Option<u8>,
    pub product_index: Option<u8>,
    pub serial_index: Option<u8>,
}

/// An enumerated, not yet opened, USB device.
pub trait UsbDevice {
    type Handle: UsbHandle;

    fn info(&self) -> rusb::Result<DeviceInfo>;

    /// Open the device. The returned handle closes the device when dropped.
    fn open(&self) -> rusb::Result<Self::Handle>;
}

/// Operations on an open device. Every transfer and request blocks until it completes, fails, or
/// (for bulk transfers) times out.
pub trait UsbHandle {
    /// Read a string descriptor, keeping only its ASCII characters.
    fn read_string(&self, index: u8) -> rusb::Result<String>;

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;

    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()>;

    fn active_configuration(&self) -> rusb::Result<u8>;

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()>;

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()>;
}

/// Take a one-time snapshot of the devices currently attached to the system.
pub fn snapshot(context: &Context) -> rusb::Result<Vec<Device<Context>>> {
    Ok(context.devices()?.iter().collect())
}

impl<T: UsbContext> UsbDevice for Device<T> {
    type Handle = DeviceHandle<T>;

    fn info(&self) -> rusb::Result<DeviceInfo> {
        let desc = self.device_descriptor()?;
        Ok(DeviceInfo {
            id: UsbId {
                vid: desc.vendor_id(),
                pid: desc.product_id(),
            },
            manufacturer_index: desc.manufacturer_string_index(),
            product_index: desc.product_string_index(),
            serial_index: desc.serial_number_string_index(),
        })
    }

    fn open(&self) -> rusb::Result<Self::Handle> {
        Device::open(self)
    }
}

// Inherent methods of DeviceHandle share names with the trait's, so call them by path to make it
// obvious none of these recurse.
impl<T: UsbContext> UsbHandle for DeviceHandle<T> {
    fn read_string(&self, index: u8) -> rusb::Result<String> {
        DeviceHandle::read_string_descriptor_ascii(self, index)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, iface)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, iface)
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, iface)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        DeviceHandle::clear_halt(self, endpoint)
    }

    fn active_configuration(&self) -> rusb::Result<u8> {
        DeviceHandle::active_configuration(self)
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        DeviceHandle::set_active_configuration(self, config)
    }

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()> {
        DeviceHandle::set_alternate_setting(self, iface, setting)
    }
}
