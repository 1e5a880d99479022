//! A simulated bus for exercising matching and switching without hardware. Every operation on a
//! simulated device is appended to a shared [OpLog].

use crate::device_ids::UsbId;
use crate::usb::{DeviceInfo, UsbDevice, UsbHandle};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Open,
    ReadString(u8),
    WriteBulk { endpoint: u8, data: Vec<u8> },
    ReadBulk { endpoint: u8, len: usize, timeout_ms: u64 },
    Claim(u8),
    Release(u8),
    Detach(u8),
    ClearHalt(u8),
    GetConfig,
    SetConfig(u8),
    SetAlt(u8, u8),
    Sleep(u64),
    Close,
}

#[derive(Clone, Debug, Default)]
pub struct OpLog(Rc<RefCell<Vec<Op>>>);

impl OpLog {
    pub fn push(&self, op: Op) {
        self.0.borrow_mut().push(op);
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// A sleep function that records instead of sleeping.
    pub fn sleeper(&self) -> impl FnMut(Duration) + 'static {
        let log = self.clone();
        move |d| log.push(Op::Sleep(d.as_millis() as u64))
    }

    /// An already-open handle recording into this log.
    pub fn handle(&self, behavior: Behavior) -> SimHandle {
        SimHandle {
            log: self.clone(),
            behavior,
            strings: Default::default(),
        }
    }
}

/// Which operations fail on a simulated device.
#[derive(Clone, Debug, Default)]
pub struct Behavior {
    pub fail_open: bool,
    pub fail_strings: bool,
    pub fail_claim: bool,
    pub fail_write: bool,
    pub fail_response: bool,
    /// Reported by `active_configuration`. [None] makes the query fail.
    pub active_config: Option<u8>,
}

pub struct SimDevice {
    id: UsbId,
    behavior: Behavior,
    strings: Option<[String; 3]>,
    log: OpLog,
}

impl SimDevice {
    pub fn new(vid: u16, pid: u16, behavior: Behavior) -> Self {
        SimDevice {
            id: UsbId { vid, pid },
            behavior,
            strings: None,
            log: OpLog::default(),
        }
    }

    /// Give the device manufacturer, product and serial strings at descriptor indices 1, 2 and 3.
    pub fn with_strings(mut self, manufacturer: &str, product: &str, serial: &str) -> Self {
        self.strings = Some([manufacturer.into(), product.into(), serial.into()]);
        self
    }

    pub fn log(&self) -> OpLog {
        self.log.clone()
    }
}

impl UsbDevice for SimDevice {
    type Handle = SimHandle;

    fn info(&self) -> rusb::Result<DeviceInfo> {
        let index = |i| self.strings.as_ref().map(|_| i);
        Ok(DeviceInfo {
            id: self.id,
            manufacturer_index: index(1),
            product_index: index(2),
            serial_index: index(3),
        })
    }

    fn open(&self) -> rusb::Result<SimHandle> {
        self.log.push(Op::Open);
        if self.behavior.fail_open {
            return Err(rusb::Error::Access);
        }
        let mut handle = self.log.handle(self.behavior.clone());
        handle.strings = self.strings.clone().unwrap_or_default();
        Ok(handle)
    }
}

pub struct SimHandle {
    log: OpLog,
    behavior: Behavior,
    strings: [String; 3],
}

impl SimHandle {
    fn result(&self, fail: bool) -> rusb::Result<()> {
        if fail { Err(rusb::Error::Io) } else { Ok(()) }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.log.push(Op::Close);
    }
}

impl UsbHandle for SimHandle {
    fn read_string(&self, index: u8) -> rusb::Result<String> {
        self.log.push(Op::ReadString(index));
        self.result(self.behavior.fail_strings)?;
        self.strings
            .get(usize::from(index).wrapping_sub(1))
            .cloned()
            .ok_or(rusb::Error::InvalidParam)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.log.push(Op::WriteBulk {
            endpoint,
            data: data.to_vec(),
        });
        if self.behavior.fail_write {
            return Err(rusb::Error::Pipe);
        }
        Ok(data.len())
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.log.push(Op::ReadBulk {
            endpoint,
            len: buf.len(),
            timeout_ms: timeout.as_millis() as u64,
        });
        // Only the first, full-length read is made to fail; drain reads just time out quietly.
        if self.behavior.fail_response && timeout > Duration::from_millis(100) {
            return Err(rusb::Error::Timeout);
        }
        buf.fill(0);
        Ok(buf.len())
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        self.log.push(Op::Claim(iface));
        self.result(self.behavior.fail_claim)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        self.log.push(Op::Release(iface));
        Ok(())
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        self.log.push(Op::Detach(iface));
        Err(rusb::Error::NotFound)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        self.log.push(Op::ClearHalt(endpoint));
        Ok(())
    }

    fn active_configuration(&self) -> rusb::Result<u8> {
        self.log.push(Op::GetConfig);
        self.behavior.active_config.ok_or(rusb::Error::Io)
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        self.log.push(Op::SetConfig(config));
        Ok(())
    }

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()> {
        self.log.push(Op::SetAlt(iface, setting));
        Ok(())
    }
}
