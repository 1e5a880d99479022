use crate::config::{Attribute, Condition, Config, DeviceRule, MatchEntry, SwitchSpec};
use crate::usb::{DeviceInfo, UsbDevice, UsbHandle};
use log::{debug, trace, warn};
use std::fmt::Display;

/// Longest descriptor string we keep, in bytes. Longer strings are truncated.
pub const MAX_STRING_LEN: usize = 127;

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

/// Formats as the lowercase `vvvv:pppp` identity string rules are keyed by.
impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Everything a match entry can be checked against. Strings that couldn't be read are empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceIdentity {
    /// The device's `vvvv:pppp` identity string.
    pub id: String,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

impl DeviceIdentity {
    fn attribute(&self, attribute: Attribute) -> &str {
        match attribute {
            Attribute::Manufacturer => &self.manufacturer,
            Attribute::Product => &self.product,
            Attribute::Serial => &self.serial,
        }
    }

    /// Read the identity strings of an open device.
    fn read<H: UsbHandle>(id: UsbId, info: &DeviceInfo, handle: &H) -> Self {
        let read = |index: Option<u8>, what: &str| -> String {
            let Some(index) = index else {
                return String::new();
            };
            match handle.read_string(index) {
                Ok(s) => bounded(s),
                Err(e) => {
                    debug!("{id}: failed to read {what} string: {e}");
                    String::new()
                }
            }
        };

        DeviceIdentity {
            id: id.to_string(),
            manufacturer: read(info.manufacturer_index, "manufacturer"),
            product: read(info.product_index, "product"),
            serial: read(info.serial_index, "serial"),
        }
    }
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} (Manufacturer: \"{}\", Product: \"{}\", Serial: \"{}\")",
            self.id, self.manufacturer, self.product, self.serial
        )
    }
}

fn bounded(mut s: String) -> String {
    if s.len() > MAX_STRING_LEN {
        let mut end = MAX_STRING_LEN;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

impl Condition {
    pub fn holds(&self, identity: &DeviceIdentity) -> bool {
        match self {
            Condition::Any | Condition::Unsupported(_) => true,
            Condition::Attribute {
                attribute,
                expected,
            } => identity.attribute(*attribute) == expected.as_str(),
        }
    }
}

impl DeviceRule {
    /// Return the first entry, in declaration order, that applies to the device.
    pub fn find_entry(&self, identity: &DeviceIdentity) -> Option<&MatchEntry> {
        self.entries.iter().find(|e| e.condition.holds(identity))
    }
}

/// Visit every device in `devices` that a rule in `config` applies to, one at a time, passing its
/// open handle and the switch settings of the entry that matched. Devices whose ID has no rule are
/// never opened. Each handle is closed before moving on to the next device, whether or not it
/// matched.
pub fn for_each_match<D, F>(devices: &[D], config: &Config, mut visit: F)
where
    D: UsbDevice,
    F: FnMut(&mut D::Handle, &DeviceIdentity, &SwitchSpec),
{
    for device in devices {
        let info = match device.info() {
            Ok(info) => info,
            Err(e) => {
                debug!("Skipping device with unreadable descriptor: {e}");
                continue;
            }
        };

        let id = info.id;
        let Some(rule) = config.rule(&id.to_string()) else {
            trace!("No rule for {id}");
            continue;
        };

        let mut handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open {id}: {e}");
                continue;
            }
        };

        let identity = DeviceIdentity::read(id, &info, &handle);
        match rule.find_entry(&identity) {
            Some(entry) => {
                debug!("{identity} matched {:?}", entry.condition);
                visit(&mut handle, &identity, &entry.spec);
            }
            None => debug!("{identity} matched no entry"),
        }
    }
}
