use crate::config::SwitchSpec;
use crate::device_ids::DeviceIdentity;
use crate::protocol::{Error, Switcher, detach_kernel_driver};
use crate::usb::UsbHandle;
use log::{info, warn};
use std::fmt::Display;

/// Ways of switching a device, named by the `mode` field of its switch settings. Only
/// [Mode::Generic] is implemented; the vendor modes are recognized so they can be reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Generic,
    Huawei,
    Sierra,
    Sony,
    Qisda,
    Gct,
    Kobil,
    Sequans,
    MobileAction,
    Cisco,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Generic,
        Mode::Huawei,
        Mode::Sierra,
        Mode::Sony,
        Mode::Qisda,
        Mode::Gct,
        Mode::Kobil,
        Mode::Sequans,
        Mode::MobileAction,
        Mode::Cisco,
    ];

    /// The name used in configuration files. Case-sensitive.
    pub fn name(self) -> &'static str {
        match self {
            Mode::Generic => "Generic",
            Mode::Huawei => "Huawei",
            Mode::Sierra => "Sierra",
            Mode::Sony => "Sony",
            Mode::Qisda => "Qisda",
            Mode::Gct => "GCT",
            Mode::Kobil => "Kobil",
            Mode::Sequans => "Sequans",
            Mode::MobileAction => "MobileAction",
            Mode::Cisco => "Cisco",
        }
    }

    /// Find the mode with the given name, falling back to [Mode::Generic] for names we don't know.
    pub fn select(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == name)
            .unwrap_or_else(|| {
                warn!("Unknown mode {name:?}; using Generic");
                Mode::Generic
            })
    }

    /// Switch an open device that matched `spec`.
    pub fn run<H: UsbHandle>(
        self,
        switcher: &mut Switcher<'_>,
        handle: &mut H,
        identity: &DeviceIdentity,
        spec: &SwitchSpec,
    ) -> Result<(), Error> {
        info!("Switching {identity} using {self} mode");

        match self {
            Mode::Generic => switcher.generic(handle, spec),
            Mode::Gct | Mode::Kobil | Mode::Cisco => {
                detach_kernel_driver(handle, spec.interface);
                Err(Error::Unimplemented(self))
            }
            Mode::Huawei
            | Mode::Sierra
            | Mode::Sony
            | Mode::Qisda
            | Mode::Sequans
            | Mode::MobileAction => Err(Error::Unimplemented(self)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
