use crate::config::{Config, SwitchSpec};
use crate::mode::Mode;
use crate::usb::UsbHandle;
use byteorder::{ByteOrder, LE};
use log::{debug, info, trace, warn};
use std::time::Duration;
use thiserror::Error;

const TRANSFER_TIMEOUT: Duration = Duration::from_millis(3000);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);
// Time the device gets to act on the messages before we let go of it.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

// Mass-storage command block wrappers start with "USBC" and are answered with a 13-byte command
// status wrapper. Every response read is at least that long.
const CBW_SIGNATURE: u32 = 0x4342_5355;
const CSW_LEN: usize = 13;

/// Number of bytes to read back after sending `msg`.
fn response_len(msg: &[u8]) -> usize {
    let is_cbw = msg.len() >= 4 && LE::read_u32(&msg[..4]) == CBW_SIGNATURE;
    if is_cbw { CSW_LEN } else { msg.len().max(CSW_LEN) }
}

/// Log a failed step that is allowed to fail.
fn best_effort(result: rusb::Result<()>, action: &str) {
    if let Err(e) = result {
        warn!("Failed {action}: {e}");
    }
}

/// Detach whatever kernel driver (usually usb-storage) is bound to `iface`. Not being bound to
/// anything is the common case once a device has been handled before.
pub(crate) fn detach_kernel_driver<H: UsbHandle>(handle: &mut H, iface: u8) {
    match handle.detach_kernel_driver(iface) {
        Ok(()) => debug!("Detached kernel driver from interface {iface}"),
        Err(rusb::Error::NotFound) => trace!("No kernel driver bound to interface {iface}"),
        Err(e) => warn!("Failed detaching kernel driver from interface {iface}: {e}"),
    }
}

/// Runs mode switches against open devices, using the messages from a loaded [Config].
pub struct Switcher<'a> {
    config: &'a Config,
    sleep: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> Switcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self::with_sleep(config, std::thread::sleep)
    }

    /// Like [Switcher::new], but wait out delays by calling `sleep`.
    pub fn with_sleep(config: &'a Config, sleep: impl FnMut(Duration) + 'a) -> Self {
        Switcher {
            config,
            sleep: Box::new(sleep),
        }
    }

    /// The generic switch: send the configured messages over bulk transfers, then release the
    /// device and optionally change its configuration and alternate setting.
    ///
    /// Every step after the messages runs even if sending them failed, and failures in those
    /// steps are only logged. The returned error, if any, is why sending stopped early.
    pub fn generic<H: UsbHandle>(&mut self, handle: &mut H, spec: &SwitchSpec) -> Result<(), Error> {
        let iface = spec.interface;

        detach_kernel_driver(handle, iface);

        let result = match handle.claim_interface(iface) {
            Ok(()) => {
                best_effort(
                    handle.clear_halt(spec.msg_endpoint),
                    "clearing halt on message endpoint",
                );
                self.send_messages(handle, spec)
            }
            Err(e) => {
                warn!("Failed claiming interface {iface}, not sending any messages: {e}");
                Ok(())
            }
        };

        best_effort(
            handle.clear_halt(spec.msg_endpoint),
            "clearing halt on message endpoint",
        );
        best_effort(
            handle.clear_halt(spec.response_endpoint),
            "clearing halt on response endpoint",
        );

        (self.sleep)(SETTLE_DELAY);
        if spec.release_delay_ms > 0 {
            let delay = Duration::from_millis(spec.release_delay_ms);
            info!("Waiting {delay:?} before releasing interface {iface}");
            (self.sleep)(delay);
        }

        best_effort(handle.release_interface(iface), "releasing interface");

        if let Some(config) = spec.target_config {
            match handle.active_configuration() {
                Ok(current) if current == config => {
                    debug!("Already in configuration {config}");
                }
                current => {
                    if let Err(e) = &current {
                        debug!("Failed reading active configuration: {e}");
                    }
                    info!("Setting configuration {config}");
                    best_effort(
                        handle.set_active_configuration(config),
                        "setting configuration",
                    );
                }
            }
        }

        if let Some(alt) = spec.target_alt_setting {
            info!("Setting interface {iface} to alternate setting {alt}");
            best_effort(handle.claim_interface(iface), "claiming interface");
            best_effort(
                handle.set_alternate_setting(iface, alt),
                "setting alternate setting",
            );
            best_effort(handle.release_interface(iface), "releasing interface");
        }

        result
    }

    /// Send each message in order. A failed write only skips that message; a missing message or a
    /// failed response read stops the whole sequence.
    fn send_messages<H: UsbHandle>(&self, handle: &mut H, spec: &SwitchSpec) -> Result<(), Error> {
        for &index in &spec.messages {
            let msg = self
                .config
                .message(index)
                .ok_or(Error::MessageOutOfRange {
                    index,
                    count: self.config.messages().len(),
                })?
                .bytes();

            trace!("Sending message {index} to endpoint {:#04x}: {msg:02x?}", spec.msg_endpoint);
            match handle.write_bulk(spec.msg_endpoint, msg, TRANSFER_TIMEOUT) {
                Ok(n) if n < msg.len() => {
                    warn!("Short write of message {index}: sent {n} of {} bytes", msg.len())
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed sending message {index}: {e}");
                    continue;
                }
            }

            if !spec.need_response {
                continue;
            }

            let mut response = vec![0u8; response_len(msg)];
            let read = handle.read_bulk(spec.response_endpoint, &mut response, TRANSFER_TIMEOUT);

            // Whatever else the device has queued up would otherwise be read as the response to
            // the next message.
            let mut drain = [0u8; CSW_LEN];
            if let Err(e) = handle.read_bulk(spec.response_endpoint, &mut drain, DRAIN_TIMEOUT) {
                trace!("Nothing left to drain after message {index}: {e}");
            }

            let n = read.map_err(|e| Error::DeviceIoError {
                source: e,
                action: "reading response",
            })?;
            trace!("Response to message {index}: {:02x?}", &response[..n]);
        }

        Ok(())
    }
}

/// Conditions that end a device's switch early. None of them affect other devices.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("message {index} does not exist ({count} messages configured)")]
    MessageOutOfRange { index: usize, count: usize },

    #[error("USB transaction error while {action}")]
    DeviceIoError {
        source: rusb::Error,
        action: &'static str,
    },

    #[error("{0} mode switching is not implemented")]
    Unimplemented(Mode),
}
