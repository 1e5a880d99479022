/// Load the JSON document describing which devices to switch and which messages to send them.
pub mod config;

/// Identify enumerated devices and find the rule entry, if any, that applies to each.
pub mod device_ids;

/// Pick how a matched device is switched based on the mode named in its settings.
pub mod mode;

/// Switch a matched device into its full-function mode using USB bulk transfers.
pub mod protocol;

/// The USB operations switching needs, implemented on top of libusb.
pub mod usb;

#[cfg(test)]
mod sim;
