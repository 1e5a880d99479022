use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/usb-mode.json";

/// Raw bytes to be sent to a device, referenced by switch specs through their position in the
/// document's `messages` array.
#[derive(Clone, Debug, PartialEq)]
pub struct Message(Vec<u8>);

impl Message {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        let mut decoded = vec![0u8; hex.len() / 2];
        faster_hex::hex_decode(hex.as_bytes(), &mut decoded).ok()?;
        Some(Message(decoded))
    }
}

/// Descriptor strings a match entry can compare against.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Attribute {
    Manufacturer,
    Product,
    Serial,
}

/// The condition under which a match entry applies to a device.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `*`: applies to every device.
    Any,
    /// `uMa=`, `uPr=` or `uSe=`: the device's string must equal `expected` exactly.
    Attribute { attribute: Attribute, expected: String },
    /// Any other `<prefix>=<value>` name. Such entries (e.g. SCSI inquiry attributes) can't be
    /// checked over USB and apply to every device, the same as `*`.
    Unsupported(String),
}

impl Condition {
    /// Parse a match entry name. Returns [None] for names that are neither `*` nor contain `=`;
    /// those entries never apply.
    fn parse(name: &str) -> Option<Self> {
        if name == "*" {
            return Some(Condition::Any);
        }

        let (_, expected) = name.split_once('=')?;
        let attribute = if name.starts_with("uMa") {
            Attribute::Manufacturer
        } else if name.starts_with("uPr") {
            Attribute::Product
        } else if name.starts_with("uSe") {
            Attribute::Serial
        } else {
            return Some(Condition::Unsupported(name.to_owned()));
        };

        Some(Condition::Attribute {
            attribute,
            expected: expected.to_owned(),
        })
    }
}

fn generic() -> String {
    "Generic".to_owned()
}

/// How to switch a matched device.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SwitchSpec {
    #[serde(default = "generic")]
    pub mode: String,
    #[serde(default)]
    pub interface: u8,
    #[serde(default)]
    pub msg_endpoint: u8,
    #[serde(default)]
    pub response_endpoint: u8,
    /// Indices into the document's `messages`, sent in order. Not checked until used.
    #[serde(rename = "msg", default)]
    pub messages: Vec<usize>,
    #[serde(rename = "response", default)]
    pub need_response: bool,
    #[serde(rename = "release_delay", default)]
    pub release_delay_ms: u64,
    #[serde(rename = "config", default)]
    pub target_config: Option<u8>,
    #[serde(rename = "alt", default)]
    pub target_alt_setting: Option<u8>,
}

impl Default for SwitchSpec {
    fn default() -> Self {
        SwitchSpec {
            mode: generic(),
            interface: 0,
            msg_endpoint: 0,
            response_endpoint: 0,
            messages: vec![],
            need_response: false,
            release_delay_ms: 0,
            target_config: None,
            target_alt_setting: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchEntry {
    pub condition: Condition,
    pub spec: SwitchSpec,
}

/// All match entries for one `vvvv:pppp` identity, in the order they were declared.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceRule {
    pub entries: Vec<MatchEntry>,
}

/// The loaded configuration document. Read-only once built.
#[derive(Clone, Debug, Default)]
pub struct Config {
    messages: Vec<Message>,
    rules: BTreeMap<String, DeviceRule>,
}

impl Config {
    /// Read and parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            source: e,
            path: path.to_owned(),
        })?;
        let document: Value = serde_json::from_str(&text)?;
        Self::from_document(&document)
    }

    /// Build the message and rule tables from an already-parsed document. On error, nothing is
    /// kept.
    pub fn from_document(document: &Value) -> Result<Self, ConfigError> {
        let messages = document
            .get("messages")
            .and_then(Value::as_array)
            .ok_or(ConfigError::Incomplete("messages"))?;
        let devices = document
            .get("devices")
            .and_then(Value::as_object)
            .ok_or(ConfigError::Incomplete("devices"))?;

        let messages = messages
            .iter()
            .enumerate()
            .map(|(index, msg)| {
                msg.as_str()
                    .and_then(Message::from_hex)
                    .ok_or(ConfigError::InvalidMessage { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = BTreeMap::new();
        for (id, entries) in devices {
            let entries = entries
                .as_object()
                .ok_or_else(|| ConfigError::InvalidRule { device: id.clone() })?;

            let mut rule = DeviceRule::default();
            for (name, spec) in entries {
                let Some(condition) = Condition::parse(name) else {
                    warn!("Ignoring match entry {name:?} for {id}: expected \"*\" or \"<attr>=<value>\"");
                    continue;
                };
                // A bad entry only costs that entry, like a bad message index only costs the device
                // using it.
                let spec = match SwitchSpec::deserialize(spec) {
                    Ok(spec) => spec,
                    Err(e) => {
                        warn!("Ignoring match entry {name:?} for {id}: invalid switch settings: {e}");
                        continue;
                    }
                };
                rule.entries.push(MatchEntry { condition, spec });
            }

            debug!("Loaded {} match entries for {id}", rule.entries.len());
            rules.insert(id.clone(), rule);
        }

        Ok(Config { messages, rules })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Look up the rule for an exact identity string.
    pub fn rule(&self, id: &str) -> Option<&DeviceRule> {
        self.rules.get(id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Reasons a configuration document can't be used. Any of these aborts startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("configuration incomplete: missing or malformed {0:?}")]
    Incomplete(&'static str),

    #[error("message {index} is not a hex string")]
    InvalidMessage { index: usize },

    #[error("entries for device {device} are not an object")]
    InvalidRule { device: String },

    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}
