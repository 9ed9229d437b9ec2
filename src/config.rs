//! Link and protocol settings, optionally loaded from a YAML file.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BAUDRATE, DEFAULT_CHUNK_SIZE, DEFAULT_DEVICE_ID, DEFAULT_READ_SIZE,
    DEFAULT_READ_START, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS, MAX_RECORD_LEN,
};
use crate::error::{Error, Result};

/// Address space a record can describe without extended-address records.
const RECORD_ADDRESS_SPACE: u64 = 0x1_0000;

/// How to reach the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: Option<String>,
    #[serde(deserialize_with = "parse_number")]
    pub baudrate: u32,
    #[serde(deserialize_with = "parse_number")]
    pub timeout_ms: u64,
    /// Delay after opening the port, while the bridge reboots.
    #[serde(deserialize_with = "parse_number")]
    pub settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: None,
            baudrate: DEFAULT_BAUDRATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }
}

/// Session parameters, fixed for the lifetime of a `DeviceSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Bytes per read command, and per record in dumps.
    #[serde(deserialize_with = "parse_number")]
    pub chunk_size: u8,
    /// The session stops after identify unless the device reports this id.
    #[serde(deserialize_with = "parse_number")]
    pub expected_device_id: u8,
    #[serde(deserialize_with = "parse_number")]
    pub read_start: u32,
    #[serde(deserialize_with = "parse_number")]
    pub read_size: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            expected_device_id: DEFAULT_DEVICE_ID,
            read_start: DEFAULT_READ_START,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size as usize > MAX_RECORD_LEN {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_RECORD_LEN, self.chunk_size
            )));
        }
        check_read_range(self.read_start, self.read_size)
    }
}

/// Dumps are written as 16-bit address records, so a read range must stay
/// below 64KiB.
pub fn check_read_range(start: u32, size: u32) -> Result<()> {
    if start as u64 + size as u64 > RECORD_ADDRESS_SPACE {
        return Err(Error::AddressOutOfRange { start, size });
    }
    Ok(())
}

/// Contents of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub protocol: ProtocolConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)?;
        let config = Self::from_yaml(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", p.display(), e)))?;
        log::debug!("Loaded config from {}", p.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.protocol.validate()?;
        Ok(config)
    }
}

/// Parse `0x1840`, `6K`, `6KB`, `6KiB` or plain decimal.
pub fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(kib) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix('K'))
    {
        kib.parse::<u64>().map(|k| k * 1024)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("error while parsing {s:?}: {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(u64),
    Text(String),
}

fn parse_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = match RawNumber::deserialize(deserializer)? {
        RawNumber::Number(n) => n,
        RawNumber::Text(s) => parse_size(&s).map_err(serde::de::Error::custom)?,
    };
    T::try_from(value)
        .map_err(|_| serde::de::Error::custom(format!("value {value:#x} out of range")))
}
