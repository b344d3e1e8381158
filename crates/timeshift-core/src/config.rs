//! Session configuration consumed by the spill queue and relay engine.
//!
//! Values are layered by the binary: built-in defaults, then an optional YAML
//! file, then `TIMESHIFT_*` environment variables, then command-line flags.
//! Each layer only overrides what it actually sets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes moved per read/write call in the relay loop.
pub const DEFAULT_TRANSFER_UNIT: usize = 4096;

/// Default chunk size for the local filter shape.
pub const FILTER_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default chunk size for the TCP relay shape.
pub const RELAY_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub const ENV_CACHE_DIR: &str = "TIMESHIFT_CACHE_DIR";
pub const ENV_CHUNK_SIZE: &str = "TIMESHIFT_CHUNK_SIZE";
pub const ENV_TRANSFER_UNIT: &str = "TIMESHIFT_TRANSFER_UNIT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// Directory holding the chunk files. Required; there is no default.
    pub cache_dir: Option<PathBuf>,

    /// Capacity of one chunk in bytes.
    pub chunk_size: usize,

    /// Size of the buffer used per source read and sink write.
    pub transfer_unit: usize,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self::filter_default()
    }
}

impl ShiftConfig {
    pub fn filter_default() -> Self {
        Self {
            cache_dir: None,
            chunk_size: FILTER_CHUNK_SIZE,
            transfer_unit: DEFAULT_TRANSFER_UNIT,
        }
    }

    pub fn relay_default() -> Self {
        Self {
            chunk_size: RELAY_CHUNK_SIZE,
            ..Self::filter_default()
        }
    }

    /// Overlay values from the process environment.
    ///
    /// Environment variables:
    /// - `TIMESHIFT_CACHE_DIR`: cache directory
    /// - `TIMESHIFT_CHUNK_SIZE`: chunk size (`4096`, `64K`, `16M`, `1G`)
    /// - `TIMESHIFT_TRANSFER_UNIT`: transfer unit, same syntax
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            if !dir.is_empty() {
                self.cache_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(s) = lookup(ENV_CHUNK_SIZE) {
            self.chunk_size = parse_size(&s)
                .map_err(|e| Error::Config(format!("{ENV_CHUNK_SIZE}: {e}")))?;
        }
        if let Some(s) = lookup(ENV_TRANSFER_UNIT) {
            self.transfer_unit = parse_size(&s)
                .map_err(|e| Error::Config(format!("{ENV_TRANSFER_UNIT}: {e}")))?;
        }
        Ok(())
    }

    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(dir) = &file.cache_dir {
            self.cache_dir = Some(dir.clone());
        }
        if let Some(sz) = file.chunk_size {
            self.chunk_size = sz;
        }
        if let Some(unit) = file.transfer_unit {
            self.transfer_unit = unit;
        }
    }

    /// The configured cache directory, or a config error if none was given.
    pub fn cache_dir(&self) -> Result<&Path> {
        self.cache_dir
            .as_deref()
            .ok_or_else(|| Error::Config("cache dir not specified".into()))
    }

    /// Check the values before any resource is created.
    pub fn validate(&self) -> Result<()> {
        let dir = self.cache_dir()?;
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "cache dir {} is not an existing directory",
                dir.display()
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("bad chunk size: must be > 0".into()));
        }
        if self.transfer_unit == 0 {
            return Err(Error::Config("bad transfer unit: must be > 0".into()));
        }
        Ok(())
    }
}

/// Settings for the TCP relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address to accept clients on, `host:port`.
    pub listen: String,

    /// Upstream host name or address; resolved once per accepted client.
    pub upstream_host: String,

    pub upstream_port: u16,

    pub shift: ShiftConfig,
}

impl RelayConfig {
    pub fn new(listen: impl Into<String>, upstream_host: impl Into<String>, upstream_port: u16) -> Self {
        Self {
            listen: listen.into(),
            upstream_host: upstream_host.into(),
            upstream_port,
            shift: ShiftConfig::relay_default(),
        }
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(listen) = &file.listen {
            self.listen = listen.clone();
        }
        if let Some(host) = &file.upstream_host {
            self.upstream_host = host.clone();
        }
        if let Some(port) = file.upstream_port {
            self.upstream_port = port;
        }
        self.shift.apply_file(file);
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            return Err(Error::Config("listen address is empty".into()));
        }
        if self.upstream_host.trim().is_empty() {
            return Err(Error::Config("destination host is empty".into()));
        }
        if self.upstream_port == 0 {
            return Err(Error::Config("bad destination port 0".into()));
        }
        self.shift.validate()
    }
}

/// On-disk YAML configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub cache_dir: Option<PathBuf>,
    #[serde(deserialize_with = "de_size_opt")]
    pub chunk_size: Option<usize>,
    #[serde(deserialize_with = "de_size_opt")]
    pub transfer_unit: Option<usize>,
    pub listen: Option<String>,
    pub upstream_host: Option<String>,
    pub upstream_port: Option<u16>,
}

impl ConfigFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Parse a byte count such as `4096`, `64K`, `16M` or `1G` (binary units).
pub fn parse_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    let (digits, mult) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let mult: usize = match c.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                _ => return Err(format!("unknown size suffix in '{s}'")),
            };
            (&s[..i], mult)
        }
        _ => (s, 1),
    };
    let n: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{s}'"))?;
    n.checked_mul(mult)
        .ok_or_else(|| format!("size '{s}' overflows"))
}

fn de_size_opt<'de, D>(d: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(usize),
        Text(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}
