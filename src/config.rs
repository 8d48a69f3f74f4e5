//! YAML configuration and the credential stores built from it.
//!
//! ```yaml
//! profiles:
//!   global:
//!     widevine: { type: local, device: { local: pixel } }
//!   www.example.com:
//!     widevine: { type: remote, device: { remote: office } }
//! devices:
//!   widevine: { pixel: devices/pixel.wvd }
//!   playready: { tv: devices/tv.prd }
//! remotes:
//!   office: { type: WIDEVINE, host: "https://cdm.example.net", device_name: pixel, secret: abc }
//! storage: { path: logs.json }
//! serve: { host: 127.0.0.1, port: 8786, secret: abc }
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::declarative::CustomHandlerConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::playready;
use crate::profile::Profile;
use crate::remotecdm::RemoteProfile;

/// Scope name of the fallback profile.
pub const GLOBAL_PROFILE: &str = "global";

/// Device files by credential name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFiles {
    #[serde(default)]
    pub widevine: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub playready: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where completed exchanges are persisted. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Settings of the HTTP bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Expected `X-Secret-Key`. Requests are unauthenticated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secret: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8786
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Profiles by scope: a host name, or [`GLOBAL_PROFILE`].
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub devices: DeviceFiles,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteProfile>,
    #[serde(default)]
    pub custom: BTreeMap<String, CustomHandlerConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read a YAML file and anchor its relative paths to the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.devices.widevine.values_mut().for_each(anchor);
        self.devices.playready.values_mut().for_each(anchor);
        if let Some(path) = self.storage.path.as_mut() {
            anchor(path);
        }
    }

    /// Profile for `host`, falling back to `global` and then to the defaults.
    pub fn profile_for(&self, host: Option<&str>) -> Profile {
        select_profile(&self.profiles, host)
    }

    /// Load every device file named in the config.
    pub fn credentials(&self) -> Result<CredentialStore> {
        let mut store = CredentialStore::default();
        for (name, path) in &self.devices.widevine {
            let device = Device::from_path(path).map_err(|e| {
                Error::InvalidWvdFile(format!("{} ({}): {}", name, path.display(), e))
            })?;
            info!("Loaded Widevine device {} (system id {}, L{})", name, device.system_id, device.security_level);
            store.widevine.insert(name.clone(), device);
        }
        for (name, path) in &self.devices.playready {
            let device = playready::Device::from_path(path).map_err(|e| {
                Error::InvalidPrdFile(format!("{} ({}): {}", name, path.display(), e))
            })?;
            info!("Loaded PlayReady device {} (SL{:?})", name, device.security_level());
            store.playready.insert(name.clone(), device);
        }
        store.remotes = self.remotes.clone();
        store.custom = self.custom.clone();
        Ok(store)
    }
}

/// Per-host lookup with `global` fallback.
pub fn select_profile(profiles: &BTreeMap<String, Profile>, host: Option<&str>) -> Profile {
    host.and_then(|h| profiles.get(h))
        .or_else(|| profiles.get(GLOBAL_PROFILE))
        .cloned()
        .unwrap_or_default()
}

/// Named credentials: local devices, remote endpoints and custom API descriptions.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    pub widevine: BTreeMap<String, Device>,
    pub playready: BTreeMap<String, playready::Device>,
    pub remotes: BTreeMap<String, RemoteProfile>,
    pub custom: BTreeMap<String, CustomHandlerConfig>,
}
