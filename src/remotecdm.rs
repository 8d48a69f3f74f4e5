//! Remote CDM client for pywidevine/pyplayready serve-compatible APIs.
//!
//! The exchange runs the serve preset of [`ApiConfig`] (optionally with
//! top-level overrides from the remote's `sg_api_conf`), so a remote is the
//! declarative engine with a fixed description plus remote-specific error
//! reporting: a message from the server is preferred over the local error,
//! and transport failures get a reachability hint.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::declarative::{ApiConfig, DeclarativeHandler};
use crate::error::{Error, Result};
use crate::handler::{ChallengeExtra, DrmHandler, LicenseOutcome};
use crate::profile::DrmKind;

/// A remote endpoint, in the JSON shape serve clients export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteProfile {
    #[serde(rename = "type", default)]
    pub kind: DrmKind,
    /// `ANDROID` or `CHROME` for Widevine remotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<u32>,
    #[serde(default, alias = "name")]
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Top-level overrides of the serve preset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sg_api_conf: Option<Map<String, Value>>,
}

impl RemoteProfile {
    /// Label shown for the remote, e.g. `[L3] https://host/device (4464)`.
    pub fn display_name(&self) -> String {
        let name = self
            .name_override
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}/{}", self.host, self.device_name));

        if self.kind == DrmKind::Playready {
            let level = match self.security_level {
                Some(3000) => "SL3K".to_string(),
                Some(2000) => "SL2K".to_string(),
                Some(level) => format!("SL{}", level),
                None => "PR".to_string(),
            };
            return format!("[{}] {}", level, name);
        }

        let level = match (self.device_type.as_deref(), self.security_level) {
            (Some("CHROME"), _) => "CHROME".to_string(),
            (_, Some(level)) => format!("L{}", level),
            (_, None) => "L?".to_string(),
        };
        match self.system_id {
            Some(system_id) => format!("[{}] {} ({})", level, name, system_id),
            None => format!("[{}] {}", level, name),
        }
    }

    /// Serve preset for this remote's family with its overrides applied.
    pub fn api_config(&self) -> Result<ApiConfig> {
        let preset = ApiConfig::serve_preset(self.kind);
        match &self.sg_api_conf {
            Some(overrides) => preset.with_overrides(overrides),
            None => Ok(preset),
        }
    }
}

/// Remote-accessible CDM wrapper.
#[derive(Debug)]
pub struct RemoteCdm {
    profile: RemoteProfile,
    inner: DeclarativeHandler,
}

impl RemoteCdm {
    pub fn new(profile: RemoteProfile) -> Result<Self> {
        let inner = DeclarativeHandler::new(
            profile.kind,
            profile.api_config()?,
            &profile.host,
            &profile.device_name,
            profile.secret.as_deref(),
        )?;
        Ok(Self { profile, inner })
    }

    pub fn profile(&self) -> &RemoteProfile {
        &self.profile
    }

    fn describe_error(&self, err: Error) -> Error {
        match err {
            // partial success stays distinguishable from transport failures
            Error::NoKeys(_) | Error::InvalidInitData(_) => err,
            _ => {
                let message = match self.inner.session().last_message() {
                    Some(msg) => format!("Server returned message: {}", msg),
                    None => match &err {
                        Error::Http(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                            format!("{}\nMake sure the server is reachable.", e)
                        }
                        other => other.to_string(),
                    },
                };
                warn!("{} failed: {}", self.profile.display_name(), message);
                Error::Remote(message)
            }
        }
    }
}

#[async_trait]
impl DrmHandler for RemoteCdm {
    fn kind(&self) -> DrmKind {
        self.profile.kind
    }

    async fn generate_challenge(&mut self, init_data_b64: &str, extra: &ChallengeExtra) -> Result<String> {
        debug!("Requesting challenge from {}", self.profile.display_name());
        match self.inner.generate_challenge(init_data_b64, extra).await {
            Ok(challenge) => Ok(challenge),
            Err(err) => Err(self.describe_error(err)),
        }
    }

    async fn parse_license(&mut self, license_b64: &str) -> Result<LicenseOutcome> {
        match self.inner.parse_license(license_b64).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.describe_error(err)),
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}
