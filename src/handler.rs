//! The provisioning backend contract.
//!
//! Every backend (local device, fixed remote API, declarative custom API)
//! implements [`DrmHandler`]. A handler lives for exactly one exchange: it is
//! built when a challenge is requested, parked in the session registry, and
//! consumed when the matching license arrives.

use std::fmt;

use async_trait::async_trait;

use crate::cdm;
use crate::error::Result;
use crate::key::ContentKey;
use crate::profile::DrmKind;
use crate::utils::b64_encode;

/// Context passed along with a challenge request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeExtra {
    /// Widevine service certificate, base64.
    pub server_cert: Option<String>,
    /// Native session handle chosen by the page side.
    pub session_id: String,
    pub key_system: String,
}

/// What a successful license exchange yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseOutcome {
    pub kind: DrmKind,
    /// Content identifier the backend computed: base64 PSSH or WRM header.
    pub pssh: String,
    pub keys: Vec<ContentKey>,
}

/// Correlation id of a pending exchange.
///
/// Widevine exchanges are matched on the `request_id` that travels inside the
/// challenge and comes back in the license; PlayReady exchanges on the native
/// session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    RequestId(Vec<u8>),
    Native(String),
}

impl SessionKey {
    /// Key of a Widevine challenge (a `LICENSE_REQUEST` `SignedMessage`).
    pub fn from_widevine_challenge(challenge: &[u8]) -> Result<Self> {
        Ok(Self::RequestId(cdm::challenge_request_id(challenge)?))
    }

    /// Key of a Widevine license (a `LICENSE` `SignedMessage`).
    pub fn from_widevine_license(license: &[u8]) -> Result<Self> {
        Ok(Self::RequestId(cdm::license_request_id(license)?))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestId(id) => f.write_str(&b64_encode(id)),
            Self::Native(id) => f.write_str(id),
        }
    }
}

/// A backend able to produce a challenge and later turn the license into keys.
#[async_trait]
pub trait DrmHandler: Send + fmt::Debug {
    /// DRM family this handler speaks.
    fn kind(&self) -> DrmKind;

    /// Build a license challenge for `init_data_b64`, returned as base64.
    async fn generate_challenge(&mut self, init_data_b64: &str, extra: &ChallengeExtra) -> Result<String>;

    /// Turn a base64 license response into content keys.
    async fn parse_license(&mut self, license_b64: &str) -> Result<LicenseOutcome>;

    /// Release whatever the exchange holds. Best-effort.
    async fn close(&mut self) {}
}
