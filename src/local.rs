//! Backends that hold the device identity locally.
//!
//! [`WidevineLocal`] drives a [`crate::cdm::Cdm`] built from a `.wvd` device;
//! [`PlayReadyLocal`] drives a [`crate::playready::Cdm`] built from a `.prd`
//! device. Each handler owns its CDM for the lifetime of one exchange.

use async_trait::async_trait;

use crate::cdm::Cdm;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::handler::{ChallengeExtra, DrmHandler, LicenseOutcome};
use crate::license_protocol::LicenseType;
use crate::playready;
use crate::profile::DrmKind;
use crate::utils::{b64_decode, b64_encode};

/// Widevine exchange against a local device.
#[derive(Debug)]
pub struct WidevineLocal {
    cdm: Cdm,
    session_id: Option<Vec<u8>>,
}

impl WidevineLocal {
    pub fn new(device: Device) -> Self {
        Self {
            cdm: Cdm::from_device(device),
            session_id: None,
        }
    }

    fn session_id(&self) -> Result<Vec<u8>> {
        self.session_id
            .clone()
            .ok_or_else(|| Error::InvalidState("License received before a challenge".to_string()))
    }
}

#[async_trait]
impl DrmHandler for WidevineLocal {
    fn kind(&self) -> DrmKind {
        DrmKind::Widevine
    }

    async fn generate_challenge(&mut self, init_data_b64: &str, extra: &ChallengeExtra) -> Result<String> {
        if init_data_b64.is_empty() {
            return Err(Error::InvalidInitData("No PSSH data in challenge".to_string()));
        }
        let init_data = b64_decode(init_data_b64)?;

        let session_id = self.cdm.open()?;
        self.session_id = Some(session_id.clone());

        let mut privacy_mode = false;
        if let Some(cert) = extra.server_cert.as_deref().filter(|c| !c.is_empty()) {
            let provider = self
                .cdm
                .set_service_certificate(&session_id, Some(&b64_decode(cert)?))?;
            debug!("Set service certificate from {:?}", provider);
            privacy_mode = true;
        }

        let challenge = self.cdm.get_license_challenge(
            &session_id,
            &init_data,
            LicenseType::Automatic,
            privacy_mode,
        )?;
        Ok(b64_encode(challenge))
    }

    async fn parse_license(&mut self, license_b64: &str) -> Result<LicenseOutcome> {
        let session_id = self.session_id()?;
        self.cdm.parse_license(&session_id, &b64_decode(license_b64)?)?;

        let keys = self
            .cdm
            .get_keys(&session_id, Some("CONTENT"))?
            .iter()
            .map(|key| key.to_content_key())
            .collect::<Vec<_>>();
        let pssh = self.cdm.get_pssh(&session_id)?;
        self.close().await;

        if keys.is_empty() {
            return Err(Error::NoKeys("License contains no content keys".to_string()));
        }
        Ok(LicenseOutcome {
            kind: DrmKind::Widevine,
            pssh,
            keys,
        })
    }

    async fn close(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            if let Err(e) = self.cdm.close(&session_id) {
                debug!("Closing CDM session failed: {}", e);
            }
        }
    }
}

/// PlayReady exchange against a local device.
#[derive(Debug)]
pub struct PlayReadyLocal {
    cdm: playready::Cdm,
    wrm_header: Option<String>,
}

impl PlayReadyLocal {
    pub fn new(device: &playready::Device) -> Self {
        Self {
            cdm: playready::Cdm::from_device(device),
            wrm_header: None,
        }
    }
}

#[async_trait]
impl DrmHandler for PlayReadyLocal {
    fn kind(&self) -> DrmKind {
        DrmKind::Playready
    }

    async fn generate_challenge(&mut self, init_data_b64: &str, _extra: &ChallengeExtra) -> Result<String> {
        let init_data = b64_decode(init_data_b64)?;
        let wrm_header = playready::header::extract_wrm_header(&init_data)?;
        let challenge = self.cdm.get_license_challenge(&wrm_header, None)?;
        self.wrm_header = Some(wrm_header);
        Ok(playready::header::wrap_challenge_xml(&challenge))
    }

    async fn parse_license(&mut self, license_b64: &str) -> Result<LicenseOutcome> {
        let wrm_header = self
            .wrm_header
            .clone()
            .ok_or_else(|| Error::InvalidState("License received before a challenge".to_string()))?;
        let license = String::from_utf8_lossy(&b64_decode(license_b64)?).into_owned();
        let keys = self
            .cdm
            .parse_license(&license)?
            .iter()
            .map(|key| key.to_content_key())
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Err(Error::NoKeys("License contains no content keys".to_string()));
        }
        Ok(LicenseOutcome {
            kind: DrmKind::Playready,
            pssh: wrm_header,
            keys,
        })
    }
}
