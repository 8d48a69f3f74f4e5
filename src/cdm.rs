//! Core Widevine CDM implementation.
//!
//! This module handles session lifecycle, license request/response parsing,
//! privacy certificate handling, and key derivation. It also exposes the
//! request-id readers the session registry correlates challenges and
//! licenses with.
use std::collections::HashMap;
use std::sync::LazyLock;

use aes::Aes128;
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use prost::Message;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::rand_core::{OsRng, RngCore};
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::Sha256;

use crate::device::{Device, DeviceType};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::license_protocol::license_request::content_identification::{
    ContentIdVariant, WebmKeyId, WidevinePsshData as WidevinePsshDataRequest,
};
use crate::license_protocol::license_request::{ContentIdentification, RequestType};
use crate::license_protocol::signed_message::MessageType;
use crate::license_protocol::{
    ClientIdentification, DrmCertificate, EncryptedClientIdentification, License, LicenseRequest,
    LicenseType, ProtocolVersion, SignedDrmCertificate, SignedMessage,
};
use crate::pssh::{is_pssh_box, Pssh};

type HmacSha256 = Hmac<Sha256>;
type CmacAes128 = Cmac<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Service certificate challenge payload (`SERVICE_CERTIFICATE_REQUEST`).
pub const SERVICE_CERTIFICATE_CHALLENGE: &[u8] = b"\x08\x04";

/// Widevine's common privacy certificate (license.widevine.com).
pub const COMMON_PRIVACY_CERT: &str = concat!(
    "CAUSxwUKwQIIAxIQFwW5F8wSBIaLBjM6L3cqjBiCtIKSBSKOAjCCAQoCggEBAJntWzsy",
    "fateJO/DtiqVtZhSCtW8yzdQPgZFuBTYdrjfQFEEQa2M462xG7iMTnJaXkqeB5Up",
    "HVhYQCOn4a8OOKkSeTkwCGELbxWMh4x+Ib/7/up34QGeHleB6KRfRiY9FOYOgFioY",
    "Hrc4E+shFexN6jWfM3rM3BdmDoh+07svUoQykdJDKR+ql1DghjduvHK3jOS8T1v+",
    "2RC/THhv0CwxgTRxLpMlSCkv5fuvWCSmvzu9Vu69WTi0Ods18Vcc6CCuZYSC4NZ7",
    "c4kcHCCaA1vZ8bYLErF8xNEkKdO7DevSy8BDFnoKEPiWC8La59dsPxebt9k+9MI",
    "tHEbzxJQAZyfWgkCAwEAAToUbGljZW5zZS53aWRldmluZS5jb20SgAOuNHMUtag1",
    "KX8nE4j7e7jLUnfSSYI83dHaMLkzOVEes8y96gS5RLknwSE0bv296snUE5F+bsF2",
    "oQQ4RgpQO8GVK5uk5M4PxL/CCpgIqq9L/NGcHc/N9XTMrCjRtBBBbPneiAQwHL2z",
    "NMr80NQJeEI6ZC5UYT3wr8+WykqSSdhV5Cs6cD7xdn9qm9Nta/gr52u/DLpP3lnS",
    "q8x2/rZCR7hcQx+8pSJmthn8NpeVQ/ypy727+voOGlXnVaPHvOZV+WRvWCq5z3Cq",
    "CLl5+Gf2Ogsrf9s2LFvE7NVV2FvKqcWTw4PIV9Sdqrd+QLeFHd/SSZiAjjWyWOdd",
    "eOrAyhb3BHMEwg2T7eTo/xxvF+YkPj89qPwXCYcOxF+6gjomPwzvofcJOxkJkoMm",
    "MzcFBDopvab5tDQsyN9UPLGhGC98X/8z8QSQ+spbJTYLdgFenFoGq47gLwDS6NWY",
    "YQSqzE3Udf2W7pzk4ybyG4PHBYV3s4cyzdq8amvtE/sNSdOKReuHpfQ="
);

const ROOT_SIGNED_CERT_B64: &str = concat!(
    "CpwDCAASAQAY3ZSIiwUijgMwggGKAoIBgQC0/jnDZZAD2zwRlwnoaM3yw16b8ud",
    "NI7EQ24dl39z7nzWgVwNTTPZtNX2meNuzNtI/nECplSZyf7i+Zt/FIZh4FRZoXS9",
    "GDkPLioQ5q/uwNYAivjQji6tTW3LsS7VIaVM+R1/9Cf2ndhOPD5LWTN+udqm62SI",
    "QqZ1xRdbX4RklhZxTmpfrhNfMqIiCIHAmIP1+QFAn4iWTb7w+cqD6wb0ptE2CXMG",
    "0y5xyfrDpihc+GWP8/YJIK7eyM7l97Eu6iR8nuJuISISqGJIOZfXIbBH/azbkdDT",
    "KjDOx+biOtOYS4AKYeVJeRTP/Edzrw1O6fGAaET0A+9K3qjD6T15Id1sX3HXvb9I",
    "Zbdy+f7B4j9yCYEy/5CkGXmmMOROtFCXtGbLynwGCDVZEiMg17B8RsyTgWQ035Ec",
    "86kt/lzEcgXyUikx9aBWE/6UI/Rjn5yvkRycSEbgj7FiTPKwS0ohtQT3F/hzcufj",
    "UUT4H5QNvpxLoEve1zqaWVT94tGSCUNIzX5ECAwEAARKAA1jx1k0ECXvf1+9dOwI",
    "5F/oUNnVKOGeFVxKnFO41FtU9v0KG9mkAds2T9Hyy355EzUzUrgkYU0Qy7OBhG+X",
    "aE9NVxd0ay5AeflvG6Q8in76FAv6QMcxrA4S9IsRV+vXyCM1lQVjofSnaBFiC9Td",
    "pvPNaV4QXezKHcLKwdpyywxXRESYqI3WZPrl3IjINvBoZwdVlkHZVdA8OaU1fTY8",
    "Zr9/WFjGUqJJfT7x6Mfiujq0zt+kw0IwKimyDNfiKgbL+HIisKmbF/73mF9BiC9",
    "yKRfewPlrIHkokL2yl4xyIFIPVxe9enz2FRXPia1BSV0z7kmxmdYrWDRuu8+yvUS",
    "IDXQouY5OcCwEgqKmELhfKrnPsIht5rvagcizfB0fbiIYwFHghESKIrNdUdPnzJs",
    "KlVshWTwApHQh7evuVicPumFSePGuUBRMS9nG5qxPDDJtGCHs9Mmpoyh6ckGLF7R",
    "C5HxclzpC5bc3ERvWjYhN0AqdipPpV2d7PouaAdFUGSdUCDA=="
);

static ROOT_PUBLIC_KEY: LazyLock<std::result::Result<RsaPublicKey, String>> =
    LazyLock::new(|| {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ROOT_SIGNED_CERT_B64)
            .map_err(|e| format!("Invalid root cert base64: {}", e))?;
        let signed = SignedDrmCertificate::decode(bytes.as_slice())
            .map_err(|e| format!("Invalid root SignedDrmCertificate: {}", e))?;
        let cert = DrmCertificate::decode(signed.drm_certificate.unwrap_or_default().as_slice())
            .map_err(|e| format!("Invalid root DrmCertificate: {}", e))?;
        RsaPublicKey::from_pkcs1_der(cert.public_key.unwrap_or_default().as_slice())
            .map_err(|e| format!("Invalid root public key: {}", e))
    });

/// Widevine Content Decryption Module (CDM).
#[derive(Debug, Clone)]
pub struct Cdm {
    pub device_type: DeviceType,
    pub system_id: u32,
    pub security_level: u8,
    client_id: ClientIdentification,
    private_key: RsaPrivateKey,
    sessions: HashMap<Vec<u8>, CdmSession>,
    opened: u32,
}

/// Per-session request context and loaded keys.
#[derive(Debug, Clone)]
struct CdmSession {
    /// 1-based; feeds the Android request id counter.
    number: u32,
    id: Vec<u8>,
    service_certificate: Option<SignedDrmCertificate>,
    /// request_id -> (enc_context, mac_context)
    context: HashMap<Vec<u8>, (Vec<u8>, Vec<u8>)>,
    init_data: Option<Vec<u8>>,
    keys: Vec<Key>,
}

impl CdmSession {
    fn open(number: u32) -> Self {
        let mut id = vec![0u8; 16];
        OsRng.fill_bytes(&mut id);
        Self {
            number,
            id,
            service_certificate: None,
            context: HashMap::new(),
            init_data: None,
            keys: Vec::new(),
        }
    }
}

impl Cdm {
    /// Maximum number of concurrently opened sessions.
    pub const MAX_NUM_OF_SESSIONS: usize = 16;

    /// Create a CDM instance from a parsed device.
    pub fn from_device(device: Device) -> Self {
        Self {
            device_type: device.device_type,
            system_id: device.system_id,
            security_level: device.security_level,
            client_id: device.client_id,
            private_key: device.private_key,
            sessions: HashMap::new(),
            opened: 0,
        }
    }

    /// Open a new session and return its session id.
    ///
    /// Returns an error if the maximum number of sessions has been reached.
    pub fn open(&mut self) -> Result<Vec<u8>> {
        if self.sessions.len() >= Self::MAX_NUM_OF_SESSIONS {
            return Err(Error::TooManySessions {
                max: Self::MAX_NUM_OF_SESSIONS,
            });
        }

        self.opened += 1;
        let session = CdmSession::open(self.opened);
        let session_id = session.id.clone();
        self.sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Close a session by id.
    pub fn close(&mut self, session_id: &[u8]) -> Result<()> {
        if self.sessions.remove(session_id).is_none() {
            return Err(Error::InvalidSession(session_id.to_vec()));
        }
        Ok(())
    }

    /// Set or unset the service certificate for a session.
    ///
    /// The certificate must be either a serialized `SignedDrmCertificate` or a
    /// `SERVICE_CERTIFICATE` `SignedMessage` wrapping one. Its signature is
    /// checked against the Widevine root. Returns the provider id.
    pub fn set_service_certificate(
        &mut self,
        session_id: &[u8],
        certificate: Option<&[u8]>,
    ) -> Result<Option<String>> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_vec()))?;

        let Some(certificate) = certificate else {
            let provider_id = match session.service_certificate.take() {
                Some(signed) => decode_drm_certificate(&signed)?.provider_id,
                None => None,
            };
            return Ok(provider_id);
        };

        let signed_drm_certificate = decode_signed_drm_certificate(certificate)?;
        let drm_certificate = decode_drm_certificate(&signed_drm_certificate)?;
        verify_signed_certificate(&signed_drm_certificate)?;

        session.service_certificate = Some(signed_drm_certificate);
        Ok(drm_certificate.provider_id)
    }

    /// Build a signed license request for the given init data.
    ///
    /// `init_data` is either a full PSSH box (sent as `WidevinePsshData`) or,
    /// when it lacks the `pssh` box header, a WebM key id (sent as
    /// `WebmKeyId`). When `privacy_mode` is enabled and a service certificate
    /// is set, the client id is encrypted.
    ///
    /// For Android devices, the request_id is generated in a counter-like form
    /// to match OEMCrypto behavior.
    pub fn get_license_challenge(
        &mut self,
        session_id: &[u8],
        init_data: &[u8],
        license_type: LicenseType,
        privacy_mode: bool,
    ) -> Result<Vec<u8>> {
        if init_data.is_empty() {
            return Err(Error::InvalidInitData("No PSSH data in challenge".to_string()));
        }

        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_vec()))?;

        let request_id = if self.device_type == DeviceType::Android {
            let mut req = [0u8; 16];
            OsRng.fill_bytes(&mut req[..4]);
            // bytes 4..8 remain 0
            req[8..].copy_from_slice(&u64::from(session.number).to_le_bytes());
            hex::encode_upper(req).into_bytes()
        } else {
            let mut req = vec![0u8; 16];
            OsRng.fill_bytes(&mut req);
            req
        };

        let variant = if is_pssh_box(init_data) {
            let pssh = Pssh::from_bytes(init_data)?;
            ContentIdVariant::WidevinePsshData(WidevinePsshDataRequest {
                pssh_data: vec![pssh.init_data],
                license_type: Some(license_type as i32),
                request_id: Some(request_id.clone()),
            })
        } else {
            ContentIdVariant::WebmKeyId(WebmKeyId {
                header: Some(init_data.to_vec()),
                license_type: Some(license_type as i32),
                request_id: Some(request_id.clone()),
            })
        };

        let encrypted_client_id = match (&session.service_certificate, privacy_mode) {
            (Some(cert), true) => Some(Self::encrypt_client_id(&self.client_id, cert)?),
            _ => None,
        };
        let client_id = if encrypted_client_id.is_some() {
            None
        } else {
            Some(self.client_id.clone())
        };

        let license_request = LicenseRequest {
            client_id,
            content_id: Some(ContentIdentification {
                content_id_variant: Some(variant),
            }),
            r#type: Some(RequestType::New as i32),
            request_time: Some(crate::utils::unix_now()),
            key_control_nonce_deprecated: None,
            protocol_version: Some(ProtocolVersion::Version21 as i32),
            key_control_nonce: Some(OsRng.next_u32()),
            encrypted_client_id,
        };

        let license_request_bytes = license_request.encode_to_vec();
        let signature = sign_pss_sha1(&self.private_key, &license_request_bytes)?;

        let signed_message = SignedMessage {
            r#type: Some(MessageType::LicenseRequest as i32),
            msg: Some(license_request_bytes.clone()),
            signature: Some(signature),
            ..Default::default()
        };

        session
            .context
            .insert(request_id, Self::derive_context(&license_request_bytes));
        session.init_data = Some(init_data.to_vec());

        Ok(signed_message.encode_to_vec())
    }

    /// Parse a license response and load keys into the session.
    ///
    /// This validates the HMAC signature (including oemcrypto_core_message if
    /// present), derives session keys, and decrypts content keys. Context is
    /// removed after successful parsing. If the session has no context, the
    /// license likely did not originate from this CDM instance.
    pub fn parse_license(&mut self, session_id: &[u8], license_message: &[u8]) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_vec()))?;

        let signed_message = decode_license_message(license_message)?;
        let msg_bytes = signed_message
            .msg
            .as_ref()
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing license message".to_string()))?;

        let license = License::decode(msg_bytes.as_slice())
            .map_err(|e| Error::InvalidLicenseMessage(format!("Failed to parse License: {}", e)))?;

        let request_id = license
            .id
            .as_ref()
            .and_then(|id| id.request_id.clone())
            .ok_or_else(|| Error::InvalidContext("Missing request_id".to_string()))?;

        let (enc_context, mac_context) = session
            .context
            .get(&request_id)
            .ok_or_else(|| Error::InvalidContext("Missing context".to_string()))?
            .clone();

        let session_key = signed_message
            .session_key
            .as_ref()
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing session_key".to_string()))?;

        let decrypted_session_key = self
            .private_key
            .decrypt(Oaep::new::<Sha1>(), session_key)
            .map_err(Error::RsaError)?;

        let (enc_key, mac_key_server, _) =
            Self::derive_keys(&enc_context, &mac_context, &decrypted_session_key)?;

        let mut mac = HmacSha256::new_from_slice(&mac_key_server)
            .map_err(|e| Error::Other(format!("Invalid HMAC key: {}", e)))?;
        if let Some(ref core) = signed_message.oemcrypto_core_message {
            mac.update(core);
        }
        mac.update(msg_bytes);

        let signature = signed_message
            .signature
            .as_ref()
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing signature".to_string()))?;
        mac.verify_slice(signature).map_err(|_| {
            Error::SignatureMismatch("Signature mismatch on license message".to_string())
        })?;

        session.keys = license
            .key
            .iter()
            .map(|container| Key::from_key_container(container, &enc_key))
            .collect::<Result<Vec<_>>>()?;
        session.context.remove(&request_id);
        debug!("Loaded {} keys from license", session.keys.len());
        Ok(())
    }

    /// Return decrypted keys from a session, optionally filtered by key type.
    ///
    /// When `key_type` is `None` or "ALL", all keys are returned.
    pub fn get_keys(&self, session_id: &[u8], key_type: Option<&str>) -> Result<Vec<Key>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_vec()))?;

        let filter = key_type
            .map(str::to_uppercase)
            .filter(|value| value != "ALL");

        Ok(session
            .keys
            .iter()
            .filter(|k| filter.as_ref().is_none_or(|f| &k.key_type == f))
            .cloned()
            .collect())
    }

    /// Init data the session's last license request was built from, as base64.
    pub fn get_pssh(&self, session_id: &[u8]) -> Result<String> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_vec()))?;
        session
            .init_data
            .as_ref()
            .map(crate::utils::b64_encode)
            .ok_or_else(|| Error::InvalidContext("No license request was made".to_string()))
    }

    /// Encrypt the client id using a service certificate (privacy mode).
    ///
    /// Uses AES-128-CBC with PKCS#5/7 padding under a random privacy key and
    /// IV, and wraps the privacy key using RSA-OAEP with the service
    /// certificate public key.
    pub fn encrypt_client_id(
        client_id: &ClientIdentification,
        service_certificate: &SignedDrmCertificate,
    ) -> Result<EncryptedClientIdentification> {
        let mut privacy_key = [0u8; 16];
        OsRng.fill_bytes(&mut privacy_key);
        let mut privacy_iv = [0u8; 16];
        OsRng.fill_bytes(&mut privacy_iv);

        let drm_certificate = decode_drm_certificate(service_certificate)?;
        let public_key_bytes = drm_certificate
            .public_key
            .as_ref()
            .ok_or_else(|| Error::DecodeError("Missing public key".to_string()))?;
        let public_key = RsaPublicKey::from_pkcs1_der(public_key_bytes.as_slice())
            .map_err(|e| Error::Other(format!("Failed to parse public key: {}", e)))?;

        let encrypted_client_id = Aes128CbcEnc::new(&privacy_key.into(), &privacy_iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&client_id.encode_to_vec());

        let encrypted_privacy_key = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &privacy_key)
            .map_err(Error::RsaError)?;

        Ok(EncryptedClientIdentification {
            provider_id: drm_certificate.provider_id.clone(),
            service_certificate_serial_number: drm_certificate.serial_number.clone(),
            encrypted_client_id: Some(encrypted_client_id),
            encrypted_client_id_iv: Some(privacy_iv.to_vec()),
            encrypted_privacy_key: Some(encrypted_privacy_key),
        })
    }

    /// Derive encryption and MAC context from a message.
    ///
    /// Context format follows Widevine's ENCRYPTION/AUTHENTICATION labels.
    #[must_use]
    pub fn derive_context(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        fn context(label: &[u8], msg: &[u8], bits: u32) -> Vec<u8> {
            let mut out = Vec::with_capacity(label.len() + 1 + msg.len() + 4);
            out.extend_from_slice(label);
            out.push(0);
            out.extend_from_slice(msg);
            out.extend_from_slice(&bits.to_be_bytes());
            out
        }

        (
            context(b"ENCRYPTION", message, 16 * 8),
            context(b"AUTHENTICATION", message, 32 * 8 * 2),
        )
    }

    /// Derive encryption and MAC keys from context and base key.
    ///
    /// Returns (enc_key, mac_key_server, mac_key_client) using AES-CMAC over
    /// the context data.
    pub fn derive_keys(
        enc_context: &[u8],
        mac_context: &[u8],
        key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let derive = |context: &[u8], counter: u8| -> Result<Vec<u8>> {
            let mut mac = <CmacAes128 as Mac>::new_from_slice(key)
                .map_err(|_| Error::InvalidLicenseMessage("Session key must be 16 bytes".to_string()))?;
            mac.update(&[counter]);
            mac.update(context);
            Ok(mac.finalize().into_bytes().to_vec())
        };

        let enc_key = derive(enc_context, 1)?;
        let mut mac_key_server = derive(mac_context, 1)?;
        mac_key_server.extend_from_slice(&derive(mac_context, 2)?);
        let mut mac_key_client = derive(mac_context, 3)?;
        mac_key_client.extend_from_slice(&derive(mac_context, 4)?);
        Ok((enc_key, mac_key_server, mac_key_client))
    }
}

/// Read the `request_id` out of a `LICENSE_REQUEST` challenge.
///
/// Whichever content identification variant carries it is used.
pub fn challenge_request_id(challenge: &[u8]) -> Result<Vec<u8>> {
    let signed_message = SignedMessage::decode(challenge)?;
    if signed_message.r#type != Some(MessageType::LicenseRequest as i32) {
        return Err(Error::InvalidLicenseMessage(
            "Expected LICENSE_REQUEST message".to_string(),
        ));
    }
    let request = LicenseRequest::decode(signed_message.msg.unwrap_or_default().as_slice())?;
    let request_id = match request.content_id.and_then(|c| c.content_id_variant) {
        Some(ContentIdVariant::WidevinePsshData(data)) => data.request_id,
        Some(ContentIdVariant::WebmKeyId(data)) => data.request_id,
        Some(ContentIdVariant::InitData(data)) => data.request_id,
        Some(ContentIdVariant::ExistingLicense(data)) => {
            data.license_id.and_then(|id| id.request_id)
        }
        None => None,
    };
    request_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidContext("Challenge carries no request_id".to_string()))
}

/// Read `License.id.request_id` out of a `LICENSE` message.
pub fn license_request_id(license_message: &[u8]) -> Result<Vec<u8>> {
    let signed_message = decode_license_message(license_message)?;
    let license = License::decode(signed_message.msg.unwrap_or_default().as_slice())?;
    license
        .id
        .and_then(|id| id.request_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidContext("Missing request_id".to_string()))
}

fn decode_license_message(license_message: &[u8]) -> Result<SignedMessage> {
    let signed_message = SignedMessage::decode(license_message).map_err(|e| {
        Error::InvalidLicenseMessage(format!("Failed to parse SignedMessage: {}", e))
    })?;
    if signed_message.r#type != Some(MessageType::License as i32) {
        return Err(Error::InvalidLicenseMessage(format!(
            "Expected LICENSE message, got {:?}",
            signed_message.r#type()
        )));
    }
    Ok(signed_message)
}

fn sign_pss_sha1(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>> {
    let hash = Sha1::digest(message);
    let signature = private_key
        .sign_with_rng(&mut OsRng, Pss::new::<Sha1>(), &hash)
        .map_err(Error::RsaError)?;
    Ok(signature)
}

fn decode_signed_drm_certificate(data: &[u8]) -> Result<SignedDrmCertificate> {
    if let Ok(signed_message) = SignedMessage::decode(data) {
        if signed_message.r#type == Some(MessageType::ServiceCertificate as i32) {
            let msg_bytes = signed_message
                .msg
                .ok_or_else(|| Error::DecodeError("SignedMessage missing msg".to_string()))?;
            return SignedDrmCertificate::decode(msg_bytes.as_slice()).map_err(|e| {
                Error::DecodeError(format!("Failed to parse SignedDrmCertificate: {}", e))
            });
        }
    }

    SignedDrmCertificate::decode(data)
        .map_err(|e| Error::DecodeError(format!("Failed to parse SignedDrmCertificate: {}", e)))
}

fn decode_drm_certificate(signed: &SignedDrmCertificate) -> Result<DrmCertificate> {
    let cert_bytes = signed
        .drm_certificate
        .as_ref()
        .ok_or_else(|| Error::DecodeError("Missing DRM certificate".to_string()))?;
    DrmCertificate::decode(cert_bytes.as_slice())
        .map_err(|e| Error::DecodeError(format!("Failed to parse DrmCertificate: {}", e)))
}

fn verify_signed_certificate(cert: &SignedDrmCertificate) -> Result<()> {
    let cert_bytes = cert
        .drm_certificate
        .as_ref()
        .ok_or_else(|| Error::DecodeError("Missing DRM certificate".to_string()))?;
    let signature = cert
        .signature
        .as_ref()
        .ok_or_else(|| Error::DecodeError("Missing certificate signature".to_string()))?;

    let root = ROOT_PUBLIC_KEY.as_ref().map_err(|e| Error::Other(e.clone()))?;
    let hash = Sha1::digest(cert_bytes);
    root.verify(Pss::new::<Sha1>(), &hash, signature)
        .map_err(|_| Error::SignatureMismatch("Signature mismatch on certificate".to_string()))
}
