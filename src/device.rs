//! Widevine Device (.wvd) files.
//!
//! The device file carries the RSA private key and ClientIdentification blob
//! a local Widevine backend signs license requests with. v2 stores VMP data
//! inside the ClientIdentification message; v1 stored it after the client id
//! and is merged in on load.

use std::path::Path;

use prost::Message;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

use crate::error::{Error, Result};
use crate::license_protocol::{ClientIdentification, DrmCertificate, SignedDrmCertificate};

/// Magic bytes for WVD files.
const WVD_MAGIC: &[u8; 3] = b"WVD";

/// Current supported WVD version.
const WVD_VERSION: u8 = 2;

/// Device types supported by Widevine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceType {
    /// Chrome CDM device.
    Chrome = 1,
    /// Android CDM device.
    Android = 2,
}

impl TryFrom<u8> for DeviceType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DeviceType::Chrome),
            2 => Ok(DeviceType::Android),
            _ => Err(Error::InvalidWvdFile(format!(
                "Invalid device type: {}",
                value
            ))),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(device_type: DeviceType) -> Self {
        device_type as u8
    }
}

/// Widevine Device containing key material and client identification.
///
/// The system id is extracted from the DRM certificate embedded in the
/// ClientIdentification token.
#[derive(Debug, Clone)]
pub struct Device {
    /// Device type (Chrome or Android).
    pub device_type: DeviceType,
    /// Security level (1-3, where 1 is highest).
    pub security_level: u8,
    /// Device flags (reserved for future use).
    pub flags: u8,
    /// RSA private key for signing.
    pub private_key: RsaPrivateKey,
    /// Client identification blob.
    pub client_id: ClientIdentification,
    /// System ID extracted from the DRM certificate.
    pub system_id: u32,
}

impl Device {
    /// Create a new Device from components.
    pub fn new(
        device_type: DeviceType,
        security_level: u8,
        flags: u8,
        private_key: RsaPrivateKey,
        client_id: ClientIdentification,
    ) -> Result<Self> {
        let token = client_id
            .token
            .as_ref()
            .ok_or_else(|| Error::InvalidWvdFile("Client ID token missing".to_string()))?;

        let signed_drm_cert = SignedDrmCertificate::decode(token.as_slice())
            .map_err(|e| Error::DecodeError(format!("Failed to parse SignedDrmCertificate: {}", e)))?;

        let drm_cert_bytes = signed_drm_cert
            .drm_certificate
            .as_ref()
            .ok_or_else(|| Error::InvalidWvdFile("DRM certificate missing".to_string()))?;

        let drm_cert = DrmCertificate::decode(drm_cert_bytes.as_slice())
            .map_err(|e| Error::DecodeError(format!("Failed to parse DrmCertificate: {}", e)))?;

        let system_id = drm_cert
            .system_id
            .ok_or_else(|| Error::InvalidWvdFile("System ID missing".to_string()))?;

        Ok(Self {
            device_type,
            security_level,
            flags,
            private_key,
            client_id,
            system_id,
        })
    }

    /// Load a Device from a WVD file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Load a Device from base64-encoded WVD bytes.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        Self::from_bytes(&crate::utils::b64_decode(data_b64)?)
    }

    /// Load a Device from WVD bytes (v1 or v2).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::InvalidWvdFile("Data too short".to_string()));
        }
        if &data[0..3] != WVD_MAGIC {
            return Err(Error::InvalidWvdFile("Invalid magic bytes".to_string()));
        }

        let version = data[3];
        if version != WVD_VERSION && version != 1 {
            return Err(Error::InvalidWvdFile(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let device_type = DeviceType::try_from(data[4])?;
        let security_level = data[5];
        let flags = data[6];
        let mut offset = 7;

        let private_key_der = read_u16_prefixed(data, &mut offset, "private key")?;
        let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(private_key_der))
            .map_err(|e| Error::InvalidWvdFile(format!("Failed to parse RSA key: {}", e)))?;

        let client_id_bytes = read_u16_prefixed(data, &mut offset, "client ID")?;
        let mut client_id = ClientIdentification::decode(client_id_bytes)
            .map_err(|e| Error::DecodeError(format!("Failed to parse ClientIdentification: {}", e)))?;

        if version == 1 {
            let vmp = read_u16_prefixed(data, &mut offset, "VMP")?;
            let has_vmp = client_id.vmp_data.as_ref().is_some_and(|d| !d.is_empty());
            if !vmp.is_empty() && !has_vmp {
                client_id.vmp_data = Some(vmp.to_vec());
            }
        }

        Self::new(device_type, security_level, flags, private_key, client_id)
    }

    /// Serialize the Device to WVD v2 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let private_key_der = rsa::pkcs8::EncodePrivateKey::to_pkcs8_der(&self.private_key)
            .map_err(|e| Error::Other(format!("Failed to encode RSA key: {}", e)))?;
        let private_key_bytes = private_key_der.as_bytes();
        let client_id_bytes = self.client_id.encode_to_vec();

        let mut buf = Vec::with_capacity(11 + private_key_bytes.len() + client_id_bytes.len());
        buf.extend_from_slice(WVD_MAGIC);
        buf.push(WVD_VERSION);
        buf.push(self.device_type.into());
        buf.push(self.security_level);
        buf.push(self.flags);
        buf.extend_from_slice(&(private_key_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(private_key_bytes);
        buf.extend_from_slice(&(client_id_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(&client_id_bytes);
        Ok(buf)
    }

    /// Whether Verified Media Path data is present in the client id.
    pub fn has_vmp(&self) -> bool {
        self.client_id.vmp_data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

fn read_u16_prefixed<'a>(data: &'a [u8], offset: &mut usize, what: &str) -> Result<&'a [u8]> {
    if *offset + 2 > data.len() {
        return Err(Error::InvalidWvdFile(format!("Data too short for {} length", what)));
    }
    let len = u16::from_be_bytes([data[*offset], data[*offset + 1]]) as usize;
    *offset += 2;
    if *offset + len > data.len() {
        return Err(Error::InvalidWvdFile(format!("Data too short for {}", what)));
    }
    let out = &data[*offset..*offset + len];
    *offset += len;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::license_protocol::client_identification::TokenType;

    static TEST_KEY: std::sync::LazyLock<RsaPrivateKey> = std::sync::LazyLock::new(|| {
        RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 1024).expect("generate key")
    });

    /// A throwaway 1024-bit device shared by the CDM and backend tests.
    pub(crate) fn test_device(device_type: DeviceType) -> Device {
        let private_key = TEST_KEY.clone();
        let drm_cert = DrmCertificate {
            system_id: Some(4464),
            public_key: Some(
                rsa::pkcs1::EncodeRsaPublicKey::to_pkcs1_der(&private_key.to_public_key())
                    .expect("encode public key")
                    .as_bytes()
                    .to_vec(),
            ),
            ..Default::default()
        };
        let token = SignedDrmCertificate {
            drm_certificate: Some(drm_cert.encode_to_vec()),
            signature: Some(vec![0u8; 8]),
            signer: None,
        };
        let client_id = ClientIdentification {
            r#type: Some(TokenType::DrmDeviceCertificate as i32),
            token: Some(token.encode_to_vec()),
            ..Default::default()
        };
        Device::new(device_type, 3, 0, private_key, client_id).expect("device")
    }

    #[test]
    fn wvd_v2_roundtrip() {
        let device = test_device(DeviceType::Android);
        let bytes = device.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"WVD\x02");

        let parsed = Device::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.device_type, DeviceType::Android);
        assert_eq!(parsed.system_id, 4464);
        assert_eq!(parsed.security_level, 3);
        assert!(!parsed.has_vmp());

        let b64 = crate::utils::b64_encode(&bytes);
        assert_eq!(Device::from_base64(&b64).unwrap().system_id, 4464);
    }

    #[test]
    fn wvd_v1_merges_vmp() {
        let device = test_device(DeviceType::Chrome);
        let mut bytes = device.to_bytes().unwrap();
        bytes[3] = 1;
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(b"vmp");

        let parsed = Device::from_bytes(&bytes).unwrap();
        assert!(parsed.has_vmp());
        assert_eq!(parsed.client_id.vmp_data.as_deref(), Some(&b"vmp"[..]));
    }

    #[test]
    fn wvd_rejects_bad_magic_and_truncation() {
        assert!(Device::from_bytes(b"XYZ\x02\x01\x03\x00\x00").is_err());
        let device = test_device(DeviceType::Chrome);
        let bytes = device.to_bytes().unwrap();
        let err = Device::from_bytes(&bytes[..20]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
