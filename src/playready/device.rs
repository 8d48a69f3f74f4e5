//! PlayReady Device (.prd) files.
//!
//! Layouts after the `PRD` magic and version byte:
//! - v2: `cert_len: u32`, certificate chain, encryption key, signing key.
//! - v3: group key, encryption key, signing key, `cert_len: u32`, certificate chain.
//!
//! Every key is 96 bytes of `d || x || y`.

use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use super::ecc::EccKey;
use crate::error::{Error, Result};

const PRD_MAGIC: &[u8; 3] = b"PRD";
const ECC_KEY_LEN: usize = 96;

const BCERT_CHAIN_MAGIC: &[u8; 4] = b"CHAI";
const BCERT_MAGIC: &[u8; 4] = b"CERT";
const BCERT_BASIC_INFO: u16 = 0x0001;

/// A PlayReady client identity.
#[derive(Debug, Clone)]
pub struct Device {
    pub version: u8,
    pub group_key: Option<EccKey>,
    pub encryption_key: EccKey,
    pub signing_key: EccKey,
    /// BCert chain sent in license challenges.
    pub group_certificate: Vec<u8>,
}

impl Device {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_base64(data_b64: &str) -> Result<Self> {
        Self::from_bytes(&crate::utils::b64_decode(data_b64)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || &data[..3] != PRD_MAGIC {
            return Err(Error::InvalidPrdFile("Invalid magic bytes".to_string()));
        }
        let version = data[3];
        let mut reader = Reader { data, offset: 4 };

        match version {
            2 => {
                let cert_len = reader.u32()? as usize;
                let group_certificate = reader.take(cert_len, "certificate chain")?.to_vec();
                let encryption_key = EccKey::from_bytes(reader.take(ECC_KEY_LEN, "encryption key")?)?;
                let signing_key = EccKey::from_bytes(reader.take(ECC_KEY_LEN, "signing key")?)?;
                Ok(Self {
                    version,
                    group_key: None,
                    encryption_key,
                    signing_key,
                    group_certificate,
                })
            }
            3 => {
                let group_key = EccKey::from_bytes(reader.take(ECC_KEY_LEN, "group key")?)?;
                let encryption_key = EccKey::from_bytes(reader.take(ECC_KEY_LEN, "encryption key")?)?;
                let signing_key = EccKey::from_bytes(reader.take(ECC_KEY_LEN, "signing key")?)?;
                let cert_len = reader.u32()? as usize;
                let group_certificate = reader.take(cert_len, "certificate chain")?.to_vec();
                Ok(Self {
                    version,
                    group_key: Some(group_key),
                    encryption_key,
                    signing_key,
                    group_certificate,
                })
            }
            other => Err(Error::InvalidPrdFile(format!("Unsupported version: {}", other))),
        }
    }

    /// Serialize back to the file's own version.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = PRD_MAGIC.to_vec();
        buf.push(self.version);
        let cert_len = (self.group_certificate.len() as u32).to_be_bytes();
        match &self.group_key {
            Some(group_key) if self.version == 3 => {
                buf.extend(group_key.to_bytes());
                buf.extend(self.encryption_key.to_bytes());
                buf.extend(self.signing_key.to_bytes());
                buf.extend_from_slice(&cert_len);
                buf.extend_from_slice(&self.group_certificate);
            }
            _ => {
                buf.extend_from_slice(&cert_len);
                buf.extend_from_slice(&self.group_certificate);
                buf.extend(self.encryption_key.to_bytes());
                buf.extend(self.signing_key.to_bytes());
            }
        }
        buf
    }

    /// Security level of the leaf certificate (150, 2000 or 3000), if the chain parses.
    pub fn security_level(&self) -> Option<u32> {
        leaf_security_level(&self.group_certificate)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let out = self
            .data
            .get(self.offset..self.offset + len)
            .ok_or_else(|| Error::InvalidPrdFile(format!("Data too short for {}", what)))?;
        self.offset += len;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4, "length")?))
    }
}

/// Walk `CHAI` -> first `CERT` -> BasicInfo attribute and read its security level.
fn leaf_security_level(chain: &[u8]) -> Option<u32> {
    // CHAI header: magic, version, total length, flags, certificate count
    if chain.get(..4)? != BCERT_CHAIN_MAGIC {
        return None;
    }
    let cert = chain.get(20..)?;
    if cert.get(..4)? != BCERT_MAGIC {
        return None;
    }
    // CERT header: magic, version, total length, signed length
    let cert_len = BigEndian::read_u32(cert.get(8..12)?) as usize;
    let mut attrs = cert.get(16..cert_len.min(cert.len()))?;

    while attrs.len() >= 8 {
        let tag = BigEndian::read_u16(&attrs[2..4]);
        let len = BigEndian::read_u32(&attrs[4..8]) as usize;
        if len < 8 || len > attrs.len() {
            return None;
        }
        if tag == BCERT_BASIC_INFO {
            // cert id (16 bytes) precedes the level
            return attrs.get(24..28).map(BigEndian::read_u32);
        }
        attrs = &attrs[len..];
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal BCert chain whose leaf declares `level`.
    pub(crate) fn test_chain(level: u32) -> Vec<u8> {
        let mut basic_info = [0u8; 16].to_vec();
        basic_info.extend_from_slice(&level.to_be_bytes());
        basic_info.extend_from_slice(&[0u8; 4]);
        let mut attr = 1u16.to_be_bytes().to_vec();
        attr.extend_from_slice(&BCERT_BASIC_INFO.to_be_bytes());
        attr.extend_from_slice(&((basic_info.len() + 8) as u32).to_be_bytes());
        attr.extend(basic_info);

        let mut cert = BCERT_MAGIC.to_vec();
        cert.extend_from_slice(&1u32.to_be_bytes());
        cert.extend_from_slice(&((attr.len() + 16) as u32).to_be_bytes());
        cert.extend_from_slice(&((attr.len() + 16) as u32).to_be_bytes());
        cert.extend(attr);

        let mut chain = BCERT_CHAIN_MAGIC.to_vec();
        chain.extend_from_slice(&1u32.to_be_bytes());
        chain.extend_from_slice(&((cert.len() + 20) as u32).to_be_bytes());
        chain.extend_from_slice(&0u32.to_be_bytes());
        chain.extend_from_slice(&1u32.to_be_bytes());
        chain.extend(cert);
        chain
    }

    pub(crate) fn test_device(version: u8) -> Device {
        Device {
            version,
            group_key: (version == 3).then(EccKey::generate),
            encryption_key: EccKey::generate(),
            signing_key: EccKey::generate(),
            group_certificate: test_chain(2000),
        }
    }

    #[test]
    fn prd_v2_and_v3_roundtrip() {
        for version in [2u8, 3] {
            let device = test_device(version);
            let bytes = device.to_bytes();
            assert_eq!(&bytes[..4], &[b'P', b'R', b'D', version]);

            let parsed = Device::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.version, version);
            assert_eq!(parsed.group_key.is_some(), version == 3);
            assert_eq!(parsed.encryption_key.public_bytes(), device.encryption_key.public_bytes());
            assert_eq!(parsed.signing_key.public_bytes(), device.signing_key.public_bytes());
            assert_eq!(parsed.group_certificate, device.group_certificate);
            assert_eq!(parsed.security_level(), Some(2000));
        }
    }

    #[test]
    fn prd_rejects_truncation_and_unknown_versions() {
        let bytes = test_device(3).to_bytes();
        assert!(Device::from_bytes(&bytes[..100]).is_err());
        assert!(Device::from_bytes(b"PRD\x09").is_err());
        assert!(Device::from_bytes(b"WVD\x02").is_err());
    }
}
