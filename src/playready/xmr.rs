//! XMR license parsing.
//!
//! An XMR license is `"XMR\0"`, a u32 version, a 16-byte rights id, then a
//! tree of TLV objects: `flags: u16`, `type: u16`, `length: u32` (length
//! includes the 8-byte object header), all big-endian. Objects with the
//! container flag hold further objects.

use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};
use cmac::{Cmac, Mac};

use crate::error::{Error, Result};

const XMR_MAGIC: &[u8; 4] = b"XMR\0";
const OBJECT_HEADER_LEN: usize = 8;
const CONTAINER_FLAG: u16 = 0x0002;

/// Object type of a content key object.
pub const CONTENT_KEY_OBJECT: u16 = 0x000A;
/// Object type of the license signature object.
pub const SIGNATURE_OBJECT: u16 = 0x000B;

/// Cipher types found in a content key object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    Invalid,
    Rsa1024,
    ChainedLicense,
    Ecc256,
    Ecc256WithKz,
    TeeTransient,
    Ecc256ViaSymmetric,
    Unknown(u16),
}

impl From<u16> for CipherType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Invalid,
            1 => Self::Rsa1024,
            2 => Self::ChainedLicense,
            3 => Self::Ecc256,
            4 => Self::Ecc256WithKz,
            5 => Self::TeeTransient,
            6 => Self::Ecc256ViaSymmetric,
            other => Self::Unknown(other),
        }
    }
}

/// A content key object, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKeyObject {
    pub key_id: [u8; 16],
    pub key_type: u16,
    pub cipher_type: CipherType,
    pub encrypted_key: Vec<u8>,
}

/// The license signature object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureObject {
    pub signature_type: u16,
    pub signature: Vec<u8>,
    /// Total object length, header included.
    object_len: usize,
}

/// A parsed XMR license.
#[derive(Debug, Clone)]
pub struct XmrLicense {
    pub version: u32,
    pub rights_id: [u8; 16],
    pub content_keys: Vec<ContentKeyObject>,
    pub signature: Option<SignatureObject>,
    raw: Vec<u8>,
}

impl XmrLicense {
    pub fn from_base64(data: &str) -> Result<Self> {
        Self::from_bytes(&crate::utils::b64_decode(data)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 24 || &data[..4] != XMR_MAGIC {
            return Err(Error::PlayReady("Not an XMR license".to_string()));
        }
        let version = BigEndian::read_u32(&data[4..8]);
        let mut rights_id = [0u8; 16];
        rights_id.copy_from_slice(&data[8..24]);

        let mut license = Self {
            version,
            rights_id,
            content_keys: Vec::new(),
            signature: None,
            raw: data.to_vec(),
        };
        license.walk(&data[24..])?;
        Ok(license)
    }

    fn walk(&mut self, mut data: &[u8]) -> Result<()> {
        while data.len() >= OBJECT_HEADER_LEN {
            let flags = BigEndian::read_u16(&data[0..2]);
            let object_type = BigEndian::read_u16(&data[2..4]);
            let length = BigEndian::read_u32(&data[4..8]) as usize;
            if length < OBJECT_HEADER_LEN || length > data.len() {
                return Err(Error::PlayReady(format!(
                    "XMR object 0x{:04X} has invalid length {}",
                    object_type, length
                )));
            }
            let body = &data[OBJECT_HEADER_LEN..length];

            if flags & CONTAINER_FLAG != 0 {
                self.walk(body)?;
            } else {
                match object_type {
                    CONTENT_KEY_OBJECT => self.content_keys.push(parse_content_key(body)?),
                    SIGNATURE_OBJECT => self.signature = Some(parse_signature(body, length)?),
                    _ => trace!("Skipping XMR object 0x{:04X}", object_type),
                }
            }
            data = &data[length..];
        }
        Ok(())
    }

    /// Verify the AES-CMAC signature over everything before the signature object.
    pub fn check_signature(&self, integrity_key: &[u8]) -> Result<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::PlayReady("XMR license is not signed".to_string()))?;
        let signed_len = self
            .raw
            .len()
            .checked_sub(signature.object_len)
            .ok_or_else(|| Error::PlayReady("XMR signature exceeds license".to_string()))?;

        let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(integrity_key)
            .map_err(|_| Error::PlayReady("Integrity key must be 16 bytes".to_string()))?;
        mac.update(&self.raw[..signed_len]);
        mac.verify_slice(&signature.signature)
            .map_err(|_| Error::SignatureMismatch("XMR license signature is invalid".to_string()))
    }
}

fn parse_content_key(body: &[u8]) -> Result<ContentKeyObject> {
    if body.len() < 22 {
        return Err(Error::PlayReady("Content key object truncated".to_string()));
    }
    let mut key_id = [0u8; 16];
    key_id.copy_from_slice(&body[..16]);
    let key_type = BigEndian::read_u16(&body[16..18]);
    let cipher_type = CipherType::from(BigEndian::read_u16(&body[18..20]));
    let key_len = BigEndian::read_u16(&body[20..22]) as usize;
    let encrypted_key = body
        .get(22..22 + key_len)
        .ok_or_else(|| Error::PlayReady("Content key data truncated".to_string()))?
        .to_vec();
    Ok(ContentKeyObject {
        key_id,
        key_type,
        cipher_type,
        encrypted_key,
    })
}

fn parse_signature(body: &[u8], object_len: usize) -> Result<SignatureObject> {
    if body.len() < 4 {
        return Err(Error::PlayReady("Signature object truncated".to_string()));
    }
    let signature_type = BigEndian::read_u16(&body[0..2]);
    let sig_len = BigEndian::read_u16(&body[2..4]) as usize;
    let signature = body
        .get(4..4 + sig_len)
        .ok_or_else(|| Error::PlayReady("Signature data truncated".to_string()))?
        .to_vec();
    Ok(SignatureObject {
        signature_type,
        signature,
        object_len,
    })
}
