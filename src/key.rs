//! Content key representations.
//!
//! [`Key`] is a Widevine key decrypted out of a `KeyContainer` with
//! AES-128-CBC. [`ContentKey`] is the DRM-neutral `{kid, k}` hex pair that
//! every backend returns and that ends up in ClearKey licenses and logs.

use aes::cipher::{BlockDecryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::license_protocol::license::key_container::KeyType;
use crate::license_protocol::license::KeyContainer;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// A content key as a lowercase hex `kid`/`k` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub kid: String,
    pub k: String,
}

impl ContentKey {
    /// Build from raw bytes.
    pub fn from_bytes(kid: &[u8], k: &[u8]) -> Self {
        Self {
            kid: hex::encode(kid),
            k: hex::encode(k),
        }
    }

    /// Build from hex strings of any case; both are normalised to lowercase.
    pub fn from_hex(kid: &str, k: &str) -> Result<Self> {
        let kid_bytes = hex::decode(kid.trim())?;
        let k_bytes = hex::decode(k.trim())?;
        Ok(Self::from_bytes(&kid_bytes, &k_bytes))
    }

    /// Raw key id bytes.
    pub fn kid_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.kid)?)
    }

    /// Raw key bytes.
    pub fn k_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.k)?)
    }
}

/// A decrypted Widevine key.
///
/// Key type names use the license protocol enum string values (e.g. CONTENT).
#[derive(Debug, Clone)]
pub struct Key {
    /// Key type (e.g., CONTENT, SIGNING, etc.).
    pub key_type: String,
    /// Key ID bytes as carried in the license.
    pub kid: Vec<u8>,
    /// Decrypted key bytes.
    pub key: Vec<u8>,
    /// Permissions for OPERATOR_SESSION keys.
    pub permissions: Vec<String>,
}

impl Key {
    /// Load a Key from a KeyContainer.
    ///
    /// For OPERATOR_SESSION keys, permissions are extracted from the
    /// operator_session_key_permissions field.
    pub fn from_key_container(container: &KeyContainer, enc_key: &[u8]) -> Result<Self> {
        let mut permissions = Vec::new();

        if container.r#type() == KeyType::OperatorSession {
            if let Some(ref perms) = container.operator_session_key_permissions {
                if perms.allow_encrypt.unwrap_or(false) { permissions.push("allow_encrypt".to_string()); }
                if perms.allow_decrypt.unwrap_or(false) { permissions.push("allow_decrypt".to_string()); }
                if perms.allow_sign.unwrap_or(false) { permissions.push("allow_sign".to_string()); }
                if perms.allow_signature_verify.unwrap_or(false) { permissions.push("allow_signature_verify".to_string()); }
            }
        }

        let key_type = container
            .r#type
            .and_then(|v| KeyType::try_from(v).ok())
            .map(|t| t.as_str_name().to_string())
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing key type".to_string()))?;

        let kid = container.id.clone().unwrap_or_default();

        let key_bytes = container
            .key
            .as_ref()
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing key bytes".to_string()))?;
        let iv_bytes = container
            .iv
            .as_ref()
            .ok_or_else(|| Error::InvalidLicenseMessage("Missing IV bytes".to_string()))?;

        let key = decrypt_key(key_bytes, iv_bytes, enc_key)?;

        Ok(Self {
            key_type,
            kid,
            key,
            permissions,
        })
    }

    /// True for keys that decrypt media.
    pub fn is_content(&self) -> bool {
        self.key_type == KeyType::Content.as_str_name()
    }

    /// The `{kid, k}` pair for this key.
    pub fn to_content_key(&self) -> ContentKey {
        ContentKey::from_bytes(&self.kid, &self.key)
    }
}

/// Decrypt a key using AES-128-CBC with PKCS#7 padding.
fn decrypt_key(encrypted_key: &[u8], iv: &[u8], enc_key: &[u8]) -> Result<Vec<u8>> {
    let enc_key_arr: [u8; 16] = enc_key.try_into().map_err(|_| {
        Error::Other(format!(
            "Invalid encryption key length: expected 16, got {}",
            enc_key.len()
        ))
    })?;
    let iv_arr: [u8; 16] = iv.try_into().map_err(|_| {
        Error::Other(format!("Invalid IV length: expected 16, got {}", iv.len()))
    })?;

    let mut buffer = encrypted_key.to_vec();
    let decrypted = Aes128CbcDec::new(&enc_key_arr.into(), &iv_arr.into())
        .decrypt_padded_mut::<aes::cipher::block_padding::Pkcs7>(&mut buffer)
        .map_err(|e| Error::Other(format!("Failed to decrypt key: {}", e)))?;

    Ok(decrypted.to_vec())
}
