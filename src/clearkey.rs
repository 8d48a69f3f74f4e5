//! W3C ClearKey wire formats.
//!
//! Resolved keys are handed to the platform's ClearKey implementation as a
//! `keyids` init data document plus a JWK-set license. Both use base64url
//! without padding for key material.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::utils::{b64_encode, b64url_decode, b64url_encode};

/// Key system string of ClearKey.
pub const KEY_SYSTEM: &str = "org.w3.clearkey";

/// `keyids` init data: `{"kids":[...],"type":"temporary"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIdsInitData {
    pub kids: Vec<String>,
    #[serde(rename = "type", default = "temporary")]
    pub session_type: String,
}

/// One JWK in a ClearKey license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default = "oct")]
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    pub k: String,
    pub kid: String,
}

/// A ClearKey license: `{"keys":[JWK...],"type":"temporary"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub keys: Vec<Jwk>,
    #[serde(rename = "type", default = "temporary")]
    pub session_type: String,
}

fn temporary() -> String {
    "temporary".to_string()
}

fn oct() -> String {
    "oct".to_string()
}

/// Build the `keyids` init data document for a set of keys.
pub fn init_data(keys: &[ContentKey]) -> Result<Vec<u8>> {
    let doc = KeyIdsInitData {
        kids: keys
            .iter()
            .map(|key| Ok(b64url_encode(key.kid_bytes()?)))
            .collect::<Result<Vec<_>>>()?,
        session_type: temporary(),
    };
    Ok(serde_json::to_vec(&doc)?)
}

/// Build the ClearKey license JSON for a set of keys.
pub fn license(keys: &[ContentKey]) -> Result<String> {
    let doc = License {
        keys: keys
            .iter()
            .map(|key| {
                Ok(Jwk {
                    kty: oct(),
                    alg: Some("A128KW".to_string()),
                    k: b64url_encode(key.k_bytes()?),
                    kid: b64url_encode(key.kid_bytes()?),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        session_type: temporary(),
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decode a ClearKey license back into hex keys.
///
/// Accepts padded and unpadded base64url as well as standard base64, the
/// way pages tend to produce it.
pub fn parse_license(license: &[u8]) -> Result<Vec<ContentKey>> {
    let doc: License = serde_json::from_slice(license)?;
    if doc.keys.is_empty() {
        return Err(Error::NoKeys("ClearKey license contains no keys".to_string()));
    }
    doc.keys
        .iter()
        .map(|jwk| {
            Ok(ContentKey::from_bytes(
                &decode_b64url_lenient(&jwk.kid)?,
                &decode_b64url_lenient(&jwk.k)?,
            ))
        })
        .collect()
}

/// Content identifier recorded for a ClearKey exchange: base64 of
/// `{"kids":[...]}` listing the license's key ids in base64url.
pub fn content_id(keys: &[ContentKey]) -> Result<String> {
    let kids = keys
        .iter()
        .map(|key| Ok(b64url_encode(key.kid_bytes()?)))
        .collect::<Result<Vec<_>>>()?;
    let json = serde_json::json!({ "kids": kids });
    Ok(b64_encode(serde_json::to_vec(&json)?))
}

fn decode_b64url_lenient(value: &str) -> Result<Vec<u8>> {
    b64url_decode(&value.replace('+', "-").replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ContentKey> {
        vec![ContentKey::from_hex(
            "9eb4050de44b4802932e27d75083e266",
            "166634c675823c235a4a9446fad52e4d",
        )
        .unwrap()]
    }

    #[test]
    fn license_decodes_to_the_same_key() {
        let keys = sample();
        let json = license(&keys).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "temporary");
        assert_eq!(value["keys"][0]["kty"], "oct");
        assert_eq!(value["keys"][0]["alg"], "A128KW");
        assert_eq!(value["keys"][0]["kid"], "nrQFDeRLSAKTLifXUIPiZg");

        let parsed = parse_license(json.as_bytes()).unwrap();
        assert_eq!(parsed, keys);
    }

    #[test]
    fn init_data_lists_kids() {
        let data = init_data(&sample()).unwrap();
        assert_eq!(
            String::from_utf8(data).unwrap(),
            r#"{"kids":["nrQFDeRLSAKTLifXUIPiZg"],"type":"temporary"}"#
        );
    }

    #[test]
    fn parse_accepts_padded_and_standard_base64() {
        let json = r#"{"keys":[{"kty":"oct","k":"FmY0xnWCPCNaSpRG+tUuTQ==","kid":"nrQFDeRLSAKTLifXUIPiZg=="}]}"#;
        let parsed = parse_license(json.as_bytes()).unwrap();
        assert_eq!(parsed, sample());

        assert!(matches!(
            parse_license(br#"{"keys":[]}"#),
            Err(Error::NoKeys(_))
        ));
        assert!(parse_license(b"not json").is_err());
    }

    #[test]
    fn content_id_is_base64_json() {
        let id = content_id(&sample()).unwrap();
        let decoded = crate::utils::b64_decode(&id).unwrap();
        assert_eq!(decoded, br#"{"kids":["nrQFDeRLSAKTLifXUIPiZg"]}"#);
    }
}
