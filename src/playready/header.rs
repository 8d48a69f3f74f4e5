//! WRM header and `PlayReadyKeyMessage` helpers.
//!
//! PlayReady init data is a UTF-16LE blob (a PlayReady Object or the bare
//! header) with the `<WRMHEADER>` element somewhere inside. The element is
//! located with a regex rather than an XML parser, because init data seen in
//! the wild is not always well formed and strict parsing can drop end tags.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::utils::{b64_decode, b64_encode, utf16le_decode, utf16le_encode};

static WRM_HEADER_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<WRMHEADER.*?WRMHEADER>"));
static KID_VALUE_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"<KID\b[^>]*\bVALUE="([^"]+)""#));
static KID_TEXT_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<KID>\s*([A-Za-z0-9+/=]+)\s*</KID>"));
static CHALLENGE_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"<Challenge encoding="base64encoded">([^<]*)</Challenge>"#));

fn regex(re: &'static LazyLock<std::result::Result<Regex, regex::Error>>) -> Result<&'static Regex> {
    re.as_ref().map_err(|e| Error::Regex(e.clone()))
}

/// Client version reported in license challenges.
pub const CLIENT_VERSION: &str = "10.0.16384.10011";

/// Decode UTF-16LE init data and return the first `<WRMHEADER>...</WRMHEADER>` element.
pub fn extract_wrm_header(init_data: &[u8]) -> Result<String> {
    if init_data.is_empty() {
        return Err(Error::InvalidInitData("No PSSH data in challenge".to_string()));
    }
    extract_wrm_header_str(&utf16le_decode(init_data))
        .ok_or_else(|| Error::InvalidInitData("No WRMHEADER found in init data".to_string()))
}

/// Same as [`extract_wrm_header`], over already decoded text.
pub fn extract_wrm_header_str(text: &str) -> Option<String> {
    regex(&WRM_HEADER_RE)
        .ok()?
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Key ids listed in a WRM header, in the little-endian GUID layout PlayReady uses.
///
/// Covers both the v4.0 `<KID>base64</KID>` form and the v4.1+
/// `<KID VALUE="base64"/>` attribute form.
pub fn wrm_header_kids(header: &str) -> Result<Vec<[u8; 16]>> {
    let mut kids = Vec::new();
    let values = regex(&KID_VALUE_RE)?
        .captures_iter(header)
        .chain(regex(&KID_TEXT_RE)?.captures_iter(header));

    for caps in values {
        let raw = b64_decode(&caps[1])?;
        let kid: [u8; 16] = raw.as_slice().try_into().map_err(|_| {
            Error::InvalidInitData(format!("KID must be 16 bytes, got {}", raw.len()))
        })?;
        if !kids.contains(&kid) {
            kids.push(kid);
        }
    }
    Ok(kids)
}

/// Wrap a base64 SOAP challenge into the UTF-16LE `PlayReadyKeyMessage`
/// envelope a browser CDM would emit, returned as base64.
pub fn build_key_message(challenge_b64: &str) -> String {
    let xml = format!(
        concat!(
            r#"<PlayReadyKeyMessage type="LicenseAcquisition">"#,
            r#"<LicenseAcquisition Version="1">"#,
            r#"<Challenge encoding="base64encoded">{}</Challenge>"#,
            r#"<HttpHeaders>"#,
            r#"<HttpHeader><name>Content-Type</name><value>text/xml; charset=utf-8</value></HttpHeader>"#,
            r#"<HttpHeader><name>SOAPAction</name><value>"http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense"</value></HttpHeader>"#,
            r#"</HttpHeaders>"#,
            r#"</LicenseAcquisition>"#,
            r#"</PlayReadyKeyMessage>"#,
        ),
        challenge_b64
    );
    b64_encode(utf16le_encode(&xml))
}

/// [`build_key_message`] for a challenge still in XML form.
pub fn wrap_challenge_xml(challenge_xml: &str) -> String {
    build_key_message(&b64_encode(challenge_xml))
}

/// Recover the SOAP challenge XML from a base64 key message.
///
/// Used when forwarding a challenge to a license server directly.
pub fn challenge_from_key_message(key_message_b64: &str) -> Result<String> {
    let text = utf16le_decode(&b64_decode(key_message_b64)?);
    let caps = regex(&CHALLENGE_RE)?
        .captures(&text)
        .ok_or_else(|| Error::PlayReady("Key message carries no challenge".to_string()))?;
    let challenge = b64_decode(&caps[1])?;
    String::from_utf8(challenge)
        .map_err(|e| Error::PlayReady(format!("Challenge is not UTF-8: {}", e)))
}
