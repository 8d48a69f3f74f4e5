//! PSSH parsing and init-data helpers.
//!
//! Besides single-box parsing this module knows how to pull the Widevine box
//! out of a concatenation of PSSH boxes (as delivered by `encrypted` events
//! carrying both Widevine and PlayReady data), how to tell WebM key ids apart
//! from ISO-BMFF boxes, and how to flip GUID byte order between PlayReady's
//! little-endian layout and the big-endian layout used everywhere else.
use std::str::FromStr;

use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use prost::Message;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::license_protocol::WidevinePsshData;

/// Known DRM system IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemId {
    Widevine,
    PlayReady,
}

impl SystemId {
    pub fn to_uuid(self) -> Uuid {
        match self {
            SystemId::Widevine => Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed),
            SystemId::PlayReady => Uuid::from_u128(0x9a04f07998404286ab92e65be0885f95),
        }
    }
}

/// Parsed PSSH box or DRM init data wrapper.
#[derive(Debug, Clone)]
pub struct Pssh {
    pub version: u8,
    pub flags: u32,
    pub system_id: Uuid,
    key_ids: Vec<Uuid>,
    pub init_data: Vec<u8>,
}

impl Pssh {
    /// Parse from bytes in lenient mode (strict = false).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::parse_bytes(data, false)
    }

    /// Parse from base64 in lenient mode (strict = false).
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        Self::parse_base64(data_b64, false)
    }

    /// Parse a PSSH box or init data from raw bytes.
    ///
    /// Strict mode supports:
    /// - Full PSSH boxes.
    /// - Widevine CencHeader (WidevinePsshData).
    /// - PlayReady headers (detected by UTF-16 `</WRMHEADER>`).
    ///
    /// Lenient mode (strict = false) wraps unknown input as a v0 Widevine PSSH
    /// with init_data set to the provided bytes.
    pub fn parse_bytes(data: &[u8], strict: bool) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidInitData("Data must not be empty".to_string()));
        }

        if let Ok(pssh) = parse_pssh_box(data) {
            return Ok(pssh);
        }

        if let Ok(pssh) = parse_widevine_pssh_data(data) {
            return Ok(pssh);
        }

        if contains_playready_header(data) {
            return Pssh::new(SystemId::PlayReady.to_uuid(), None, Some(data.to_vec()), 0, 0);
        }

        if strict {
            return Err(Error::InvalidInitData(
                "Could not parse data as PSSH or Widevine PSSH Data".to_string(),
            ));
        }

        Pssh::new(SystemId::Widevine.to_uuid(), None, Some(data.to_vec()), 0, 0)
    }

    /// Parse a PSSH box or init data from base64.
    ///
    /// See [`Pssh::parse_bytes`] for strict/lenient behavior.
    pub fn parse_base64(data_b64: &str, strict: bool) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(data_b64.trim())
            .map_err(Error::Base64DecodeError)?;
        Self::parse_bytes(&data, strict)
    }

    /// Create a new PSSH box wrapper.
    ///
    /// Version 0 uses only init_data. Version 1 requires init_data or key_ids.
    pub fn new(
        system_id: Uuid,
        key_ids: Option<Vec<Uuid>>,
        init_data: Option<Vec<u8>>,
        version: u8,
        flags: u32,
    ) -> Result<Self> {
        if version != 0 && version != 1 {
            return Err(Error::InvalidInitData(format!(
                "Invalid version: {}",
                version
            )));
        }

        if version == 0 && key_ids.is_some() && init_data.is_some() {
            return Err(Error::InvalidInitData(
                "Version 0 PSSH boxes must use only init_data".to_string(),
            ));
        }

        if version == 1 && key_ids.is_none() && init_data.is_none() {
            return Err(Error::InvalidInitData(
                "Version 1 PSSH boxes must use init_data or key_ids".to_string(),
            ));
        }

        Ok(Self {
            version,
            flags,
            system_id,
            key_ids: key_ids.unwrap_or_default(),
            init_data: init_data.unwrap_or_default(),
        })
    }

    /// Serialize as a full PSSH box.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_pssh_box(self)
    }

    /// Extract KIDs from box/init data where possible.
    ///
    /// Supports:
    /// - v1 PSSH boxes (key_IDs field).
    /// - Widevine CencHeader (WidevinePsshData).
    /// - PlayReady objects and bare WRM headers (KIDs returned big-endian).
    pub fn key_ids(&self) -> Result<Vec<Uuid>> {
        if self.version == 1 && !self.key_ids.is_empty() {
            return Ok(self.key_ids.clone());
        }

        if self.system_id == SystemId::Widevine.to_uuid() {
            let pssh_data = WidevinePsshData::decode(self.init_data.as_slice())
                .map_err(|e| Error::DecodeError(format!("Failed to parse WidevinePsshData: {}", e)))?;
            return Ok(pssh_data.key_ids.iter().map(|id| parse_key_id_bytes(id)).collect());
        }

        if self.system_id == SystemId::PlayReady.to_uuid() {
            return parse_playready_key_ids(&self.init_data);
        }

        Err(Error::InvalidInitData(
            "Unsupported system ID for key_ids".to_string(),
        ))
    }
}

impl FromStr for Pssh {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pssh::parse_base64(s, false)
    }
}

/// Returns true when `data` starts with an ISO-BMFF `pssh` box header.
///
/// Widevine init data that fails this check is treated as a WebM key id.
#[must_use]
pub fn is_pssh_box(data: &[u8]) -> bool {
    data.len() >= 8 && &data[4..8] == b"pssh"
}

/// Pick the Widevine box out of concatenated PSSH boxes.
///
/// Walks the buffer box by box and returns the first `pssh` box whose system
/// id is Widevine's. Anything else (a single box, WebM key ids, truncated
/// input) is returned unchanged, so the operation is idempotent.
#[must_use]
pub fn extract_widevine_pssh(data: &[u8]) -> Vec<u8> {
    let widevine = SystemId::Widevine.to_uuid();
    let mut offset = 0usize;

    while offset + 8 <= data.len() {
        let size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        if size == 0 || offset + size > data.len() {
            break;
        }
        let pssh_box = &data[offset..offset + size];
        if pssh_box.len() >= 28
            && &pssh_box[4..8] == b"pssh"
            && &pssh_box[12..28] == widevine.as_bytes()
        {
            return pssh_box.to_vec();
        }
        offset += size;
    }

    data.to_vec()
}

/// Base64 form of [`extract_widevine_pssh`]. Undecodable input is returned as-is.
#[must_use]
pub fn extract_widevine_pssh_b64(data_b64: &str) -> String {
    match base64::engine::general_purpose::STANDARD.decode(data_b64) {
        Ok(bytes) => {
            let extracted = extract_widevine_pssh(&bytes);
            if extracted == bytes {
                data_b64.to_string()
            } else {
                base64::engine::general_purpose::STANDARD.encode(extracted)
            }
        }
        Err(_) => data_b64.to_string(),
    }
}

/// Swap a 16-byte GUID between little-endian (PlayReady) and big-endian layout.
///
/// The first three groups (4, 2 and 2 bytes) are byte-reversed; the trailing
/// 8 bytes are kept. Applying it twice yields the input.
#[must_use]
pub fn flip_uuid_byte_order(guid: &[u8; 16]) -> [u8; 16] {
    let mut out = *guid;
    out[..4].reverse();
    out[4..6].reverse();
    out[6..8].reverse();
    out
}

/// Hex variant of [`flip_uuid_byte_order`].
pub fn flip_kid_hex(kid_hex: &str) -> Result<String> {
    let bytes: [u8; 16] = hex::decode(kid_hex)?
        .try_into()
        .map_err(|_| Error::InvalidInitData(format!("Key id is not 16 bytes: {}", kid_hex)))?;
    Ok(hex::encode(flip_uuid_byte_order(&bytes)))
}

fn parse_pssh_box(data: &[u8]) -> Result<Pssh> {
    if data.len() < 8 {
        return Err(Error::InvalidInitData("Data too short".to_string()));
    }

    let mut offset = 0;
    let size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    let box_type = &data[offset..offset + 4];
    offset += 4;

    if box_type != b"pssh" {
        return Err(Error::InvalidInitData("Not a PSSH box".to_string()));
    }

    let mut actual_size = size;
    if size == 1 {
        if data.len() < 16 {
            return Err(Error::InvalidInitData("Data too short".to_string()));
        }
        actual_size = BigEndian::read_u64(&data[offset..offset + 8]) as usize;
        offset += 8;
    } else if size == 0 {
        actual_size = data.len();
    }

    if actual_size > data.len() {
        return Err(Error::InvalidInitData("PSSH size exceeds data length".to_string()));
    }

    if data.len() < offset + 4 + 16 {
        return Err(Error::InvalidInitData("PSSH header incomplete".to_string()));
    }

    let version = data[offset];
    let flags = ((data[offset + 1] as u32) << 16)
        | ((data[offset + 2] as u32) << 8)
        | (data[offset + 3] as u32);
    offset += 4;

    let system_id = Uuid::from_slice(&data[offset..offset + 16])
        .map_err(|_| Error::InvalidInitData("Invalid system ID".to_string()))?;
    offset += 16;

    let mut key_ids = Vec::new();
    if version == 1 {
        if data.len() < offset + 4 {
            return Err(Error::InvalidInitData("Missing KID count".to_string()));
        }
        let kid_count = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4;

        let required = offset + kid_count * 16;
        if data.len() < required {
            return Err(Error::InvalidInitData("Missing KIDs".to_string()));
        }
        for chunk in data[offset..required].chunks_exact(16) {
            key_ids.push(Uuid::from_slice(chunk).unwrap_or_else(|_| Uuid::nil()));
        }
        offset = required;
    }

    if data.len() < offset + 4 {
        return Err(Error::InvalidInitData("Missing init data length".to_string()));
    }
    let data_size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if data.len() < offset + data_size {
        return Err(Error::InvalidInitData("Missing init data".to_string()));
    }
    let init_data = data[offset..offset + data_size].to_vec();

    Ok(Pssh {
        version,
        flags,
        system_id,
        key_ids,
        init_data,
    })
}

fn build_pssh_box(pssh: &Pssh) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(pssh.version);
    body.extend_from_slice(&pssh.flags.to_be_bytes()[1..]);
    body.extend_from_slice(pssh.system_id.as_bytes());

    if pssh.version == 1 {
        body.extend_from_slice(&(pssh.key_ids.len() as u32).to_be_bytes());
        for kid in pssh.key_ids.iter() {
            body.extend_from_slice(kid.as_bytes());
        }
    }

    body.extend_from_slice(&(pssh.init_data.len() as u32).to_be_bytes());
    body.extend_from_slice(&pssh.init_data);

    let size = (body.len() + 8) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(b"pssh");
    out.extend_from_slice(&body);
    out
}

fn parse_widevine_pssh_data(data: &[u8]) -> Result<Pssh> {
    let pssh_data = WidevinePsshData::decode(data)
        .map_err(|e| Error::DecodeError(format!("Failed to parse WidevinePsshData: {}", e)))?;
    let encoded = pssh_data.encode_to_vec();
    if encoded != data {
        return Err(Error::InvalidInitData("Partial WidevinePsshData parse".to_string()));
    }

    Pssh::new(SystemId::Widevine.to_uuid(), None, Some(encoded), 0, 0)
}

fn contains_playready_header(data: &[u8]) -> bool {
    let marker = crate::utils::utf16le_encode("</WRMHEADER>");
    data.windows(marker.len()).any(|window| window == marker)
}

fn parse_key_id_bytes(key_id: &[u8]) -> Uuid {
    if key_id.len() == 16 {
        return Uuid::from_slice(key_id).unwrap_or_else(|_| Uuid::nil());
    }

    if key_id.len() == 32 {
        if let Ok(s) = std::str::from_utf8(key_id) {
            if let Ok(uuid) = Uuid::parse_str(s) {
                return uuid;
            }
        }
    }

    let mut buf = [0u8; 16];
    if key_id.len() >= 16 {
        buf.copy_from_slice(&key_id[key_id.len() - 16..]);
    } else {
        buf[16 - key_id.len()..].copy_from_slice(key_id);
    }
    Uuid::from_bytes(buf)
}

/// KIDs of a PlayReady Object, or of a bare UTF-16LE WRM header.
///
/// PlayReady stores KIDs little-endian; they are flipped to big-endian here.
fn parse_playready_key_ids(data: &[u8]) -> Result<Vec<Uuid>> {
    let xml = if data.len() >= 6 && LittleEndian::read_u32(&data[0..4]) as usize == data.len() {
        playready_object_header(data)?
    } else {
        crate::utils::utf16le_decode(data)
    };
    let header = crate::playready::header::extract_wrm_header_str(&xml)
        .ok_or_else(|| Error::InvalidInitData("No WRMHEADER found".to_string()))?;
    let kids = crate::playready::header::wrm_header_kids(&header)?;
    if kids.is_empty() {
        return Err(Error::InvalidInitData("No PlayReady KIDs found".to_string()));
    }
    Ok(kids
        .into_iter()
        .map(|kid| Uuid::from_bytes(flip_uuid_byte_order(&kid)))
        .collect())
}

fn playready_object_header(data: &[u8]) -> Result<String> {
    let record_count = LittleEndian::read_u16(&data[4..6]) as usize;
    let mut offset = 6;

    for _ in 0..record_count {
        if data.len() < offset + 4 {
            return Err(Error::InvalidInitData("PlayReady record truncated".to_string()));
        }
        let record_type = LittleEndian::read_u16(&data[offset..offset + 2]);
        let record_length = LittleEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        offset += 4;

        if data.len() < offset + record_length {
            return Err(Error::InvalidInitData("PlayReady record truncated".to_string()));
        }
        let record_data = &data[offset..offset + record_length];
        offset += record_length;

        if record_type == 0x01 {
            return Ok(crate::utils::utf16le_decode(record_data));
        }
    }

    Err(Error::InvalidInitData(
        "Unsupported PlayReady object".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widevine_box(init: &[u8]) -> Vec<u8> {
        Pssh::new(SystemId::Widevine.to_uuid(), None, Some(init.to_vec()), 0, 0)
            .expect("create pssh")
            .to_bytes()
    }

    fn playready_box(init: &[u8]) -> Vec<u8> {
        Pssh::new(SystemId::PlayReady.to_uuid(), None, Some(init.to_vec()), 0, 0)
            .expect("create pssh")
            .to_bytes()
    }

    #[test]
    fn pssh_roundtrip_bytes_v0() {
        let init_data = b"example-init-data".to_vec();
        let bytes = widevine_box(&init_data);
        let parsed = Pssh::from_bytes(&bytes).expect("parse pssh");

        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.flags, 0);
        assert_eq!(parsed.system_id, SystemId::Widevine.to_uuid());
        assert_eq!(parsed.init_data, init_data);
    }

    #[test]
    fn pssh_key_ids_from_widevine_init_data() {
        let kid = Uuid::new_v4();
        let pssh_data = WidevinePsshData {
            key_ids: vec![kid.as_bytes().to_vec()],
            ..Default::default()
        };
        let bytes = widevine_box(&pssh_data.encode_to_vec());
        let ids = Pssh::from_bytes(&bytes).unwrap().key_ids().expect("key ids");
        assert_eq!(ids, vec![kid]);
    }

    #[test]
    fn pssh_key_ids_from_v1_box() {
        let kid = Uuid::new_v4();
        let pssh = Pssh::new(SystemId::Widevine.to_uuid(), Some(vec![kid]), None, 1, 0)
            .expect("create pssh");

        let parsed = Pssh::from_bytes(&pssh.to_bytes()).expect("parse pssh");
        assert_eq!(parsed.key_ids().expect("key ids"), vec![kid]);
    }

    #[test]
    fn pssh_empty_base64_is_error() {
        let err = Pssh::from_base64("").expect_err("empty input should fail");
        assert!(format!("{}", err).contains("empty"));
    }

    #[test]
    fn concatenated_boxes_yield_widevine_box() {
        let wv = widevine_box(b"widevine");
        let mut concat = playready_box(b"playready");
        concat.extend_from_slice(&wv);

        assert_eq!(extract_widevine_pssh(&concat), wv);
    }

    #[test]
    fn extraction_is_idempotent() {
        let wv = widevine_box(b"widevine");
        let mut concat = playready_box(b"playready");
        concat.extend_from_slice(&wv);

        let once = extract_widevine_pssh(&concat);
        assert_eq!(extract_widevine_pssh(&once), once);

        // No Widevine box and malformed sizes fall back to the input.
        let pr = playready_box(b"pr-only");
        assert_eq!(extract_widevine_pssh(&pr), pr);
        let truncated = &concat[..concat.len() - 3];
        assert_eq!(extract_widevine_pssh(truncated), truncated.to_vec());
        let zero = [0u8; 12];
        assert_eq!(extract_widevine_pssh(&zero), zero.to_vec());
    }

    #[test]
    fn extraction_b64_passes_through_undecodable_input() {
        assert_eq!(extract_widevine_pssh_b64("not base64!"), "not base64!");
        let wv = base64::engine::general_purpose::STANDARD.encode(widevine_box(b"x"));
        assert_eq!(extract_widevine_pssh_b64(&wv), wv);
    }

    #[test]
    fn webm_key_ids_are_not_boxes() {
        let kid = hex::decode("9eb4050de44b4802932e27d75083e266").unwrap();
        assert!(!is_pssh_box(&kid));
        assert!(is_pssh_box(&widevine_box(b"x")));
    }

    #[test]
    fn flip_is_an_involution() {
        let guid: [u8; 16] = core::array::from_fn(|i| i as u8);
        let flipped = flip_uuid_byte_order(&guid);
        assert_eq!(flipped, [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(flip_uuid_byte_order(&flipped), guid);

        let kid = "9eb4050de44b4802932e27d75083e266";
        let once = flip_kid_hex(kid).unwrap();
        assert_eq!(once, "0d05b49e4be40248932e27d75083e266");
        assert_eq!(flip_kid_hex(&once).unwrap(), kid);
        assert!(flip_kid_hex("abcd").is_err());
    }

    #[test]
    fn playready_header_key_ids_are_flipped() {
        let kid_be: [u8; 16] = hex::decode("9eb4050de44b4802932e27d75083e266")
            .unwrap()
            .try_into()
            .unwrap();
        let xml = format!(
            r#"<WRMHEADER xmlns="http://schemas.microsoft.com/DRM/2007/03/PlayReadyHeader" version="4.0.0.0"><DATA><PROTECTINFO><KEYLEN>16</KEYLEN><ALGID>AESCTR</ALGID></PROTECTINFO><KID>{}</KID></DATA></WRMHEADER>"#,
            base64::engine::general_purpose::STANDARD.encode(flip_uuid_byte_order(&kid_be))
        );
        let pssh = playready_box(&crate::utils::utf16le_encode(&xml));
        let parsed = Pssh::from_bytes(&pssh).unwrap();
        assert_eq!(parsed.system_id, SystemId::PlayReady.to_uuid());
        assert_eq!(parsed.key_ids().unwrap(), vec![Uuid::from_bytes(kid_be)]);
    }
}
