//! PlayReady license challenge and response handling.
//!
//! The challenge is the SOAP `AcquireLicense` document: the `LA` body carries
//! the WRM header plus the device certificate chain, AES-CBC encrypted under
//! a key that is itself ElGamal-encrypted to the WMRM server key. `LA` is
//! bound by a SHA-256 digest inside `SignedInfo`, which is signed with the
//! device signing key.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};

use super::device::Device;
use super::ecc::{self, EccKey};
use super::xmr::{CipherType, XmrLicense};
use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::utils::{b64_encode, random_bytes, unix_now};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Public key of the Microsoft license server (`WMRMServer`), `x || y`.
const WMRM_SERVER_KEY: &str = concat!(
    "c8b6af16ee941aadaa5389b4af2c10e356be42af175ef3face93254e7b0b3d9b",
    "982b27b5cb2341326e56aa857dbfd5c634ce2cf9ea74fca8f2af5957efeea562"
);

const PROTOCOL_VERSION: u32 = 1;

/// A content key unwrapped from an XMR license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReadyKey {
    /// Key id exactly as carried in the license (little-endian GUID layout).
    pub key_id: [u8; 16],
    pub key_type: u16,
    pub key: Vec<u8>,
}

impl PlayReadyKey {
    pub fn to_content_key(&self) -> ContentKey {
        ContentKey::from_bytes(&self.key_id, &self.key)
    }
}

/// PlayReady CDM bound to one device identity.
#[derive(Debug, Clone)]
pub struct Cdm {
    encryption_key: EccKey,
    signing_key: EccKey,
    certificate_chain: Vec<u8>,
    client_version: String,
}

impl Cdm {
    pub fn from_device(device: &Device) -> Self {
        Self {
            encryption_key: device.encryption_key.clone(),
            signing_key: device.signing_key.clone(),
            certificate_chain: device.group_certificate.clone(),
            client_version: super::header::CLIENT_VERSION.to_string(),
        }
    }

    /// Build the SOAP license challenge for a WRM header.
    pub fn get_license_challenge(&self, wrm_header: &str, custom_data: Option<&str>) -> Result<String> {
        let server_key = ecc::public_key_from_bytes(&hex::decode(WMRM_SERVER_KEY)?)?;

        let carrier = ecc::random_point();
        let carrier_x = ecc::point_x(&carrier);
        let (aes_iv, aes_key) = carrier_x.split_at(16);
        let wmrm_cipher = ecc::elgamal_encrypt(&carrier, &server_key);

        let data = format!(
            concat!(
                "<Data>",
                "<CertificateChains><CertificateChain>{}</CertificateChain></CertificateChains>",
                r#"<Features><Feature Name="AESCBC">""</Feature><REE><AESCBCS></AESCBCS></REE></Features>"#,
                "</Data>"
            ),
            b64_encode(&self.certificate_chain)
        );
        let aes_key: [u8; 16] = aes_key
            .try_into()
            .map_err(|_| Error::PlayReady("Invalid AES key length".to_string()))?;
        let aes_iv: [u8; 16] = aes_iv
            .try_into()
            .map_err(|_| Error::PlayReady("Invalid AES IV length".to_string()))?;
        let mut cert_cipher = aes_iv.to_vec();
        cert_cipher.extend(
            Aes128CbcEnc::new(&aes_key.into(), &aes_iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(data.as_bytes()),
        );

        let la = self.build_la(wrm_header, custom_data, &wmrm_cipher, &cert_cipher);
        let signed_info = build_signed_info(&b64_encode(Sha256::digest(la.as_bytes())));
        let signature = self.signing_key.sign(signed_info.as_bytes());

        Ok(format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
                "<soap:Body>",
                r#"<AcquireLicense xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols">"#,
                "<challenge>",
                r#"<Challenge xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols/messages">"#,
                "{la}",
                r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
                "{signed_info}",
                "<SignatureValue>{signature}</SignatureValue>",
                r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
                "<KeyValue><ECCKeyValue><PublicKey>{public_key}</PublicKey></ECCKeyValue></KeyValue>",
                "</KeyInfo>",
                "</Signature>",
                "</Challenge>",
                "</challenge>",
                "</AcquireLicense>",
                "</soap:Body>",
                "</soap:Envelope>"
            ),
            la = la,
            signed_info = signed_info,
            signature = b64_encode(signature),
            public_key = b64_encode(self.signing_key.public_bytes()),
        ))
    }

    fn build_la(
        &self,
        wrm_header: &str,
        custom_data: Option<&str>,
        wmrm_cipher: &[u8],
        cert_cipher: &[u8],
    ) -> String {
        let custom_data = custom_data
            .filter(|data| !data.is_empty())
            .map(|data| format!("<CustomData>{}</CustomData>", data))
            .unwrap_or_default();
        format!(
            concat!(
                r#"<LA xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols" Id="SignedData" xml:space="preserve">"#,
                "<Version>{version}</Version>",
                "<ContentHeader>{header}</ContentHeader>",
                "<CLIENTINFO><CLIENTVERSION>{client_version}</CLIENTVERSION></CLIENTINFO>",
                "{custom_data}",
                "<LicenseNonce>{nonce}</LicenseNonce>",
                "<ClientTime>{time}</ClientTime>",
                r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element">"#,
                r#"<EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"></EncryptionMethod>"#,
                r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
                r#"<EncryptedKey xmlns="http://www.w3.org/2001/04/xmlenc#">"#,
                r#"<EncryptionMethod Algorithm="http://schemas.microsoft.com/DRM/2007/03/protocols#ecc256"></EncryptionMethod>"#,
                r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><KeyName>WMRMServer</KeyName></KeyInfo>"#,
                "<CipherData><CipherValue>{wmrm_cipher}</CipherValue></CipherData>",
                "</EncryptedKey>",
                "</KeyInfo>",
                "<CipherData><CipherValue>{cert_cipher}</CipherValue></CipherData>",
                "</EncryptedData>",
                "</LA>"
            ),
            version = PROTOCOL_VERSION,
            header = wrm_header,
            client_version = self.client_version,
            custom_data = custom_data,
            nonce = b64_encode(random_bytes(16)),
            time = unix_now(),
            wmrm_cipher = b64_encode(wmrm_cipher),
            cert_cipher = b64_encode(cert_cipher),
        )
    }

    /// Unwrap the content keys of every `<License>` in a license response.
    ///
    /// Only ECC-256 wrapped keys can be recovered; other cipher types are
    /// skipped. Each license's CMAC is checked with the integrity key that
    /// travels alongside its content key.
    pub fn parse_license(&self, license_xml: &str) -> Result<Vec<PlayReadyKey>> {
        let mut keys = Vec::new();
        for text in element_texts(license_xml, "License")? {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let license = XmrLicense::from_base64(text)?;
            for content_key in &license.content_keys {
                if content_key.cipher_type != CipherType::Ecc256 {
                    debug!("Skipping content key with cipher type {:?}", content_key.cipher_type);
                    continue;
                }
                let point = self.encryption_key.elgamal_decrypt(&content_key.encrypted_key)?;
                let material = ecc::point_x(&point);
                let (integrity_key, key) = material.split_at(16);
                license.check_signature(integrity_key)?;
                keys.push(PlayReadyKey {
                    key_id: content_key.key_id,
                    key_type: content_key.key_type,
                    key: key.to_vec(),
                });
            }
        }

        if keys.is_empty() {
            return Err(Error::NoKeys("No content keys in license response".to_string()));
        }
        Ok(keys)
    }
}

fn build_signed_info(digest_value: &str) -> String {
    format!(
        concat!(
            r#"<SignedInfo xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
            r#"<CanonicalizationMethod Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"></CanonicalizationMethod>"#,
            r#"<SignatureMethod Algorithm="http://schemas.microsoft.com/DRM/2007/03/protocols#ecdsa-sha256"></SignatureMethod>"#,
            r##"<Reference URI="#SignedData">"##,
            r#"<DigestMethod Algorithm="http://schemas.microsoft.com/DRM/2007/03/protocols#sha256"></DigestMethod>"#,
            "<DigestValue>{}</DigestValue>",
            "</Reference>",
            "</SignedInfo>"
        ),
        digest_value
    )
}

/// Text content of every element named `name`, namespace prefixes ignored.
fn element_texts(xml: &str, name: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut texts = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == name.as_bytes() => {
                current = Some(String::new());
            }
            Ok(Event::Text(t)) => {
                if let Some(buf) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::PlayReady(format!("Bad XML text: {}", e)))?;
                    buf.push_str(&text);
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == name.as_bytes() => {
                if let Some(text) = current.take() {
                    texts.push(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::PlayReady(format!(
                    "License response is not XML: {}",
                    e
                )))
            }
            _ => {}
        }
    }
    Ok(texts)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::playready::device::tests::test_device;
    use crate::playready::header::tests::WRM_HEADER;
    use crate::playready::xmr::tests::build_license;

    /// A license server response carrying one key for `device`.
    pub(crate) fn license_response(device: &Device, key_id: [u8; 16]) -> String {
        let point = ecc::random_point();
        let material = ecc::point_x(&point);
        let encrypted = ecc::elgamal_encrypt(&point, &device.encryption_key.public_key());
        let license = build_license(key_id, &encrypted, &material[..16]);
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>"#,
                r#"<AcquireLicenseResponse xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols">"#,
                "<AcquireLicenseResult><Response><LicenseResponse><Licenses>",
                "<License>{}</License>",
                "</Licenses></LicenseResponse></Response></AcquireLicenseResult>",
                "</AcquireLicenseResponse></soap:Body></soap:Envelope>"
            ),
            b64_encode(license)
        )
    }

    #[test]
    fn challenge_is_signed_soap() {
        let device = test_device(3);
        let cdm = Cdm::from_device(&device);
        let challenge = cdm.get_license_challenge(WRM_HEADER, None).unwrap();

        let text_of = |name: &str| element_texts(&challenge, name).unwrap().remove(0);
        assert_eq!(text_of("CLIENTVERSION"), "10.0.16384.10011");
        assert!(challenge.contains(&format!("<ContentHeader>{}</ContentHeader>", WRM_HEADER)));
        assert_eq!(
            text_of("PublicKey"),
            b64_encode(device.signing_key.public_bytes())
        );

        let la_start = challenge.find("<LA ").unwrap();
        let la_end = challenge.find("</LA>").unwrap() + "</LA>".len();
        let digest = b64_encode(Sha256::digest(&challenge.as_bytes()[la_start..la_end]));
        assert_eq!(text_of("DigestValue"), digest);
        assert!(!challenge.contains("<CustomData>"));
    }

    #[test]
    fn license_keys_are_unwrapped() {
        let device = test_device(2);
        let cdm = Cdm::from_device(&device);
        let kid = hex::decode("0d05b49e4be40248932e27d75083e266").unwrap().try_into().unwrap();
        let response = license_response(&device, kid);

        let keys = cdm.parse_license(&response).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, kid);
        assert_eq!(keys[0].key.len(), 16);
        assert_eq!(keys[0].to_content_key().kid, "0d05b49e4be40248932e27d75083e266");

        let other = Cdm::from_device(&test_device(2));
        assert!(other.parse_license(&response).is_err());
    }

    #[test]
    fn empty_license_response_fails() {
        let cdm = Cdm::from_device(&test_device(2));
        let err = cdm.parse_license("<Licenses></Licenses>").unwrap_err();
        assert!(matches!(err, Error::NoKeys(_)), "{}", err);
        assert!(cdm.parse_license("not xml").is_err());
    }
}
