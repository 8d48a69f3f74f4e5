//! Widevine license protocol messages.
//!
//! Hand-maintained prost definitions covering the subset of
//! `license_protocol.proto` (proto2) that the license exchange touches.
//! Field tags follow the upstream schema so the wire format is identical.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseIdentification {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub request_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub session_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub purchase_id: Option<Vec<u8>>,
    #[prost(enumeration = "LicenseType", optional, tag = "4")]
    pub r#type: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub version: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub provider_session_token: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct License {
    #[prost(message, optional, tag = "1")]
    pub id: Option<LicenseIdentification>,
    #[prost(message, repeated, tag = "3")]
    pub key: Vec<license::KeyContainer>,
    #[prost(int64, optional, tag = "4")]
    pub license_start_time: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub provider_client_token: Option<Vec<u8>>,
    #[prost(enumeration = "ProtocolVersion", optional, tag = "10")]
    pub protocol_version: Option<i32>,
}

/// Nested message and enum types in `License`.
pub mod license {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct KeyContainer {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub id: Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub iv: Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub key: Option<Vec<u8>>,
        #[prost(enumeration = "key_container::KeyType", optional, tag = "4")]
        pub r#type: Option<i32>,
        #[prost(enumeration = "key_container::SecurityLevel", optional, tag = "5")]
        pub level: Option<i32>,
        #[prost(message, optional, tag = "9")]
        pub operator_session_key_permissions:
            Option<key_container::OperatorSessionKeyPermissions>,
        #[prost(string, optional, tag = "12")]
        pub track_label: Option<String>,
    }

    /// Nested message and enum types in `KeyContainer`.
    pub mod key_container {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct OperatorSessionKeyPermissions {
            #[prost(bool, optional, tag = "1")]
            pub allow_encrypt: Option<bool>,
            #[prost(bool, optional, tag = "2")]
            pub allow_decrypt: Option<bool>,
            #[prost(bool, optional, tag = "3")]
            pub allow_sign: Option<bool>,
            #[prost(bool, optional, tag = "4")]
            pub allow_signature_verify: Option<bool>,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum KeyType {
            Signing = 1,
            Content = 2,
            KeyControl = 3,
            OperatorSession = 4,
            Entitlement = 5,
            OemContent = 6,
        }

        impl KeyType {
            /// String value of the enum field name used in the proto definition.
            pub fn as_str_name(&self) -> &'static str {
                match self {
                    KeyType::Signing => "SIGNING",
                    KeyType::Content => "CONTENT",
                    KeyType::KeyControl => "KEY_CONTROL",
                    KeyType::OperatorSession => "OPERATOR_SESSION",
                    KeyType::Entitlement => "ENTITLEMENT",
                    KeyType::OemContent => "OEM_CONTENT",
                }
            }

            /// Creates an enum from field names used in the proto definition.
            pub fn from_str_name(value: &str) -> Option<Self> {
                match value {
                    "SIGNING" => Some(Self::Signing),
                    "CONTENT" => Some(Self::Content),
                    "KEY_CONTROL" => Some(Self::KeyControl),
                    "OPERATOR_SESSION" => Some(Self::OperatorSession),
                    "ENTITLEMENT" => Some(Self::Entitlement),
                    "OEM_CONTENT" => Some(Self::OemContent),
                    _ => None,
                }
            }
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum SecurityLevel {
            SwSecureCrypto = 1,
            SwSecureDecode = 2,
            HwSecureCrypto = 3,
            HwSecureDecode = 4,
            HwSecureAll = 5,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseRequest {
    #[prost(message, optional, tag = "1")]
    pub client_id: Option<ClientIdentification>,
    #[prost(message, optional, tag = "2")]
    pub content_id: Option<license_request::ContentIdentification>,
    #[prost(enumeration = "license_request::RequestType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub request_time: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub key_control_nonce_deprecated: Option<Vec<u8>>,
    #[prost(enumeration = "ProtocolVersion", optional, tag = "6")]
    pub protocol_version: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub key_control_nonce: Option<u32>,
    #[prost(message, optional, tag = "8")]
    pub encrypted_client_id: Option<EncryptedClientIdentification>,
}

/// Nested message and enum types in `LicenseRequest`.
pub mod license_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContentIdentification {
        #[prost(oneof = "content_identification::ContentIdVariant", tags = "1, 2, 3, 4")]
        pub content_id_variant: Option<content_identification::ContentIdVariant>,
    }

    /// Nested message and enum types in `ContentIdentification`.
    pub mod content_identification {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WidevinePsshData {
            #[prost(bytes = "vec", repeated, tag = "1")]
            pub pssh_data: Vec<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "2")]
            pub license_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "3")]
            pub request_id: Option<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WebmKeyId {
            #[prost(bytes = "vec", optional, tag = "1")]
            pub header: Option<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "2")]
            pub license_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "3")]
            pub request_id: Option<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ExistingLicense {
            #[prost(message, optional, tag = "1")]
            pub license_id: Option<super::super::LicenseIdentification>,
            #[prost(int64, optional, tag = "2")]
            pub seconds_since_started: Option<i64>,
            #[prost(int64, optional, tag = "3")]
            pub seconds_since_last_played: Option<i64>,
            #[prost(bytes = "vec", optional, tag = "4")]
            pub session_usage_table_entry: Option<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InitData {
            #[prost(enumeration = "init_data::InitDataType", optional, tag = "1")]
            pub init_data_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "2")]
            pub init_data: Option<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "3")]
            pub license_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "4")]
            pub request_id: Option<Vec<u8>>,
        }

        /// Nested message and enum types in `InitData`.
        pub mod init_data {
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
            #[repr(i32)]
            pub enum InitDataType {
                Cenc = 1,
                Webm = 2,
            }
        }

        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum ContentIdVariant {
            #[prost(message, tag = "1")]
            WidevinePsshData(WidevinePsshData),
            #[prost(message, tag = "2")]
            WebmKeyId(WebmKeyId),
            #[prost(message, tag = "3")]
            ExistingLicense(ExistingLicense),
            #[prost(message, tag = "4")]
            InitData(InitData),
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum RequestType {
        New = 1,
        Renewal = 2,
        Release = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedMessage {
    #[prost(enumeration = "signed_message::MessageType", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub msg: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub session_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub remote_attestation: Option<Vec<u8>>,
    #[prost(enumeration = "signed_message::SessionKeyType", optional, tag = "8")]
    pub session_key_type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub oemcrypto_core_message: Option<Vec<u8>>,
}

/// Nested message and enum types in `SignedMessage`.
pub mod signed_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MessageType {
        LicenseRequest = 1,
        License = 2,
        ErrorResponse = 3,
        ServiceCertificateRequest = 4,
        ServiceCertificate = 5,
        SubLicense = 6,
        CasLicenseRequest = 7,
        CasLicense = 8,
        ExternalLicenseRequest = 9,
        ExternalLicense = 10,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum SessionKeyType {
        Undefined = 0,
        WrappedAesKey = 1,
        EphermeralEcdhPublicKey = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientIdentification {
    #[prost(enumeration = "client_identification::TokenType", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub token: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub client_info: Vec<client_identification::NameValue>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub provider_client_token: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub license_counter: Option<u32>,
    #[prost(message, optional, tag = "6")]
    pub client_capabilities: Option<client_identification::ClientCapabilities>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub vmp_data: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "8")]
    pub device_credentials: Vec<client_identification::ClientCredentials>,
}

/// Nested message and enum types in `ClientIdentification`.
pub mod client_identification {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NameValue {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub value: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientCapabilities {
        #[prost(bool, optional, tag = "1")]
        pub client_token: Option<bool>,
        #[prost(bool, optional, tag = "2")]
        pub session_token: Option<bool>,
        #[prost(bool, optional, tag = "3")]
        pub video_resolution_constraints: Option<bool>,
        #[prost(enumeration = "client_capabilities::HdcpVersion", optional, tag = "4")]
        pub max_hdcp_version: Option<i32>,
        #[prost(uint32, optional, tag = "5")]
        pub oem_crypto_api_version: Option<u32>,
        #[prost(bool, optional, tag = "6")]
        pub anti_rollback_usage_table: Option<bool>,
        #[prost(uint32, optional, tag = "7")]
        pub srm_version: Option<u32>,
        #[prost(bool, optional, tag = "8")]
        pub can_update_srm: Option<bool>,
        #[prost(enumeration = "client_capabilities::CertificateKeyType", repeated, packed = "false", tag = "9")]
        pub supported_certificate_key_type: Vec<i32>,
        #[prost(enumeration = "client_capabilities::AnalogOutputCapabilities", optional, tag = "10")]
        pub analog_output_capabilities: Option<i32>,
        #[prost(bool, optional, tag = "11")]
        pub can_disable_analog_output: Option<bool>,
        #[prost(uint32, optional, tag = "12")]
        pub resource_rating_tier: Option<u32>,
    }

    /// Nested message and enum types in `ClientCapabilities`.
    pub mod client_capabilities {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum HdcpVersion {
            HdcpNone = 0,
            HdcpV1 = 1,
            HdcpV2 = 2,
            HdcpV21 = 3,
            HdcpV22 = 4,
            HdcpV23 = 5,
            HdcpNoDigitalOutput = 255,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum CertificateKeyType {
            Rsa2048 = 0,
            Rsa3072 = 1,
            EccSecp256r1 = 2,
            EccSecp384r1 = 3,
            EccSecp521r1 = 4,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum AnalogOutputCapabilities {
            AnalogOutputUnknown = 0,
            AnalogOutputNone = 1,
            AnalogOutputSupported = 2,
            AnalogOutputSupportsCgmsA = 3,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientCredentials {
        #[prost(enumeration = "TokenType", optional, tag = "1")]
        pub r#type: Option<i32>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub token: Option<Vec<u8>>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum TokenType {
        Keybox = 0,
        DrmDeviceCertificate = 1,
        RemoteAttestationCertificate = 2,
        OemDeviceCertificate = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EncryptedClientIdentification {
    #[prost(string, optional, tag = "1")]
    pub provider_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub service_certificate_serial_number: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub encrypted_client_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub encrypted_client_id_iv: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub encrypted_privacy_key: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DrmCertificate {
    #[prost(enumeration = "drm_certificate::Type", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub serial_number: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub creation_time_seconds: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub public_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub system_id: Option<u32>,
    #[prost(string, optional, tag = "7")]
    pub provider_id: Option<String>,
}

/// Nested message and enum types in `DrmCertificate`.
pub mod drm_certificate {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Root = 0,
        DeviceModel = 1,
        Device = 2,
        Service = 3,
        Provisioner = 4,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedDrmCertificate {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub drm_certificate: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
    #[prost(message, optional, boxed, tag = "3")]
    pub signer: Option<Box<SignedDrmCertificate>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WidevinePsshData {
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_ids: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub provider: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub track_type: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub policy: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub crypto_period_index: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub grouped_license: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "9")]
    pub protection_scheme: Option<u32>,
    #[prost(uint32, optional, tag = "10")]
    pub crypto_period_seconds: Option<u32>,
    #[prost(enumeration = "widevine_pssh_data::Type", optional, tag = "11")]
    pub r#type: Option<i32>,
    #[prost(uint32, optional, tag = "12")]
    pub key_sequence: Option<u32>,
}

/// Nested message and enum types in `WidevinePsshData`.
pub mod widevine_pssh_data {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Single = 0,
        Entitlement = 1,
        EntitledKey = 2,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LicenseType {
    Streaming = 1,
    Offline = 2,
    Automatic = 3,
}

impl LicenseType {
    /// String value of the enum field name used in the proto definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            LicenseType::Streaming => "STREAMING",
            LicenseType::Offline => "OFFLINE",
            LicenseType::Automatic => "AUTOMATIC",
        }
    }

    /// Creates an enum from field names used in the proto definition.
    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "STREAMING" => Some(Self::Streaming),
            "OFFLINE" => Some(Self::Offline),
            "AUTOMATIC" => Some(Self::Automatic),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Version20 = 20,
    Version21 = 21,
    Version22 = 22,
}
