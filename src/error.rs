//! Error types for emebridge.

use thiserror::Error;

/// Main error type for emebridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Too many CDM sessions are open.
    #[error("Too many sessions open (max {max})")]
    TooManySessions { max: usize },

    /// No CDM session is open with the specified identifier.
    #[error("Session identifier {0:?} is invalid")]
    InvalidSession(Vec<u8>),

    /// The init data (PSSH, WRM header, key ids) is invalid or empty.
    #[error("Invalid init data: {0}")]
    InvalidInitData(String),

    /// The init data type is neither `cenc` nor `webm`, or not allowed for the key system.
    #[error("Unsupported init data type: {0}")]
    UnsupportedInitDataType(String),

    /// The License Type is an invalid value.
    #[error("Invalid license type: {0}")]
    InvalidLicenseType(String),

    /// The License Message is invalid or missing.
    #[error("Invalid license message: {0}")]
    InvalidLicenseMessage(String),

    /// The Context is invalid or missing.
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// The Signature did not match.
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// A PlayReady device, challenge or XMR license could not be processed.
    #[error("PlayReady error: {0}")]
    PlayReady(String),

    /// The profile names no usable device or remote for the requested DRM family.
    #[error("No device handler was selected")]
    NoDeviceSelected,

    /// The selected credential or handler name does not exist.
    #[error("Unknown handler: {0}")]
    NoHandler(String),

    /// No pending session is registered under the license's correlation id.
    #[error("No saved device handler found for session {0}")]
    NoSession(String),

    /// The exchange succeeded but yielded zero content keys.
    #[error("{0}")]
    NoKeys(String),

    /// Remote CDM API failure, already formatted for display.
    #[error("Remote: {0}")]
    Remote(String),

    /// Declarative (custom) handler failure.
    #[error("{0}")]
    Declarative(String),

    /// The key system or configuration is refused by the active profile.
    #[error("Unsupported keySystem or supportedConfigurations.")]
    NotSupported,

    /// An operation was invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The message bus or its peer has gone away.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Failed to decode data.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Invalid WVD file.
    #[error("Invalid WVD file: {0}")]
    InvalidWvdFile(String),

    /// Invalid PRD file.
    #[error("Invalid PRD file: {0}")]
    InvalidPrdFile(String),

    /// Failed to parse protobuf message.
    #[error("Protobuf decode error: {0}")]
    ProtobufDecodeError(#[from] prost::DecodeError),

    /// RSA error.
    #[error("RSA error: {0}")]
    RsaError(#[from] rsa::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// Hex decode error.
    #[error("Hex decode error: {0}")]
    HexDecodeError(#[from] hex::FromHexError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid regular expression in a key parse rule.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for emebridge operations.
pub type Result<T> = std::result::Result<T, Error>;
