//! Typed messages between the page side and the backend.
//!
//! Every request travels in an [`Envelope`] carrying a 7 hex character
//! request id and the [`Sender`] it came from; the reply is an optional
//! string echoed back under the same id. The in-process transport is a tokio
//! mpsc channel with a oneshot per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::logs::ManifestKind;
use crate::utils::random_hex;

/// Body of a REQUEST: what the page wants a challenge for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub key_system: String,
    pub session_id: String,
    pub init_data_type: String,
    /// Base64 init data.
    pub init_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<String>,
}

/// Body of a RESPONSE: the license the page received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRequestBody {
    pub key_system: String,
    pub session_id: String,
    /// Base64 license.
    pub license: String,
    #[serde(default)]
    pub persistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub key_system: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestReport {
    #[serde(rename = "type")]
    pub kind: ManifestKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// `None` for real ClearKey, which only needs accounting.
    Request(Option<ChallengeRequest>),
    Response(LicenseRequestBody),
    Load(LoadRequest),
    /// Page-side id of the persistent session to forget.
    Remove(String),
    Close,
    GetProfile,
    /// Active session count of a tab. Only answered for tab-less senders.
    GetActive(u64),
    Manifest(ManifestReport),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request(_) => "REQUEST",
            Self::Response(_) => "RESPONSE",
            Self::Load(_) => "LOAD",
            Self::Remove(_) => "REMOVE",
            Self::Close => "CLOSE",
            Self::GetProfile => "GET_PROFILE",
            Self::GetActive(_) => "GET_ACTIVE",
            Self::Manifest(_) => "MANIFEST",
        }
    }
}

/// The page context a message comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    /// URL of the top-level page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Sender {
    /// Host (with port, if any) of the page URL.
    pub fn host(&self) -> Option<String> {
        let url = reqwest::Url::parse(self.url.as_deref()?).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// The origin if it is a secure one; anything else counts as opaque.
    pub fn secure_origin(&self) -> Option<&str> {
        self.origin.as_deref().filter(|o| o.starts_with("https://"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub request_id: String,
    pub sender: Sender,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: Sender, message: Message) -> Self {
        Self {
            request_id: new_request_id(),
            sender,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusReply {
    pub request_id: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// 7 lowercase hex characters.
pub fn new_request_id() -> String {
    random_hex(7)
}

/// Page-side end of the bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Send `message` and wait for the matching reply. There is no timeout.
    async fn request(&self, message: Message) -> Result<Option<String>>;
}

/// A request waiting in the backend's inbox.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    reply: oneshot::Sender<BusReply>,
}

impl Delivery {
    /// Answer the request. A page that went away is not an error.
    pub fn respond(self, body: Option<String>) {
        let reply = BusReply {
            request_id: self.envelope.request_id,
            body,
        };
        if self.reply.send(reply).is_err() {
            debug!("Requester dropped before the reply");
        }
    }
}

/// Create an in-process bus: a connector for page contexts and the inbox the
/// backend drains.
pub fn channel(buffer: usize) -> (BusConnector, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(buffer);
    (BusConnector { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct BusConnector {
    tx: mpsc::Sender<Delivery>,
}

impl BusConnector {
    /// A client speaking for `sender`.
    pub fn client(&self, sender: Sender) -> BusClient {
        BusClient {
            tx: self.tx.clone(),
            sender,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusClient {
    tx: mpsc::Sender<Delivery>,
    sender: Sender,
}

impl BusClient {
    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

#[async_trait]
impl Bus for BusClient {
    async fn request(&self, message: Message) -> Result<Option<String>> {
        let envelope = Envelope::new(self.sender.clone(), message);
        let request_id = envelope.request_id.clone();
        trace!("Bus {} {}", envelope.message.name(), request_id);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Delivery {
                envelope,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Bus("Backend is not running".to_string()))?;
        let reply = reply_rx
            .await
            .map_err(|_| Error::Bus("Backend dropped the request".to_string()))?;
        if reply.request_id != request_id {
            return Err(Error::Bus(format!(
                "Reply {} does not match request {}",
                reply.request_id, request_id
            )));
        }
        Ok(reply.body)
    }
}
