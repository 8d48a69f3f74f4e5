//! Page-side interception of the EME surface.
//!
//! [`Shim`] sits between a page and the platform's native EME objects. For
//! managed key systems it negotiates ClearKey underneath, runs the license
//! exchange through the [`Bus`] and installs the resulting keys into an
//! internal ClearKey session, while every object the page sees keeps
//! reporting the key system it asked for. Unmanaged systems pass straight
//! through to the platform.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::bus::{Bus, ChallengeRequest, LicenseRequestBody, LoadRequest, Message};
use crate::cdm::SERVICE_CERTIFICATE_CHALLENGE;
use crate::clearkey;
use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::profile::{DrmKind, EffectiveProfile, ServerCertPolicy};
use crate::pssh::flip_uuid_byte_order;
use crate::utils::{b64_decode, b64_encode, random_hex_upper};

/// Key system renegotiated when a request is refused, so the platform
/// raises its own NotSupportedError.
pub const INVALID_KEY_SYSTEM: &str = "com.emebridge.invalid";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_scheme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySystemConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_data_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_capabilities: Option<Vec<MediaCapability>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_capabilities: Option<Vec<MediaCapability>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinctive_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_types: Option<Vec<String>>,
}

impl KeySystemConfiguration {
    fn capability_count(&self) -> usize {
        [&self.video_capabilities, &self.audio_capabilities]
            .into_iter()
            .flatten()
            .flatten()
            .filter(|cap| cap.content_type.as_deref().is_some_and(|t| !t.is_empty()))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySystemTrackConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_scheme: Option<String>,
}

/// `keySystemConfiguration` of a media-capabilities query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapabilitiesKeySystemConfiguration {
    pub key_system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinctive_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<KeySystemTrackConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<KeySystemTrackConfiguration>,
}

/// A media-capabilities decoding query. Tracks are given by content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDecodingConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_system_configuration: Option<MediaCapabilitiesKeySystemConfiguration>,
}

impl MediaDecodingConfiguration {
    /// The EME configuration this query amounts to.
    fn key_system_configuration(&self) -> Option<KeySystemConfiguration> {
        let ksc = self.key_system_configuration.as_ref()?;
        let capability = |content_type: &Option<String>, track: &Option<KeySystemTrackConfiguration>| {
            content_type.as_ref().map(|content_type| {
                vec![MediaCapability {
                    content_type: Some(content_type.clone()),
                    robustness: track.as_ref().and_then(|t| t.robustness.clone()),
                    encryption_scheme: track.as_ref().and_then(|t| t.encryption_scheme.clone()),
                }]
            })
        };
        Some(KeySystemConfiguration {
            init_data_types: ksc.init_data_type.clone().map(|t| vec![t]),
            audio_capabilities: capability(&self.audio, &ksc.audio),
            video_capabilities: capability(&self.video, &ksc.video),
            distinctive_identifier: ksc.distinctive_identifier.clone(),
            persistent_state: ksc.persistent_state.clone(),
            session_types: ksc.session_types.clone(),
        })
    }
}

/// Native answer to a decoding query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodingInfo {
    pub supported: bool,
    pub smooth: bool,
    pub power_efficient: bool,
}

/// Answer the page gets for a decoding query.
#[derive(Debug)]
pub struct MediaCapabilitiesInfo {
    pub supported: bool,
    pub smooth: bool,
    pub power_efficient: bool,
    pub key_system_access: Option<MediaKeySystemAccess>,
}

impl MediaCapabilitiesInfo {
    fn unsupported() -> Self {
        Self {
            supported: false,
            smooth: false,
            power_efficient: false,
            key_system_access: None,
        }
    }
}

impl From<DecodingInfo> for MediaCapabilitiesInfo {
    fn from(info: DecodingInfo) -> Self {
        Self {
            supported: info.supported,
            smooth: info.smooth,
            power_efficient: info.power_efficient,
            key_system_access: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    LicenseRequest,
    LicenseRenewal,
    LicenseRelease,
    IndividualizationRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message { message_type: MessageType, message: Vec<u8> },
    KeyStatusesChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    OutputDownscaled,
    StatusPending,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatusEntry {
    pub kid: Vec<u8>,
    pub status: KeyStatus,
}

/// The platform's own EME entry points.
#[async_trait]
pub trait Platform: Send + Sync + fmt::Debug {
    async fn request_media_key_system_access(
        &self,
        key_system: &str,
        configs: &[KeySystemConfiguration],
    ) -> Result<Box<dyn NativeAccess>>;

    async fn decoding_info(&self, config: &MediaDecodingConfiguration) -> Result<DecodingInfo>;
}

#[async_trait]
pub trait NativeAccess: Send + Sync + fmt::Debug {
    fn key_system(&self) -> String;
    fn configuration(&self) -> KeySystemConfiguration;
    async fn create_media_keys(&self) -> Result<Arc<dyn NativeMediaKeys>>;
}

#[async_trait]
pub trait NativeMediaKeys: Send + Sync + fmt::Debug {
    fn create_session(&self, session_type: &str) -> Result<Box<dyn NativeSession>>;
    async fn set_server_certificate(&self, certificate: &[u8]) -> Result<bool>;
    async fn get_status_for_policy(&self, min_hdcp_version: &str) -> Result<String>;
}

#[async_trait]
pub trait NativeSession: Send + fmt::Debug {
    fn session_id(&self) -> String;
    async fn generate_request(&mut self, init_data_type: &str, init_data: &[u8]) -> Result<()>;
    async fn load(&mut self, session_id: &str) -> Result<bool>;
    async fn update(&mut self, response: &[u8]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    async fn remove(&mut self) -> Result<()>;
    /// Events raised since the last call.
    fn take_events(&mut self) -> Vec<SessionEvent>;
}

#[async_trait]
pub trait NativeMediaElement: Send + Sync + fmt::Debug {
    async fn set_media_keys(&self, keys: Option<Arc<dyn NativeMediaKeys>>) -> Result<()>;
}

/// How an access and everything created from it behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Unmanaged key system: every call goes to the platform.
    Native,
    /// Real ClearKey: native, with session accounting on the bus.
    ClearKey,
    /// Managed system running on ClearKey underneath.
    Emulated,
}

#[derive(Clone)]
struct Context {
    bus: Arc<dyn Bus>,
    profile: Arc<EffectiveProfile>,
}

pub struct Shim {
    platform: Arc<dyn Platform>,
    context: Context,
}

impl fmt::Debug for Shim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shim")
            .field("platform", &self.platform)
            .field("profile", &self.context.profile)
            .finish()
    }
}

impl Shim {
    pub fn new(platform: Arc<dyn Platform>, bus: Arc<dyn Bus>, profile: EffectiveProfile) -> Self {
        Self {
            platform,
            context: Context {
                bus,
                profile: Arc::new(profile),
            },
        }
    }

    /// Build a shim with the profile the backend reports for this page.
    pub async fn connect(platform: Arc<dyn Platform>, bus: Arc<dyn Bus>) -> Result<Self> {
        let reply = bus
            .request(Message::GetProfile)
            .await?
            .ok_or_else(|| Error::Bus("Backend sent no profile".to_string()))?;
        let profile: EffectiveProfile = serde_json::from_str(&reply)?;
        debug!("Shim profile: {:?}", profile);
        Ok(Self::new(platform, bus, profile))
    }

    pub fn profile(&self) -> &EffectiveProfile {
        &self.context.profile
    }

    fn blocked(&self, key_system: &str) -> bool {
        !self.profile().enabled_for(key_system) && self.profile().block_disabled
    }

    fn mode(&self, key_system: &str) -> Mode {
        if !self.profile().enabled_for(key_system) {
            Mode::Native
        } else if key_system == clearkey::KEY_SYSTEM {
            Mode::ClearKey
        } else {
            Mode::Emulated
        }
    }

    pub async fn request_media_key_system_access(
        &self,
        key_system: &str,
        configs: &[KeySystemConfiguration],
    ) -> Result<MediaKeySystemAccess> {
        let mode = self.mode(key_system);
        let refused = self.blocked(key_system)
            || (mode != Mode::Native && !self.profile().allows_configs(key_system, configs));
        if refused {
            info!("Refusing key system {}", key_system);
            self.platform
                .request_media_key_system_access(INVALID_KEY_SYSTEM, configs)
                .await?;
            return Err(Error::NotSupported);
        }

        let native = match mode {
            Mode::Emulated => {
                let sanitized = self.sanitize_for_clearkey(configs).await;
                debug!("Negotiating ClearKey for {} with {:?}", key_system, sanitized);
                self.platform
                    .request_media_key_system_access(clearkey::KEY_SYSTEM, &sanitized)
                    .await?
            }
            Mode::Native | Mode::ClearKey => {
                self.platform
                    .request_media_key_system_access(key_system, configs)
                    .await?
            }
        };
        Ok(self.access(key_system, configs, native, mode))
    }

    fn access(
        &self,
        key_system: &str,
        configs: &[KeySystemConfiguration],
        native: Box<dyn NativeAccess>,
        mode: Mode,
    ) -> MediaKeySystemAccess {
        MediaKeySystemAccess {
            key_system: key_system.to_string(),
            configuration: configs.first().cloned().unwrap_or_default(),
            persistent: configs
                .iter()
                .all(|c| c.persistent_state.as_deref() != Some("not-allowed")),
            mode,
            native,
            context: self.context.clone(),
        }
    }

    /// Rewrite configurations for ClearKey, keeping only the capabilities the
    /// platform's ClearKey can decode.
    async fn sanitize_for_clearkey(&self, configs: &[KeySystemConfiguration]) -> Vec<KeySystemConfiguration> {
        let mut sanitized = Vec::new();
        for config in configs {
            let video = self.clearkey_capabilities(config.video_capabilities.as_deref(), true).await;
            let audio = self.clearkey_capabilities(config.audio_capabilities.as_deref(), false).await;
            if video.is_empty() && audio.is_empty() {
                debug!("Dropping configuration without ClearKey capabilities");
                continue;
            }
            sanitized.push(KeySystemConfiguration {
                init_data_types: Some(
                    config
                        .init_data_types
                        .clone()
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| vec!["cenc".to_string()]),
                ),
                audio_capabilities: (!audio.is_empty()).then_some(audio),
                video_capabilities: (!video.is_empty()).then_some(video),
                distinctive_identifier: Some("not-allowed".to_string()),
                persistent_state: Some("optional".to_string()),
                session_types: Some(vec!["temporary".to_string()]),
            });
        }
        sanitized
    }

    async fn clearkey_capabilities(&self, caps: Option<&[MediaCapability]>, video: bool) -> Vec<MediaCapability> {
        let mut supported = Vec::new();
        for cap in caps.unwrap_or(&[]) {
            let Some(content_type) = cap.content_type.as_deref().filter(|t| !t.is_empty()) else {
                continue;
            };
            let probe = MediaDecodingConfiguration {
                kind: "media-source".to_string(),
                video: video.then(|| content_type.to_string()),
                audio: (!video).then(|| content_type.to_string()),
                key_system_configuration: Some(MediaCapabilitiesKeySystemConfiguration {
                    key_system: clearkey::KEY_SYSTEM.to_string(),
                    ..Default::default()
                }),
            };
            match self.platform.decoding_info(&probe).await {
                Ok(info) if info.supported => supported.push(MediaCapability {
                    content_type: Some(content_type.to_string()),
                    robustness: None,
                    encryption_scheme: cap.encryption_scheme.clone(),
                }),
                Ok(_) => debug!("ClearKey cannot decode {}", content_type),
                Err(e) => debug!("ClearKey probe for {} failed: {}", content_type, e),
            }
        }
        supported
    }

    /// Media-capabilities variant of the key system gate.
    pub async fn decoding_info(&self, config: &MediaDecodingConfiguration) -> Result<MediaCapabilitiesInfo> {
        let (Some(ksc), Some(requested)) = (&config.key_system_configuration, config.key_system_configuration())
        else {
            return Ok(self.platform.decoding_info(config).await?.into());
        };
        let key_system = ksc.key_system.as_str();
        if self.blocked(key_system) {
            return Ok(MediaCapabilitiesInfo::unsupported());
        }
        let mode = self.mode(key_system);
        if mode == Mode::Native {
            return Ok(self.platform.decoding_info(config).await?.into());
        }

        let configs = vec![requested];
        if !self.profile().allows_configs(key_system, &configs) {
            return Ok(MediaCapabilitiesInfo::unsupported());
        }
        let negotiated = if mode == Mode::Emulated {
            let sanitized = self.sanitize_for_clearkey(&configs).await;
            let kept: usize = sanitized.iter().map(KeySystemConfiguration::capability_count).sum();
            if sanitized.is_empty() || kept < configs[0].capability_count() {
                return Ok(MediaCapabilitiesInfo::unsupported());
            }
            sanitized
        } else {
            configs.clone()
        };

        match self
            .platform
            .request_media_key_system_access(clearkey::KEY_SYSTEM, &negotiated)
            .await
        {
            Ok(native) => Ok(MediaCapabilitiesInfo {
                supported: true,
                smooth: true,
                power_efficient: true,
                key_system_access: Some(self.access(key_system, &configs, native, mode)),
            }),
            Err(e) => {
                debug!("ClearKey access for decoding query failed: {}", e);
                Ok(MediaCapabilitiesInfo {
                    supported: true,
                    smooth: true,
                    power_efficient: false,
                    key_system_access: None,
                })
            }
        }
    }

    /// Whether the platform's ClearKey can run a session at all, bounded by
    /// `timeout`.
    pub async fn probe_clearkey_support(&self, timeout: Duration) -> bool {
        let probe = async {
            let config = KeySystemConfiguration {
                init_data_types: Some(vec!["keyids".to_string(), "cenc".to_string()]),
                video_capabilities: Some(vec![MediaCapability {
                    content_type: Some("video/mp4; codecs=\"avc1.42E01E\"".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            };
            let access = self
                .platform
                .request_media_key_system_access(clearkey::KEY_SYSTEM, &[config])
                .await?;
            let keys = access.create_media_keys().await?;
            let mut session = keys.create_session("temporary")?;
            let probe_key = ContentKey::from_bytes(&[0u8; 16], &[0u8; 16]);
            session
                .generate_request("keyids", &clearkey::init_data(&[probe_key])?)
                .await?;
            if let Err(e) = session.close().await {
                trace!("Probe session close failed: {}", e);
            }
            Ok::<_, Error>(())
        };
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("ClearKey is not usable: {}", e);
                false
            }
            Err(_) => {
                warn!("ClearKey probe timed out after {:?}", timeout);
                false
            }
        }
    }
}

/// Access object the page holds. Reports the key system and first
/// configuration the page asked for, whatever was negotiated underneath.
pub struct MediaKeySystemAccess {
    key_system: String,
    configuration: KeySystemConfiguration,
    persistent: bool,
    mode: Mode,
    native: Box<dyn NativeAccess>,
    context: Context,
}

impl fmt::Debug for MediaKeySystemAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaKeySystemAccess")
            .field("key_system", &self.key_system)
            .field("mode", &self.mode)
            .field("native", &self.native)
            .finish()
    }
}

impl MediaKeySystemAccess {
    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    pub fn get_configuration(&self) -> KeySystemConfiguration {
        self.configuration.clone()
    }

    /// Whether persistent sessions may be used with this access.
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub async fn create_media_keys(&self) -> Result<MediaKeys> {
        Ok(MediaKeys {
            key_system: self.key_system.clone(),
            family: DrmKind::from_key_system(&self.key_system),
            persistent: self.persistent,
            mode: self.mode,
            native: self.native.create_media_keys().await?,
            server_certificate: Arc::new(Mutex::new(None)),
            context: self.context.clone(),
        })
    }
}

#[derive(Clone)]
pub struct MediaKeys {
    key_system: String,
    family: Option<DrmKind>,
    persistent: bool,
    mode: Mode,
    native: Arc<dyn NativeMediaKeys>,
    server_certificate: Arc<Mutex<Option<Vec<u8>>>>,
    context: Context,
}

impl fmt::Debug for MediaKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaKeys")
            .field("key_system", &self.key_system)
            .field("mode", &self.mode)
            .field("native", &self.native)
            .finish()
    }
}

impl MediaKeys {
    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    /// Create a session. Managed sessions always run as `temporary` on the
    /// native side; `persistent-license` is remembered for the backend.
    pub fn create_session(&self, session_type: Option<&str>) -> Result<MediaKeySession> {
        let requested = session_type.unwrap_or("temporary");
        let native = match self.mode {
            Mode::Emulated => self.native.create_session("temporary")?,
            Mode::Native | Mode::ClearKey => self.native.create_session(requested)?,
        };
        let (closed, _) = watch::channel(false);
        Ok(MediaKeySession {
            key_system: self.key_system.clone(),
            family: self.family,
            mode: self.mode,
            persistent: self.persistent && requested == "persistent-license",
            keys: self.native.clone(),
            server_certificate: self.server_certificate.clone(),
            context: self.context.clone(),
            native,
            internal: None,
            session_id: String::new(),
            state: SessionState::Uninitialized,
            stashed: None,
            key_statuses: Vec::new(),
            events: Vec::new(),
            closed,
        })
    }

    /// Managed Widevine keeps the certificate for the next request;
    /// managed PlayReady has no use for one.
    pub async fn set_server_certificate(&self, certificate: &[u8]) -> Result<bool> {
        if self.mode != Mode::Emulated {
            return self.native.set_server_certificate(certificate).await;
        }
        if self.family != Some(DrmKind::Widevine) {
            return Ok(false);
        }
        *self.server_certificate.lock().await = Some(certificate.to_vec());
        Ok(true)
    }

    pub async fn get_status_for_policy(&self, min_hdcp_version: &str) -> Result<String> {
        if self.mode != Mode::Emulated {
            return self.native.get_status_for_policy(min_hdcp_version).await;
        }
        Ok(self.context.profile.status_for_policy(min_hdcp_version).to_string())
    }
}

/// A media element's keys slot.
#[derive(Debug)]
pub struct MediaElement {
    native: Box<dyn NativeMediaElement>,
    media_keys: Option<MediaKeys>,
}

impl MediaElement {
    pub fn new(native: Box<dyn NativeMediaElement>) -> Self {
        Self {
            native,
            media_keys: None,
        }
    }

    /// Attach the native keys underneath `keys` and remember `keys` itself.
    pub async fn set_media_keys(&mut self, keys: Option<MediaKeys>) -> Result<()> {
        self.native
            .set_media_keys(keys.as_ref().map(|k| k.native.clone()))
            .await?;
        self.media_keys = keys;
        Ok(())
    }

    pub fn media_keys(&self) -> Option<&MediaKeys> {
        self.media_keys.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Requesting,
    /// Waiting for the service certificate before the real request.
    CertExchange,
    AwaitingLicense,
    Resolved,
    Closed,
}

#[derive(Debug, Deserialize)]
struct KeyReply {
    keys: Vec<ContentKey>,
}

pub struct MediaKeySession {
    key_system: String,
    family: Option<DrmKind>,
    mode: Mode,
    persistent: bool,
    keys: Arc<dyn NativeMediaKeys>,
    server_certificate: Arc<Mutex<Option<Vec<u8>>>>,
    context: Context,
    native: Box<dyn NativeSession>,
    /// ClearKey session holding the keys of a managed exchange.
    internal: Option<Box<dyn NativeSession>>,
    session_id: String,
    state: SessionState,
    stashed: Option<(String, Vec<u8>)>,
    key_statuses: Vec<KeyStatusEntry>,
    events: Vec<SessionEvent>,
    closed: watch::Sender<bool>,
}

impl fmt::Debug for MediaKeySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaKeySession")
            .field("key_system", &self.key_system)
            .field("mode", &self.mode)
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish()
    }
}

impl MediaKeySession {
    pub fn session_id(&self) -> String {
        match self.mode {
            Mode::Emulated => self.session_id.clone(),
            Mode::Native | Mode::ClearKey => self.native.session_id(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn key_statuses(&self) -> &[KeyStatusEntry] {
        &self.key_statuses
    }

    /// Events for the page, including whatever the native session raised.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.native.take_events());
        events
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            if rx.wait_for(|closed| *closed).await.is_err() {
                trace!("Session dropped before closing");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn generate_request(&mut self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
        match self.mode {
            Mode::Native => return self.native.generate_request(init_data_type, init_data).await,
            Mode::ClearKey => {
                if let Err(e) = self.context.bus.request(Message::Request(None)).await {
                    debug!("Could not report ClearKey session: {}", e);
                }
                return self.native.generate_request(init_data_type, init_data).await;
            }
            Mode::Emulated => {}
        }
        if self.state != SessionState::Uninitialized {
            return Err(Error::InvalidState("generateRequest already called".to_string()));
        }
        self.check_init_data_type(init_data_type)?;
        self.session_id = random_hex_upper(32);

        let needs_certificate = self.family == Some(DrmKind::Widevine)
            && self.context.profile.widevine.server_cert == ServerCertPolicy::Always
            && self.server_certificate.lock().await.is_none();
        if needs_certificate {
            debug!("Session {} requests a service certificate first", self.session_id);
            self.stashed = Some((init_data_type.to_string(), init_data.to_vec()));
            self.state = SessionState::CertExchange;
            self.events.push(SessionEvent::Message {
                message_type: MessageType::LicenseRequest,
                message: SERVICE_CERTIFICATE_CHALLENGE.to_vec(),
            });
            return Ok(());
        }
        self.request_license(init_data_type, init_data).await
    }

    fn check_init_data_type(&self, init_data_type: &str) -> Result<()> {
        let accepted = match self.family {
            Some(DrmKind::Playready) => init_data_type == "cenc",
            _ => init_data_type == "cenc" || init_data_type == "webm",
        };
        if !accepted {
            return Err(Error::UnsupportedInitDataType(init_data_type.to_string()));
        }
        Ok(())
    }

    async fn request_license(&mut self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
        self.check_init_data_type(init_data_type)?;

        let server_cert = match self.family {
            Some(DrmKind::Widevine) if self.context.profile.widevine.server_cert != ServerCertPolicy::Never => {
                self.server_certificate.lock().await.as_ref().map(b64_encode)
            }
            _ => None,
        };
        let previous = self.state;
        self.state = SessionState::Requesting;
        let request = ChallengeRequest {
            key_system: self.key_system.clone(),
            session_id: self.session_id.clone(),
            init_data_type: init_data_type.to_string(),
            init_data: b64_encode(init_data),
            server_cert,
        };
        let challenge = match self.context.bus.request(Message::Request(Some(request))).await {
            Ok(Some(challenge)) if !challenge.is_empty() && challenge != "null" => challenge,
            Ok(_) => {
                self.state = previous;
                return Err(Error::Bus("No challenge received from the backend".to_string()));
            }
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };

        self.events.push(SessionEvent::Message {
            message_type: MessageType::LicenseRequest,
            message: b64_decode(&challenge)?,
        });
        self.state = SessionState::AwaitingLicense;
        Ok(())
    }

    pub async fn update(&mut self, response: &[u8]) -> Result<()> {
        match self.mode {
            Mode::Native => return self.native.update(response).await,
            Mode::ClearKey => {
                let body = LicenseRequestBody {
                    key_system: self.key_system.clone(),
                    session_id: self.native.session_id(),
                    license: b64_encode(response),
                    persistent: self.persistent,
                };
                if let Err(e) = self.context.bus.request(Message::Response(body)).await {
                    debug!("Could not report ClearKey license: {}", e);
                }
                return self.native.update(response).await;
            }
            Mode::Emulated => {}
        }

        match self.state {
            SessionState::CertExchange => {
                let certificate = response
                    .get(5..)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| Error::InvalidLicenseMessage("Service certificate response is too short".to_string()))?;
                *self.server_certificate.lock().await = Some(certificate.to_vec());
                let (init_data_type, init_data) = self
                    .stashed
                    .take()
                    .ok_or_else(|| Error::InvalidState("No request to replay".to_string()))?;
                debug!("Replaying request for session {} with certificate", self.session_id);
                return self.request_license(&init_data_type, &init_data).await;
            }
            SessionState::AwaitingLicense | SessionState::Resolved => {}
            SessionState::Closed => return Err(Error::InvalidState("Session is closed".to_string())),
            SessionState::Uninitialized | SessionState::Requesting => {
                return Err(Error::InvalidState("No license request is pending".to_string()))
            }
        }

        match self.exchange_license(response).await {
            Ok(()) => {
                self.state = SessionState::Resolved;
                Ok(())
            }
            Err(e) => {
                warn!("Managed update of {} failed, using native session: {}", self.session_id, e);
                self.native.update(response).await
            }
        }
    }

    async fn exchange_license(&mut self, response: &[u8]) -> Result<()> {
        let body = LicenseRequestBody {
            key_system: self.key_system.clone(),
            session_id: self.session_id.clone(),
            license: b64_encode(response),
            persistent: self.persistent,
        };
        let reply = self
            .context
            .bus
            .request(Message::Response(body))
            .await?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::NoKeys("Backend returned no keys".to_string()))?;
        self.install_keys(&reply).await
    }

    /// Feed the keys of a backend reply into the internal ClearKey session.
    async fn install_keys(&mut self, reply: &str) -> Result<()> {
        let reply: KeyReply = serde_json::from_str(reply)?;
        if reply.keys.is_empty() {
            return Err(Error::NoKeys("Backend returned no keys".to_string()));
        }

        let mut internal = match self.internal.take() {
            Some(internal) => internal,
            None => self.keys.create_session("temporary")?,
        };
        let installed = async {
            internal
                .generate_request("keyids", &clearkey::init_data(&reply.keys)?)
                .await?;
            internal
                .update(clearkey::license(&reply.keys)?.as_bytes())
                .await
        }
        .await;
        self.internal = Some(internal);
        installed?;

        self.key_statuses = key_statuses(self.family, &reply.keys)?;
        self.events.push(SessionEvent::KeyStatusesChange);
        info!("Installed {} keys for session {}", reply.keys.len(), self.session_id);
        Ok(())
    }

    /// Load a persistent session. Returns whether one was found.
    pub async fn load(&mut self, session_id: &str) -> Result<bool> {
        if self.mode != Mode::Emulated {
            return self.native.load(session_id).await;
        }
        let request = LoadRequest {
            key_system: self.key_system.clone(),
            session_id: session_id.to_string(),
        };
        match self.context.bus.request(Message::Load(request)).await {
            Ok(Some(reply)) if !reply.is_empty() => {
                self.session_id = session_id.to_string();
                match self.install_keys(&reply).await {
                    Ok(()) => {
                        self.state = SessionState::Resolved;
                        return Ok(true);
                    }
                    Err(e) => warn!("Could not install keys of session {}: {}", session_id, e),
                }
            }
            Ok(_) => debug!("No stored session {}", session_id),
            Err(e) => warn!("Load of session {} failed: {}", session_id, e),
        }
        self.native.load(session_id).await
    }

    pub async fn remove(&mut self) -> Result<()> {
        if self.mode != Mode::Emulated {
            return self.native.remove().await;
        }
        self.context
            .bus
            .request(Message::Remove(self.session_id.clone()))
            .await?;
        Ok(())
    }

    /// Close the session. `closed` resolves before any cleanup runs, and
    /// cleanup failures of a managed session are only logged.
    pub async fn close(&mut self) -> Result<()> {
        self.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
        match self.mode {
            Mode::Native => return self.native.close().await,
            Mode::ClearKey => {
                if let Err(e) = self.context.bus.request(Message::Close).await {
                    debug!("Could not report closed session: {}", e);
                }
                return self.native.close().await;
            }
            Mode::Emulated => {}
        }
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        if let Some(mut internal) = self.internal.take() {
            if let Err(e) = internal.close().await {
                debug!("Internal session close failed: {}", e);
            }
        }
        if let Err(e) = self.context.bus.request(Message::Close).await {
            debug!("Could not report closed session: {}", e);
        }
        Ok(())
    }
}

/// Every key is reported usable. PlayReady key ids are listed in both byte
/// orders since pages disagree on which one they look up.
fn key_statuses(family: Option<DrmKind>, keys: &[ContentKey]) -> Result<Vec<KeyStatusEntry>> {
    fn push(statuses: &mut Vec<KeyStatusEntry>, kid: Vec<u8>) {
        if !statuses.iter().any(|s| s.kid == kid) {
            statuses.push(KeyStatusEntry {
                kid,
                status: KeyStatus::Usable,
            });
        }
    }

    let mut statuses = Vec::new();
    for key in keys {
        let kid = key.kid_bytes()?;
        if family == Some(DrmKind::Playready) {
            if let Ok(guid) = <[u8; 16]>::try_from(kid.as_slice()) {
                push(&mut statuses, kid.clone());
                push(&mut statuses, flip_uuid_byte_order(&guid).to_vec());
                continue;
            }
        }
        push(&mut statuses, kid);
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::backend::tests::{page, test_backend};
    use crate::backend::Backend;
    use crate::cdm::tests::{serve_license, widevine_pssh_box, KEY, KID};
    use crate::profile::{is_playready, is_widevine, Profile};

    const AVC: &str = "video/mp4; codecs=\"avc1.4d401f\"";
    const HEVC: &str = "video/mp4; codecs=\"hvc1.1.6.L93.B0\"";
    const AAC: &str = "audio/mp4; codecs=\"mp4a.40.2\"";

    type Calls = Arc<StdMutex<Vec<String>>>;

    fn record(calls: &Calls, call: String) {
        calls.lock().unwrap().push(call);
    }

    /// A platform whose ClearKey works and whose other systems only exist.
    #[derive(Debug, Default, Clone)]
    struct MockPlatform {
        calls: Calls,
        undecodable: Vec<String>,
        stall: bool,
    }

    impl MockPlatform {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Platform for MockPlatform {
        async fn request_media_key_system_access(
            &self,
            key_system: &str,
            configs: &[KeySystemConfiguration],
        ) -> Result<Box<dyn NativeAccess>> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            record(&self.calls, format!("access {}", key_system));
            let known = key_system == clearkey::KEY_SYSTEM || is_widevine(key_system) || is_playready(key_system);
            if !known || configs.is_empty() {
                return Err(Error::NotSupported);
            }
            Ok(Box::new(MockAccess {
                key_system: key_system.to_string(),
                configuration: configs[0].clone(),
                calls: self.calls.clone(),
            }))
        }

        async fn decoding_info(&self, config: &MediaDecodingConfiguration) -> Result<DecodingInfo> {
            let supported = [&config.video, &config.audio]
                .into_iter()
                .flatten()
                .all(|t| !self.undecodable.contains(t));
            Ok(DecodingInfo {
                supported,
                smooth: supported,
                power_efficient: supported,
            })
        }
    }

    #[derive(Debug)]
    struct MockAccess {
        key_system: String,
        configuration: KeySystemConfiguration,
        calls: Calls,
    }

    #[async_trait]
    impl NativeAccess for MockAccess {
        fn key_system(&self) -> String {
            self.key_system.clone()
        }

        fn configuration(&self) -> KeySystemConfiguration {
            self.configuration.clone()
        }

        async fn create_media_keys(&self) -> Result<Arc<dyn NativeMediaKeys>> {
            Ok(Arc::new(MockKeys {
                key_system: self.key_system.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    #[derive(Debug)]
    struct MockKeys {
        key_system: String,
        calls: Calls,
    }

    #[async_trait]
    impl NativeMediaKeys for MockKeys {
        fn create_session(&self, session_type: &str) -> Result<Box<dyn NativeSession>> {
            record(&self.calls, format!("session {} {}", self.key_system, session_type));
            Ok(Box::new(MockSession {
                key_system: self.key_system.clone(),
                calls: self.calls.clone(),
                id: String::new(),
                events: Vec::new(),
            }))
        }

        async fn set_server_certificate(&self, _certificate: &[u8]) -> Result<bool> {
            record(&self.calls, "native certificate".to_string());
            Ok(true)
        }

        async fn get_status_for_policy(&self, _min_hdcp_version: &str) -> Result<String> {
            Ok("usable".to_string())
        }
    }

    #[derive(Debug)]
    struct MockSession {
        key_system: String,
        calls: Calls,
        id: String,
        events: Vec<SessionEvent>,
    }

    #[async_trait]
    impl NativeSession for MockSession {
        fn session_id(&self) -> String {
            self.id.clone()
        }

        async fn generate_request(&mut self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
            record(&self.calls, format!("generate {} {}", self.key_system, init_data_type));
            if init_data_type == "keyids" {
                serde_json::from_slice::<serde_json::Value>(init_data)?;
            }
            self.id = "NATIVE".to_string();
            self.events.push(SessionEvent::Message {
                message_type: MessageType::LicenseRequest,
                message: init_data.to_vec(),
            });
            Ok(())
        }

        async fn load(&mut self, session_id: &str) -> Result<bool> {
            record(&self.calls, format!("native load {}", session_id));
            Ok(false)
        }

        async fn update(&mut self, response: &[u8]) -> Result<()> {
            if self.key_system != clearkey::KEY_SYSTEM {
                record(&self.calls, format!("native update {}", self.key_system));
                return Ok(());
            }
            match clearkey::parse_license(response) {
                Ok(keys) => {
                    for key in keys {
                        record(&self.calls, format!("key {}", key.kid));
                    }
                    Ok(())
                }
                Err(e) => {
                    record(&self.calls, "native update rejected".to_string());
                    Err(e)
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            record(&self.calls, format!("close {}", self.key_system));
            Ok(())
        }

        async fn remove(&mut self) -> Result<()> {
            record(&self.calls, "native remove".to_string());
            Ok(())
        }

        fn take_events(&mut self) -> Vec<SessionEvent> {
            std::mem::take(&mut self.events)
        }
    }

    #[derive(Debug, Default)]
    struct MockElement {
        calls: Calls,
    }

    #[async_trait]
    impl NativeMediaElement for MockElement {
        async fn set_media_keys(&self, keys: Option<Arc<dyn NativeMediaKeys>>) -> Result<()> {
            record(&self.calls, format!("attach {:?}", keys));
            Ok(())
        }
    }

    type Responder = Box<dyn Fn(&Message) -> Option<String> + Send + Sync>;

    /// Answers bus messages from a closure and keeps what was sent.
    struct StubBus {
        sent: StdMutex<Vec<Message>>,
        responder: Responder,
    }

    impl StubBus {
        fn new(responder: impl Fn(&Message) -> Option<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                responder: Box::new(responder),
            })
        }

        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Bus for StubBus {
        async fn request(&self, message: Message) -> Result<Option<String>> {
            let reply = (self.responder)(&message);
            self.sent.lock().unwrap().push(message);
            Ok(reply)
        }
    }

    fn keys_reply(kid: &str) -> String {
        serde_json::json!({"pssh": "AAAA", "keys": [{"kid": kid, "k": KEY}]}).to_string()
    }

    fn managed_profile() -> EffectiveProfile {
        let mut profile = Profile::default();
        profile.widevine.device.local = Some("pixel".to_string());
        profile.playready.device.local = Some("sl2000".to_string());
        profile.allow_persistence = true;
        profile.hdcp = Some(6);
        profile.effective(Some("https://www.example.com"), false)
    }

    fn video_config(content_types: &[&str]) -> KeySystemConfiguration {
        KeySystemConfiguration {
            init_data_types: Some(vec!["cenc".to_string()]),
            video_capabilities: Some(
                content_types
                    .iter()
                    .map(|t| MediaCapability {
                        content_type: Some(t.to_string()),
                        robustness: Some("SW_SECURE_CRYPTO".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    async fn session_for(shim: &Shim, key_system: &str) -> MediaKeySession {
        let access = shim
            .request_media_key_system_access(key_system, &[video_config(&[AVC])])
            .await
            .unwrap();
        access.create_media_keys().await.unwrap().create_session(None).unwrap()
    }

    fn license_request(events: &[SessionEvent]) -> Vec<u8> {
        events
            .iter()
            .find_map(|e| match e {
                SessionEvent::Message { message, .. } => Some(message.clone()),
                _ => None,
            })
            .expect("license-request message")
    }

    #[tokio::test]
    async fn widevine_runs_on_clearkey_end_to_end() {
        let (backend, device, notifier) = test_backend(false);
        let backend = Arc::new(backend);
        let (connector, inbox) = crate::bus::channel(8);
        tokio::spawn(Backend::serve(backend.clone(), inbox));

        let platform = MockPlatform::default();
        let bus = Arc::new(connector.client(page()));
        let shim = Shim::connect(Arc::new(platform.clone()), bus).await.unwrap();

        let access = shim
            .request_media_key_system_access("com.widevine.alpha", &[video_config(&[AVC])])
            .await
            .unwrap();
        assert_eq!(access.key_system(), "com.widevine.alpha");
        assert_eq!(access.get_configuration(), video_config(&[AVC]));
        assert!(platform.calls().contains(&"access org.w3.clearkey".to_string()));

        let keys = access.create_media_keys().await.unwrap();
        let mut element = MediaElement::new(Box::new(MockElement {
            calls: platform.calls.clone(),
        }));
        element.set_media_keys(Some(keys.clone())).await.unwrap();
        assert_eq!(element.media_keys().unwrap().key_system(), "com.widevine.alpha");
        assert!(platform.calls().iter().any(|c| c.starts_with("attach") && c.contains("org.w3.clearkey")));

        let mut session = keys.create_session(None).unwrap();
        session.generate_request("cenc", &widevine_pssh_box()).await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingLicense);
        let id = session.session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        let challenge = license_request(&session.take_events());
        let license = serve_license(&device, &challenge, &[(KID, KEY)]);
        session.update(&license).await.unwrap();

        assert_eq!(session.state(), SessionState::Resolved);
        assert_eq!(session.key_statuses().len(), 1);
        assert_eq!(session.key_statuses()[0].kid, hex::decode(KID).unwrap());
        assert_eq!(session.key_statuses()[0].status, KeyStatus::Usable);
        assert!(session.take_events().contains(&SessionEvent::KeyStatusesChange));
        assert!(platform.calls().contains(&format!("key {}", KID)));
        assert_eq!(backend.active_sessions(7).await, Some(1));

        let closed = session.closed();
        session.close().await.unwrap();
        closed.await;
        assert!(session.is_closed());
        session.close().await.unwrap();
        assert_eq!(backend.active_sessions(7).await, None);
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn policy_gates_key_system_access() {
        let platform = MockPlatform::default();
        let bus = StubBus::new(|_| None);

        let mut profile = managed_profile();
        profile.block_disabled = true;
        profile.playready.enabled = false;
        let shim = Shim::new(Arc::new(platform.clone()), bus.clone(), profile.clone());
        let blocked = shim
            .request_media_key_system_access("com.microsoft.playready", &[video_config(&[AVC])])
            .await;
        assert!(matches!(blocked, Err(Error::NotSupported)));
        assert_eq!(platform.calls().last().unwrap(), "access com.emebridge.invalid");

        profile.allow_persistence = false;
        let shim = Shim::new(Arc::new(platform.clone()), bus.clone(), profile.clone());
        let persistent = KeySystemConfiguration {
            session_types: Some(vec!["persistent-license".to_string()]),
            ..video_config(&[AVC])
        };
        let denied = shim
            .request_media_key_system_access("com.widevine.alpha", &[persistent])
            .await;
        assert!(matches!(denied, Err(Error::NotSupported)));

        profile.block_disabled = false;
        let shim = Shim::new(Arc::new(platform.clone()), bus.clone(), profile);
        let native = shim
            .request_media_key_system_access("com.microsoft.playready", &[video_config(&[AVC])])
            .await
            .unwrap();
        assert_eq!(native.key_system(), "com.microsoft.playready");
        assert_eq!(platform.calls().last().unwrap(), "access com.microsoft.playready");

        let mut session = native.create_media_keys().await.unwrap().create_session(None).unwrap();
        session.generate_request("cenc", b"header").await.unwrap();
        assert_eq!(session.session_id(), "NATIVE");
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn configurations_are_sanitized_for_clearkey() {
        let platform = MockPlatform {
            undecodable: vec![HEVC.to_string()],
            ..Default::default()
        };
        let shim = Shim::new(Arc::new(platform), StubBus::new(|_| None), managed_profile());

        let configs = vec![
            KeySystemConfiguration {
                init_data_types: None,
                audio_capabilities: Some(vec![MediaCapability {
                    content_type: Some(AAC.to_string()),
                    robustness: Some("SW_SECURE_CRYPTO".to_string()),
                    encryption_scheme: Some("cenc".to_string()),
                }]),
                persistent_state: Some("required".to_string()),
                ..video_config(&[AVC, HEVC, ""])
            },
            video_config(&[HEVC]),
        ];
        let sanitized = shim.sanitize_for_clearkey(&configs).await;
        assert_eq!(sanitized.len(), 1);

        let config = &sanitized[0];
        assert_eq!(config.init_data_types, Some(vec!["cenc".to_string()]));
        assert_eq!(config.distinctive_identifier.as_deref(), Some("not-allowed"));
        assert_eq!(config.persistent_state.as_deref(), Some("optional"));
        assert_eq!(config.session_types, Some(vec!["temporary".to_string()]));
        let video = config.video_capabilities.as_ref().unwrap();
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].content_type.as_deref(), Some(AVC));
        assert_eq!(video[0].robustness, None);
        let audio = config.audio_capabilities.as_ref().unwrap();
        assert_eq!(audio[0].encryption_scheme.as_deref(), Some("cenc"));
    }

    #[tokio::test]
    async fn decoding_queries_follow_the_same_gate() {
        let platform = MockPlatform {
            undecodable: vec![HEVC.to_string()],
            ..Default::default()
        };
        let mut profile = managed_profile();
        profile.block_disabled = true;
        profile.playready.enabled = false;
        let shim = Shim::new(Arc::new(platform), StubBus::new(|_| None), profile);

        let query = |key_system: &str, video: &str| MediaDecodingConfiguration {
            kind: "media-source".to_string(),
            video: Some(video.to_string()),
            audio: None,
            key_system_configuration: Some(MediaCapabilitiesKeySystemConfiguration {
                key_system: key_system.to_string(),
                ..Default::default()
            }),
        };

        let info = shim.decoding_info(&query("com.widevine.alpha", AVC)).await.unwrap();
        assert!(info.supported && info.power_efficient);
        assert_eq!(info.key_system_access.unwrap().key_system(), "com.widevine.alpha");

        let info = shim.decoding_info(&query("com.widevine.alpha", HEVC)).await.unwrap();
        assert!(!info.supported);

        let info = shim.decoding_info(&query("com.microsoft.playready", AVC)).await.unwrap();
        assert!(!info.supported && !info.smooth && info.key_system_access.is_none());

        let plain = MediaDecodingConfiguration {
            kind: "file".to_string(),
            video: Some(AVC.to_string()),
            ..Default::default()
        };
        assert!(shim.decoding_info(&plain).await.unwrap().supported);
    }

    #[tokio::test]
    async fn certificate_exchange_runs_before_the_request() {
        let bus = StubBus::new(|message| match message {
            Message::Request(Some(_)) => Some(b64_encode(b"challenge")),
            _ => None,
        });
        let mut profile = managed_profile();
        profile.widevine.server_cert = ServerCertPolicy::Always;
        let shim = Shim::new(Arc::new(MockPlatform::default()), bus.clone(), profile);

        let mut session = session_for(&shim, "com.widevine.alpha").await;
        session.generate_request("cenc", &widevine_pssh_box()).await.unwrap();
        assert_eq!(session.state(), SessionState::CertExchange);
        assert_eq!(license_request(&session.take_events()), vec![0x08, 0x04]);
        assert!(bus.sent().is_empty());

        let mut response = vec![0u8; 5];
        response.extend_from_slice(b"certificate");
        session.update(&response).await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingLicense);
        assert_eq!(license_request(&session.take_events()), b"challenge");

        let Message::Request(Some(request)) = &bus.sent()[0] else {
            panic!("expected a challenge request");
        };
        assert_eq!(request.server_cert, Some(b64_encode(b"certificate")));
        assert_eq!(request.init_data, b64_encode(widevine_pssh_box()));
    }

    #[tokio::test]
    async fn unsupported_init_data_fails_before_the_certificate_exchange() {
        let bus = StubBus::new(|_| Some(b64_encode(b"challenge")));
        let mut profile = managed_profile();
        profile.widevine.server_cert = ServerCertPolicy::Always;
        let shim = Shim::new(Arc::new(MockPlatform::default()), bus.clone(), profile);

        let mut session = session_for(&shim, "com.widevine.alpha").await;
        let err = session.generate_request("keyids", b"{}").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedInitDataType(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.take_events().is_empty());
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn server_certificates_respect_the_policy() {
        let bus = StubBus::new(|_| Some(b64_encode(b"challenge")));
        let mut profile = managed_profile();
        profile.widevine.server_cert = ServerCertPolicy::Never;
        let shim = Shim::new(Arc::new(MockPlatform::default()), bus.clone(), profile);

        let access = shim
            .request_media_key_system_access("com.widevine.alpha", &[video_config(&[AVC])])
            .await
            .unwrap();
        let keys = access.create_media_keys().await.unwrap();
        assert!(keys.set_server_certificate(b"cert").await.unwrap());
        let mut session = keys.create_session(None).unwrap();
        session.generate_request("cenc", b"pssh").await.unwrap();
        let Message::Request(Some(request)) = &bus.sent()[0] else {
            panic!("expected a challenge request");
        };
        assert_eq!(request.server_cert, None);

        let playready = shim
            .request_media_key_system_access("com.microsoft.playready", &[video_config(&[AVC])])
            .await
            .unwrap()
            .create_media_keys()
            .await
            .unwrap();
        assert!(!playready.set_server_certificate(b"cert").await.unwrap());
    }

    #[tokio::test]
    async fn playready_statuses_list_both_byte_orders() {
        let bus = StubBus::new(|message| match message {
            Message::Request(Some(_)) => Some(b64_encode(b"<challenge/>")),
            Message::Response(_) => Some(keys_reply(KID)),
            _ => None,
        });
        let shim = Shim::new(Arc::new(MockPlatform::default()), bus, managed_profile());
        let mut session = session_for(&shim, "com.microsoft.playready").await;

        let webm = session.generate_request("webm", b"kid").await;
        assert!(matches!(webm, Err(Error::UnsupportedInitDataType(_))));

        session.generate_request("cenc", b"header").await.unwrap();
        session.update(b"<license/>").await.unwrap();
        let kids: Vec<String> = session.key_statuses().iter().map(|s| hex::encode(&s.kid)).collect();
        assert_eq!(kids, vec![KID.to_string(), "0d05b49e4be40248932e27d75083e266".to_string()]);

        let statuses = key_statuses(Some(DrmKind::Playready), &[ContentKey::from_hex(&"00".repeat(16), KEY).unwrap()])
            .unwrap();
        assert_eq!(statuses.len(), 1);
    }

    #[tokio::test]
    async fn failed_managed_update_falls_through_to_native() {
        let bus = StubBus::new(|message| match message {
            Message::Request(Some(_)) => Some(b64_encode(b"challenge")),
            _ => None,
        });
        let platform = MockPlatform::default();
        let shim = Shim::new(Arc::new(platform.clone()), bus, managed_profile());
        let mut session = session_for(&shim, "com.widevine.alpha").await;

        session.generate_request("cenc", b"pssh").await.unwrap();
        assert!(session.update(b"license").await.is_err());
        assert!(platform.calls().contains(&"native update rejected".to_string()));
        assert_eq!(session.state(), SessionState::AwaitingLicense);
    }

    #[tokio::test]
    async fn missing_challenge_is_an_error() {
        let bus = StubBus::new(|_| Some("null".to_string()));
        let shim = Shim::new(Arc::new(MockPlatform::default()), bus, managed_profile());
        let mut session = session_for(&shim, "com.widevine.alpha").await;
        let err = session.generate_request("cenc", b"pssh").await.unwrap_err();
        assert_eq!(err.to_string(), "Bus error: No challenge received from the backend");
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn persistent_sessions_load_and_remove() {
        let bus = StubBus::new(|message| match message {
            Message::Load(request) if request.session_id == "STORED" => Some(keys_reply(KID)),
            _ => None,
        });
        let platform = MockPlatform::default();
        let shim = Shim::new(Arc::new(platform.clone()), bus.clone(), managed_profile());
        let keys = shim
            .request_media_key_system_access("com.widevine.alpha", &[video_config(&[AVC])])
            .await
            .unwrap()
            .create_media_keys()
            .await
            .unwrap();

        let mut session = keys.create_session(Some("persistent-license")).unwrap();
        assert!(session.load("STORED").await.unwrap());
        assert_eq!(session.session_id(), "STORED");
        assert_eq!(session.state(), SessionState::Resolved);
        session.remove().await.unwrap();
        assert_eq!(bus.sent().last(), Some(&Message::Remove("STORED".to_string())));

        let mut missing = keys.create_session(Some("persistent-license")).unwrap();
        assert!(!missing.load("GONE").await.unwrap());
        assert!(platform.calls().contains(&"native load GONE".to_string()));
        assert!(platform.calls().contains(&"session org.w3.clearkey temporary".to_string()));
    }

    #[tokio::test]
    async fn hdcp_policy_uses_the_profile_ceiling() {
        let shim = Shim::new(Arc::new(MockPlatform::default()), StubBus::new(|_| None), managed_profile());
        let keys = shim
            .request_media_key_system_access("com.widevine.alpha", &[video_config(&[AVC])])
            .await
            .unwrap()
            .create_media_keys()
            .await
            .unwrap();
        assert_eq!(keys.get_status_for_policy("1.4").await.unwrap(), "usable");
        assert_eq!(keys.get_status_for_policy("2.0").await.unwrap(), "usable");
        assert_eq!(keys.get_status_for_policy("2.2").await.unwrap(), "output-restricted");
    }

    #[tokio::test]
    async fn real_clearkey_is_only_counted() {
        let bus = StubBus::new(|_| None);
        let platform = MockPlatform::default();
        let shim = Shim::new(Arc::new(platform.clone()), bus.clone(), managed_profile());
        let mut session = session_for(&shim, clearkey::KEY_SYSTEM).await;

        let key = ContentKey::from_hex(KID, KEY).unwrap();
        session
            .generate_request("keyids", &clearkey::init_data(&[key.clone()]).unwrap())
            .await
            .unwrap();
        session.update(clearkey::license(&[key]).unwrap().as_bytes()).await.unwrap();
        session.close().await.unwrap();

        let sent = bus.sent();
        let names: Vec<&str> = sent.iter().map(Message::name).collect();
        assert_eq!(names, vec!["REQUEST", "RESPONSE", "CLOSE"]);
        assert!(platform.calls().contains(&format!("key {}", KID)));
    }

    #[tokio::test]
    async fn clearkey_probe_is_bounded() {
        let shim = Shim::new(Arc::new(MockPlatform::default()), StubBus::new(|_| None), managed_profile());
        assert!(shim.probe_clearkey_support(Duration::from_secs(5)).await);

        let stalled = MockPlatform {
            stall: true,
            ..Default::default()
        };
        let shim = Shim::new(Arc::new(stalled), StubBus::new(|_| None), managed_profile());
        assert!(!shim.probe_clearkey_support(Duration::from_millis(50)).await);
    }
}
