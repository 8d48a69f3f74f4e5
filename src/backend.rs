//! The privileged side of the bus.
//!
//! [`Backend`] owns the resolver, the pending-session registry and the log
//! index, and answers every [`Message`] a page context sends. Failures never
//! escape as errors: they are reported through the [`Notifier`] and the page
//! gets an empty reply.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::bus::{ChallengeRequest, Delivery, Envelope, LicenseRequestBody, LoadRequest, ManifestReport, Message, Sender};
use crate::clearkey;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::{ChallengeExtra, LicenseOutcome, SessionKey};
use crate::key::ContentKey;
use crate::logs::{Exchange, LogIndex, LogRecord, ManifestEntry};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::profile::DrmKind;
use crate::pssh::extract_widevine_pssh_b64;
use crate::registry::{PendingSession, SessionRegistry};
use crate::resolver::Resolver;
use crate::storage::{JsonFileStorage, MemoryStorage, Storage};
use crate::utils::b64_decode;

const NOTIFY_TITLE: &str = "emebridge";
const CHALLENGE_FAILED: &str = "Challenge generation failed!";
const LICENSE_FAILED: &str = "License parsing failed!";
const SEE_LOG: &str = "\nSee the backend log for details.";

/// Registry and logs move together so an insert and the log write that
/// follows it never interleave with another exchange.
#[derive(Debug)]
struct State {
    registry: SessionRegistry,
    logs: LogIndex,
}

/// Per-tab bookkeeping that has nothing to do with key exchange.
#[derive(Debug, Default)]
struct Activity {
    session_counts: HashMap<u64, u32>,
    manifests: HashMap<String, Vec<ManifestEntry>>,
    request_headers: HashMap<String, BTreeMap<String, String>>,
}

#[derive(Debug)]
pub struct Backend {
    resolver: Resolver,
    state: Mutex<State>,
    activity: Mutex<Activity>,
    notifier: Arc<dyn Notifier>,
}

impl Backend {
    pub fn new(resolver: Resolver, logs: LogIndex, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resolver,
            state: Mutex::new(State {
                registry: SessionRegistry::new(),
                logs,
            }),
            activity: Mutex::new(Activity::default()),
            notifier,
        }
    }

    /// Backend for a config: its devices, its log file and log notifications.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let storage: Arc<dyn Storage> = match &config.storage.path {
            Some(path) => Arc::new(JsonFileStorage::open(path).await?),
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(
            Resolver::from_config(config)?,
            LogIndex::new(storage),
            Arc::new(LogNotifier),
        ))
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Drain `inbox` until every connector is dropped. Each message is
    /// handled on its own task.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::Receiver<Delivery>) {
        info!("Backend listening");
        while let Some(delivery) = inbox.recv().await {
            let backend = self.clone();
            tokio::spawn(async move {
                let body = backend.dispatch(&delivery.envelope).await;
                delivery.respond(body);
            });
        }
        info!("Backend stopped");
    }

    /// Answer one message.
    pub async fn dispatch(&self, envelope: &Envelope) -> Option<String> {
        let sender = &envelope.sender;
        debug!("{} {} from tab {:?}", envelope.message.name(), envelope.request_id, sender.tab_id);
        match &envelope.message {
            Message::Request(body) => self.handle_request(sender, body.as_ref()).await,
            Message::Response(body) => self.handle_response(sender, body).await,
            Message::Load(body) => self.handle_load(sender, body).await,
            Message::Remove(session_id) => {
                self.handle_remove(sender, session_id).await;
                None
            }
            Message::Close => {
                self.session_closed(sender.tab_id).await;
                None
            }
            Message::GetProfile => {
                let view = self
                    .resolver
                    .effective_profile(sender.host().as_deref(), sender.secure_origin(), sender.incognito);
                match serde_json::to_string(&view) {
                    Ok(json) => Some(json),
                    Err(e) => {
                        error!("Could not serialize profile: {}", e);
                        None
                    }
                }
            }
            Message::GetActive(tab_id) => {
                if sender.tab_id.is_some() {
                    return None;
                }
                self.active_sessions(*tab_id).await.map(|n| n.to_string())
            }
            Message::Manifest(report) => {
                self.handle_manifest(sender, report).await;
                None
            }
        }
    }

    fn notify(&self, title: &str, message: impl Into<String>, critical: bool) {
        self.notifier.notify(Notification {
            title: title.to_string(),
            message: message.into(),
            critical,
        });
    }

    async fn handle_request(&self, sender: &Sender, body: Option<&ChallengeRequest>) -> Option<String> {
        self.session_opened(sender.tab_id).await;
        // real ClearKey only needs the accounting
        let request = body?;

        match self.generate_challenge(sender, request).await {
            Ok(challenge) if challenge.is_empty() || challenge == "null" || challenge == "bnVsbA==" => {
                self.notify(CHALLENGE_FAILED, "Backend returned an empty challenge.", false);
                None
            }
            Ok(challenge) => Some(challenge),
            Err(Error::NoDeviceSelected) => {
                self.notify(CHALLENGE_FAILED, Error::NoDeviceSelected.to_string(), false);
                None
            }
            Err(e) => {
                error!("Challenge generation error: {}", e);
                self.notify(CHALLENGE_FAILED, format!("{}{}", e, SEE_LOG), true);
                None
            }
        }
    }

    async fn generate_challenge(&self, sender: &Sender, request: &ChallengeRequest) -> Result<String> {
        let host = sender.host();
        let origin = sender.secure_origin();
        let family = match DrmKind::for_request(&request.key_system) {
            DrmKind::Playready => DrmKind::Playready,
            _ => DrmKind::Widevine,
        };

        let mut pssh = request.init_data.clone();
        if request.init_data_type == "webm"
            && request.key_system.starts_with("com.widevine.alpha")
            && !sender.incognito
        {
            if let Some(origin) = origin {
                if let Some(recovered) = self.recover_webm_pssh(origin, &request.init_data).await? {
                    debug!("Using logged PSSH for WebM key id");
                    pssh = recovered;
                }
            }
        }

        let mut extra = ChallengeExtra {
            server_cert: None,
            session_id: request.session_id.clone(),
            key_system: request.key_system.clone(),
        };
        if family == DrmKind::Widevine {
            extra.server_cert = request.server_cert.clone();
            pssh = extract_widevine_pssh_b64(&pssh);
        }

        let selection = self.resolver.resolve(host.as_deref(), family)?;
        let mut handler = self.resolver.build_handler(family, &selection)?;
        let challenge = handler.generate_challenge(&pssh, &extra).await?;
        info!("Generated {} challenge for session {}", family, request.session_id);

        let key = match family {
            DrmKind::Widevine => match b64_decode(&challenge).and_then(|c| SessionKey::from_widevine_challenge(&c)) {
                Ok(key) => key,
                Err(e) => {
                    debug!("Challenge carries no request id ({}), keying on session id", e);
                    SessionKey::Native(request.session_id.clone())
                }
            },
            _ => SessionKey::Native(request.session_id.clone()),
        };

        let displaced = {
            let mut state = self.state.lock().await;
            let displaced = state.registry.insert(
                key.clone(),
                PendingSession::new(handler, &request.key_system, origin, sender.tab_id),
            );
            state.registry.alias(&request.session_id, key);
            displaced
        };
        if let Some(mut old) = displaced {
            old.handler.close().await;
        }
        Ok(challenge)
    }

    async fn recover_webm_pssh(&self, origin: &str, init_data: &str) -> Result<Option<String>> {
        let kid_hex = hex::encode(b64_decode(init_data)?);
        let state = self.state.lock().await;
        Ok(state
            .logs
            .find_by_kid(origin, DrmKind::Widevine, &kid_hex)
            .await?
            .map(|record| record.pssh))
    }

    async fn handle_response(&self, sender: &Sender, body: &LicenseRequestBody) -> Option<String> {
        let outcome = if body.key_system == clearkey::KEY_SYSTEM {
            match parse_clearkey(&body.license) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("ClearKey license parsing error: {}", e);
                    self.notify(LICENSE_FAILED, format!("{}{}", e, SEE_LOG), true);
                    return None;
                }
            }
        } else {
            if body.session_id.is_empty() {
                return None;
            }
            let Some(mut pending) = self.take_pending(body).await else {
                error!("No handler for session {}", body.session_id);
                self.notify(LICENSE_FAILED, Error::NoSession(body.session_id.clone()).to_string(), true);
                return None;
            };
            match pending.handler.parse_license(&body.license).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("License parsing error: {}", e);
                    self.notify(LICENSE_FAILED, format!("{}{}", e, SEE_LOG), true);
                    pending.handler.close().await;
                    return None;
                }
            }
        };
        info!("Received {} keys for session {}", outcome.keys.len(), body.session_id);

        let profile = self.resolver.profile(sender.host().as_deref());
        let manifests = {
            let activity = self.activity.lock().await;
            sender
                .url
                .as_ref()
                .and_then(|url| activity.manifests.get(url))
                .cloned()
                .unwrap_or_default()
        };
        let exchange = Exchange {
            kind: outcome.kind,
            pssh: outcome.pssh.clone(),
            keys: outcome.keys.clone(),
            url: sender.url.clone(),
            origin: sender.secure_origin().map(str::to_string),
            title: sender.title.clone(),
            manifests,
            session_id: body.session_id.clone(),
            keep_session: body.persistent && profile.allow_persistence,
            incognito: sender.incognito,
        };
        {
            let state = self.state.lock().await;
            if let Err(e) = state.logs.record_exchange(exchange).await {
                warn!("Could not log exchange: {}", e);
            }
        }

        Some(json!({ "pssh": outcome.pssh, "keys": outcome.keys }).to_string())
    }

    /// Find the handler a license belongs to. A Widevine license carrying a
    /// request id only ever matches that request id; the page's session id
    /// is used for licenses without one.
    async fn take_pending(&self, body: &LicenseRequestBody) -> Option<PendingSession> {
        let license_key = b64_decode(&body.license)
            .and_then(|license| SessionKey::from_widevine_license(&license))
            .ok();
        let mut state = self.state.lock().await;
        if let Some(key) = license_key {
            return state.registry.take(&key);
        }
        if let Some(pending) = state.registry.take_by_alias(&body.session_id) {
            return Some(pending);
        }
        state.registry.take(&SessionKey::Native(body.session_id.clone()))
    }

    /// Persistent license use needs a secure origin outside private contexts.
    fn persistent_origin<'a>(&self, sender: &'a Sender) -> Option<&'a str> {
        let Some(origin) = sender.secure_origin() else {
            self.notify(
                NOTIFY_TITLE,
                "Persistent license usage has been blocked on a page with opaque origin.",
                false,
            );
            return None;
        };
        if sender.incognito {
            self.notify(NOTIFY_TITLE, "Persistent license usage has been blocked in incognito mode.", false);
            return None;
        }
        Some(origin)
    }

    async fn handle_load(&self, sender: &Sender, body: &LoadRequest) -> Option<String> {
        let origin = self.persistent_origin(sender)?;
        self.session_opened(sender.tab_id).await;

        let found = {
            let state = self.state.lock().await;
            state.logs.find_by_session(origin, &body.session_id).await
        };
        match found {
            Ok(Some(record)) => Some(json!({ "pssh": record.pssh, "keys": record.keys }).to_string()),
            Ok(None) => {
                self.notify(
                    "Persistent session not found",
                    "Web page tried to load a persistent session that does not exist.",
                    false,
                );
                None
            }
            Err(e) => {
                error!("Log lookup failed: {}", e);
                None
            }
        }
    }

    async fn handle_remove(&self, sender: &Sender, session_id: &str) {
        let Some(origin) = self.persistent_origin(sender) else {
            return;
        };
        let state = self.state.lock().await;
        match state.logs.remove_session(origin, session_id).await {
            Ok(true) => debug!("Removed persistent session {}", session_id),
            Ok(false) => debug!("No persistent session {} to remove", session_id),
            Err(e) => error!("Could not remove session {}: {}", session_id, e),
        }
    }

    async fn handle_manifest(&self, sender: &Sender, report: &ManifestReport) {
        let mut activity = self.activity.lock().await;
        let entry = ManifestEntry {
            kind: report.kind,
            url: report.url.clone(),
            headers: activity.request_headers.get(&report.url).cloned().unwrap_or_default(),
        };
        let entries = activity
            .manifests
            .entry(sender.url.clone().unwrap_or_default())
            .or_default();
        if !entries.iter().any(|e| e.url == report.url) {
            entries.push(entry);
        }
    }

    async fn session_opened(&self, tab_id: Option<u64>) {
        if let Some(tab_id) = tab_id {
            *self.activity.lock().await.session_counts.entry(tab_id).or_default() += 1;
        }
    }

    async fn session_closed(&self, tab_id: Option<u64>) {
        let Some(tab_id) = tab_id else {
            return;
        };
        let mut activity = self.activity.lock().await;
        if let Some(count) = activity.session_counts.get_mut(&tab_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                activity.session_counts.remove(&tab_id);
            }
        }
    }

    /// Number of sessions a tab has open, if any.
    pub async fn active_sessions(&self, tab_id: u64) -> Option<u32> {
        self.activity.lock().await.session_counts.get(&tab_id).copied()
    }

    /// Forget a tab's accounting after a top-level navigation or tab close.
    pub async fn reset_tab(&self, tab_id: u64) {
        self.activity.lock().await.session_counts.remove(&tab_id);
    }

    /// Remember the headers of the first GET to `url`, minus the ones the
    /// browser adds on its own.
    pub async fn record_request_headers(&self, method: &str, url: &str, headers: &[(String, String)]) {
        if method != "GET" {
            return;
        }
        let mut activity = self.activity.lock().await;
        if activity.request_headers.contains_key(url) {
            return;
        }
        let kept = headers
            .iter()
            .filter(|(name, _)| keep_header(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        activity.request_headers.insert(url.to_string(), kept);
    }

    /// Drop every log recorded from private contexts.
    pub async fn end_private_session(&self) -> Result<()> {
        let state = self.state.lock().await;
        state.logs.clear_private().await
    }

    /// Close and drop exchanges whose license never came.
    pub async fn evict_stale(&self, max_age: Duration) -> usize {
        let stale = self.state.lock().await.registry.evict_older_than(max_age);
        let count = stale.len();
        for mut pending in stale {
            pending.handler.close().await;
        }
        count
    }

    pub async fn pending_sessions(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Every persistent log record.
    pub async fn records(&self) -> Result<Vec<LogRecord>> {
        self.state.lock().await.logs.all().await
    }
}

fn keep_header(name: &str) -> bool {
    !(name.starts_with("sec-ch-ua")
        || name.starts_with("Sec-Fetch")
        || name.starts_with("Accept-")
        || name.starts_with("Host")
        || name == "Connection")
}

/// Keys of a ClearKey license the page passed through untouched.
fn parse_clearkey(license_b64: &str) -> Result<LicenseOutcome> {
    let keys: Vec<ContentKey> = clearkey::parse_license(&b64_decode(license_b64)?)?;
    Ok(LicenseOutcome {
        kind: DrmKind::Clearkey,
        pssh: clearkey::content_id(&keys)?,
        keys,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use prost::Message as _;
    use serde_json::Value;

    use super::*;
    use crate::cdm::tests::{serve_license, widevine_pssh_box, KEY, KID};
    use crate::config::{CredentialStore, GLOBAL_PROFILE};
    use crate::device::tests::test_device;
    use crate::device::{Device, DeviceType};
    use crate::license_protocol::license_request::content_identification::ContentIdVariant;
    use crate::license_protocol::{LicenseRequest, SignedMessage};
    use crate::logs::ManifestKind;
    use crate::notify::RecordingNotifier;
    use crate::profile::Profile;
    use crate::utils::b64_encode;

    pub(crate) const ORIGIN: &str = "https://www.example.com";

    pub(crate) fn page() -> Sender {
        Sender {
            tab_id: Some(7),
            url: Some("https://www.example.com/watch/1".to_string()),
            origin: Some(ORIGIN.to_string()),
            incognito: false,
            title: Some("Episode 1".to_string()),
        }
    }

    /// A backend with one local Widevine device named `pixel`.
    pub(crate) fn test_backend(allow_persistence: bool) -> (Backend, Device, RecordingNotifier) {
        let device = test_device(DeviceType::Chrome);
        let mut profile = Profile::default();
        profile.widevine.device.local = Some("pixel".to_string());
        profile.allow_persistence = allow_persistence;

        let mut profiles = BTreeMap::new();
        profiles.insert(GLOBAL_PROFILE.to_string(), profile);
        let mut credentials = CredentialStore::default();
        credentials.widevine.insert("pixel".to_string(), device.clone());

        let notifier = RecordingNotifier::new();
        let backend = Backend::new(
            Resolver::new(profiles, credentials),
            LogIndex::default(),
            Arc::new(notifier.clone()),
        );
        (backend, device, notifier)
    }

    async fn send(backend: &Backend, sender: &Sender, message: Message) -> Option<String> {
        backend.dispatch(&Envelope::new(sender.clone(), message)).await
    }

    fn challenge_request(session_id: &str) -> Message {
        Message::Request(Some(ChallengeRequest {
            key_system: "com.widevine.alpha".to_string(),
            session_id: session_id.to_string(),
            init_data_type: "cenc".to_string(),
            init_data: b64_encode(widevine_pssh_box()),
            server_cert: None,
        }))
    }

    fn license_response(session_id: &str, license: &[u8], persistent: bool) -> Message {
        Message::Response(LicenseRequestBody {
            key_system: "com.widevine.alpha".to_string(),
            session_id: session_id.to_string(),
            license: b64_encode(license),
            persistent,
        })
    }

    fn reply_keys(reply: &str) -> Vec<ContentKey> {
        let value: Value = serde_json::from_str(reply).unwrap();
        serde_json::from_value(value["keys"].clone()).unwrap()
    }

    #[tokio::test]
    async fn interleaved_exchanges_correlate_on_request_id() {
        let (backend, device, notifier) = test_backend(false);
        let sender = page();

        let first = b64_decode(&send(&backend, &sender, challenge_request("AAAA")).await.unwrap()).unwrap();
        let second = b64_decode(&send(&backend, &sender, challenge_request("BBBB")).await.unwrap()).unwrap();
        assert_eq!(backend.pending_sessions().await, 2);

        let key_two = "00112233445566778899aabbccddeeff";
        let license_two = serve_license(&device, &second, &[(KID, key_two)]);
        let license_one = serve_license(&device, &first, &[(KID, KEY)]);

        // the session ids are swapped on purpose: the license decides
        let reply = send(&backend, &sender, license_response("AAAA", &license_two, false)).await.unwrap();
        assert_eq!(reply_keys(&reply)[0].k, key_two);
        let reply = send(&backend, &sender, license_response("BBBB", &license_one, false)).await.unwrap();
        assert_eq!(reply_keys(&reply)[0].k, KEY);

        assert_eq!(backend.pending_sessions().await, 0);
        assert!(notifier.take().is_empty());

        let records = backend.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, DrmKind::Widevine);
        assert_eq!(records[0].origin.as_deref(), Some(ORIGIN));
        assert_eq!(records[0].pssh, b64_encode(widevine_pssh_box()));
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let (backend, _, notifier) = test_backend(false);
        let reply = send(&backend, &page(), license_response("CAFE", b"not a license", false)).await;
        assert_eq!(reply, None);
        let seen = notifier.take();
        assert_eq!(seen[0].title, "License parsing failed!");
        assert_eq!(seen[0].message, "No saved device handler found for session CAFE");
    }

    #[tokio::test]
    async fn foreign_request_id_leaves_the_pending_session_alone() {
        let (backend, device, notifier) = test_backend(false);
        let (elsewhere, _, _) = test_backend(false);
        let sender = page();

        let ours = b64_decode(&send(&backend, &sender, challenge_request("AAAA")).await.unwrap()).unwrap();
        let theirs = b64_decode(&send(&elsewhere, &sender, challenge_request("ZZZZ")).await.unwrap()).unwrap();
        let foreign = serve_license(&device, &theirs, &[(KID, KEY)]);

        let reply = send(&backend, &sender, license_response("AAAA", &foreign, false)).await;
        assert_eq!(reply, None);
        assert_eq!(backend.pending_sessions().await, 1);
        let seen = notifier.take();
        assert_eq!(seen[0].title, "License parsing failed!");
        assert_eq!(seen[0].message, "No saved device handler found for session AAAA");

        let license = serve_license(&device, &ours, &[(KID, KEY)]);
        let reply = send(&backend, &sender, license_response("AAAA", &license, false)).await.unwrap();
        assert_eq!(reply_keys(&reply)[0].k, KEY);
        assert_eq!(backend.pending_sessions().await, 0);
    }

    #[tokio::test]
    async fn no_device_selected_is_reported() {
        let (backend, _, notifier) = test_backend(false);
        let mut request = challenge_request("AAAA");
        if let Message::Request(Some(body)) = &mut request {
            body.key_system = "com.microsoft.playready.recommendation".to_string();
        }
        assert_eq!(send(&backend, &page(), request).await, None);
        let seen = notifier.take();
        assert_eq!(seen[0].title, "Challenge generation failed!");
        assert_eq!(seen[0].message, "No device handler was selected");
    }

    #[tokio::test]
    async fn handler_errors_are_reported_with_a_hint() {
        let (backend, _, notifier) = test_backend(false);
        let mut request = challenge_request("AAAA");
        if let Message::Request(Some(body)) = &mut request {
            body.init_data = String::new();
        }
        assert_eq!(send(&backend, &page(), request).await, None);
        let seen = notifier.take();
        assert!(seen[0].critical);
        assert!(seen[0].message.starts_with("Invalid init data: No PSSH data in challenge\n"));
    }

    #[tokio::test]
    async fn clearkey_licenses_are_logged_by_key_ids() {
        let (backend, _, _) = test_backend(false);
        let keys = vec![ContentKey::from_hex(KID, KEY).unwrap()];
        let license = clearkey::license(&keys).unwrap();
        let message = Message::Response(LicenseRequestBody {
            key_system: clearkey::KEY_SYSTEM.to_string(),
            session_id: String::new(),
            license: b64_encode(license),
            persistent: false,
        });
        let reply = send(&backend, &page(), message).await.unwrap();
        assert_eq!(reply_keys(&reply), keys);

        let records = backend.records().await.unwrap();
        assert_eq!(records[0].kind, DrmKind::Clearkey);
        assert_eq!(records[0].pssh, clearkey::content_id(&keys).unwrap());
    }

    #[tokio::test]
    async fn persistent_sessions_load_and_remove() {
        let (backend, device, notifier) = test_backend(true);
        let sender = page();
        let challenge = b64_decode(&send(&backend, &sender, challenge_request("P1")).await.unwrap()).unwrap();
        let license = serve_license(&device, &challenge, &[(KID, KEY)]);
        send(&backend, &sender, license_response("P1", &license, true)).await.unwrap();

        let load = |id: &str| {
            Message::Load(LoadRequest {
                key_system: "com.widevine.alpha".to_string(),
                session_id: id.to_string(),
            })
        };
        let reply = send(&backend, &sender, load("P1")).await.unwrap();
        assert_eq!(reply_keys(&reply)[0].k, KEY);

        send(&backend, &sender, Message::Remove("P1".to_string())).await;
        assert_eq!(send(&backend, &sender, load("P1")).await, None);
        assert_eq!(notifier.take()[0].title, "Persistent session not found");
    }

    #[tokio::test]
    async fn persistence_is_blocked_without_secure_origin() {
        let (backend, _, notifier) = test_backend(true);
        let load = Message::Load(LoadRequest {
            key_system: "com.widevine.alpha".to_string(),
            session_id: "P1".to_string(),
        });

        let opaque = Sender {
            origin: Some("http://www.example.com".to_string()),
            ..page()
        };
        assert_eq!(send(&backend, &opaque, load.clone()).await, None);
        let private = Sender {
            incognito: true,
            ..page()
        };
        assert_eq!(send(&backend, &private, load).await, None);

        let seen = notifier.take();
        assert!(seen[0].message.contains("opaque origin"));
        assert!(seen[1].message.contains("incognito mode"));
        // blocked loads are not counted as active sessions
        assert_eq!(backend.active_sessions(7).await, None);
    }

    #[tokio::test]
    async fn active_sessions_are_counted_per_tab() {
        let (backend, _, _) = test_backend(false);
        let sender = page();
        send(&backend, &sender, Message::Request(None)).await;
        send(&backend, &sender, Message::Request(None)).await;
        assert_eq!(backend.active_sessions(7).await, Some(2));

        let popup = Sender::default();
        assert_eq!(send(&backend, &popup, Message::GetActive(7)).await.as_deref(), Some("2"));
        assert_eq!(send(&backend, &sender, Message::GetActive(7)).await, None);

        send(&backend, &sender, Message::Close).await;
        send(&backend, &sender, Message::Close).await;
        send(&backend, &sender, Message::Close).await;
        assert_eq!(backend.active_sessions(7).await, None);

        send(&backend, &sender, Message::Request(None)).await;
        backend.reset_tab(7).await;
        assert_eq!(backend.active_sessions(7).await, None);
    }

    #[tokio::test]
    async fn manifests_are_attached_to_logs() {
        let (backend, device, _) = test_backend(false);
        let sender = page();
        let manifest_url = "https://cdn.example.com/stream.mpd";
        backend
            .record_request_headers(
                "GET",
                manifest_url,
                &[
                    ("Authorization".to_string(), "Bearer t".to_string()),
                    ("Sec-Fetch-Mode".to_string(), "cors".to_string()),
                    ("Connection".to_string(), "keep-alive".to_string()),
                ],
            )
            .await;
        backend
            .record_request_headers("GET", manifest_url, &[("X-Later".to_string(), "1".to_string())])
            .await;

        let report = Message::Manifest(ManifestReport {
            kind: ManifestKind::Dash,
            url: manifest_url.to_string(),
        });
        send(&backend, &sender, report.clone()).await;
        send(&backend, &sender, report).await;

        let challenge = b64_decode(&send(&backend, &sender, challenge_request("M1")).await.unwrap()).unwrap();
        let license = serve_license(&device, &challenge, &[(KID, KEY)]);
        send(&backend, &sender, license_response("M1", &license, false)).await.unwrap();

        let record = &backend.records().await.unwrap()[0];
        assert_eq!(record.manifests.len(), 1);
        let headers = &record.manifests[0].headers;
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer t"));
        assert_eq!(headers.len(), 1);
    }

    #[tokio::test]
    async fn webm_key_ids_reuse_a_logged_pssh() {
        let (backend, device, _) = test_backend(false);
        let sender = page();
        let challenge = b64_decode(&send(&backend, &sender, challenge_request("W1")).await.unwrap()).unwrap();
        let license = serve_license(&device, &challenge, &[(KID, KEY)]);
        send(&backend, &sender, license_response("W1", &license, false)).await.unwrap();

        let webm = Message::Request(Some(ChallengeRequest {
            key_system: "com.widevine.alpha".to_string(),
            session_id: "W2".to_string(),
            init_data_type: "webm".to_string(),
            init_data: b64_encode(hex::decode(KID).unwrap()),
            server_cert: None,
        }));
        let challenge = b64_decode(&send(&backend, &sender, webm).await.unwrap()).unwrap();
        let signed = SignedMessage::decode(challenge.as_slice()).unwrap();
        let request = LicenseRequest::decode(signed.msg.unwrap().as_slice()).unwrap();
        assert!(matches!(
            request.content_id.unwrap().content_id_variant,
            Some(ContentIdVariant::WidevinePsshData(_))
        ));
    }

    #[tokio::test]
    async fn private_logs_end_with_the_session() {
        let (backend, device, _) = test_backend(false);
        let sender = Sender {
            incognito: true,
            ..page()
        };
        let challenge = b64_decode(&send(&backend, &sender, challenge_request("I1")).await.unwrap()).unwrap();
        let license = serve_license(&device, &challenge, &[(KID, KEY)]);
        send(&backend, &sender, license_response("I1", &license, false)).await.unwrap();

        assert!(backend.records().await.unwrap().is_empty());
        backend.end_private_session().await.unwrap();
    }

    #[tokio::test]
    async fn profile_reply_reflects_the_sender() {
        let (backend, _, _) = test_backend(true);
        let reply = send(&backend, &page(), Message::GetProfile).await.unwrap();
        let view: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(view["widevine"]["enabled"], true);
        assert_eq!(view["playready"]["enabled"], false);
        assert_eq!(view["allowPersistence"], true);

        let private = Sender {
            incognito: true,
            ..page()
        };
        let reply = send(&backend, &private, Message::GetProfile).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&reply).unwrap()["allowPersistence"], false);
    }

    #[tokio::test]
    async fn serves_a_bus() {
        let (backend, _, _) = test_backend(false);
        let (connector, inbox) = crate::bus::channel(8);
        tokio::spawn(Arc::new(backend).serve(inbox));

        use crate::bus::Bus;
        let client = connector.client(page());
        let reply = client.request(Message::GetProfile).await.unwrap();
        assert!(reply.unwrap().contains("\"blockDisabled\":false"));
    }

    #[tokio::test]
    async fn stale_exchanges_are_evicted() {
        let (backend, _, _) = test_backend(false);
        send(&backend, &page(), challenge_request("S1")).await.unwrap();
        assert_eq!(backend.evict_stale(Duration::from_secs(3600)).await, 0);
        assert_eq!(backend.evict_stale(Duration::ZERO).await, 1);
        assert_eq!(backend.pending_sessions().await, 0);
    }
}
