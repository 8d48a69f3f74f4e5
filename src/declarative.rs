//! Declarative remote API engine.
//!
//! An [`ApiConfig`] describes a remote license API as two ordered lists of
//! HTTP steps: the ones that produce a challenge and the ones that turn a
//! license into keys. Each step names, as dotted JSON paths, where session
//! state is injected into the request body and where values are read back
//! out of the response. Steps run strictly in order because later steps
//! consume what earlier ones extracted.
//!
//! The fixed pywidevine/pyplayready `serve` API is itself expressed as two
//! presets, [`ApiConfig::widevine_serve`] and [`ApiConfig::playready_serve`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::handler::{ChallengeExtra, DrmHandler, LicenseOutcome};
use crate::key::ContentKey;
use crate::playready::header::build_key_message;
use crate::profile::DrmKind;
use crate::pssh::flip_kid_hex;
use crate::utils::b64_decode;

/// Header value replaced by the configured secret.
pub const SECRET_PLACEHOLDER: &str = "{secret}";

/// A JSON path: either dotted (`"data.session_id"`) or explicit segments.
///
/// An empty segment list addresses the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Dotted(String),
    Segments(Vec<String>),
}

impl KeyPath {
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Self::Dotted(path) => path.split('.').collect(),
            Self::Segments(segments) => segments.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::Dotted(path.to_string())
    }
}

/// Walk `path` into `object`.
///
/// Any missing or falsy step (`null`, `false`, `0`, `""`) yields `None`.
/// Numeric segments index into arrays.
pub fn get_nested_property<'a>(object: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return Some(object);
    };
    let next = match object {
        Value::Object(map) => map.get(*head)?,
        Value::Array(items) => items.get(head.parse::<usize>().ok()?)?,
        _ => return None,
    };
    if is_falsy(next) {
        return None;
    }
    get_nested_property(next, rest)
}

/// Store `value` at `path`, creating (or replacing non-object) intermediates.
pub fn set_nested_property(object: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if !object.is_object() {
        *object = Value::Object(Map::new());
    }
    if let Value::Object(map) = object {
        if rest.is_empty() {
            map.insert(head.to_string(), value);
        } else {
            set_nested_property(map.entry(head.to_string()).or_insert(Value::Null), rest, value);
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_none_or(|f| f == 0.0 || f.is_nan()),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Render a scalar the way it would be interpolated into text.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One HTTP request in a sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// HTTP method; POST when absent. Only POST carries a body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Appended to the base URL. `{device_name}` is substituted everywhere and
    /// the first `%s` becomes the remote session id.
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Body template the injected values are written into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_obj: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pssh_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert_key_name: Option<KeyPath>,
    /// Response path of the challenge in generate steps; body path the
    /// challenge is injected at in parse steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key_name: Option<KeyPath>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_res_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_keys_key_name: Option<KeyPath>,
    /// Overrides [`ApiConfig::message_key`] for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<KeyPath>,

    /// Skip the step when no service certificate is available.
    #[serde(default, skip_serializing_if = "is_false")]
    pub server_cert_only: bool,
    /// Inject the license base64-decoded rather than as base64.
    #[serde(default, rename = "decodeB64", skip_serializing_if = "is_false")]
    pub decode_b64: bool,
    /// Base64-encode the extracted challenge.
    #[serde(default, rename = "encodeB64", skip_serializing_if = "is_false")]
    pub encode_b64: bool,
    /// Wrap the extracted challenge in a `PlayReadyKeyMessage`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub bundle_in_key_message: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Step {
    pub fn get(url: &str) -> Self {
        Self {
            method: Some("GET".to_string()),
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn post(url: &str) -> Self {
        Self {
            method: Some("POST".to_string()),
            url: url.to_string(),
            ..Default::default()
        }
    }

    fn http_method(&self) -> Result<Method> {
        let name = self.method.as_deref().unwrap_or("POST").to_uppercase();
        Method::from_bytes(name.as_bytes())
            .map_err(|_| Error::Declarative(format!("Invalid HTTP method: {}", name)))
    }
}

/// Capture-group based key extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexRule {
    /// Pattern with two capture groups, applied globally to the response text.
    pub data: String,
    /// Group 1 is the key and group 2 the key id; reversed when false.
    #[serde(default)]
    pub key_first: bool,
}

/// How the extracted content-keys value becomes `{kid, k}` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyParseRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<RegexRule>,
    /// Path of the key array; the value itself when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_array_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_key_name: Option<KeyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid_key_name: Option<KeyPath>,
    /// Values are base64 rather than hex.
    #[serde(default, skip_serializing_if = "is_false")]
    pub base64: bool,
    /// Apply the GUID byte-order flip to both values.
    #[serde(default, skip_serializing_if = "is_false")]
    pub needs_flipping: bool,
}

impl KeyParseRules {
    pub fn parse_keys(&self, data: &Value) -> Result<Vec<ContentKey>> {
        // (k, kid) as found
        let mut pairs: Vec<(String, String)> = Vec::new();

        if let Some(rule) = &self.regex {
            let re = Regex::new(&rule.data)?;
            let text = value_to_text(data);
            for caps in re.captures_iter(&text) {
                let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
                let (first, second) = (group(1), group(2));
                if rule.key_first {
                    pairs.push((first, second));
                } else {
                    pairs.push((second, first));
                }
            }
        } else {
            let items = match &self.main_array_key_name {
                Some(path) => get_nested_property(data, &path.segments()),
                None => Some(data),
            }
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Declarative("Content keys are not an array".to_string()))?;

            let field = |item: &Value, path: &Option<KeyPath>| -> Result<String> {
                path.as_ref()
                    .and_then(|p| get_nested_property(item, &p.segments()))
                    .map(value_to_text)
                    .ok_or_else(|| Error::Declarative("Key entry is missing its key or key id".to_string()))
            };
            for item in items {
                pairs.push((field(item, &self.key_key_name)?, field(item, &self.kid_key_name)?));
            }
        }

        pairs
            .into_iter()
            .map(|(k, kid)| {
                let (mut k, mut kid) = if self.base64 {
                    (hex::encode(b64_decode(&k)?), hex::encode(b64_decode(&kid)?))
                } else {
                    (k, kid)
                };
                if self.needs_flipping {
                    k = flip_kid_hex(&k)?;
                    kid = flip_kid_hex(&kid)?;
                }
                ContentKey::from_hex(&kid, &k)
            })
            .collect()
    }
}

/// A declarative API description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Sent with every step; a value of `{secret}` is replaced by the secret.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Path of the server's human-readable message in every response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<KeyPath>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub generate_challenge: Vec<Step>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub parse_license: Vec<Step>,
    /// Releases the remote session once the exchange is over or abandoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<Step>,
    #[serde(default)]
    pub key_parse_rules: KeyParseRules,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<Step>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Step>),
        One(Box<Step>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(steps) => steps,
        OneOrMany::One(step) => vec![*step],
    })
}

impl ApiConfig {
    /// The pywidevine `serve` API.
    pub fn widevine_serve() -> Self {
        Self {
            headers: serve_headers(),
            message_key: Some("message".into()),
            generate_challenge: vec![
                Step {
                    session_id_res_key_name: Some("data.session_id".into()),
                    ..Step::get("/{device_name}/open")
                },
                Step {
                    session_id_key_name: Some("session_id".into()),
                    server_cert_key_name: Some("certificate".into()),
                    server_cert_only: true,
                    ..Step::post("/{device_name}/set_service_certificate")
                },
                Step {
                    body_obj: Some(serde_json::json!({ "privacy_mode": true })),
                    session_id_key_name: Some("session_id".into()),
                    pssh_key_name: Some("init_data".into()),
                    challenge_key_name: Some("data.challenge_b64".into()),
                    ..Step::post("/{device_name}/get_license_challenge/STREAMING")
                },
            ],
            parse_license: vec![
                Step {
                    session_id_key_name: Some("session_id".into()),
                    license_key_name: Some("license_message".into()),
                    ..Step::post("/{device_name}/parse_license")
                },
                Step {
                    session_id_key_name: Some("session_id".into()),
                    content_keys_key_name: Some("data.keys".into()),
                    ..Step::post("/{device_name}/get_keys/CONTENT")
                },
            ],
            close: Some(Step::get("/{device_name}/close/%s")),
            key_parse_rules: serve_key_rules(),
        }
    }

    /// The pyplayready `serve` API.
    pub fn playready_serve() -> Self {
        Self {
            headers: serve_headers(),
            message_key: Some("message".into()),
            generate_challenge: vec![
                Step {
                    session_id_res_key_name: Some("data.session_id".into()),
                    ..Step::get("/{device_name}/open")
                },
                Step {
                    body_obj: Some(serde_json::json!({ "privacy_mode": true })),
                    session_id_key_name: Some("session_id".into()),
                    pssh_key_name: Some("init_data".into()),
                    challenge_key_name: Some("data.challenge".into()),
                    encode_b64: true,
                    bundle_in_key_message: true,
                    ..Step::post("/{device_name}/get_license_challenge")
                },
            ],
            parse_license: vec![
                Step {
                    session_id_key_name: Some("session_id".into()),
                    license_key_name: Some("license_message".into()),
                    decode_b64: true,
                    ..Step::post("/{device_name}/parse_license")
                },
                Step {
                    session_id_key_name: Some("session_id".into()),
                    content_keys_key_name: Some("data.keys".into()),
                    ..Step::post("/{device_name}/get_keys")
                },
            ],
            close: Some(Step::get("/{device_name}/close/%s")),
            key_parse_rules: serve_key_rules(),
        }
    }

    /// The serve preset for a DRM family.
    pub fn serve_preset(kind: DrmKind) -> Self {
        match kind {
            DrmKind::Playready => Self::playready_serve(),
            _ => Self::widevine_serve(),
        }
    }

    /// Replace top-level fields of `self` with those present in `overrides`.
    pub fn with_overrides(self, overrides: &Map<String, Value>) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self);
        }
        let mut merged = serde_json::to_value(&self)?;
        if let Value::Object(map) = &mut merged {
            for (key, value) in overrides {
                map.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }
}

fn serve_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Secret-Key".to_string(), SECRET_PLACEHOLDER.to_string()),
    ])
}

fn serve_key_rules() -> KeyParseRules {
    KeyParseRules {
        key_key_name: Some("key".into()),
        kid_key_name: Some("key_id".into()),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Generate,
    Parse,
    Close,
}

/// State of one exchange driven through an [`ApiConfig`].
#[derive(Debug)]
pub struct ApiSession {
    config: ApiConfig,
    base_url: String,
    device_name: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
    session_id: Option<Value>,
    pssh: Option<String>,
    server_cert: Option<String>,
    challenge: Option<String>,
    content_keys: Option<Value>,
    last_message: Option<String>,
    closed: bool,
}

impl ApiSession {
    pub fn new(config: ApiConfig, base_url: &str, device_name: &str, secret: Option<&str>) -> Result<Self> {
        let secret = secret.filter(|s| !s.is_empty());
        let headers = config
            .headers
            .iter()
            .filter_map(|(name, value)| {
                if value == SECRET_PLACEHOLDER {
                    secret.map(|s| (name.clone(), s.to_string()))
                } else {
                    Some((name.clone(), value.clone()))
                }
            })
            .collect();
        let client = reqwest::Client::builder()
            .user_agent(concat!("emebridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_name: device_name.to_string(),
            headers,
            client,
            session_id: None,
            pssh: None,
            server_cert: None,
            challenge: None,
            content_keys: None,
            last_message: None,
            closed: false,
        })
    }

    /// Last message the server put at the configured message path.
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref().filter(|m| !m.is_empty())
    }

    /// Remote session id as text, once a step has returned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.as_ref().map(value_to_text)
    }

    pub fn key_parse_rules(&self) -> &KeyParseRules {
        &self.config.key_parse_rules
    }

    /// Run the generate steps and return the challenge.
    pub async fn generate_challenge(&mut self, pssh: &str, server_cert: Option<&str>) -> Result<String> {
        self.pssh = Some(pssh.to_string());
        self.server_cert = server_cert.map(str::to_string);

        let steps = self.config.generate_challenge.clone();
        for step in &steps {
            if step.server_cert_only && self.server_cert.is_none() {
                trace!("Skipping certificate-only step {}", step.url);
                continue;
            }
            let response = self.send(step, Phase::Generate, None).await?;
            self.extract_session_id(step, &response)?;

            if let Some(path) = &step.challenge_key_name {
                let mut challenge = get_nested_property(&response, &path.segments())
                    .map(value_to_text)
                    .ok_or_else(|| Error::Declarative("Server did not return a challenge".to_string()))?;
                if step.encode_b64 {
                    challenge = btoa(&challenge)?;
                }
                if step.bundle_in_key_message {
                    challenge = build_key_message(&challenge);
                }
                self.challenge = Some(challenge);
            }
        }

        self.challenge
            .clone()
            .ok_or_else(|| Error::Declarative("Server did not return a challenge".to_string()))
    }

    /// Run the parse steps and return whatever the content-keys path held.
    pub async fn parse_license(&mut self, license_b64: &str) -> Result<Option<Value>> {
        let steps = self.config.parse_license.clone();
        for step in &steps {
            let response = self.send(step, Phase::Parse, Some(license_b64)).await?;
            self.extract_session_id(step, &response)?;
            if let Some(path) = &step.content_keys_key_name {
                self.content_keys = get_nested_property(&response, &path.segments()).cloned();
            }
        }
        Ok(self.content_keys.clone())
    }

    /// Run the close step for the remote session, at most once.
    ///
    /// Nothing is sent before the server handed out a session id.
    pub async fn close(&mut self) -> Result<()> {
        let Some(step) = self.config.close.clone() else {
            return Ok(());
        };
        if self.closed || self.session_id.is_none() {
            return Ok(());
        }
        self.closed = true;
        self.send(&step, Phase::Close, None).await?;
        Ok(())
    }

    async fn send(&mut self, step: &Step, phase: Phase, license_b64: Option<&str>) -> Result<Value> {
        let method = step.http_method()?;
        let session_id = self.session_id().unwrap_or_default();
        let url = format!(
            "{}{}",
            self.base_url,
            step.url
                .replace("{device_name}", &self.device_name)
                .replacen("%s", &session_id, 1)
        );

        let mut headers = self.headers.clone();
        headers.extend(step.headers.clone());

        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if method == Method::POST {
            let body = self.request_body(step, phase, license_b64)?;
            request = request.body(serde_json::to_string(&body)?);
        }

        debug!("{} {}", method, url);
        let text = request.send().await?.text().await?;
        let response: Value = serde_json::from_str(&text)?;

        if let Some(path) = step.message_key.as_ref().or(self.config.message_key.as_ref()) {
            self.last_message = get_nested_property(&response, &path.segments()).map(value_to_text);
        }
        Ok(response)
    }

    fn request_body(&self, step: &Step, phase: Phase, license_b64: Option<&str>) -> Result<Value> {
        let mut body = step.body_obj.clone().unwrap_or_else(|| Value::Object(Map::new()));
        let text = |value: &Option<String>| value.clone().map_or(Value::Null, Value::String);

        if let Some(path) = &step.session_id_key_name {
            set_nested_property(&mut body, &path.segments(), self.session_id.clone().unwrap_or(Value::Null));
        }
        if let Some(path) = &step.pssh_key_name {
            set_nested_property(&mut body, &path.segments(), text(&self.pssh));
        }
        if let Some(path) = &step.server_cert_key_name {
            set_nested_property(&mut body, &path.segments(), text(&self.server_cert));
        }
        if phase == Phase::Parse {
            if let Some(path) = &step.challenge_key_name {
                set_nested_property(&mut body, &path.segments(), text(&self.challenge));
            }
            if let (Some(path), Some(license)) = (&step.license_key_name, license_b64) {
                let license = if step.decode_b64 {
                    atob(license)?
                } else {
                    license.to_string()
                };
                set_nested_property(&mut body, &path.segments(), Value::String(license));
            }
        }
        Ok(body)
    }

    fn extract_session_id(&mut self, step: &Step, response: &Value) -> Result<()> {
        if let Some(path) = &step.session_id_res_key_name {
            self.session_id = get_nested_property(response, &path.segments()).cloned();
            if self.session_id.is_none() {
                return Err(Error::Declarative("Server did not return a session ID".to_string()));
            }
        }
        Ok(())
    }
}

/// Base64-decode into a string of Latin-1 code points.
fn atob(data: &str) -> Result<String> {
    Ok(b64_decode(data)?.into_iter().map(char::from).collect())
}

/// Base64-encode a string of Latin-1 code points.
fn btoa(data: &str) -> Result<String> {
    let bytes = data
        .chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| Error::Declarative("Challenge contains characters outside Latin-1".to_string()))?;
    Ok(crate::utils::b64_encode(bytes))
}

/// A user-defined handler backed by a declarative API description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomHandlerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// DRM family the handler produces challenges for.
    #[serde(rename = "type", default)]
    pub kind: DrmKind,
    #[serde(default)]
    pub host: String,
    #[serde(default, alias = "name")]
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Start from the serve preset of this family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<DrmKind>,
    /// Full API description, or top-level overrides of the preset.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub sg_api_conf: Map<String, Value>,
    #[serde(default)]
    pub disabled: bool,
}

impl CustomHandlerConfig {
    pub fn api_config(&self) -> Result<ApiConfig> {
        match self.preset {
            Some(kind) => ApiConfig::serve_preset(kind).with_overrides(&self.sg_api_conf),
            None if self.sg_api_conf.is_empty() => Err(Error::Declarative(
                "Custom handler has no API description".to_string(),
            )),
            None => Ok(serde_json::from_value(Value::Object(self.sg_api_conf.clone()))?),
        }
    }
}

/// [`DrmHandler`] driving an [`ApiSession`].
#[derive(Debug)]
pub struct DeclarativeHandler {
    kind: DrmKind,
    session: ApiSession,
    pssh: Option<String>,
}

impl DeclarativeHandler {
    pub fn new(kind: DrmKind, config: ApiConfig, base_url: &str, device_name: &str, secret: Option<&str>) -> Result<Self> {
        Ok(Self {
            kind,
            session: ApiSession::new(config, base_url, device_name, secret)?,
            pssh: None,
        })
    }

    pub fn from_custom(custom: &CustomHandlerConfig) -> Result<Self> {
        Self::new(
            custom.kind,
            custom.api_config()?,
            &custom.host,
            &custom.device_name,
            custom.secret.as_deref(),
        )
    }

    pub fn session(&self) -> &ApiSession {
        &self.session
    }
}

#[async_trait]
impl DrmHandler for DeclarativeHandler {
    fn kind(&self) -> DrmKind {
        self.kind
    }

    async fn generate_challenge(&mut self, init_data_b64: &str, extra: &ChallengeExtra) -> Result<String> {
        if init_data_b64.is_empty() {
            return Err(Error::InvalidInitData("No PSSH data in challenge".to_string()));
        }
        self.pssh = Some(init_data_b64.to_string());
        self.session
            .generate_challenge(init_data_b64, extra.server_cert.as_deref())
            .await
    }

    async fn parse_license(&mut self, license_b64: &str) -> Result<LicenseOutcome> {
        let pssh = self
            .pssh
            .clone()
            .ok_or_else(|| Error::InvalidState("License received before a challenge".to_string()))?;
        let no_keys = || Error::NoKeys("No keys were received from the remote CDM!".to_string());

        let data = self.session.parse_license(license_b64).await?;
        self.close().await;
        let data = data.ok_or_else(no_keys)?;
        let keys = self.session.key_parse_rules().parse_keys(&data)?;
        if keys.is_empty() {
            return Err(no_keys());
        }
        info!("Received {} keys for session {:?}", keys.len(), self.session.session_id());
        Ok(LicenseOutcome {
            kind: self.kind,
            pssh,
            keys,
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.close().await {
            warn!("Closing remote session {:?} failed: {}", self.session.session_id(), e);
        }
    }
}
