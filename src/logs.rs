//! Index of completed exchanges.
//!
//! Each record is stored under `pssh + origin` (origin rendered `"null"` when
//! the page has none), so a content/site pair only ever has one entry. Private
//! contexts write to a separate store that is dropped with the context.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::ContentKey;
use crate::profile::DrmKind;
use crate::storage::{MemoryStorage, Storage};
use crate::utils::unix_now;

/// Streaming manifest flavours recognised in page traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestKind {
    Dash,
    HlsMaster,
    HlsPlaylist,
    Mss,
}

impl ManifestKind {
    /// Sniff a response body. Matching is case-insensitive.
    pub fn detect(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("<mpd") && lower.contains("</mpd>") {
            Some(Self::Dash)
        } else if lower.contains("#extm3u") {
            if lower.contains("#ext-x-stream-inf") {
                Some(Self::HlsMaster)
            } else {
                Some(Self::HlsPlaylist)
            }
        } else if lower.contains("<smoothstreamingmedia") && lower.contains("</smoothstreamingmedia>") {
            Some(Self::Mss)
        } else {
            None
        }
    }
}

/// A manifest seen on the page, with the request headers used to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: ManifestKind,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: DrmKind,
    pub pssh: String,
    pub keys: Vec<ContentKey>,
    pub timestamp: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub manifests: Vec<ManifestEntry>,
    /// Persistent session ids that can be loaded back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<String>>,
}

impl LogRecord {
    pub fn storage_key(&self) -> String {
        storage_key(&self.pssh, self.origin.as_deref())
    }

    fn has_session(&self, session_id: &str) -> bool {
        self.sessions
            .as_ref()
            .is_some_and(|s| s.iter().any(|id| id == session_id))
    }
}

pub fn storage_key(pssh: &str, origin: Option<&str>) -> String {
    format!("{}{}", pssh, origin.unwrap_or("null"))
}

/// A finished exchange, as handed to [`LogIndex::record_exchange`].
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub kind: DrmKind,
    pub pssh: String,
    pub keys: Vec<ContentKey>,
    pub url: Option<String>,
    pub origin: Option<String>,
    pub title: Option<String>,
    pub manifests: Vec<ManifestEntry>,
    pub session_id: String,
    /// Remember `session_id` for a later LOAD.
    pub keep_session: bool,
    pub incognito: bool,
}

#[derive(Debug, Clone)]
pub struct LogIndex {
    persistent: Arc<dyn Storage>,
    private: Arc<dyn Storage>,
}

impl Default for LogIndex {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }
}

impl LogIndex {
    /// Index over `persistent`, with an in-memory store for private contexts.
    pub fn new(persistent: Arc<dyn Storage>) -> Self {
        Self {
            persistent,
            private: Arc::new(MemoryStorage::new()),
        }
    }

    fn storage(&self, incognito: bool) -> &dyn Storage {
        if incognito {
            self.private.as_ref()
        } else {
            self.persistent.as_ref()
        }
    }

    /// Insert or refresh the record for the exchange's `pssh + origin`.
    ///
    /// A refresh replaces url, keys, manifests, title and timestamp and keeps
    /// the original origin and type.
    pub async fn record_exchange(&self, exchange: Exchange) -> Result<LogRecord> {
        let storage = self.storage(exchange.incognito);
        let key = storage_key(&exchange.pssh, exchange.origin.as_deref());
        let keep_session = exchange.keep_session && exchange.origin.is_some();

        let existing = match storage.get(&key).await? {
            Some(value) => match serde_json::from_value::<LogRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Replacing unreadable log record {}: {}", key, e);
                    None
                }
            },
            None => None,
        };

        let record = match existing {
            Some(mut record) => {
                if keep_session {
                    record.sessions.get_or_insert_with(Vec::new).push(exchange.session_id);
                }
                record.url = exchange.url;
                record.keys = exchange.keys;
                record.manifests = exchange.manifests;
                record.title = exchange.title;
                record.timestamp = unix_now();
                record
            }
            None => LogRecord {
                kind: exchange.kind,
                pssh: exchange.pssh,
                keys: exchange.keys,
                timestamp: unix_now(),
                url: exchange.url,
                origin: exchange.origin,
                title: exchange.title,
                manifests: exchange.manifests,
                sessions: keep_session.then(|| vec![exchange.session_id]),
            },
        };

        storage.set(&key, serde_json::to_value(&record)?).await?;
        debug!("Logged {} keys under {}", record.keys.len(), key);
        Ok(record)
    }

    async fn records(&self, storage: &dyn Storage) -> Result<Vec<LogRecord>> {
        Ok(storage
            .entries()
            .await?
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping log entry {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    /// Persistent record of `origin` that holds `session_id`.
    pub async fn find_by_session(&self, origin: &str, session_id: &str) -> Result<Option<LogRecord>> {
        Ok(self
            .records(self.persistent.as_ref())
            .await?
            .into_iter()
            .find(|r| r.origin.as_deref() == Some(origin) && r.has_session(session_id)))
    }

    /// First persistent record of `origin` and `kind` that carries `kid_hex`.
    pub async fn find_by_kid(&self, origin: &str, kind: DrmKind, kid_hex: &str) -> Result<Option<LogRecord>> {
        Ok(self
            .records(self.persistent.as_ref())
            .await?
            .into_iter()
            .find(|r| {
                r.origin.as_deref() == Some(origin)
                    && r.kind == kind
                    && r.keys.iter().any(|k| k.kid.eq_ignore_ascii_case(kid_hex))
            }))
    }

    /// Forget a persistent session id. Returns whether a record held it.
    pub async fn remove_session(&self, origin: &str, session_id: &str) -> Result<bool> {
        let Some(mut record) = self.find_by_session(origin, session_id).await? else {
            return Ok(false);
        };
        if let Some(sessions) = record.sessions.as_mut() {
            if let Some(idx) = sessions.iter().position(|id| id == session_id) {
                sessions.remove(idx);
            }
        }
        self.persistent
            .set(&record.storage_key(), serde_json::to_value(&record)?)
            .await?;
        Ok(true)
    }

    /// Every persistent record, ordered by storage key.
    pub async fn all(&self) -> Result<Vec<LogRecord>> {
        self.records(self.persistent.as_ref()).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.persistent.clear().await
    }

    /// Drop everything recorded from private contexts.
    pub async fn clear_private(&self) -> Result<()> {
        self.private.clear().await
    }

    pub async fn private_records(&self) -> Result<Vec<LogRecord>> {
        self.records(self.private.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://www.example.com";

    fn exchange(session_id: &str, keep: bool) -> Exchange {
        Exchange {
            kind: DrmKind::Widevine,
            pssh: "AAAAW3Bzc2g=".to_string(),
            keys: vec![ContentKey::from_hex("9EB4050DE44B4802932E27D75083E266", "166634c675823c235a4a9446fad52e4d").unwrap()],
            url: Some("https://www.example.com/watch/1".to_string()),
            origin: Some(ORIGIN.to_string()),
            title: Some("Episode 1".to_string()),
            session_id: session_id.to_string(),
            keep_session: keep,
            ..Default::default()
        }
    }

    #[test]
    fn detects_manifest_types() {
        assert_eq!(ManifestKind::detect("<?xml?><MPD xmlns=\"x\"></MPD>"), Some(ManifestKind::Dash));
        assert_eq!(
            ManifestKind::detect("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8"),
            Some(ManifestKind::HlsMaster)
        );
        assert_eq!(ManifestKind::detect("#EXTM3U\n#EXTINF:4,\nseg.ts"), Some(ManifestKind::HlsPlaylist));
        assert_eq!(
            ManifestKind::detect("<SmoothStreamingMedia></SmoothStreamingMedia>"),
            Some(ManifestKind::Mss)
        );
        assert_eq!(ManifestKind::detect("<mpd>"), None);
        assert_eq!(serde_json::to_string(&ManifestKind::HlsMaster).unwrap(), "\"HLS_MASTER\"");
    }

    #[tokio::test]
    async fn one_record_per_pssh_and_origin() {
        let logs = LogIndex::default();
        logs.record_exchange(exchange("S1", false)).await.unwrap();
        let mut second = exchange("S2", false);
        second.title = Some("Episode 1 (again)".to_string());
        let record = logs.record_exchange(second).await.unwrap();

        let all = logs.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], record);
        assert_eq!(record.title.as_deref(), Some("Episode 1 (again)"));
        assert_eq!(record.sessions, None);

        let mut other_origin = exchange("S3", false);
        other_origin.origin = None;
        let record = logs.record_exchange(other_origin).await.unwrap();
        assert_eq!(record.storage_key(), "AAAAW3Bzc2g=null");
        assert_eq!(logs.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persistent_sessions_accumulate_and_can_be_removed() {
        let logs = LogIndex::default();
        logs.record_exchange(exchange("S1", true)).await.unwrap();
        logs.record_exchange(exchange("S2", true)).await.unwrap();
        let record = logs.record_exchange(exchange("S3", false)).await.unwrap();
        assert_eq!(record.sessions, Some(vec!["S1".to_string(), "S2".to_string()]));

        assert!(logs.find_by_session(ORIGIN, "S2").await.unwrap().is_some());
        assert!(logs.find_by_session("https://other.example", "S2").await.unwrap().is_none());

        assert!(logs.remove_session(ORIGIN, "S1").await.unwrap());
        assert!(!logs.remove_session(ORIGIN, "S1").await.unwrap());
        assert!(logs.find_by_session(ORIGIN, "S1").await.unwrap().is_none());
        assert!(logs.find_by_session(ORIGIN, "S2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sessions_need_an_origin() {
        let logs = LogIndex::default();
        let mut opaque = exchange("S1", true);
        opaque.origin = None;
        assert_eq!(logs.record_exchange(opaque).await.unwrap().sessions, None);
    }

    #[tokio::test]
    async fn kid_lookup_is_case_insensitive() {
        let logs = LogIndex::default();
        logs.record_exchange(exchange("S1", false)).await.unwrap();
        let found = logs
            .find_by_kid(ORIGIN, DrmKind::Widevine, "9EB4050DE44B4802932E27D75083E266")
            .await
            .unwrap();
        assert_eq!(found.unwrap().pssh, "AAAAW3Bzc2g=");
        assert!(logs
            .find_by_kid(ORIGIN, DrmKind::Playready, "9eb4050de44b4802932e27d75083e266")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn private_records_stay_separate() {
        let logs = LogIndex::default();
        let mut private = exchange("S1", true);
        private.incognito = true;
        logs.record_exchange(private).await.unwrap();

        assert!(logs.all().await.unwrap().is_empty());
        assert_eq!(logs.private_records().await.unwrap().len(), 1);
        logs.clear_private().await.unwrap();
        assert!(logs.private_records().await.unwrap().is_empty());
    }

    #[test]
    fn record_json_shape() {
        let record = LogRecord {
            kind: DrmKind::Clearkey,
            pssh: "p".to_string(),
            keys: Vec::new(),
            timestamp: 1,
            url: None,
            origin: None,
            title: None,
            manifests: vec![ManifestEntry {
                kind: ManifestKind::Dash,
                url: "https://cdn.example/a.mpd".to_string(),
                headers: BTreeMap::new(),
            }],
            sessions: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "CLEARKEY");
        assert_eq!(json["manifests"][0]["type"], "DASH");
        assert!(json.get("sessions").is_none());
    }
}
