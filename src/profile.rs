//! Per-site profiles and key-system policy.
//!
//! A [`Profile`] selects, per DRM family, which backend kind and which named
//! credential handles exchanges, plus the policy flags the shim enforces.
//! [`EffectiveProfile`] is the reduced view the page side receives.

use serde::{Deserialize, Serialize};

use crate::clearkey;

/// Widevine robustness names, weakest first.
pub const WIDEVINE_ROBUSTNESS_LEVELS: [&str; 6] = [
    "",
    "SW_SECURE_CRYPTO",
    "SW_SECURE_DECODE",
    "HW_SECURE_CRYPTO",
    "HW_SECURE_DECODE",
    "HW_SECURE_ALL",
];

/// HDCP versions in ascending order; a profile's `hdcp` is an index into this.
pub const HDCP_LEVELS: [&str; 10] = ["0", "1.0", "1.1", "1.2", "1.3", "1.4", "2.0", "2.1", "2.2", "2.3"];

pub const WIDEVINE_KEY_SYSTEMS: [&str; 6] = [
    "com.widevine.alpha",
    "com.widevine.alpha.experiment",
    "com.widevine.alpha.experiment2",
    "com.widevine.alpha.hr",
    "com.widevine.alpha.hrnoncompositing",
    "com.youtube.widevine.l3",
];

pub const PLAYREADY_KEY_SYSTEMS: [&str; 11] = [
    "com.microsoft.playready.recommendation.2000",
    "com.microsoft.playready.recommendation.2000.clearlead",
    "com.microsoft.playready.2000",
    "com.microsoft.playready.software",
    "com.microsoft.playready.recommendation.150",
    "com.microsoft.playready.recommendation.clearlead",
    "com.microsoft.playready.150",
    "com.microsoft.playready.recommendation",
    "com.microsoft.playready",
    "com.chromecast.playready",
    "com.youtube.playready",
];

/// SL3000 (hardware) PlayReady key systems, gated by `allowSL3K`.
pub const PLAYREADY_3K_KEY_SYSTEMS: [&str; 5] = [
    "com.microsoft.playready.recommendation.3000",
    "com.microsoft.playready.recommendation.3000.clearlead",
    "com.microsoft.playready.recommendation.hardware",
    "com.microsoft.playready.3000",
    "com.microsoft.playready.hardware",
];

/// DRM family of an exchange, as recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DrmKind {
    #[default]
    Widevine,
    Playready,
    Clearkey,
}

impl DrmKind {
    /// Classify a key system string. Unknown systems are `None`.
    pub fn from_key_system(key_system: &str) -> Option<Self> {
        if WIDEVINE_KEY_SYSTEMS.contains(&key_system) {
            Some(Self::Widevine)
        } else if is_playready(key_system) {
            Some(Self::Playready)
        } else if key_system == clearkey::KEY_SYSTEM {
            Some(Self::Clearkey)
        } else {
            None
        }
    }

    /// Family used to route a REQUEST; anything that is not PlayReady goes to Widevine.
    pub fn for_request(key_system: &str) -> Self {
        if key_system.starts_with("com.microsoft.playready") || is_playready(key_system) {
            Self::Playready
        } else if key_system == clearkey::KEY_SYSTEM {
            Self::Clearkey
        } else {
            Self::Widevine
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Widevine => "WIDEVINE",
            Self::Playready => "PLAYREADY",
            Self::Clearkey => "CLEARKEY",
        }
    }
}

impl std::fmt::Display for DrmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_widevine(key_system: &str) -> bool {
    WIDEVINE_KEY_SYSTEMS.contains(&key_system)
}

pub fn is_playready(key_system: &str) -> bool {
    PLAYREADY_KEY_SYSTEMS.contains(&key_system) || PLAYREADY_3K_KEY_SYSTEMS.contains(&key_system)
}

/// Which backend implementation serves a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Local,
    Remote,
    Custom,
}

/// When a Widevine service certificate is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCertPolicy {
    /// Always run a certificate exchange first if the page did not set one.
    Always,
    /// Use a certificate when the page provides one.
    #[default]
    IfProvided,
    /// Never send a certificate.
    Never,
}

/// Named credentials per backend kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub custom: Option<String>,
}

impl DeviceSelection {
    /// The credential named for `kind`, ignoring empty names.
    pub fn for_kind(&self, kind: HandlerKind) -> Option<&str> {
        let name = match kind {
            HandlerKind::Local => &self.local,
            HandlerKind::Remote => &self.remote,
            HandlerKind::Custom => &self.custom,
        };
        name.as_deref().filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidevineProfile {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub device: DeviceSelection,
    #[serde(default, rename = "type")]
    pub kind: HandlerKind,
    #[serde(default)]
    pub server_cert: ServerCertPolicy,
    /// Highest robustness the page may ask for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<String>,
}

impl Default for WidevineProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            device: DeviceSelection::default(),
            kind: HandlerKind::Local,
            server_cert: ServerCertPolicy::IfProvided,
            robustness: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayReadyProfile {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub device: DeviceSelection,
    #[serde(default, rename = "type")]
    pub kind: HandlerKind,
    #[serde(default, rename = "allowSL3K")]
    pub allow_sl3k: bool,
}

impl Default for PlayReadyProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            device: DeviceSelection::default(),
            kind: HandlerKind::Local,
            allow_sl3k: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearKeyProfile {
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Default for ClearKeyProfile {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn enabled() -> bool {
    true
}

/// Settings for one scope (a host, or `global`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub widevine: WidevineProfile,
    #[serde(default)]
    pub playready: PlayReadyProfile,
    #[serde(default)]
    pub clearkey: ClearKeyProfile,
    #[serde(default)]
    pub block_disabled: bool,
    #[serde(default)]
    pub allow_persistence: bool,
    /// Index into [`HDCP_LEVELS`] of the highest version reported as usable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdcp: Option<usize>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            enabled: true,
            widevine: WidevineProfile::default(),
            playready: PlayReadyProfile::default(),
            clearkey: ClearKeyProfile::default(),
            block_disabled: false,
            allow_persistence: false,
            hdcp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveWidevine {
    pub enabled: bool,
    pub server_cert: ServerCertPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePlayReady {
    pub enabled: bool,
    #[serde(default, rename = "allowSL3K")]
    pub allow_sl3k: bool,
}

/// The profile as the page side sees it (the GET_PROFILE reply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveProfile {
    pub enabled: bool,
    pub widevine: EffectiveWidevine,
    pub playready: EffectivePlayReady,
    pub clearkey: ClearKeyProfile,
    pub block_disabled: bool,
    pub allow_persistence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdcp: Option<usize>,
}

impl EffectiveProfile {
    /// Whether the engine manages `key_system` under this profile.
    pub fn enabled_for(&self, key_system: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match DrmKind::from_key_system(key_system) {
            Some(DrmKind::Widevine) => self.widevine.enabled,
            Some(DrmKind::Playready) => self.playready.enabled,
            Some(DrmKind::Clearkey) => self.clearkey.enabled,
            None => false,
        }
    }

    /// Props filter applied before negotiating: persistence, Widevine
    /// robustness ceiling and the PlayReady SL3000 gate.
    pub fn allows_configs(&self, key_system: &str, configs: &[crate::shim::KeySystemConfiguration]) -> bool {
        let any_temporary = configs.iter().any(|c| match &c.session_types {
            None => true,
            Some(types) => types.len() == 1 && types[0] == "temporary",
        });
        if !self.allow_persistence && !any_temporary {
            warn!("Denying persistent-license for {}", key_system);
            return false;
        }

        if is_widevine(key_system) {
            if let Some(ceiling) = self.widevine.robustness.as_deref().filter(|r| !r.is_empty()) {
                let max = robustness_index(ceiling);
                let ok = |caps: &Option<Vec<crate::shim::MediaCapability>>| match caps {
                    Some(caps) if !caps.is_empty() => caps.iter().any(|cap| match cap.robustness.as_deref() {
                        Some(r) if !r.is_empty() => {
                            matches!((robustness_index(r), max), (Some(idx), Some(max)) if idx <= max)
                        }
                        _ => true,
                    }),
                    _ => true,
                };
                let video_ok = configs.iter().any(|c| ok(&c.video_capabilities));
                let audio_ok = configs.iter().any(|c| ok(&c.audio_capabilities));
                if !video_ok || !audio_ok {
                    warn!("Blocked {}: robustness above {}", key_system, ceiling);
                    return false;
                }
            }
        } else if is_playready(key_system)
            && !self.playready.allow_sl3k
            && PLAYREADY_3K_KEY_SYSTEMS.contains(&key_system)
        {
            warn!("Blocked PlayReady SL3000 key system {}", key_system);
            return false;
        }
        true
    }

    /// `usable` when `min_hdcp` is within the profile's ceiling, else `output-restricted`.
    pub fn status_for_policy(&self, min_hdcp: &str) -> &'static str {
        let idx = HDCP_LEVELS.iter().position(|l| *l == min_hdcp);
        match (idx, self.hdcp) {
            (Some(idx), Some(ceiling)) if idx <= ceiling => "usable",
            _ => "output-restricted",
        }
    }
}

fn robustness_index(level: &str) -> Option<usize> {
    WIDEVINE_ROBUSTNESS_LEVELS.iter().position(|l| *l == level)
}

impl Profile {
    /// Reduce to the page-side view.
    ///
    /// A family whose type is local or remote but names no device is
    /// reported disabled. Persistence additionally requires an https origin
    /// outside a private context.
    pub fn effective(&self, origin: Option<&str>, incognito: bool) -> EffectiveProfile {
        let family_enabled = |enabled: bool, kind: HandlerKind, device: &DeviceSelection| {
            enabled
                && match kind {
                    HandlerKind::Local | HandlerKind::Remote => device.for_kind(kind).is_some(),
                    HandlerKind::Custom => true,
                }
        };
        EffectiveProfile {
            enabled: self.enabled,
            widevine: EffectiveWidevine {
                enabled: family_enabled(self.widevine.enabled, self.widevine.kind, &self.widevine.device),
                server_cert: self.widevine.server_cert,
                robustness: self.widevine.robustness.clone(),
            },
            playready: EffectivePlayReady {
                enabled: family_enabled(self.playready.enabled, self.playready.kind, &self.playready.device),
                allow_sl3k: self.playready.allow_sl3k,
            },
            clearkey: self.clearkey.clone(),
            block_disabled: self.block_disabled,
            allow_persistence: self.allow_persistence && origin.is_some() && !incognito,
            hdcp: self.hdcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shim::{KeySystemConfiguration, MediaCapability};

    fn config(session_types: Option<Vec<&str>>, robustness: &str) -> KeySystemConfiguration {
        KeySystemConfiguration {
            session_types: session_types.map(|t| t.into_iter().map(String::from).collect()),
            video_capabilities: Some(vec![MediaCapability {
                content_type: Some("video/mp4; codecs=\"avc1.4d401f\"".to_string()),
                robustness: Some(robustness.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn default_profile_deserializes_from_empty_json() {
        let profile: Profile = serde_json::from_str("{}").unwrap();
        assert_eq!(profile, Profile::default());
        assert_eq!(profile.widevine.server_cert, ServerCertPolicy::IfProvided);

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["widevine"]["serverCert"], "if_provided");
        assert_eq!(json["playready"]["allowSL3K"], false);
        assert_eq!(json["blockDisabled"], false);
    }

    #[test]
    fn effective_profile_requires_named_devices() {
        let mut profile = Profile::default();
        let view = profile.effective(Some("https://example.com"), false);
        assert!(!view.widevine.enabled);
        assert!(!view.playready.enabled);
        assert!(view.clearkey.enabled);

        profile.widevine.device.local = Some("pixel".to_string());
        profile.playready.kind = HandlerKind::Custom;
        let view = profile.effective(None, false);
        assert!(view.widevine.enabled);
        assert!(view.playready.enabled);
    }

    #[test]
    fn persistence_needs_origin_and_normal_context() {
        let profile = Profile {
            allow_persistence: true,
            ..Default::default()
        };
        assert!(profile.effective(Some("https://a.example"), false).allow_persistence);
        assert!(!profile.effective(None, false).allow_persistence);
        assert!(!profile.effective(Some("https://a.example"), true).allow_persistence);
    }

    #[test]
    fn props_filter_gates_persistence_and_robustness() {
        let mut profile = Profile::default();
        profile.widevine.device.local = Some("dev".to_string());
        profile.widevine.robustness = Some("SW_SECURE_DECODE".to_string());
        let view = profile.effective(Some("https://a.example"), false);

        let persistent = config(Some(vec!["persistent-license"]), "");
        assert!(!view.allows_configs("com.widevine.alpha", &[persistent]));

        let sw = config(None, "SW_SECURE_CRYPTO");
        assert!(view.allows_configs("com.widevine.alpha", &[sw]));

        let hw = config(Some(vec!["temporary"]), "HW_SECURE_ALL");
        assert!(!view.allows_configs("com.widevine.alpha", &[hw]));

        assert!(!view.allows_configs("com.microsoft.playready.recommendation.3000", &[config(None, "")]));
        assert!(view.allows_configs("com.microsoft.playready.recommendation", &[config(None, "")]));
    }

    #[test]
    fn hdcp_policy() {
        let profile = Profile {
            hdcp: Some(6),
            ..Default::default()
        };
        let view = profile.effective(None, false);
        assert_eq!(view.status_for_policy("1.4"), "usable");
        assert_eq!(view.status_for_policy("2.0"), "usable");
        assert_eq!(view.status_for_policy("2.2"), "output-restricted");
        assert_eq!(view.status_for_policy("bogus"), "output-restricted");
    }

    #[test]
    fn key_system_classification() {
        assert_eq!(DrmKind::from_key_system("com.widevine.alpha"), Some(DrmKind::Widevine));
        assert_eq!(DrmKind::from_key_system("com.microsoft.playready.3000"), Some(DrmKind::Playready));
        assert_eq!(DrmKind::from_key_system("org.w3.clearkey"), Some(DrmKind::Clearkey));
        assert_eq!(DrmKind::from_key_system("com.apple.fps"), None);
        assert_eq!(DrmKind::for_request("com.widevine.alpha.experiment"), DrmKind::Widevine);
        assert_eq!(serde_json::to_string(&DrmKind::Playready).unwrap(), "\"PLAYREADY\"");
    }
}
