//! Maps a page's host and DRM family to a backend strategy and credential.

use std::collections::BTreeMap;

use crate::config::{select_profile, Config, CredentialStore};
use crate::declarative::DeclarativeHandler;
use crate::error::{Error, Result};
use crate::handler::DrmHandler;
use crate::local::{PlayReadyLocal, WidevineLocal};
use crate::profile::{DrmKind, EffectiveProfile, HandlerKind, Profile};
use crate::remotecdm::RemoteCdm;

/// Backend choice for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub kind: HandlerKind,
    /// Name of the device, remote or custom handler to use.
    pub credential: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    profiles: BTreeMap<String, Profile>,
    credentials: CredentialStore,
}

impl Resolver {
    pub fn new(profiles: BTreeMap<String, Profile>, credentials: CredentialStore) -> Self {
        Self {
            profiles,
            credentials,
        }
    }

    /// Build from a config, loading its device files.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.profiles.clone(), config.credentials()?))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn profile(&self, host: Option<&str>) -> Profile {
        select_profile(&self.profiles, host)
    }

    /// The view returned for GET_PROFILE.
    pub fn effective_profile(&self, host: Option<&str>, origin: Option<&str>, incognito: bool) -> EffectiveProfile {
        self.profile(host).effective(origin, incognito)
    }

    /// Which backend kind and credential serve `family` on `host`.
    pub fn resolve(&self, host: Option<&str>, family: DrmKind) -> Result<Selection> {
        let profile = self.profile(host);
        let (enabled, kind, device) = match family {
            DrmKind::Widevine => (profile.widevine.enabled, profile.widevine.kind, &profile.widevine.device),
            DrmKind::Playready => (profile.playready.enabled, profile.playready.kind, &profile.playready.device),
            DrmKind::Clearkey => return Err(Error::NoDeviceSelected),
        };
        if !profile.enabled || !enabled {
            return Err(Error::NoDeviceSelected);
        }
        let credential = device.for_kind(kind).ok_or(Error::NoDeviceSelected)?;
        Ok(Selection {
            kind,
            credential: credential.to_string(),
        })
    }

    /// Instantiate the handler a [`Selection`] names.
    pub fn build_handler(&self, family: DrmKind, selection: &Selection) -> Result<Box<dyn DrmHandler>> {
        let missing = || Error::NoHandler(format!("{:?} {} for {}", selection.kind, selection.credential, family));
        let name = selection.credential.as_str();

        let handler: Box<dyn DrmHandler> = match (selection.kind, family) {
            (HandlerKind::Local, DrmKind::Widevine) => {
                let device = self.credentials.widevine.get(name).ok_or_else(missing)?;
                Box::new(WidevineLocal::new(device.clone()))
            }
            (HandlerKind::Local, DrmKind::Playready) => {
                let device = self.credentials.playready.get(name).ok_or_else(missing)?;
                Box::new(PlayReadyLocal::new(device))
            }
            (HandlerKind::Remote, _) => {
                let profile = self.credentials.remotes.get(name).ok_or_else(missing)?;
                if profile.kind != family {
                    warn!("Remote {} is a {} endpoint, used for {}", name, profile.kind, family);
                }
                Box::new(RemoteCdm::new(profile.clone())?)
            }
            (HandlerKind::Custom, _) => {
                let custom = self.credentials.custom.get(name).ok_or_else(missing)?;
                if custom.disabled {
                    return Err(missing());
                }
                Box::new(DeclarativeHandler::from_custom(custom)?)
            }
            (HandlerKind::Local, DrmKind::Clearkey) => return Err(missing()),
        };
        debug!("Selected {:?} handler {} for {}", selection.kind, name, family);
        Ok(handler)
    }
}
