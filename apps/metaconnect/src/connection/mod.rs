pub mod uri;
pub mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contacts::StoredEntry;

/// A peer's exchanged identity record: a handle plus social-media entries.
/// `request` is true while the exchange is still unconfirmed (freshly
/// scanned or received) and false once rebuilt from the stored list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaConnection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub social_media: BTreeMap<String, String>,
    #[serde(default)]
    pub request: bool,
}

impl MetaConnection {
    /// Build a connection from an untrusted decoded payload. Field presence
    /// is never trusted: a missing or odd-typed `name` becomes empty, a
    /// missing `socialMedia` becomes the empty mapping, and non-string
    /// handles are skipped. Output always carries `request = true`.
    pub fn from_payload(payload: &Value) -> Self {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let social_media = payload
            .get("socialMedia")
            .and_then(Value::as_object)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(platform, handle)| {
                        handle
                            .as_str()
                            .map(|handle| (platform.clone(), handle.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name,
            social_media,
            request: true,
        }
    }

    /// Rebuild a connection from an entry the user already stored.
    pub fn from_stored(entry: &StoredEntry) -> Self {
        Self {
            name: entry.name.clone(),
            social_media: entry.social_media.clone(),
            request: false,
        }
    }
}

/// The local user's identity as embedded in outbound exchanges. Loading and
/// persisting it belongs to the account layer, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProfile {
    pub name: String,
    pub social_media: BTreeMap<String, String>,
}

impl LocalProfile {
    pub fn new(name: impl Into<String>, social_media: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            social_media,
        }
    }

    /// The profile as a fresh outbound MetaConnection.
    pub fn to_connection(&self) -> MetaConnection {
        MetaConnection {
            name: self.name.clone(),
            social_media: self.social_media.clone(),
            request: true,
        }
    }
}
