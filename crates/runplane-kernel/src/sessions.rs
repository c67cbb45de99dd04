use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use runplane_core_types::{OwnerId, Platform};

use crate::errors::ControlPlaneResult;

/// Browser storage captured by the worker for one logged-in platform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: Vec<Value>,
    #[serde(default)]
    pub origins: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    /// A state without cookies means the user never finished logging in.
    pub fn has_credentials(&self) -> bool {
        !self.cookies.is_empty()
    }
}

/// Encrypted session kept for one (owner, platform) pair.
#[derive(Clone, Debug)]
pub struct StoredSession {
    pub owner: OwnerId,
    pub platform: Platform,
    /// `iv_hex:ciphertext_hex`
    pub blob: String,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            platform: self.platform.clone(),
            updated_at: self.updated_at,
            last_used_at: self.last_used_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub platform: Platform,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Persistence boundary for encrypted session blobs, unique per (owner, platform).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<Option<StoredSession>>;

    /// Inserts or replaces the blob for (owner, platform).
    async fn upsert(
        &self,
        owner: &OwnerId,
        platform: &Platform,
        blob: String,
    ) -> ControlPlaneResult<SessionSummary>;

    async fn touch(&self, owner: &OwnerId, platform: &Platform) -> ControlPlaneResult<()>;

    async fn remove(&self, owner: &OwnerId, platform: &Platform) -> ControlPlaneResult<bool>;

    async fn list(&self, owner: &OwnerId) -> ControlPlaneResult<Vec<SessionSummary>>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<(OwnerId, Platform), StoredSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<Option<StoredSession>> {
        Ok(self
            .entries
            .get(&(owner.clone(), platform.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(
        &self,
        owner: &OwnerId,
        platform: &Platform,
        blob: String,
    ) -> ControlPlaneResult<SessionSummary> {
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry((owner.clone(), platform.clone()))
            .or_insert_with(|| StoredSession {
                owner: owner.clone(),
                platform: platform.clone(),
                blob: String::new(),
                updated_at: now,
                last_used_at: None,
            });
        entry.blob = blob;
        entry.updated_at = now;
        Ok(entry.summary())
    }

    async fn touch(&self, owner: &OwnerId, platform: &Platform) -> ControlPlaneResult<()> {
        if let Some(mut entry) = self.entries.get_mut(&(owner.clone(), platform.clone())) {
            entry.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn remove(&self, owner: &OwnerId, platform: &Platform) -> ControlPlaneResult<bool> {
        Ok(self
            .entries
            .remove(&(owner.clone(), platform.clone()))
            .is_some())
    }

    async fn list(&self, owner: &OwnerId) -> ControlPlaneResult<Vec<SessionSummary>> {
        let mut sessions: Vec<SessionSummary> = self
            .entries
            .iter()
            .filter(|entry| &entry.key().0 == owner)
            .map(|entry| entry.value().summary())
            .collect();
        sessions.sort_by(|a, b| a.platform.cmp(&b.platform));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platform(raw: &str) -> Platform {
        Platform::parse(raw).unwrap()
    }

    #[test]
    fn session_state_keeps_unknown_fields() {
        let raw = json!({
            "cookies": [{"name": "li_at"}],
            "origins": [],
            "version": 2
        });
        let state: SessionState = serde_json::from_value(raw.clone()).unwrap();
        assert!(state.has_credentials());
        assert_eq!(serde_json::to_value(&state).unwrap(), raw);

        let empty: SessionState = serde_json::from_value(json!({"origins": []})).unwrap();
        assert!(!empty.has_credentials());
    }

    #[tokio::test]
    async fn second_upsert_for_a_platform_replaces_the_first() {
        let store = InMemorySessionStore::new();
        let owner = OwnerId::from("alice");
        store
            .upsert(&owner, &platform("LinkedIn"), "blob-1".into())
            .await
            .unwrap();
        store
            .upsert(&owner, &platform("linkedin"), "blob-2".into())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let stored = store
            .load(&owner, &platform("linkedin"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.blob, "blob-2");
        assert!(stored.last_used_at.is_none());
    }

    #[tokio::test]
    async fn sessions_are_scoped_per_owner() {
        let store = InMemorySessionStore::new();
        let alice = OwnerId::from("alice");
        let bob = OwnerId::from("bob");
        store.upsert(&alice, &platform("x"), "a".into()).await.unwrap();
        store.upsert(&alice, &platform("github"), "b".into()).await.unwrap();
        store.upsert(&bob, &platform("x"), "c".into()).await.unwrap();

        let listed = store.list(&alice).await.unwrap();
        let platforms: Vec<&str> = listed.iter().map(|s| s.platform.as_str()).collect();
        assert_eq!(platforms, vec!["github", "x"]);

        store.touch(&bob, &platform("x")).await.unwrap();
        let bob_x = store.load(&bob, &platform("x")).await.unwrap().unwrap();
        assert!(bob_x.last_used_at.is_some());

        assert!(store.remove(&alice, &platform("x")).await.unwrap());
        assert!(!store.remove(&alice, &platform("x")).await.unwrap());
        assert!(store.load(&bob, &platform("x")).await.unwrap().is_some());
    }
}
