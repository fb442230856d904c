//! Session metadata
//!
//! A session is an opaque bag of host-supplied metadata that lives alongside
//! the connection: who the user is, plus arbitrary key/value pairs. It is
//! created by the first update, merged by later ones and dropped by
//! [`SessionStore::clear`]. Nothing is persisted.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    /// Stable for the life of the session
    pub session_id: String,
    /// Opaque user description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the session was created
    pub start_time: DateTime<Utc>,
    /// Last update or successful call
    pub last_activity: DateTime<Utc>,
}

impl SessionContext {
    /// Whether the session has been idle longer than `session_timeout`
    pub fn is_expired(&self, session_timeout: Duration) -> bool {
        self.is_expired_at(Utc::now(), session_timeout)
    }

    /// [`is_expired`](Self::is_expired) evaluated at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>, session_timeout: Duration) -> bool {
        let timeout = TimeDelta::from_std(session_timeout).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.last_activity) > timeout
    }
}

/// Partial update applied by `set_session_context`
///
/// Unset fields leave the current value alone. `metadata` replaces the whole
/// map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    /// Id to use when this update creates the session; ignored afterwards
    pub session_id: Option<String>,
    /// New user description
    pub user: Option<Value>,
    /// New metadata map
    pub metadata: Option<Map<String, Value>>,
}

impl SessionUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id used if the session does not exist yet
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Replace the user
    #[must_use]
    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    /// Replace the metadata map
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    current: Mutex<Option<SessionContext>>,
}

impl SessionStore {
    /// Create or merge; returns the resulting session
    pub(crate) fn set(&self, update: SessionUpdate) -> SessionContext {
        let now = Utc::now();
        let mut current = self.current.lock();

        let session = match current.take() {
            Some(mut session) => {
                if let Some(user) = update.user {
                    session.user = Some(user);
                }
                if let Some(metadata) = update.metadata {
                    session.metadata = metadata;
                }
                session.last_activity = now;
                session
            }
            None => {
                let session_id = update
                    .session_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                tracing::debug!(%session_id, "Session created");
                SessionContext {
                    session_id,
                    user: update.user,
                    metadata: update.metadata.unwrap_or_default(),
                    start_time: now,
                    last_activity: now,
                }
            }
        };
        *current = Some(session.clone());
        session
    }

    pub(crate) fn get(&self) -> Option<SessionContext> {
        self.current.lock().clone()
    }

    pub(crate) fn clear(&self) {
        if let Some(session) = self.current.lock().take() {
            tracing::debug!(session_id = %session.session_id, "Session cleared");
        }
    }

    pub(crate) fn touch(&self) {
        if let Some(session) = self.current.lock().as_mut() {
            session.last_activity = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metadata(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_update_generates_id() {
        let store = SessionStore::default();
        let session = store.set(SessionUpdate::new().with_user(json!({"name": "ada"})));

        assert!(Uuid::parse_str(&session.session_id).is_ok());
        assert_eq!(session.start_time, session.last_activity);
        assert_eq!(store.get(), Some(session));
    }

    #[test]
    fn test_session_id_survives_updates() {
        let store = SessionStore::default();
        let first = store.set(SessionUpdate::new().with_session_id("s-1"));
        let second = store.set(
            SessionUpdate::new()
                .with_session_id("ignored")
                .with_metadata(metadata(json!({"tenant": "a"}))),
        );

        assert_eq!(first.session_id, "s-1");
        assert_eq!(second.session_id, "s-1");
        assert_eq!(second.start_time, first.start_time);
    }

    #[test]
    fn test_metadata_is_replaced_not_merged() {
        let store = SessionStore::default();
        store.set(SessionUpdate::new().with_metadata(metadata(json!({"a": 1, "b": 2}))));
        let session = store.set(SessionUpdate::new().with_metadata(metadata(json!({"c": 3}))));

        assert_eq!(session.metadata, metadata(json!({"c": 3})));
    }

    #[test]
    fn test_user_kept_when_update_omits_it() {
        let store = SessionStore::default();
        store.set(SessionUpdate::new().with_user(json!("ada")));
        let session = store.set(SessionUpdate::new().with_metadata(Map::new()));
        assert_eq!(session.user, Some(json!("ada")));
    }

    #[test]
    fn test_clear_removes_session() {
        let store = SessionStore::default();
        store.set(SessionUpdate::new());
        store.clear();
        assert_eq!(store.get(), None);

        store.touch();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_expiry() {
        let store = SessionStore::default();
        let session = store.set(SessionUpdate::new());
        let timeout = Duration::from_secs(60);

        assert!(!session.is_expired(timeout));
        assert!(!session.is_expired_at(session.last_activity + TimeDelta::seconds(60), timeout));
        assert!(session.is_expired_at(session.last_activity + TimeDelta::seconds(61), timeout));
    }
}
