//! Session store seam: the realtime tree holding sessions and contacts.
//!
//! The store is the single source of truth for shared state; the core only
//! keeps caches. Semantics the core relies on:
//!
//! - last-write-wins, no transactions;
//! - `patch_session` is a partial update and never clobbers sibling fields;
//! - path entries append with generated keys and keep insertion order;
//! - subscriptions are `watch` channels carrying the current value.
//!
//! [`MemoryStore`] is the in-process reference implementation, used by the
//! test suite and suitable for embedding.

use crate::contacts::{ContactId, TrustedContact};
use crate::session::{CheckRequest, CheckStatus, LocationFix, SessionId, SessionPatch, SessionRecord};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

/// Hierarchical key space: `sessions/{id}`, `sessions/{id}/checkRequest`,
/// `users/{userId}/contacts/{contactId}`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session under a generated key and returns it.
    async fn create_session(&self, record: SessionRecord) -> Result<SessionId>;

    async fn read_session(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// All sessions owned by a user, in unspecified order.
    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<(SessionId, SessionRecord)>>;

    /// Partial update; absent fields stay untouched.
    async fn patch_session(&self, id: &str, patch: SessionPatch) -> Result<()>;

    /// Appends one accepted fix to the session's path (generated key,
    /// insertion order preserved).
    async fn append_path_fix(&self, id: &str, fix: LocationFix) -> Result<()>;

    /// Writes the single-slot check-request mailbox (overwrites any
    /// outstanding request rather than queueing).
    async fn write_check_request(&self, id: &str, request: CheckRequest) -> Result<()>;

    /// Deletes the mailbox; consumption is destructive.
    async fn delete_check_request(&self, id: &str) -> Result<()>;

    /// Watches the mailbox. The receiver's current value is the mailbox's
    /// current state.
    async fn subscribe_check_request(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<CheckRequest>>>;

    async fn add_contact(&self, user_id: &str, contact: TrustedContact) -> Result<ContactId>;

    async fn remove_contact(&self, user_id: &str, contact_id: &str) -> Result<()>;

    async fn contacts_for_user(&self, user_id: &str) -> Result<Vec<(ContactId, TrustedContact)>>;

    /// Watches a user's contact list.
    async fn subscribe_contacts(
        &self,
        user_id: &str,
    ) -> Result<watch::Receiver<Vec<(ContactId, TrustedContact)>>>;
}

#[derive(Default)]
struct MemoryStoreInner {
    sessions: HashMap<SessionId, SessionRecord>,
    contacts: HashMap<String, BTreeMap<ContactId, TrustedContact>>,
    check_watchers: HashMap<SessionId, watch::Sender<Option<CheckRequest>>>,
    contact_watchers: HashMap<String, watch::Sender<Vec<(ContactId, TrustedContact)>>>,
}

impl MemoryStoreInner {
    fn session_mut(&mut self, id: &str) -> Result<&mut SessionRecord> {
        match self.sessions.get_mut(id) {
            Some(record) => Ok(record),
            None => bail!("session not found: {}", id),
        }
    }

    fn notify_check(&mut self, id: &str, value: Option<CheckRequest>) {
        if let Some(tx) = self.check_watchers.get(id) {
            tx.send_replace(value);
        }
    }

    fn notify_contacts(&mut self, user_id: &str) {
        let snapshot = self.contact_snapshot(user_id);
        if let Some(tx) = self.contact_watchers.get(user_id) {
            tx.send_replace(snapshot);
        }
    }

    fn contact_snapshot(&self, user_id: &str) -> Vec<(ContactId, TrustedContact)> {
        self.contacts
            .get(user_id)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// In-memory last-write-wins store.
///
/// Deliberately does NOT enforce single-active-session per user: the shared
/// tree in production has no such constraint either, and the resume path's
/// multiplicity handling needs the undefined state to be reachable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer-side resolution of an outstanding check request. Not part of
    /// [`SessionStore`]: the observer is an external party writing to the
    /// same tree. A response against an absent mailbox is a no-op.
    pub fn respond_check_request(&self, id: &str, status: CheckStatus) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let Some(record) = inner.sessions.get_mut(id) else {
            return;
        };
        let Some(request) = record.check_request.as_mut() else {
            return;
        };
        request.status = status;
        let updated = record.check_request.clone();
        inner.notify_check(id, updated);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, record: SessionRecord) -> Result<SessionId> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.sessions.insert(id.clone(), record);
        Ok(id)
    }

    async fn read_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.sessions.get(id).cloned())
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<(SessionId, SessionRecord)>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .sessions
            .iter()
            .filter(|(_, record)| record.user_id == user_id)
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }

    async fn patch_session(&self, id: &str, patch: SessionPatch) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner.session_mut(id)?;
        patch.apply_to(record);
        Ok(())
    }

    async fn append_path_fix(&self, id: &str, fix: LocationFix) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner.session_mut(id)?;
        record.path.push(fix);
        Ok(())
    }

    async fn write_check_request(&self, id: &str, request: CheckRequest) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner.session_mut(id)?;
        record.check_request = Some(request.clone());
        inner.notify_check(id, Some(request));
        Ok(())
    }

    async fn delete_check_request(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner.session_mut(id)?;
        record.check_request = None;
        inner.notify_check(id, None);
        Ok(())
    }

    async fn subscribe_check_request(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<CheckRequest>>> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let current = inner
            .sessions
            .get(id)
            .and_then(|record| record.check_request.clone());
        let tx = inner
            .check_watchers
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(current.clone()).0);
        Ok(tx.subscribe())
    }

    async fn add_contact(&self, user_id: &str, contact: TrustedContact) -> Result<ContactId> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner
            .contacts
            .entry(user_id.to_string())
            .or_default()
            .insert(id.clone(), contact);
        inner.notify_contacts(user_id);
        Ok(id)
    }

    async fn remove_contact(&self, user_id: &str, contact_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(list) = inner.contacts.get_mut(user_id) {
            list.remove(contact_id);
        }
        inner.notify_contacts(user_id);
        Ok(())
    }

    async fn contacts_for_user(&self, user_id: &str) -> Result<Vec<(ContactId, TrustedContact)>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.contact_snapshot(user_id))
    }

    async fn subscribe_contacts(
        &self,
        user_id: &str,
    ) -> Result<watch::Receiver<Vec<(ContactId, TrustedContact)>>> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let snapshot = inner.contact_snapshot(user_id);
        let tx = inner
            .contact_watchers
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(snapshot).0);
        Ok(tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::{TimeZone, Utc};

    fn fix(lat: f64, lon: f64) -> LocationFix {
        LocationFix {
            latitude: lat,
            longitude: lon,
            accuracy: 5.0,
            heading: None,
            speed: None,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn record(user_id: &str) -> SessionRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        SessionRecord::open(user_id, fix(-30.0, -51.2), now)
    }

    #[tokio::test]
    async fn test_patch_preserves_siblings() {
        let store = MemoryStore::new();
        let id = store.create_session(record("user-1")).await.unwrap();

        store
            .patch_session(
                &id,
                SessionPatch {
                    anomaly_detected: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        store
            .patch_session(
                &id,
                SessionPatch {
                    status: Some(SessionStatus::ConnectionLost),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        let stored = store.read_session(&id).await.unwrap().expect("exists");
        assert_eq!(stored.status, SessionStatus::ConnectionLost);
        assert_eq!(stored.anomaly_detected, Some(true));
        assert_eq!(stored.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_patch_unknown_session_fails() {
        let store = MemoryStore::new();
        let err = store
            .patch_session("missing", SessionPatch::default())
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("session not found"));
    }

    #[tokio::test]
    async fn test_path_appends_in_order() {
        let store = MemoryStore::new();
        let id = store.create_session(record("user-1")).await.unwrap();

        for i in 0..3 {
            store
                .append_path_fix(&id, fix(-30.0 + i as f64 * 0.001, -51.2))
                .await
                .unwrap();
        }

        let stored = store.read_session(&id).await.unwrap().expect("exists");
        assert_eq!(stored.path.len(), 3);
        let lats: Vec<f64> = stored.path.iter().map(|f| f.latitude).collect();
        assert_eq!(lats, vec![-30.0, -29.999, -29.998]);
    }

    #[tokio::test]
    async fn test_check_request_watch_sees_write_resolve_and_delete() {
        let store = MemoryStore::new();
        let id = store.create_session(record("user-1")).await.unwrap();
        let mut rx = store.subscribe_check_request(&id).await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 1, 0).unwrap();
        store
            .write_check_request(&id, CheckRequest::pending(now))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|r| r.status),
            Some(CheckStatus::Pending)
        );

        store.respond_check_request(&id, CheckStatus::Danger);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|r| r.status),
            Some(CheckStatus::Danger)
        );

        store.delete_check_request(&id).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        // A late observer response hits an absent mailbox: nothing happens.
        store.respond_check_request(&id, CheckStatus::Ok);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_contact_watch_follows_add_and_remove() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_contacts("user-1").await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        let contact = TrustedContact::new("Maria", "@maria").unwrap();
        let id = store.add_contact("user-1", contact.clone()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.remove_contact("user-1", &id).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_for_user_filters_by_owner() {
        let store = MemoryStore::new();
        store.create_session(record("user-1")).await.unwrap();
        store.create_session(record("user-1")).await.unwrap();
        store.create_session(record("user-2")).await.unwrap();

        let mine = store.sessions_for_user("user-1").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|(_, r)| r.user_id == "user-1"));
    }
}
