//! In-memory conversation sessions keyed by user.
//!
//! The registry lock is only held to resolve a user's slot; every read or
//! write of a session happens under that user's own async lock, so users
//! never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::Mutex as SlotLock;

use crate::domain::order::UserId;
use crate::domain::session::Session;
use crate::flows::FlowTransitionError;

type Slot = Arc<SlotLock<Option<Session>>>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("no open session for user {0}")]
    NotFound(UserId),
    #[error(transparent)]
    Rejected(#[from] FlowTransitionError),
}

#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<UserId, Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &UserId) -> Option<Session> {
        let slot = self.slot(user_id)?;
        let session = slot.lock().await.clone();
        session
    }

    pub async fn contains(&self, user_id: &UserId) -> bool {
        self.get(user_id).await.is_some()
    }

    /// Stores `session`, returning the one it replaced.
    pub async fn put(&self, session: Session) -> Option<Session> {
        let slot = self.slot_or_insert(&session.user_id);
        let replaced = slot.lock().await.replace(session);
        replaced
    }

    /// Runs `mutator` against a copy of the user's session and stores the
    /// copy only if the mutator succeeds.
    pub async fn update<F>(
        &self,
        user_id: &UserId,
        mutator: F,
    ) -> Result<Session, SessionStoreError>
    where
        F: FnOnce(&mut Session) -> Result<(), FlowTransitionError>,
    {
        let slot = self.slot(user_id).ok_or(SessionStoreError::NotFound(*user_id))?;
        let mut guard = slot.lock().await;
        let current = guard.as_mut().ok_or(SessionStoreError::NotFound(*user_id))?;

        let mut draft = current.clone();
        mutator(&mut draft)?;
        *current = draft.clone();
        Ok(draft)
    }

    pub async fn remove(&self, user_id: &UserId) -> Option<Session> {
        self.remove_if(user_id, |_| true).await
    }

    pub async fn remove_if<F>(&self, user_id: &UserId, predicate: F) -> Option<Session>
    where
        F: FnOnce(&Session) -> bool,
    {
        let slot = self.slot(user_id)?;
        let removed = {
            let mut guard = slot.lock().await;
            let matches = guard.as_ref().map(predicate).unwrap_or(false);
            if matches {
                guard.take()
            } else {
                None
            }
        };
        drop(slot);
        self.release(user_id);
        removed
    }

    /// Removes every session matching `predicate` and returns them.
    pub async fn remove_where<F>(&self, mut predicate: F) -> Vec<Session>
    where
        F: FnMut(&Session) -> bool,
    {
        let mut removed = Vec::new();
        for slot in self.snapshot() {
            let mut guard = slot.lock().await;
            let matches = guard.as_ref().map(&mut predicate).unwrap_or(false);
            if matches {
                removed.extend(guard.take());
            }
        }
        self.compact();
        removed
    }

    pub async fn open_sessions(&self) -> usize {
        let mut open = 0;
        for slot in self.snapshot() {
            if slot.lock().await.is_some() {
                open += 1;
            }
        }
        open
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<UserId, Slot>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, user_id: &UserId) -> Option<Slot> {
        self.registry().get(user_id).cloned()
    }

    fn slot_or_insert(&self, user_id: &UserId) -> Slot {
        self.registry().entry(*user_id).or_default().clone()
    }

    fn snapshot(&self) -> Vec<Slot> {
        self.registry().values().cloned().collect()
    }

    /// Drops the user's slot when it is empty and nobody else holds it.
    fn release(&self, user_id: &UserId) {
        let mut slots = self.registry();
        if slots.get(user_id).is_some_and(is_vacant) {
            slots.remove(user_id);
        }
    }

    fn compact(&self) {
        self.registry().retain(|_, slot| !is_vacant(slot));
    }
}

// Only called under the registry lock, so a strong count of one means no
// task can reach this slot any more.
fn is_vacant(slot: &Slot) -> bool {
    Arc::strong_count(slot) == 1
        && slot.try_lock().map(|session| session.is_none()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::domain::order::UserId;
    use crate::domain::session::Session;
    use crate::flows::{FlowEvent, FlowTransitionError};
    use crate::sessions::{SessionStore, SessionStoreError};

    fn session(user: i64) -> Session {
        Session::open(UserId(user), "Торт", Utc::now())
    }

    #[tokio::test]
    async fn put_overwrites_stale_session() {
        let store = SessionStore::new();
        let mut stale = session(1);
        stale.quantity = Some("5".to_owned());
        store.put(stale.clone()).await;

        let fresh = session(1);
        let replaced = store.put(fresh.clone()).await;

        assert_eq!(replaced, Some(stale));
        assert_eq!(store.get(&UserId(1)).await, Some(fresh));
        assert_eq!(store.open_sessions().await, 1);
    }

    #[tokio::test]
    async fn update_reports_not_found_for_idle_user() {
        let store = SessionStore::new();
        let result = store
            .update(&UserId(9), |session| {
                session.quantity = Some("1".to_owned());
                Ok(())
            })
            .await;

        assert_eq!(result, Err(SessionStoreError::NotFound(UserId(9))));
        assert_eq!(store.get(&UserId(9)).await, None);
    }

    #[tokio::test]
    async fn rejected_mutation_keeps_stored_session() {
        let store = SessionStore::new();
        let original = session(2);
        store.put(original.clone()).await;

        let result = store
            .update(&UserId(2), |session| {
                session.quantity = Some("partial".to_owned());
                Err(FlowTransitionError::NoOpenDialogue { event: FlowEvent::ReplyReceived })
            })
            .await;

        assert!(matches!(result, Err(SessionStoreError::Rejected(_))));
        assert_eq!(store.get(&UserId(2)).await, Some(original));
    }

    #[tokio::test]
    async fn remove_if_only_removes_matching_dialogue() {
        let store = SessionStore::new();
        let first = session(3);
        store.put(first.clone()).await;
        let second = session(3);
        store.put(second.clone()).await;

        let removed = store.remove_if(&UserId(3), |s| s.session_id == first.session_id).await;
        assert_eq!(removed, None);
        assert!(store.contains(&UserId(3)).await);

        let removed = store.remove_if(&UserId(3), |s| s.session_id == second.session_id).await;
        assert_eq!(removed, Some(second));
        assert!(!store.contains(&UserId(3)).await);
        assert_eq!(store.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn remove_returns_the_session_and_frees_the_slot() {
        let store = SessionStore::new();
        let open = session(10);
        store.put(open.clone()).await;

        assert_eq!(store.remove(&UserId(10)).await, Some(open));
        assert_eq!(store.remove(&UserId(10)).await, None);
        assert_eq!(store.open_sessions().await, 0);
        assert!(store.registry().is_empty());
    }

    #[tokio::test]
    async fn remove_where_applies_arbitrary_predicate() {
        let store = SessionStore::new();
        let mut cake = session(8);
        cake.product_descriptor = "Торт".to_owned();
        store.put(cake.clone()).await;
        let mut eclair = session(9);
        eclair.product_descriptor = "Еклер".to_owned();
        store.put(eclair).await;

        let removed = store.remove_where(|s| s.product_descriptor == "Торт").await;

        assert_eq!(removed, vec![cake]);
        assert!(store.contains(&UserId(9)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_for_one_user_are_serialized() {
        let store = Arc::new(SessionStore::new());
        let mut counter = session(7);
        counter.quantity = Some("0".to_owned());
        store.put(counter).await;

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .update(&UserId(7), |session| {
                        let current: u32 =
                            session.quantity.as_deref().unwrap_or("0").parse().unwrap_or(0);
                        session.quantity = Some((current + 1).to_string());
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("task joined").expect("update applied");
        }

        let final_session = store.get(&UserId(7)).await.expect("session present");
        assert_eq!(final_session.quantity.as_deref(), Some("64"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distinct_users_never_share_state() {
        let store = Arc::new(SessionStore::new());
        store.put(session(100)).await;
        store.put(session(200)).await;

        let left = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update(&UserId(100), |session| {
                        session.phone = Some("+380500000100".to_owned());
                        Ok(())
                    })
                    .await
            })
        };
        let right = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update(&UserId(200), |session| {
                        session.quantity = Some("2".to_owned());
                        Ok(())
                    })
                    .await
            })
        };
        left.await.expect("joined").expect("left update");
        right.await.expect("joined").expect("right update");

        let a = store.get(&UserId(100)).await.expect("user 100");
        let b = store.get(&UserId(200)).await.expect("user 200");
        assert_eq!((a.quantity, a.phone.as_deref()), (None, Some("+380500000100")));
        assert_eq!((b.quantity.as_deref(), b.phone), (Some("2"), None));
    }
}
