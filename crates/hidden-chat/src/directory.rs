//! Read-only projection of the `users` collection.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use hidden_shared::constants::{DEFAULT_DISPLAY_NAME, FIELD_LAST_SEEN, USERS};
use hidden_shared::{User, UserId};
use hidden_store::{subscribe, DocumentStore, Fields, Query, StoreError};

use crate::error::{ChatError, Result};
use crate::feed::{decode_all, Feed};

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    /// Last list successfully read by any feed or snapshot.
    last_known: Arc<RwLock<Vec<User>>>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            last_known: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Live list of every user, re-emitted on any change to `users`.
    ///
    /// A failed read is emitted as an error; the previous good list stays
    /// available through [`UserDirectory::last_known`].
    pub fn list_users(&self) -> Feed<Vec<User>> {
        let last_known = self.last_known.clone();
        let mut subscription = subscribe(self.store.clone(), Query::collection(USERS));

        Feed::spawn(move |tx| async move {
            while let Some(snapshot) = subscription.next().await {
                let item = match snapshot {
                    Ok(docs) => {
                        let users: Vec<User> = decode_all(&docs);
                        debug!(count = users.len(), "User directory updated");
                        *last_known.write().await = users.clone();
                        Ok(users)
                    }
                    Err(e) => Err(e.into()),
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        })
    }

    /// One-shot read of every user.
    pub async fn snapshot(&self) -> Result<Vec<User>> {
        let docs = self.store.query(&Query::collection(USERS)).await?;
        let users: Vec<User> = decode_all(&docs);
        *self.last_known.write().await = users.clone();
        Ok(users)
    }

    pub async fn last_known(&self) -> Vec<User> {
        self.last_known.read().await.clone()
    }

    pub async fn get(&self, id: &UserId) -> Result<Option<User>> {
        let doc = self.store.get_document(USERS, id.as_str()).await?;
        Ok(doc.and_then(|d| decode_all(std::slice::from_ref(&d)).pop()))
    }

    /// Create or replace `id`'s profile and stamp its presence.
    ///
    /// A blank display name falls back to the default one.
    pub async fn upsert_profile(
        &self,
        id: &UserId,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        if id.is_empty() {
            return Err(ChatError::MissingUser);
        }
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME);

        let mut fields = Fields::new()
            .set("displayName", display_name)
            .server_timestamp(FIELD_LAST_SEEN);
        if let Some(avatar) = avatar {
            fields = fields.set("avatar", avatar);
        }
        self.store.set_document(USERS, id.as_str(), fields).await?;
        info!(user = %id, "Profile saved");
        Ok(())
    }

    /// Presence ping: refresh `lastSeen` of an existing profile.
    pub async fn touch(&self, id: &UserId) -> Result<()> {
        if id.is_empty() {
            return Err(ChatError::MissingUser);
        }
        let fields = Fields::new().server_timestamp(FIELD_LAST_SEEN);
        match self.store.update_document(USERS, id.as_str(), fields).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => self.upsert_profile(id, None, None).await,
            Err(e) => Err(e.into()),
        }
    }
}

/// The first user of `users` that takes part in the conversation and is not
/// `current`.
pub fn find_other_participant<'a>(
    users: &'a [User],
    participants: &[UserId],
    current: &UserId,
) -> Option<&'a User> {
    if current.is_empty() {
        return None;
    }
    users
        .iter()
        .find(|u| participants.contains(&u.id) && &u.id != current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hidden_store::{Fields, MemoryStore};

    async fn add_user(store: &MemoryStore, id: &str, name: &str) {
        store
            .set_document(
                USERS,
                id,
                Fields::new()
                    .set("displayName", name)
                    .set("lastSeen", Utc::now().timestamp_micros()),
            )
            .await
            .unwrap();
    }

    fn user(id: &str) -> User {
        User {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            avatar: None,
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn feed_follows_the_collection() {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "a", "Alice").await;

        let directory = UserDirectory::new(store.clone());
        let mut feed = directory.list_users();
        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].display_name, "Alice");
        assert!(first[0].last_seen.is_some());

        add_user(&store, "b", "Bob").await;
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(directory.last_known().await.len(), 2);
    }

    #[tokio::test]
    async fn read_failure_keeps_last_known() {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "a", "Alice").await;
        let directory = UserDirectory::new(store.clone());
        directory.snapshot().await.unwrap();

        store.fail_reads(true);
        let mut feed = directory.list_users();
        assert!(feed.next().await.unwrap().is_err());
        assert_eq!(directory.last_known().await.len(), 1);
    }

    #[tokio::test]
    async fn get_single_user() {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "a", "Alice").await;
        let directory = UserDirectory::new(store);
        let alice = directory.get(&UserId::from("a")).await.unwrap().unwrap();
        assert_eq!(alice.display_name, "Alice");
        assert!(directory.get(&UserId::from("z")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_upsert_defaults_name_and_stamps_presence() {
        let store = Arc::new(MemoryStore::new());
        let directory = UserDirectory::new(store);
        let id = UserId::from("a");

        directory.upsert_profile(&id, Some("  "), None).await.unwrap();
        let user = directory.get(&id).await.unwrap().unwrap();
        assert_eq!(user.display_name, DEFAULT_DISPLAY_NAME);
        let first_seen = user.last_seen.unwrap();

        directory.touch(&id).await.unwrap();
        let user = directory.get(&id).await.unwrap().unwrap();
        assert!(user.last_seen.unwrap() > first_seen);
        assert_eq!(user.display_name, DEFAULT_DISPLAY_NAME);

        directory.touch(&UserId::from("b")).await.unwrap();
        assert!(directory.get(&UserId::from("b")).await.unwrap().is_some());
    }

    #[test]
    fn other_participant_must_be_in_the_thread() {
        let users = vec![user("a"), user("c"), user("b")];
        let participants = vec![UserId::from("a"), UserId::from("b")];
        let other = find_other_participant(&users, &participants, &UserId::from("a"));
        assert_eq!(other.map(|u| u.id.as_str()), Some("b"));
    }

    #[test]
    fn unresolved_participants_yield_none() {
        let users = vec![user("a"), user("b")];
        assert!(find_other_participant(&users, &[], &UserId::from("a")).is_none());
        assert!(find_other_participant(&users, &[UserId::from("b")], &UserId::from("")).is_none());
    }
}
