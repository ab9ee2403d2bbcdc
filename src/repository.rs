//! Typed CRUD over users, availabilities and meetings.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::TableNames,
    error::{SchedulerError, SchedulerResult},
    kv::{Item, ItemKey, KeyAttr, KvStore, WriteOp},
    model::{Availability, Meeting, MeetingStatus, User, UserPatch},
    op::Condition,
    types::{MeetingId, STATISTICS_KEY},
};

const AVAILABILITY_GONE: &str = "does not exist or is already booked";

/// Repository bound to one store client and one set of tables.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KvStore>,
    tables: TableNames,
}

impl Repository {
    /// Wraps an explicitly constructed store client.
    pub fn new(store: Arc<dyn KvStore>, tables: TableNames) -> Self {
        Self { store, tables }
    }

    /// Underlying store client.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Table names in use.
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Key of `username` in the users table.
    pub fn user_key(&self, username: &str) -> ItemKey {
        ItemKey::simple(&self.tables.users, KeyAttr::new("username", username))
    }

    /// Key of `(owner, id)` in the availabilities table.
    ///
    /// The statistics sentinel is not a valid owner.
    pub fn availability_key(&self, owner: &str, id: &str) -> SchedulerResult<ItemKey> {
        if owner == STATISTICS_KEY {
            return Err(SchedulerError::validation(format!(
                "`{STATISTICS_KEY}` is a reserved owner"
            )));
        }
        if owner.trim().is_empty() || id.trim().is_empty() {
            return Err(SchedulerError::validation(
                "availability owner and id must not be empty",
            ));
        }
        Ok(ItemKey::composite(
            &self.tables.availabilities,
            KeyAttr::new("owner", owner),
            KeyAttr::new("id", id),
        ))
    }

    /// Key of meeting `id` in the meetings table.
    pub fn meeting_key(&self, id: &str) -> SchedulerResult<ItemKey> {
        if id == STATISTICS_KEY || id.trim().is_empty() {
            return Err(SchedulerError::validation(format!("invalid meeting id `{id}`")));
        }
        Ok(ItemKey::simple(&self.tables.meetings, KeyAttr::new("id", id)))
    }

    /// Sentinel key of the availability statistics aggregate.
    pub fn availability_stats_key(&self) -> ItemKey {
        ItemKey::composite(
            &self.tables.availabilities,
            KeyAttr::new("owner", STATISTICS_KEY),
            KeyAttr::new("id", STATISTICS_KEY),
        )
    }

    /// Sentinel key of the meeting statistics aggregate.
    pub fn meeting_stats_key(&self) -> ItemKey {
        ItemKey::simple(&self.tables.meetings, KeyAttr::new("id", STATISTICS_KEY))
    }

    /// Creates `user`; the first write for a username wins.
    pub fn create_user(&self, user: &User) -> SchedulerResult<()> {
        if user.username.trim().is_empty() {
            return Err(SchedulerError::validation("username must not be empty"));
        }
        let key = self.user_key(&user.username);
        self.store
            .put(&key, marshal(user)?, Some(&Condition::NotExists))
            .map_err(|err| SchedulerError::from_write("user", "already exists", err))
    }

    /// Overwrites an existing user.
    pub fn set_user(&self, user: &User) -> SchedulerResult<()> {
        let key = self.user_key(&user.username);
        self.store
            .put(&key, marshal(user)?, Some(&Condition::Exists))
            .map_err(|err| SchedulerError::from_write("user", "does not exist", err))
    }

    /// Reads a user.
    pub fn get_user(&self, username: &str) -> SchedulerResult<User> {
        let key = self.user_key(username);
        match self.store.get(&key)? {
            Some(item) => unmarshal(item),
            None => Err(SchedulerError::NotFound {
                entity: "user",
                key: key.to_string(),
            }),
        }
    }

    /// Overwrites `previous` with `updated` only while the stored user is
    /// still exactly `previous`. A concurrent write in between is a conflict.
    pub fn replace_user(&self, previous: &User, updated: &User) -> SchedulerResult<()> {
        if previous.username != updated.username {
            return Err(SchedulerError::validation("username cannot change"));
        }
        let key = self.user_key(&updated.username);
        let condition = Condition::ItemEquals(marshal(previous)?);
        self.store
            .put(&key, marshal(updated)?, Some(&condition))
            .map_err(|err| SchedulerError::from_write("user", "was modified concurrently", err))
    }

    /// Applies a profile edit and returns the updated user.
    pub fn update_user(&self, username: &str, patch: &UserPatch) -> SchedulerResult<User> {
        let current = self.get_user(username)?;
        if patch.is_empty() {
            return Ok(current);
        }
        let mut user = current.clone();
        patch.apply_to(&mut user);
        self.replace_user(&current, &user)?;
        Ok(user)
    }

    /// Reads one page of users in key order.
    pub fn scan_users(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> SchedulerResult<(Vec<User>, Option<String>)> {
        let page = self.store.scan(&self.tables.users, start_after, limit)?;
        let users = page
            .items
            .into_iter()
            .map(unmarshal)
            .collect::<SchedulerResult<Vec<User>>>()?;
        Ok((users, page.last_key))
    }

    /// Publishes `availability`. Fails with a conflict while a live
    /// availability holds the same key.
    pub fn insert_availability(&self, availability: &Availability) -> SchedulerResult<()> {
        let key = self.availability_key(&availability.owner, &availability.id)?;
        self.store
            .put(&key, marshal(availability)?, Some(&Condition::NotExists))
            .map_err(|err| SchedulerError::from_write("availability", "already exists", err))
    }

    /// Reads a live availability.
    pub fn get_availability(&self, owner: &str, id: &str) -> SchedulerResult<Availability> {
        let key = self.availability_key(owner, id)?;
        match self.store.get(&key)? {
            Some(item) => unmarshal(item),
            None => Err(SchedulerError::NotFound {
                entity: "availability",
                key: key.to_string(),
            }),
        }
    }

    /// Removes a live availability. Fails with a conflict when it is
    /// already gone, whether booked or deleted.
    pub fn delete_availability(&self, owner: &str, id: &str) -> SchedulerResult<()> {
        let key = self.availability_key(owner, id)?;
        self.store
            .delete(&key, Some(&Condition::Exists))
            .map_err(|err| SchedulerError::from_write("availability", AVAILABILITY_GONE, err))?;
        debug!(%key, "availability removed");
        Ok(())
    }

    /// Persists a new meeting.
    pub fn insert_meeting(&self, meeting: &Meeting) -> SchedulerResult<()> {
        let key = self.meeting_key(&meeting.id)?;
        self.store
            .put(&key, marshal(meeting)?, Some(&Condition::NotExists))
            .map_err(|err| SchedulerError::from_write("meeting", "already exists", err))
    }

    /// Reads a meeting.
    pub fn get_meeting(&self, id: &MeetingId) -> SchedulerResult<Meeting> {
        let key = self.meeting_key(id)?;
        match self.store.get(&key)? {
            Some(item) => unmarshal(item),
            None => Err(SchedulerError::NotFound {
                entity: "meeting",
                key: key.to_string(),
            }),
        }
    }

    /// True when a meeting is stored under `id`. Fails with a validation
    /// error for ids that can never name a meeting.
    pub fn meeting_exists(&self, id: &str) -> SchedulerResult<bool> {
        let key = self.meeting_key(id)?;
        Ok(self.store.get(&key)?.is_some())
    }

    /// Writes `meeting` with status canceled, only if the stored meeting is
    /// still scheduled.
    pub fn mark_meeting_canceled(&self, meeting: &Meeting) -> SchedulerResult<Meeting> {
        let key = self.meeting_key(&meeting.id)?;
        let mut canceled = meeting.clone();
        canceled.status = MeetingStatus::Canceled;
        let condition = Condition::AttributeEquals {
            name: "status".to_string(),
            value: Value::from(MeetingStatus::Scheduled.as_str()),
        };
        self.store
            .put(&key, marshal(&canceled)?, Some(&condition))
            .map_err(|err| SchedulerError::from_write("meeting", "is already canceled", err))?;
        Ok(canceled)
    }

    /// Deletes the availability and inserts the meeting in one store
    /// transaction.
    pub fn swap_availability_for_meeting(
        &self,
        availability: &Availability,
        meeting: &Meeting,
    ) -> SchedulerResult<()> {
        let availability_key = self.availability_key(&availability.owner, &availability.id)?;
        let meeting_key = self.meeting_key(&meeting.id)?;
        let writes = [
            WriteOp::Delete {
                key: availability_key,
                condition: Some(Condition::Exists),
            },
            WriteOp::Put {
                key: meeting_key,
                item: marshal(meeting)?,
                condition: Some(Condition::NotExists),
            },
        ];
        self.store
            .transact(&writes)
            .map_err(|err| SchedulerError::from_write("availability", AVAILABILITY_GONE, err))
    }
}

/// Serializes an entity into a stored item.
pub(crate) fn marshal<T: Serialize>(value: &T) -> SchedulerResult<Item> {
    match serde_json::to_value(value).map_err(|e| SchedulerError::validation(e.to_string()))? {
        Value::Object(item) => Ok(item),
        other => Err(SchedulerError::validation(format!(
            "entity must marshal to a map, got {other}"
        ))),
    }
}

/// Deserializes a stored item into an entity.
pub(crate) fn unmarshal<T: DeserializeOwned>(item: Item) -> SchedulerResult<T> {
    serde_json::from_value(Value::Object(item))
        .map_err(|e| SchedulerError::Transient(crate::kv::StoreError::Serde(e)))
}
