//! Infrastructure traits, used for DI on higher levels

use crate::error::Result;
use crate::infrastructure::entities;
use crate::infrastructure::entities::{Plan, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: entities::User) -> Result<entities::User>;
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<entities::User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<entities::User>>;
    async fn list_users(&self) -> Result<Vec<entities::User>>;

    /// Adds one message and the given token count to the user's running
    /// counters in a single UPDATE.
    async fn record_usage(&self, user_id: Uuid, tokens: i64) -> Result<()>;

    /// Zeroes both counters and starts a new billing cycle.
    async fn reset_cycle(&self, user_id: Uuid, cycle_started_at: DateTime<Utc>) -> Result<()>;

    async fn set_plan(&self, user_id: Uuid, plan: Plan) -> Result<()>;
    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<()>;
    async fn set_subscription(
        &self,
        user_id: Uuid,
        subscription_id: Option<String>,
        status: Option<String>,
        plan: Plan,
    ) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: entities::Session) -> Result<entities::Session>;

    /// Looks the token up, ignoring sessions that expired before `now`.
    async fn find_valid(&self, token: Uuid, now: DateTime<Utc>)
    -> Result<Option<entities::Session>>;

    async fn delete_session(&self, token: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<entities::Conversation>>;
    async fn create_conversation(
        &self,
        conversation: entities::Conversation,
    ) -> Result<entities::Conversation>;

    /// Deletes the conversation if it belongs to the user. `Ok(false)` when
    /// nothing matched.
    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool>;

    async fn conversation_exists(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool>;

    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<entities::Message>>;

    async fn create_message_in_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: entities::Message,
    ) -> Result<entities::Message>;

    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<entities::Project>>;
    async fn create_project(&self, project: entities::Project) -> Result<entities::Project>;
}

#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Upserts by `(user, key)`. An existing fact is only overwritten when the
    /// incoming confidence is at least as high as the stored one.
    async fn upsert_memory(&self, memory: entities::Memory) -> Result<()>;

    /// Facts that have not expired as of `now`, ordered by key.
    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>)
    -> Result<Vec<entities::Memory>>;

    async fn purge_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Records the provider event id. `Ok(false)` when the id was already
    /// seen, which callers treat as a no-op replay.
    async fn insert_new(&self, event_id: &str, kind: &str, received_at: DateTime<Utc>)
    -> Result<bool>;
}
