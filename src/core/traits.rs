//! DI "Interfaces"

use crate::core::usage::UsageStatus;
use crate::error::Result;
use crate::infrastructure::entities;
use crate::infrastructure::entities::{MessageKind, Plan, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait AccountService: Send + Sync {
    /// Creates the account and an initial session.
    ///
    /// Returns `InvalidInput` for malformed emails or passwords shorter than
    /// 8 characters, and `Conflict` for an already registered email.
    async fn register(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(entities::User, entities::Session)>;

    /// Returns `Unauthorized` when the email is unknown or the password does
    /// not match.
    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(entities::User, entities::Session)>;

    async fn logout(&self, token: Uuid) -> Result<()>;

    /// Resolves a session token to its user. `Unauthorized` when the token is
    /// unknown or expired.
    async fn authenticate(&self, token: Uuid) -> Result<entities::User>;

    /// Like `authenticate`, but also requires the admin role.
    async fn require_admin(&self, token: Uuid) -> Result<entities::User> {
        let user = self.authenticate(token).await?;
        if !user.role.at_least(Role::Admin) {
            return Err(crate::error::ServiceError::Forbidden);
        }
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<entities::User>>;
    async fn set_plan(&self, user_id: Uuid, plan: Plan) -> Result<()>;
    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<()>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Lists all conversations for the given user.
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<entities::Conversation>>;

    /// Creates a new conversation for the given user, seeded with the system
    /// prompt. The title is derived from the first user message.
    async fn create_conversation(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
        title: Option<String>,
    ) -> Result<entities::Conversation>;

    /// Deletes a conversation and its messages.
    ///
    /// Returns `NotFound` if the conversation did not exist or belongs to
    /// another user.
    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<()>;

    /// List all messages in a conversation.
    ///
    /// Returns `NotFound` if the conversation isn't visible to this user.
    async fn list_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<entities::Message>>;

    /// Creates a new message in a conversation.
    ///
    /// The helper functions `create_X_message` should be used instead for
    /// clarity.
    async fn create_raw_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        kind: MessageKind,
        content: String,
        message_id: Uuid,
    ) -> Result<entities::Message>;

    async fn create_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::User,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    async fn create_bot_message_with_id(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
        message_id: Uuid,
    ) -> Result<entities::Message> {
        self.create_raw_message(user_id, conversation_id, MessageKind::Bot, message, message_id)
            .await
    }

    async fn create_system_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::System,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<entities::Project>>;
    async fn create_project(&self, user_id: Uuid, name: String) -> Result<entities::Project>;
}

#[async_trait]
pub trait UsageService: Send + Sync {
    /// Rejects with `LimitExceeded` (the fixed message naming the quota) once
    /// the user's counter has reached the plan quota.
    async fn check_quota(&self, user: &entities::User) -> Result<()>;

    /// Records one message plus the given token count. Fires a best-effort
    /// usage notification when the increment crosses an alert threshold;
    /// notification failure never surfaces.
    async fn record(&self, user: &entities::User, tokens: i64) -> Result<()>;

    fn status(&self, user: &entities::User) -> UsageStatus;
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Extracts facts from a user message and upserts them. Returns how many
    /// facts were stored.
    async fn extract_and_store(&self, user_id: Uuid, text: &str) -> Result<usize>;

    /// Renders the user's remembered, non-expired facts into a system-prompt
    /// preamble. Expired facts are purged along the way.
    async fn recall_preamble(&self, user_id: Uuid) -> Result<Option<String>>;
}

/// Parsed payment-provider webhook event.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub id: String,
    pub kind: String,
    pub customer_email: String,
    pub plan: Option<String>,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Applies a verified webhook event. Replays of an already-seen event id
    /// succeed without effect; unknown event kinds are ignored.
    async fn handle_event(&self, event: BillingEvent) -> Result<()>;
}

/// Outbound usage notifications (email in production; the default
/// implementation just logs).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_usage(&self, user: &entities::User, threshold: u8) -> Result<()>;
}
