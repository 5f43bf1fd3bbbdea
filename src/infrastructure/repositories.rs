//! DB Repository abstractions

use crate::error::Result;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    Conversation, Memory, Message, Plan, Project, Role, Session, User,
};
use crate::infrastructure::traits::{
    ConversationRepository, MemoryRepository, SessionRepository, UserRepository,
    WebhookEventRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use uuid::Uuid;

#[injectable(UserRepository)]
pub struct DbUserRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn create_user(&self, user: User) -> Result<User> {
        let created = sqlx::query_as(
            "INSERT INTO users (id, email, password_hash, password_salt, role, plan, \
             messages_used, tokens_used, subscription_id, subscription_status, \
             cycle_started_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(user.id)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.password_salt)
        .bind(user.role)
        .bind(user.plan)
        .bind(user.messages_used)
        .bind(user.tokens_used)
        .bind(user.subscription_id)
        .bind(user.subscription_status)
        .bind(user.cycle_started_at)
        .bind(user.created_at)
        .fetch_one(&**self.connection)
        .await?;

        Ok(created)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&**self.connection)
            .await?;

        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as("SELECT * FROM users ORDER BY datetime(created_at) ASC")
            .fetch_all(&**self.connection)
            .await?;

        Ok(users)
    }

    async fn record_usage(&self, user_id: Uuid, tokens: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET messages_used = messages_used + 1, \
             tokens_used = tokens_used + ? WHERE id = ?",
        )
        .bind(tokens)
        .bind(user_id)
        .execute(&**self.connection)
        .await?;

        Ok(())
    }

    async fn reset_cycle(&self, user_id: Uuid, cycle_started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE users SET messages_used = 0, tokens_used = 0, cycle_started_at = ? \
             WHERE id = ?",
        )
        .bind(cycle_started_at)
        .bind(user_id)
        .execute(&**self.connection)
        .await?;

        Ok(())
    }

    async fn set_plan(&self, user_id: Uuid, plan: Plan) -> Result<()> {
        sqlx::query("UPDATE users SET plan = ? WHERE id = ?")
            .bind(plan)
            .bind(user_id)
            .execute(&**self.connection)
            .await?;

        Ok(())
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<()> {
        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role)
            .bind(user_id)
            .execute(&**self.connection)
            .await?;

        Ok(())
    }

    async fn set_subscription(
        &self,
        user_id: Uuid,
        subscription_id: Option<String>,
        status: Option<String>,
        plan: Plan,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET subscription_id = ?, subscription_status = ?, plan = ? \
             WHERE id = ?",
        )
        .bind(subscription_id)
        .bind(status)
        .bind(plan)
        .bind(user_id)
        .execute(&**self.connection)
        .await?;

        Ok(())
    }
}

#[injectable(SessionRepository)]
pub struct DbSessionRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl SessionRepository for DbSessionRepository {
    async fn create_session(&self, session: Session) -> Result<Session> {
        let created = sqlx::query_as(
            "INSERT INTO sessions (token, user, created_at, expires_at) \
             VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(session.token)
        .bind(session.user)
        .bind(session.created_at)
        .bind(session.expires_at)
        .fetch_one(&**self.connection)
        .await?;

        Ok(created)
    }

    async fn find_valid(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<Session>> {
        let session = sqlx::query_as(
            "SELECT * FROM sessions WHERE token = ? AND datetime(expires_at) > datetime(?)",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&**self.connection)
        .await?;

        Ok(session)
    }

    async fn delete_session(&self, token: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&**self.connection)
            .await?;

        Ok(())
    }
}

#[injectable(ConversationRepository)]
pub struct DbConversationRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl ConversationRepository for DbConversationRepository {
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as(
            "SELECT * FROM conversations WHERE user = ? ORDER BY datetime(created_at) ASC",
        )
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await?;

        Ok(conversations)
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let created = sqlx::query_as(
            "INSERT INTO conversations (id, user, project_id, title, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(conversation.id)
        .bind(conversation.user)
        .bind(conversation.project_id)
        .bind(conversation.title)
        .bind(conversation.created_at)
        .fetch_one(&**self.connection)
        .await?;

        Ok(created)
    }

    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        // Messages go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM conversations WHERE id = ? AND user = ?")
            .bind(conversation_id)
            .bind(user_id)
            .execute(&**self.connection)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn conversation_exists(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = ? AND user = ?")
                .bind(conversation_id)
                .bind(user_id)
                .fetch_optional(&**self.connection)
                .await?;

        Ok(row.is_some())
    }

    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as(
            "SELECT messages.id, messages.conversation_id, messages.kind, \
             messages.created_at, messages.text FROM messages \
             INNER JOIN conversations ON conversations.id = messages.conversation_id \
             WHERE conversation_id = ? AND user = ? \
             ORDER BY datetime(messages.created_at) ASC, messages.rowid ASC",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await?;

        Ok(messages)
    }

    async fn create_message_in_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: Message,
    ) -> Result<Message> {
        if !self.conversation_exists(user_id, conversation_id).await? {
            return Err(crate::error::ServiceError::NotFound);
        }

        let created = sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, kind, created_at, text) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(message.kind)
        .bind(message.created_at)
        .bind(message.text)
        .fetch_one(&**self.connection)
        .await?;

        Ok(created)
    }

    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let projects = sqlx::query_as(
            "SELECT * FROM projects WHERE user = ? ORDER BY datetime(created_at) ASC",
        )
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await?;

        Ok(projects)
    }

    async fn create_project(&self, project: Project) -> Result<Project> {
        let created = sqlx::query_as(
            "INSERT INTO projects (id, user, name, created_at) \
             VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(project.id)
        .bind(project.user)
        .bind(project.name)
        .bind(project.created_at)
        .fetch_one(&**self.connection)
        .await?;

        Ok(created)
    }
}

#[injectable(MemoryRepository)]
pub struct DbMemoryRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl MemoryRepository for DbMemoryRepository {
    async fn upsert_memory(&self, memory: Memory) -> Result<()> {
        sqlx::query(
            "INSERT INTO memories (user, key, value, kind, confidence, expires_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user, key) DO UPDATE SET \
             value = excluded.value, kind = excluded.kind, \
             confidence = excluded.confidence, expires_at = excluded.expires_at, \
             updated_at = excluded.updated_at \
             WHERE excluded.confidence >= memories.confidence",
        )
        .bind(memory.user)
        .bind(memory.key)
        .bind(memory.value)
        .bind(memory.kind)
        .bind(memory.confidence)
        .bind(memory.expires_at)
        .bind(memory.updated_at)
        .execute(&**self.connection)
        .await?;

        Ok(())
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Memory>> {
        let memories = sqlx::query_as(
            "SELECT * FROM memories WHERE user = ? \
             AND (expires_at IS NULL OR datetime(expires_at) > datetime(?)) \
             ORDER BY key ASC",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&**self.connection)
        .await?;

        Ok(memories)
    }

    async fn purge_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM memories WHERE user = ? \
             AND expires_at IS NOT NULL AND datetime(expires_at) <= datetime(?)",
        )
        .bind(user_id)
        .bind(now)
        .execute(&**self.connection)
        .await?;

        Ok(result.rows_affected())
    }
}

#[injectable(WebhookEventRepository)]
pub struct DbWebhookEventRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl WebhookEventRepository for DbWebhookEventRepository {
    async fn insert_new(
        &self,
        event_id: &str,
        kind: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO webhook_events (id, kind, received_at) VALUES (?, ?, ?)")
                .bind(event_id)
                .bind(kind)
                .bind(received_at)
                .execute(&**self.connection)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
