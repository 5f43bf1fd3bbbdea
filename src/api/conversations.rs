//! Conversations endpoints

use crate::api::{ApiError, ExtractToken};
use crate::api::conversations::schemas::{ConversationList, CreateConversation, CreateMessage};
use crate::core::assistant::{CONTEXT_WINDOW, ChatMessage, ModelClient, StreamEvent};
use crate::core::services::title_from_message;
use crate::core::traits::{AccountService, ConversationService, MemoryService, UsageService};
use crate::infrastructure::entities;
use crate::infrastructure::entities::MessageKind;
use async_stream::stream;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::get;
use axum::{Json, Router};
use di::Ref;
use di_axum::Inject;
use futures_util::{Stream, StreamExt};
use log::{error, warn};
use std::time::Duration;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(new_conversation))
        .route("/:id", axum::routing::delete(delete_conversation))
        .route(
            "/:id/messages",
            get(conversation_messages).post(post_message),
        )
}

async fn list_conversations(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<ConversationList>, ApiError> {
    let user = accounts.authenticate(token).await?;
    let conversations = conversation_service.list_conversations(user.id).await?;

    Ok(Json(ConversationList {
        conversations: conversations
            .into_iter()
            .map(schemas::Conversation::from)
            .collect(),
    }))
}

async fn new_conversation(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(usage): Inject<dyn UsageService>,
    Inject(memories): Inject<dyn MemoryService>,
    Inject(model): Inject<dyn ModelClient>,
    ExtractToken(token): ExtractToken,
    Json(create_conversation): Json<CreateConversation>,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>>>, ApiError> {
    let user = accounts.authenticate(token).await?;
    usage.check_quota(&user).await?;

    let conversation = conversation_service
        .create_conversation(
            user.id,
            create_conversation.project_id,
            Some(title_from_message(&create_conversation.message)),
        )
        .await?;

    save_message_and_generate_response(
        conversation_service,
        usage,
        memories,
        model,
        user,
        conversation.id,
        create_conversation.message,
    )
    .await
}

async fn delete_conversation(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = accounts.authenticate(token).await?;
    conversation_service
        .delete_conversation(user.id, conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn conversation_messages(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    Path(conversation_id): Path<Uuid>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::MessagesList>, ApiError> {
    let user = accounts.authenticate(token).await?;
    let messages = conversation_service
        .list_messages(user.id, conversation_id)
        .await?;

    Ok(Json(schemas::MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

async fn post_message(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(usage): Inject<dyn UsageService>,
    Inject(memories): Inject<dyn MemoryService>,
    Inject(model): Inject<dyn ModelClient>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
    Json(message): Json<CreateMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>>>, ApiError> {
    let user = accounts.authenticate(token).await?;

    save_message_and_generate_response(
        conversation_service,
        usage,
        memories,
        model,
        user,
        conversation_id,
        message.text,
    )
    .await
}

/// Shared tail of both chat endpoints: persist the user message, call the
/// model with the recent window plus remembered facts, stream deltas out, and
/// settle persistence and accounting when the stream ends.
async fn save_message_and_generate_response(
    conversation_service: Ref<dyn ConversationService>,
    usage: Ref<dyn UsageService>,
    memories: Ref<dyn MemoryService>,
    model: Ref<dyn ModelClient>,
    user: entities::User,
    conversation_id: Uuid,
    text: String,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>> + Sized>, ApiError> {
    usage.check_quota(&user).await?;

    let message = conversation_service
        .create_user_message(user.id, conversation_id, text)
        .await?;

    let history = conversation_service
        .list_messages(user.id, conversation_id)
        .await?;

    // Memory recall is best effort: a broken memory table must not block chat.
    let preamble = match memories.recall_preamble(user.id).await {
        Ok(preamble) => preamble,
        Err(e) => {
            warn!("memory recall failed for user {}: {e}", user.id);
            None
        }
    };

    let mut system = String::new();
    let mut turns: Vec<ChatMessage> = Vec::new();
    for m in history {
        if matches!(m.kind, MessageKind::System) {
            system.push_str(&m.text);
        } else {
            turns.push(ChatMessage::from(m));
        }
    }
    if let Some(preamble) = preamble {
        system.push('\n');
        system.push_str(&preamble);
    }

    let window = turns.split_off(turns.len().saturating_sub(CONTEXT_WINDOW));

    let user_text = message.text.clone();
    let message_id = Uuid::new_v4();
    let conversation_id = message.conversation_id;

    let mut upstream = model.stream_chat(window, (!system.is_empty()).then_some(system));

    let stream = stream! {
        yield Ok(Event::default().event("new_message").json_data(schemas::Message::from(message)).unwrap());

        let mut assistant_message = String::new();
        let mut input_tokens = 0i64;
        let mut output_tokens = 0i64;

        while let Some(event) = upstream.next().await {
            match event {
                Ok(StreamEvent::Start { input_tokens: n }) => input_tokens = n,
                Ok(StreamEvent::Delta { text }) => {
                    assistant_message.push_str(&text);
                    yield Ok(Event::default().event("message_part").retry(Duration::from_millis(100)).json_data(schemas::MessagePart {
                        conversation_id,
                        message_id,
                        message_part: text,
                    }).unwrap());
                }
                Ok(StreamEvent::Done { output_tokens: n }) => {
                    output_tokens = n;
                    break;
                }
                Err(e) => {
                    error!("model stream for conversation {conversation_id} failed: {e}");
                    yield Ok(Event::default().event("error").json_data(schemas::StreamError {
                        message: e.to_string(),
                    }).unwrap());
                    return;
                }
            }
        }

        if let Err(e) = conversation_service
            .create_bot_message_with_id(user.id, conversation_id, assistant_message, message_id)
            .await
        {
            error!("failed to save assistant message: {e}");
            yield Ok(Event::default().event("error").json_data(schemas::StreamError {
                message: "failed to save assistant message".to_owned(),
            }).unwrap());
            return;
        }

        if let Err(e) = usage.record(&user, input_tokens + output_tokens).await {
            error!("failed to record usage for user {}: {e}", user.id);
        }

        // Side effects stay best effort.
        if let Err(e) = memories.extract_and_store(user.id, &user_text).await {
            warn!("memory extraction failed for user {}: {e}", user.id);
        }

        yield Ok(Event::default().event("message_done").json_data(schemas::MessageDone {
            conversation_id,
            message_id,
            input_tokens,
            output_tokens,
        }).unwrap());
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct CreateConversation {
        pub message: String,
        #[serde(default)]
        pub project_id: Option<Uuid>,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: Uuid,
        pub created_at: DateTime<Utc>,
        pub title: Option<String>,
        pub project_id: Option<Uuid>,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                created_at: conversation.created_at,
                title: conversation.title,
                project_id: conversation.project_id,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<Conversation>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub enum MessageKind {
        System,
        Bot,
        User,
    }

    impl From<entities::MessageKind> for MessageKind {
        fn from(kind: entities::MessageKind) -> Self {
            match kind {
                entities::MessageKind::System => MessageKind::System,
                entities::MessageKind::Bot => MessageKind::Bot,
                entities::MessageKind::User => MessageKind::User,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub conversation_id: Uuid,
        pub id: Uuid,
        pub kind: MessageKind,
        pub text: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                conversation_id: message.conversation_id,
                id: message.id,
                kind: message.kind.into(),
                text: message.text,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub text: String,
    }

    #[derive(Serialize, Debug)]
    pub struct MessagePart {
        pub conversation_id: Uuid,
        pub message_id: Uuid,
        pub message_part: String,
    }

    #[derive(Serialize, Debug)]
    pub struct MessageDone {
        pub conversation_id: Uuid,
        pub message_id: Uuid,
        pub input_tokens: i64,
        pub output_tokens: i64,
    }

    #[derive(Serialize, Debug)]
    pub struct StreamError {
        pub message: String,
    }
}
