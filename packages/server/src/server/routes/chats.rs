//! Chat management endpoints.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::{Chat, Member, Message, MessageContent};
use crate::server::app::AppState;
use crate::server::routes::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    #[serde(default)]
    pub member_ids: Vec<MemberId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub member_id: MemberId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub text: String,
    /// Defaults to the human member.
    #[serde(default)]
    pub sender_id: Option<MemberId>,
}

pub async fn list_members_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<Member>>, ApiError> {
    Ok(Json(state.chats().members().await?))
}

pub async fn list_chats_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    Ok(Json(state.chats().chats().await?))
}

pub async fn create_chat_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let chat = state
        .chats()
        .create_chat(body.member_ids, body.name, body.topic)
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn add_member_handler(
    Extension(state): Extension<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Chat>, ApiError> {
    let chats = state.chats();
    chats.add_member(chat_id, &body.member_id).await?;
    Ok(Json(chats.chat(chat_id).await?))
}

pub async fn remove_member_handler(
    Extension(state): Extension<AppState>,
    Path((chat_id, member_id)): Path<(ChatId, MemberId)>,
) -> Result<Json<Chat>, ApiError> {
    let chats = state.chats();
    chats.remove_member(chat_id, &member_id).await?;
    Ok(Json(chats.chat(chat_id).await?))
}

pub async fn list_messages_handler(
    Extension(state): Extension<AppState>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.chats().history(chat_id).await?))
}

pub async fn post_message_handler(
    Extension(state): Extension<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let content = MessageContent::text(body.text);
    if content.is_empty() {
        return Err(ApiError::bad_request("message text must not be empty"));
    }

    let chats = state.chats();
    let sender = body
        .sender_id
        .unwrap_or_else(|| chats.human_member_id().clone());
    let message = chats.publish_message(chat_id, content, Some(&sender)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
