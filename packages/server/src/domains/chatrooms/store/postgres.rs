use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::common::{ChatId, MemberId, MessageId, RouterError};
use crate::domains::chatrooms::models::{
    Chat, Member, Message, MessageContent, NewChat, NewMessage,
};
use crate::kernel::BaseChatStore;

/// Chat store backed by Postgres.
pub struct PostgresChatStore {
    pool: PgPool,
}

impl PostgresChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_chat(&self, chat_id: ChatId) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chats WHERE id = $1)")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(RouterError::ChatNotFound(chat_id).into());
        }
        Ok(())
    }

    async fn ensure_member(&self, member_id: &MemberId) -> Result<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE id = $1)")
                .bind(member_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(RouterError::MemberNotFound(member_id.clone()).into());
        }
        Ok(())
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: MemberId,
    name: String,
    kind: String,
    description: Option<String>,
}

impl TryFrom<MemberRow> for Member {
    type Error = anyhow::Error;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(Member {
            id: row.id,
            name: row.name,
            kind: row.kind.parse()?,
            description: row.description,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: ChatId,
    name: Option<String>,
    topic: Option<String>,
    member_ids: Vec<String>,
    created_at: DateTime<Utc>,
}

impl From<ChatRow> for Chat {
    fn from(row: ChatRow) -> Self {
        Chat {
            id: row.id,
            name: row.name,
            topic: row.topic,
            member_ids: row.member_ids.into_iter().map(MemberId::from).collect(),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: MessageId,
    chat_id: ChatId,
    sender_id: Option<MemberId>,
    kind: String,
    content: Json<MessageContent>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            kind: row.kind.parse()?,
            content: row.content.0,
            created_at: row.created_at,
        })
    }
}

const CHAT_SELECT: &str = r#"
    SELECT c.id, c.name, c.topic, c.created_at,
           COALESCE(
               ARRAY_AGG(cm.member_id ORDER BY cm.joined_at, cm.member_id)
                   FILTER (WHERE cm.member_id IS NOT NULL),
               '{}'
           ) AS member_ids
    FROM chats c
    LEFT JOIN chat_members cm ON cm.chat_id = c.id
"#;

// =============================================================================
// Queries
// =============================================================================

#[async_trait]
impl BaseChatStore for PostgresChatStore {
    async fn get_all_members(&self) -> Result<Vec<Member>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT id, name, kind, description FROM members ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Member::try_from).collect()
    }

    async fn find_member(&self, member_id: &MemberId) -> Result<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, name, kind, description FROM members WHERE id = $1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Member::try_from).transpose()
    }

    async fn upsert_member(&self, member: &Member) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (id, name, kind, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, kind = EXCLUDED.kind, description = EXCLUDED.description
            "#,
        )
        .bind(&member.id)
        .bind(&member.name)
        .bind(member.kind.to_string())
        .bind(&member.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_chats(&self) -> Result<Vec<Chat>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "{} GROUP BY c.id ORDER BY c.created_at",
            CHAT_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    async fn find_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "{} WHERE c.id = $1 GROUP BY c.id",
            CHAT_SELECT
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Chat::from))
    }

    async fn get_chats_for_member(&self, member_id: &MemberId) -> Result<Vec<Chat>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            r#"{}
            WHERE c.id IN (SELECT chat_id FROM chat_members WHERE member_id = $1)
            GROUP BY c.id
            ORDER BY c.created_at"#,
            CHAT_SELECT
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        let mut member_ids: Vec<String> = Vec::with_capacity(chat.member_ids.len());
        for id in &chat.member_ids {
            if !member_ids.iter().any(|m| m == id.as_str()) {
                member_ids.push(id.as_str().to_string());
            }
        }

        let known: Vec<String> = sqlx::query_scalar("SELECT id FROM members WHERE id = ANY($1)")
            .bind(&member_ids)
            .fetch_all(&self.pool)
            .await?;
        if let Some(missing) = member_ids.iter().find(|id| !known.contains(id)) {
            return Err(RouterError::MemberNotFound(MemberId::from(missing.as_str())).into());
        }

        let chat_id = ChatId::new();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO chats (id, name, topic) VALUES ($1, $2, $3)")
            .bind(chat_id)
            .bind(&chat.name)
            .bind(&chat.topic)
            .execute(&mut *tx)
            .await?;
        for member_id in &member_ids {
            sqlx::query("INSERT INTO chat_members (chat_id, member_id) VALUES ($1, $2)")
                .bind(chat_id)
                .bind(member_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.find_chat(chat_id)
            .await?
            .ok_or_else(|| RouterError::ChatNotFound(chat_id).into())
    }

    async fn add_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        self.ensure_chat(chat_id).await?;
        self.ensure_member(member_id).await?;
        sqlx::query(
            r#"
            INSERT INTO chat_members (chat_id, member_id)
            VALUES ($1, $2)
            ON CONFLICT (chat_id, member_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(member_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        self.ensure_chat(chat_id).await?;
        sqlx::query("DELETE FROM chat_members WHERE chat_id = $1 AND member_id = $2")
            .bind(chat_id)
            .bind(member_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_conversation_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.ensure_chat(chat_id).await?;
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, chat_id, sender_id, kind, content, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        self.ensure_chat(message.chat_id).await?;
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, kind, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, chat_id, sender_id, kind, content, created_at
            "#,
        )
        .bind(MessageId::new())
        .bind(message.chat_id)
        .bind(&message.sender_id)
        .bind(message.kind().to_string())
        .bind(Json(&message.content))
        .fetch_one(&self.pool)
        .await?;
        Message::try_from(row)
    }
}
