use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Chat, ChatId, ChatMember, ChatRepository, MemberRole, Message, MessageId, NewChat,
    NewMessage, PublicChat, RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct ChatRecord {
    id: i64,
    name: String,
    is_direct: bool,
    is_public: bool,
    creator_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    chat_id: i64,
    user_id: i64,
    username: String,
    role: String,
}

impl TryFrom<MemberRecord> for ChatMember {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        let role = MemberRole::parse(&value.role)
            .ok_or_else(|| invalid_data(format!("unknown member role: {}", value.role)))?;
        Ok(ChatMember {
            chat_id: ChatId::new(value.chat_id),
            user_id: UserId::new(value.user_id),
            username: value.username,
            role,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    chat_id: i64,
    user_id: i64,
    from_username: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::new(value.id),
            chat_id: ChatId::new(value.chat_id),
            user_id: UserId::new(value.user_id),
            from_username: value.from_username,
            text: value.text,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PublicChatRecord {
    id: i64,
    name: String,
    member_count: i64,
    creator_name: Option<String>,
    created_at: DateTime<Utc>,
}

const CHAT_COLUMNS: &str = "c.id, c.name, c.is_direct, c.is_public, c.creator_id, c.created_at, c.updated_at";

/// PostgreSQL 实现的聊天仓储
#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 为一组聊天记录补全成员列表
    async fn with_members(&self, records: Vec<ChatRecord>) -> Result<Vec<Chat>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let member_records = sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT chat_id, user_id, username, role
            FROM chat_members
            WHERE chat_id = ANY($1)
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut members: HashMap<i64, Vec<ChatMember>> = HashMap::new();
        for record in member_records {
            let chat_id = record.chat_id;
            members
                .entry(chat_id)
                .or_default()
                .push(ChatMember::try_from(record)?);
        }

        Ok(records
            .into_iter()
            .map(|record| Chat {
                id: ChatId::new(record.id),
                name: record.name,
                is_direct: record.is_direct,
                is_public: record.is_public,
                creator_id: UserId::new(record.creator_id),
                members: members.remove(&record.id).unwrap_or_default(),
                created_at: record.created_at,
                updated_at: record.updated_at,
            })
            .collect())
    }

    async fn insert_chat(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        is_direct: bool,
        is_public: bool,
        creator_id: UserId,
    ) -> Result<i64, RepositoryError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chats (name, is_direct, is_public, creator_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(is_direct)
        .bind(is_public)
        .bind(creator_id.value())
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_err)
    }

    async fn insert_member(
        tx: &mut Transaction<'_, Postgres>,
        chat_id: i64,
        user_id: UserId,
        username: &str,
        role: MemberRole,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_members (chat_id, user_id, username, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chat_id, user_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(user_id.value())
        .bind(username)
        .bind(role.as_str())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create(&self, chat: NewChat) -> Result<ChatId, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let chat_id = Self::insert_chat(
            &mut tx,
            &chat.name,
            chat.is_direct,
            chat.is_public,
            chat.creator_id,
        )
        .await?;
        for member in &chat.members {
            Self::insert_member(&mut tx, chat_id, member.user_id, &member.username, member.role)
                .await?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(ChatId::new(chat_id))
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(chat_id.value())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn chat_exists(&self, chat_id: ChatId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM chats WHERE id = $1)")
            .bind(chat_id.value())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn is_user_in_chat(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(chat_id.value())
        .bind(user_id.value())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn chat_info(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let query = format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = $1");
        let record = sqlx::query_as::<_, ChatRecord>(&query)
            .bind(chat_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.with_members(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn add_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_members (chat_id, user_id, username, role)
            VALUES ($1, $2, $3, 'member')
            "#,
        )
        .bind(chat_id.value())
        .bind(user_id.value())
        .bind(&username)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
            .bind(chat_id.value())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_members WHERE chat_id = $1 AND user_id = $2")
            .bind(chat_id.value())
            .bind(user_id.value())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let query = format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chats c
            JOIN chat_members m ON m.chat_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.created_at DESC, c.id DESC
            "#
        );
        let records = sqlx::query_as::<_, ChatRecord>(&query)
            .bind(user_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        self.with_members(records).await
    }

    async fn public_chats(&self, search: String) -> Result<Vec<PublicChat>, RepositoryError> {
        let records = sqlx::query_as::<_, PublicChatRecord>(
            r#"
            SELECT c.id,
                   c.name,
                   c.created_at,
                   COUNT(m.user_id) AS member_count,
                   MAX(CASE WHEN m.user_id = c.creator_id THEN m.username END) AS creator_name
            FROM chats c
            LEFT JOIN chat_members m ON m.chat_id = c.id
            WHERE c.is_public AND NOT c.is_direct
              AND ($1 = '' OR c.name ILIKE '%' || $1 || '%')
            GROUP BY c.id
            ORDER BY c.created_at DESC
            LIMIT 100
            "#,
        )
        .bind(&search)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records
            .into_iter()
            .map(|record| PublicChat {
                id: ChatId::new(record.id),
                name: record.name,
                member_count: record.member_count,
                creator_name: record.creator_name.unwrap_or_default(),
                created_at: record.created_at,
            })
            .collect())
    }

    async fn find_direct_chat(
        &self,
        first: UserId,
        second: UserId,
    ) -> Result<Option<ChatId>, RepositoryError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT c.id
            FROM chats c
            JOIN chat_members a ON a.chat_id = c.id AND a.user_id = $1
            JOIN chat_members b ON b.chat_id = c.id AND b.user_id = $2
            WHERE c.is_direct
            LIMIT 1
            "#,
        )
        .bind(first.value())
        .bind(second.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(id.map(ChatId::new))
    }

    async fn create_direct_chat(
        &self,
        first: UserId,
        first_username: String,
        second: UserId,
        second_username: String,
    ) -> Result<ChatId, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let name = format!("{first_username} & {second_username}");
        let chat_id = Self::insert_chat(&mut tx, &name, true, false, first).await?;
        Self::insert_member(&mut tx, chat_id, first, &first_username, MemberRole::Member).await?;
        Self::insert_member(&mut tx, chat_id, second, &second_username, MemberRole::Member)
            .await?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(ChatId::new(chat_id))
    }

    async fn send_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (chat_id, user_id, from_username, text, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, chat_id, user_id, from_username, text, created_at
            "#,
        )
        .bind(message.chat_id.value())
        .bind(message.user_id.value())
        .bind(&message.from_username)
        .bind(&message.text)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, chat_id, user_id, from_username, text, created_at
            FROM (
                SELECT id, chat_id, user_id, from_username, text, created_at
                FROM messages
                WHERE chat_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(chat_id.value())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
