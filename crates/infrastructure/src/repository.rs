use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Attachment, AttachmentId, CastingId, Dialog, DialogId, DialogRepository, Emoji, Message,
    MessageContent, MessageId, MessageRepository, MessageType, OutgoingMessage, Participant,
    ParticipantRepository, ParticipantRole, Reaction, ReactionRepository, ReadReceipt,
    ReadReceiptRepository, RepositoryError, RepositoryResult, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        // 外键不存在（对话、被回复的消息等）
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const DIALOG_COLUMNS: &str =
    "id, is_group, title, image_url, casting_id, last_message_id, created_at, updated_at";
const PARTICIPANT_COLUMNS: &str =
    "dialog_id, user_id, role, joined_at, last_seen_at, is_muted, typing_until, left_at";
const MESSAGE_COLUMNS: &str =
    "id, dialog_id, sender_id, message_type, content, reply_to_id, forward_from_id, created_at";
const ATTACHMENT_COLUMNS: &str =
    "id, message_id, uploader_id, file_name, mime_type, size, url, created_at";

#[derive(Debug, FromRow)]
struct DialogRecord {
    id: Uuid,
    is_group: bool,
    title: Option<String>,
    image_url: Option<String>,
    casting_id: Option<Uuid>,
    last_message_id: Option<Uuid>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<DialogRecord> for Dialog {
    fn from(value: DialogRecord) -> Self {
        Dialog {
            id: DialogId::from(value.id),
            is_group: value.is_group,
            title: value.title,
            image_url: value.image_url,
            casting_id: value.casting_id.map(CastingId::from),
            last_message_id: value.last_message_id.map(MessageId::from),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    dialog_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: Timestamp,
    last_seen_at: Option<Timestamp>,
    is_muted: bool,
    typing_until: Option<Timestamp>,
    left_at: Option<Timestamp>,
}

impl TryFrom<ParticipantRecord> for Participant {
    type Error = RepositoryError;

    fn try_from(value: ParticipantRecord) -> Result<Self, Self::Error> {
        let role = ParticipantRole::parse(&value.role)
            .ok_or_else(|| invalid_data(format!("unknown participant role: {}", value.role)))?;

        Ok(Participant {
            dialog_id: DialogId::from(value.dialog_id),
            user_id: UserId::from(value.user_id),
            role,
            joined_at: value.joined_at,
            last_seen_at: value.last_seen_at,
            is_muted: value.is_muted,
            typing_until: value.typing_until,
            left_at: value.left_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    dialog_id: Uuid,
    sender_id: Uuid,
    message_type: String,
    content: String,
    reply_to_id: Option<Uuid>,
    forward_from_id: Option<Uuid>,
    created_at: Timestamp,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let message_type = MessageType::parse(&value.message_type)
            .ok_or_else(|| invalid_data(format!("unknown message type: {}", value.message_type)))?;
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message::new(
            MessageId::from(value.id),
            DialogId::from(value.dialog_id),
            UserId::from(value.sender_id),
            message_type,
            content,
            value.reply_to_id.map(MessageId::from),
            value.forward_from_id.map(MessageId::from),
            value.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct AttachmentRecord {
    id: Uuid,
    message_id: Uuid,
    uploader_id: Uuid,
    file_name: String,
    mime_type: String,
    size: i64,
    url: String,
    created_at: Timestamp,
}

impl TryFrom<AttachmentRecord> for Attachment {
    type Error = RepositoryError;

    fn try_from(value: AttachmentRecord) -> Result<Self, Self::Error> {
        let size = u64::try_from(value.size)
            .map_err(|_| invalid_data(format!("negative attachment size: {}", value.size)))?;

        Ok(Attachment {
            id: AttachmentId::from(value.id),
            message_id: MessageId::from(value.message_id),
            uploader_id: UserId::from(value.uploader_id),
            file_name: value.file_name,
            mime_type: value.mime_type,
            size,
            url: value.url,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
    created_at: Timestamp,
}

impl TryFrom<ReactionRecord> for Reaction {
    type Error = RepositoryError;

    fn try_from(value: ReactionRecord) -> Result<Self, Self::Error> {
        let emoji = Emoji::parse(value.emoji).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Reaction {
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            emoji,
            created_at: value.created_at,
        })
    }
}

/// 给一批消息挂上附件
async fn load_attachments(pool: &PgPool, messages: &mut [Message]) -> RepositoryResult<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = messages.iter().map(|message| message.id.0).collect();
    let records = sqlx::query_as::<_, AttachmentRecord>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM message_attachments \
         WHERE message_id = ANY($1) ORDER BY created_at ASC, id ASC"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    let mut grouped: HashMap<MessageId, Vec<Attachment>> = HashMap::new();
    for record in records {
        let attachment = Attachment::try_from(record)?;
        grouped
            .entry(attachment.message_id)
            .or_default()
            .push(attachment);
    }
    for message in messages.iter_mut() {
        message.attachments = grouped.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgDialogRepository {
    pool: PgPool,
}

impl PgDialogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DialogRepository for PgDialogRepository {
    async fn create_with_participants(
        &self,
        dialog: Dialog,
        participants: Vec<Participant>,
    ) -> RepositoryResult<Dialog> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, DialogRecord>(&format!(
            "INSERT INTO dialogs ({DIALOG_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {DIALOG_COLUMNS}"
        ))
        .bind(dialog.id.0)
        .bind(dialog.is_group)
        .bind(dialog.title.as_deref())
        .bind(dialog.image_url.as_deref())
        .bind(dialog.casting_id.map(Uuid::from))
        .bind(dialog.last_message_id.map(Uuid::from))
        .bind(dialog.created_at)
        .bind(dialog.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for participant in &participants {
            sqlx::query(&format!(
                "INSERT INTO dialog_participants ({PARTICIPANT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(participant.dialog_id.0)
            .bind(participant.user_id.0)
            .bind(participant.role.as_str())
            .bind(participant.joined_at)
            .bind(participant.last_seen_at)
            .bind(participant.is_muted)
            .bind(participant.typing_until)
            .bind(participant.left_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(Dialog::from(record))
    }

    async fn find_by_id(&self, id: DialogId) -> RepositoryResult<Option<Dialog>> {
        let record = sqlx::query_as::<_, DialogRecord>(&format!(
            "SELECT {DIALOG_COLUMNS} FROM dialogs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Dialog::from))
    }

    async fn find_direct(
        &self,
        first: UserId,
        second: UserId,
    ) -> RepositoryResult<Option<Dialog>> {
        let record = sqlx::query_as::<_, DialogRecord>(
            r#"
            SELECT d.id, d.is_group, d.title, d.image_url, d.casting_id, d.last_message_id,
                   d.created_at, d.updated_at
            FROM dialogs d
            JOIN dialog_participants a
              ON a.dialog_id = d.id AND a.user_id = $1 AND a.left_at IS NULL
            JOIN dialog_participants b
              ON b.dialog_id = d.id AND b.user_id = $2 AND b.left_at IS NULL
            WHERE d.is_group = FALSE
            ORDER BY d.updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(first.0)
        .bind(second.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Dialog::from))
    }
}

#[derive(Clone)]
pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn find(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM dialog_participants \
             WHERE dialog_id = $1 AND user_id = $2"
        ))
        .bind(dialog_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Participant::try_from).transpose()
    }

    async fn list_active(&self, dialog_id: DialogId) -> RepositoryResult<Vec<Participant>> {
        let records = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM dialog_participants \
             WHERE dialog_id = $1 AND left_at IS NULL \
             ORDER BY joined_at ASC, user_id ASC"
        ))
        .bind(dialog_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Participant::try_from).collect()
    }

    async fn set_typing_until(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        until: Option<Timestamp>,
    ) -> RepositoryResult<Participant> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "UPDATE dialog_participants SET typing_until = $3 \
             WHERE dialog_id = $1 AND user_id = $2 AND left_at IS NULL \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(dialog_id.0)
        .bind(user_id.0)
        .bind(until)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        active_row(record)
    }

    async fn touch_seen(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "UPDATE dialog_participants SET last_seen_at = $3 \
             WHERE dialog_id = $1 AND user_id = $2 AND left_at IS NULL \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(dialog_id.0)
        .bind(user_id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        active_row(record)
    }

    async fn set_muted(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        muted: bool,
    ) -> RepositoryResult<Participant> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "UPDATE dialog_participants SET is_muted = $3 \
             WHERE dialog_id = $1 AND user_id = $2 AND left_at IS NULL \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(dialog_id.0)
        .bind(user_id.0)
        .bind(muted)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        active_row(record)
    }

    async fn mark_left(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            "UPDATE dialog_participants SET left_at = $3, typing_until = NULL \
             WHERE dialog_id = $1 AND user_id = $2 AND left_at IS NULL \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(dialog_id.0)
        .bind(user_id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        active_row(record)
    }
}

/// 条件更新没有命中任何行：成员不存在或已退出
fn active_row(record: Option<ParticipantRecord>) -> RepositoryResult<Participant> {
    record
        .ok_or(RepositoryError::NotFound)
        .and_then(Participant::try_from)
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn persist_outgoing(&self, outgoing: OutgoingMessage) -> RepositoryResult<Message> {
        let OutgoingMessage {
            message,
            sender_receipt,
        } = outgoing;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.id.0)
        .bind(message.dialog_id.0)
        .bind(message.sender_id.0)
        .bind(message.message_type.as_str())
        .bind(message.content.as_str())
        .bind(message.reply_to_id.map(Uuid::from))
        .bind(message.forward_from_id.map(Uuid::from))
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for attachment in &message.attachments {
            let size = i64::try_from(attachment.size)
                .map_err(|_| invalid_data("attachment size overflows BIGINT"))?;
            sqlx::query(&format!(
                "INSERT INTO message_attachments ({ATTACHMENT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(attachment.id.0)
            .bind(attachment.message_id.0)
            .bind(attachment.uploader_id.0)
            .bind(&attachment.file_name)
            .bind(&attachment.mime_type)
            .bind(size)
            .bind(&attachment.url)
            .bind(attachment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        let advanced = sqlx::query(
            "UPDATE dialogs SET last_message_id = $2, updated_at = GREATEST(updated_at, $3) WHERE id = $1",
        )
        .bind(message.dialog_id.0)
        .bind(message.id.0)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if advanced.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "INSERT INTO message_read_receipts (message_id, user_id, read_at) \
             VALUES ($1, $2, $3) ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(sender_receipt.message_id.0)
        .bind(sender_receipt.user_id.0)
        .bind(sender_receipt.read_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        let mut stored = Message::try_from(record)?;
        stored.attachments = message.attachments;
        Ok(stored)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };
        let mut messages = vec![Message::try_from(record)?];
        load_attachments(&self.pool, &mut messages).await?;
        Ok(messages.pop())
    }

    async fn list_recent(
        &self,
        dialog_id: DialogId,
        limit: u32,
        before: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>> {
        let records = match before {
            Some(cursor) => {
                // 游标消息不存在时返回 NotFound，而不是静默给出第一页
                let anchor: Option<(Timestamp,)> =
                    sqlx::query_as("SELECT created_at FROM messages WHERE id = $1")
                        .bind(cursor.0)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(map_sqlx_err)?;
                let (anchor_at,) = anchor.ok_or(RepositoryError::NotFound)?;

                sqlx::query_as::<_, MessageRecord>(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE dialog_id = $1 AND (created_at, id) < ($2, $3) \
                     ORDER BY created_at DESC, id DESC LIMIT $4"
                ))
                .bind(dialog_id.0)
                .bind(anchor_at)
                .bind(cursor.0)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?
            }
            None => sqlx::query_as::<_, MessageRecord>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE dialog_id = $1 \
                 ORDER BY created_at DESC, id DESC LIMIT $2"
            ))
            .bind(dialog_id.0)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?,
        };

        let mut messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<RepositoryResult<Vec<_>>>()?;
        load_attachments(&self.pool, &mut messages).await?;
        Ok(messages)
    }
}

#[derive(Clone)]
pub struct PgReadReceiptRepository {
    pool: PgPool,
}

impl PgReadReceiptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadReceiptRepository for PgReadReceiptRepository {
    async fn insert_if_absent(&self, receipt: ReadReceipt) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "INSERT INTO message_read_receipts (message_id, user_id, read_at) \
             VALUES ($1, $2, $3) ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(receipt.message_id.0)
        .bind(receipt.user_id.0)
        .bind(receipt.read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_missing(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<Vec<MessageId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            WITH inserted AS (
                INSERT INTO message_read_receipts (message_id, user_id, read_at)
                SELECT m.id, $2, $3
                FROM messages m
                WHERE m.dialog_id = $1
                  AND NOT EXISTS (
                      SELECT 1 FROM message_read_receipts r
                      WHERE r.message_id = m.id AND r.user_id = $2
                  )
                ON CONFLICT (message_id, user_id) DO NOTHING
                RETURNING message_id
            )
            SELECT i.message_id
            FROM inserted i
            JOIN messages m ON m.id = i.message_id
            ORDER BY m.created_at ASC, m.id ASC
            "#,
        )
        .bind(dialog_id.0)
        .bind(user_id.0)
        .bind(read_at)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(|(id,)| MessageId::from(id)).collect())
    }

    async fn count_unread(&self, dialog_id: DialogId, user_id: UserId) -> RepositoryResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.dialog_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM message_read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(dialog_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        u64::try_from(count).map_err(|_| invalid_data("negative unread count"))
    }
}

#[derive(Clone)]
pub struct PgReactionRepository {
    pool: PgPool,
}

impl PgReactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReactionRepository for PgReactionRepository {
    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Reaction>> {
        let record = sqlx::query_as::<_, ReactionRecord>(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = $1 AND user_id = $2",
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Reaction::try_from).transpose()
    }

    async fn upsert(&self, reaction: Reaction) -> RepositoryResult<Reaction> {
        let record = sqlx::query_as::<_, ReactionRecord>(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET emoji = EXCLUDED.emoji, created_at = EXCLUDED.created_at
            RETURNING message_id, user_id, emoji, created_at
            "#,
        )
        .bind(reaction.message_id.0)
        .bind(reaction.user_id.0)
        .bind(reaction.emoji.as_str())
        .bind(reaction.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Reaction::try_from(record)
    }

    async fn remove(&self, message_id: MessageId, user_id: UserId) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2")
            .bind(message_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(())
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub dialog_repository: Arc<PgDialogRepository>,
    pub participant_repository: Arc<PgParticipantRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub receipt_repository: Arc<PgReadReceiptRepository>,
    pub reaction_repository: Arc<PgReactionRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            dialog_repository: Arc::new(PgDialogRepository::new(pool.clone())),
            participant_repository: Arc::new(PgParticipantRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            receipt_repository: Arc::new(PgReadReceiptRepository::new(pool.clone())),
            reaction_repository: Arc::new(PgReactionRepository::new(pool.clone())),
            pool,
        }
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
