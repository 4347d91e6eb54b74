use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use thiserror::Error;

use crate::access::{self, ROLE_CURATOR};
use crate::entities::{chat_message, chat_thread, user_profile};
use crate::profile::{CuratorRef, ResolvedProfile, ROLE_USER, display_name};

/// Both parties of a conversation plus its thread row. Authorization is
/// decided here, once, and the ledger operations trust it.
#[derive(Debug)]
pub struct ChatContext {
    pub requester_id: i64,
    pub client: user_profile::Model,
    pub curator: user_profile::Model,
    pub thread: chat_thread::Model,
    pub requester_is_client: bool,
}

impl ChatContext {
    /// The display name of whoever the requester is talking to.
    pub fn counterpart_name(&self) -> String {
        let other = if self.requester_is_client {
            &self.curator
        } else {
            &self.client
        };
        display_name(
            other.first_name.as_deref(),
            other.last_name.as_deref(),
            other.username.as_deref(),
            other.id,
        )
    }

    pub fn counterpart_id(&self) -> i64 {
        if self.requester_is_client {
            self.curator.id
        } else {
            self.client.id
        }
    }

    /// Chat access is always gated by the client's subscription, no
    /// matter which side of the pair is asking.
    pub fn chat_allowed(&self) -> bool {
        let curator = CuratorRef {
            id: self.curator.id,
            name: display_name(
                self.curator.first_name.as_deref(),
                self.curator.last_name.as_deref(),
                self.curator.username.as_deref(),
                self.curator.id,
            ),
            username: self.curator.username.clone(),
        };
        let client = ResolvedProfile::from_model(self.client.clone(), Some(curator));
        access::derive_access(&client).chat_allowed
    }
}

/// Resolves who is talking to whom. A plain user is always the client of
/// their assigned curator; staff must name a client, and only that
/// client's own curator may open the pair.
pub async fn resolve_context(
    db: &DatabaseConnection,
    requester_tg_id: i64,
    client_id: Option<i64>,
) -> Result<ChatContext, ChatError> {
    let requester = user_profile::Entity::find()
        .filter(user_profile::Column::TgId.eq(requester_tg_id))
        .one(db)
        .await?
        .ok_or(ChatError::UserNotFound)?;

    let requester_is_curator = requester.role == ROLE_CURATOR || requester.is_curator;
    let requester_is_client = requester.role == ROLE_USER && !requester_is_curator;

    let (client, curator) = if requester_is_client {
        let curator_id = requester.curator_id.ok_or(ChatError::NoCurator)?;
        let curator = user_profile::Entity::find_by_id(curator_id)
            .one(db)
            .await?
            .ok_or(ChatError::CuratorNotFound)?;
        (requester.clone(), curator)
    } else {
        let client_id = client_id.ok_or(ChatError::MissingClientId)?;
        let client = user_profile::Entity::find_by_id(client_id)
            .one(db)
            .await?
            .ok_or(ChatError::ClientNotFound)?;
        if client.role != ROLE_USER || client.is_curator {
            return Err(ChatError::InvalidClient);
        }
        let curator_id = client.curator_id.ok_or(ChatError::NoCurator)?;
        if curator_id != requester.id {
            return Err(ChatError::Forbidden);
        }
        (client, requester.clone())
    };

    let thread = find_or_create_thread(db, client.id, curator.id).await?;

    Ok(ChatContext {
        requester_id: requester.id,
        client,
        curator,
        thread,
        requester_is_client,
    })
}

async fn find_or_create_thread(
    db: &DatabaseConnection,
    client_id: i64,
    curator_id: i64,
) -> Result<chat_thread::Model, ChatError> {
    assert!(client_id != curator_id, "Pair endpoints must differ");

    let existing = chat_thread::Entity::find()
        .filter(chat_thread::Column::ClientId.eq(client_id))
        .filter(chat_thread::Column::CuratorId.eq(curator_id))
        .one(db)
        .await?;
    if let Some(thread) = existing {
        return Ok(thread);
    }

    let row = chat_thread::ActiveModel {
        id: NotSet,
        client_id: Set(client_id),
        curator_id: Set(curator_id),
        created_at: NotSet,
    };
    match chat_thread::Entity::insert(row).exec_with_returning(db).await {
        Ok(thread) => Ok(thread),
        // Lost a create race against a concurrent first poll; the unique
        // pair index guarantees the other row is the one to use.
        Err(_) => chat_thread::Entity::find()
            .filter(chat_thread::Column::ClientId.eq(client_id))
            .filter(chat_thread::Column::CuratorId.eq(curator_id))
            .one(db)
            .await?
            .ok_or(ChatError::ThreadNotFound),
    }
}

#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub key: String,
    pub mime: String,
    pub name: Option<String>,
    pub size: i64,
}

/// Schema bounds for the stored media columns.
const MAX_MEDIA_KEY_LEN: usize = 512;
const MAX_MEDIA_TYPE_LEN: usize = 128;

/// Every media field arrives from the request body and must be checked
/// against the stored column bounds before the insert; an over-length
/// value must answer 400, not surface as a storage failure.
fn validate_media(
    mut media: MediaDescriptor,
    thread_id: i64,
    max_media_bytes: i64,
) -> Result<MediaDescriptor, ChatError> {
    // The key must have been issued for this very thread.
    if media.key.len() > MAX_MEDIA_KEY_LEN
        || !media.key.starts_with(&format!("chat/{thread_id}/"))
    {
        return Err(ChatError::InvalidMediaKey);
    }
    if media.mime.len() > MAX_MEDIA_TYPE_LEN || !is_chat_media_type(&media.mime) {
        return Err(ChatError::InvalidMediaType);
    }
    if media.size <= 0 || media.size > max_media_bytes {
        return Err(ChatError::InvalidMediaSize);
    }
    // The display name is bounded the same way the upload path bounds
    // it before issuing a key.
    media.name = media
        .name
        .as_deref()
        .map(crate::storage::sanitize_file_name)
        .filter(|name| !name.is_empty());
    Ok(media)
}

/// Appends one message to the pair's ledger. The id comes from the
/// ledger-wide sequence, so assignment order is arrival order even
/// across threads and concurrent senders.
pub async fn send(
    db: &DatabaseConnection,
    thread: &chat_thread::Model,
    sender_id: i64,
    text: Option<String>,
    media: Option<MediaDescriptor>,
    max_media_bytes: i64,
) -> Result<chat_message::Model, ChatError> {
    if text.is_none() && media.is_none() {
        return Err(ChatError::EmptyMessage);
    }

    let media = media
        .map(|media| validate_media(media, thread.id, max_media_bytes))
        .transpose()?;

    let row = chat_message::ActiveModel {
        id: NotSet,
        thread_id: Set(thread.id),
        sender_id: Set(sender_id),
        text: Set(text),
        media_key: Set(media.as_ref().map(|m| m.key.clone())),
        media_type: Set(media.as_ref().map(|m| m.mime.clone())),
        media_name: Set(media.as_ref().and_then(|m| m.name.clone())),
        media_size: Set(media.as_ref().map(|m| m.size)),
        created_at: NotSet,
        read_at: Set(None),
    };
    let message = chat_message::Entity::insert(row)
        .exec_with_returning(db)
        .await?;
    assert!(message.read_at.is_none(), "New message cannot be read");
    Ok(message)
}

/// All messages with id strictly greater than the caller-owned cursor,
/// ascending. `include_last` pins the newest message into the result so
/// an idle poll still refreshes the visible tail. `mark_read` stamps
/// every unread counterpart message in the thread and is the sole
/// mutation path for read receipts.
pub async fn fetch_since(
    db: &DatabaseConnection,
    thread: &chat_thread::Model,
    requester_id: i64,
    after_id: Option<i64>,
    include_last: bool,
    mark_read: bool,
) -> Result<Vec<chat_message::Model>, ChatError> {
    let mut select = chat_message::Entity::find()
        .filter(chat_message::Column::ThreadId.eq(thread.id))
        .order_by_asc(chat_message::Column::Id);
    if let Some(after_id) = after_id {
        select = select.filter(chat_message::Column::Id.gt(after_id));
    }
    let mut messages = select.all(db).await?;

    if include_last {
        let last = chat_message::Entity::find()
            .filter(chat_message::Column::ThreadId.eq(thread.id))
            .order_by_desc(chat_message::Column::Id)
            .limit(1)
            .one(db)
            .await?;
        messages = merge_tail(messages, last);
    }

    if mark_read {
        let now = Utc::now().fixed_offset();
        chat_message::Entity::update_many()
            .col_expr(chat_message::Column::ReadAt, Expr::value(now))
            .filter(chat_message::Column::ThreadId.eq(thread.id))
            .filter(chat_message::Column::SenderId.ne(requester_id))
            .filter(chat_message::Column::ReadAt.is_null())
            .exec(db)
            .await?;
        stamp_read(&mut messages, requester_id, now);
    }

    if let Some(after_id) = after_id {
        if !include_last {
            assert!(
                messages.iter().all(|m| m.id > after_id),
                "Cursor invariant broken"
            );
        }
    }
    Ok(messages)
}

/// Pins the thread's newest message into a fetched page, keeping ids
/// ascending and never duplicating a message the cursor already caught.
fn merge_tail(
    mut messages: Vec<chat_message::Model>,
    tail: Option<chat_message::Model>,
) -> Vec<chat_message::Model> {
    if let Some(tail) = tail {
        if !messages.iter().any(|m| m.id == tail.id) {
            messages.push(tail);
            messages.sort_by_key(|m| m.id);
        }
    }
    messages
}

/// Mirrors the database stamp on the in-memory page: only unread
/// messages authored by the counterpart receive the timestamp, and an
/// existing receipt is never overwritten.
fn stamp_read(
    messages: &mut [chat_message::Model],
    requester_id: i64,
    now: DateTimeWithTimeZone,
) {
    for message in messages {
        if message.sender_id != requester_id && message.read_at.is_none() {
            message.read_at = Some(now);
        }
    }
}

/// Unread counterpart messages. Index-backed; polled every few seconds
/// per active user, so this must never scan the thread.
pub async fn unread_count(
    db: &DatabaseConnection,
    thread_id: i64,
    viewer_id: i64,
) -> Result<u64, ChatError> {
    let count = chat_message::Entity::find()
        .filter(chat_message::Column::ThreadId.eq(thread_id))
        .filter(chat_message::Column::SenderId.ne(viewer_id))
        .filter(chat_message::Column::ReadAt.is_null())
        .count(db)
        .await?;
    Ok(count)
}

pub fn is_chat_media_type(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("video/")
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("requester has no stored profile")]
    UserNotFound,
    #[error("client has no assigned curator")]
    NoCurator,
    #[error("staff requests must name a client")]
    MissingClientId,
    #[error("client not found")]
    ClientNotFound,
    #[error("target is not a plain client")]
    InvalidClient,
    #[error("requester is not this client's curator")]
    Forbidden,
    #[error("assigned curator no longer exists")]
    CuratorNotFound,
    #[error("chat thread disappeared")]
    ThreadNotFound,
    #[error("chat requires an elevated tariff")]
    NotAllowed,
    #[error("message needs text or media")]
    EmptyMessage,
    #[error("media key does not belong to this thread")]
    InvalidMediaKey,
    #[error("media type must be image/* or video/*")]
    InvalidMediaType,
    #[error("media size is out of bounds")]
    InvalidMediaSize,
    // No safe default exists for message persistence; swallowing this
    // would break the unread-count invariant.
    #[error("chat storage unavailable: {0}")]
    Storage(#[from] DbErr),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound => "user_not_found",
            Self::NoCurator => "no_curator",
            Self::MissingClientId => "missing_client_id",
            Self::ClientNotFound => "client_not_found",
            Self::InvalidClient => "invalid_client",
            Self::Forbidden => "forbidden",
            Self::CuratorNotFound => "curator_not_found",
            Self::ThreadNotFound => "no_thread",
            Self::NotAllowed => "chat_not_allowed",
            Self::EmptyMessage => "missing_content",
            Self::InvalidMediaKey => "invalid_media_key",
            Self::InvalidMediaType => "invalid_media_type",
            Self::InvalidMediaSize => "invalid_media_size",
            Self::Storage(_) => "server_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, sender_id: i64, read: bool) -> chat_message::Model {
        let now = Utc::now().fixed_offset();
        chat_message::Model {
            id,
            thread_id: 1,
            sender_id,
            text: Some(format!("m{id}")),
            media_key: None,
            media_type: None,
            media_name: None,
            media_size: None,
            created_at: now,
            read_at: read.then_some(now),
        }
    }

    fn descriptor(key: &str, mime: &str, name: Option<&str>, size: i64) -> MediaDescriptor {
        MediaDescriptor {
            key: key.to_string(),
            mime: mime.to_string(),
            name: name.map(str::to_string),
            size,
        }
    }

    const VIEWER: i64 = 10;
    const COUNTERPART: i64 = 20;

    #[test]
    fn mark_read_stamps_only_counterpart_messages() {
        let mut page = vec![
            message(1, COUNTERPART, true),
            message(2, VIEWER, false),
            message(3, COUNTERPART, false),
            message(4, COUNTERPART, false),
        ];
        let already_read_at = page[0].read_at;
        let now = Utc::now().fixed_offset();

        stamp_read(&mut page, VIEWER, now);

        assert_eq!(page[0].read_at, already_read_at);
        assert_eq!(page[1].read_at, None);
        assert_eq!(page[2].read_at, Some(now));
        assert_eq!(page[3].read_at, Some(now));
    }

    #[test]
    fn mark_read_leaves_nothing_unread_for_the_viewer() {
        let mut page = vec![
            message(1, COUNTERPART, false),
            message(2, COUNTERPART, false),
            message(3, VIEWER, false),
        ];
        let unread = |page: &[chat_message::Model]| {
            page.iter()
                .filter(|m| m.sender_id != VIEWER && m.read_at.is_none())
                .count()
        };
        assert_eq!(unread(&page), 2);

        stamp_read(&mut page, VIEWER, Utc::now().fixed_offset());
        assert_eq!(unread(&page), 0);
    }

    #[test]
    fn tail_pin_never_duplicates_and_keeps_order() {
        let page = vec![message(5, VIEWER, false), message(6, COUNTERPART, false)];

        let merged = merge_tail(page.clone(), Some(message(6, COUNTERPART, false)));
        assert_eq!(
            merged.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![5, 6]
        );

        // An idle poll past the tail fetches nothing; the pinned tail
        // is the whole result.
        let merged = merge_tail(Vec::new(), Some(message(6, COUNTERPART, false)));
        assert_eq!(merged.iter().map(|m| m.id).collect::<Vec<_>>(), vec![6]);

        let merged = merge_tail(vec![message(5, VIEWER, false)], Some(message(3, VIEWER, true)));
        assert_eq!(
            merged.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![3, 5]
        );

        let merged = merge_tail(page, None);
        assert_eq!(
            merged.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![5, 6]
        );
    }

    #[test]
    fn media_fields_are_bounded_before_storage() {
        let long_name = "a".repeat(300);
        let media = validate_media(
            descriptor("chat/1/k.jpg", "image/jpeg", Some(&long_name), 1024),
            1,
            50 * 1024 * 1024,
        )
        .unwrap();
        assert_eq!(
            media.name.as_deref().map(str::len),
            Some(crate::storage::MAX_FILE_NAME_LEN)
        );

        let long_mime = format!("image/{}", "x".repeat(300));
        let err = validate_media(
            descriptor("chat/1/k.jpg", &long_mime, None, 1024),
            1,
            50 * 1024 * 1024,
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_media_type");

        let long_key = format!("chat/1/{}", "k".repeat(600));
        let err = validate_media(
            descriptor(&long_key, "image/jpeg", None, 1024),
            1,
            50 * 1024 * 1024,
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_media_key");
    }

    #[test]
    fn media_key_must_match_the_thread() {
        let err = validate_media(
            descriptor("chat/2/k.jpg", "image/jpeg", None, 1024),
            1,
            50 * 1024 * 1024,
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_media_key");
    }

    #[test]
    fn media_type_vocabulary() {
        assert!(is_chat_media_type("image/jpeg"));
        assert!(is_chat_media_type("video/mp4"));
        assert!(!is_chat_media_type("application/pdf"));
        assert!(!is_chat_media_type("text/plain"));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ChatError::EmptyMessage.code(), "missing_content");
        assert_eq!(ChatError::NotAllowed.code(), "chat_not_allowed");
        assert_eq!(ChatError::Forbidden.code(), "forbidden");
        assert_eq!(ChatError::InvalidMediaType.code(), "invalid_media_type");
    }
}
