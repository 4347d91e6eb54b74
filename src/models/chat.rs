use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

use crate::entities::chat_message;
use crate::storage::StorageClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterpartView {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaView {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub name: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub id: i64,
    pub text: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub read_at: Option<DateTimeWithTimeZone>,
    pub is_mine: bool,
    pub media: Option<MediaView>,
}

impl ChatMessageView {
    /// Attachments are surfaced as short-lived presigned GET links; a
    /// message whose object key cannot be signed is shown without media
    /// rather than dropped.
    pub fn build(
        message: &chat_message::Model,
        requester_id: i64,
        storage: &StorageClient,
    ) -> Self {
        let media = message.media_key.as_deref().and_then(|key| {
            storage.presigned_get_url(key).map(|url| MediaView {
                url,
                media_type: message.media_type.clone(),
                name: message.media_name.clone(),
                size: message.media_size,
            })
        });

        Self {
            id: message.id,
            text: message.text.clone(),
            created_at: message.created_at,
            read_at: message.read_at,
            is_mine: message.sender_id == requester_id,
            media,
        }
    }
}
