use sea_orm::entity::prelude::*;

/// One row per chat message. Immutable once written except `read_at`,
/// which transitions from null to a timestamp exactly once.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub thread_id: i64,
    pub sender_id: i64,
    pub text: Option<String>,
    pub media_key: Option<String>,
    pub media_type: Option<String>,
    pub media_name: Option<String>,
    pub media_size: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub read_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::chat_thread::Entity",
        from = "Column::ThreadId",
        to = "super::chat_thread::Column::Id"
    )]
    ChatThread,
}

impl Related<super::chat_thread::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatThread.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
