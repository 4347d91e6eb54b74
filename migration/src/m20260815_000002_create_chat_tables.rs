use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChatThreads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChatThreads::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChatThreads::ClientId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChatThreads::CuratorId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChatThreads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // One thread per (client, curator) pair
                    .index(
                        Index::create()
                            .name("idx_chat_threads_pair")
                            .col(ChatThreads::ClientId)
                            .col(ChatThreads::CuratorId)
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_threads_client")
                            .from(ChatThreads::Table, ChatThreads::ClientId)
                            .to(UserProfiles::Table, UserProfiles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_threads_curator")
                            .from(ChatThreads::Table, ChatThreads::CuratorId)
                            .to(UserProfiles::Table, UserProfiles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Message ids come from one ledger-wide bigserial so arrival order
        // is total across all threads and assignment is atomic.
        manager
            .create_table(
                Table::create()
                    .table(ChatMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChatMessages::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChatMessages::ThreadId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChatMessages::SenderId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChatMessages::Text).text().null())
                    .col(ColumnDef::new(ChatMessages::MediaKey).string_len(512).null())
                    .col(
                        ColumnDef::new(ChatMessages::MediaType)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChatMessages::MediaName)
                            .string_len(128)
                            .null(),
                    )
                    .col(ColumnDef::new(ChatMessages::MediaSize).big_integer().null())
                    .col(
                        ColumnDef::new(ChatMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChatMessages::ReadAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Cursor range fetch
                    .index(
                        Index::create()
                            .name("idx_chat_messages_thread_id")
                            .col(ChatMessages::ThreadId)
                            .col(ChatMessages::Id),
                    )
                    // Unread counting is polled every few seconds per user
                    .index(
                        Index::create()
                            .name("idx_chat_messages_thread_read")
                            .col(ChatMessages::ThreadId)
                            .col(ChatMessages::ReadAt),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_messages_thread")
                            .from(ChatMessages::Table, ChatMessages::ThreadId)
                            .to(ChatThreads::Table, ChatThreads::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChatMessages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChatThreads::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChatThreads {
    Table,
    Id,
    ClientId,
    CuratorId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ChatMessages {
    Table,
    Id,
    ThreadId,
    SenderId,
    Text,
    MediaKey,
    MediaType,
    MediaName,
    MediaSize,
    CreatedAt,
    ReadAt,
}

#[derive(DeriveIden)]
enum UserProfiles {
    Table,
    Id,
}
