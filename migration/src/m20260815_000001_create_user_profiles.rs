use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserProfiles::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::TgId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(UserProfiles::Username).string_len(64).null())
                    .col(
                        ColumnDef::new(UserProfiles::FirstName)
                            .string_len(128)
                            .null(),
                    )
                    .col(ColumnDef::new(UserProfiles::LastName).string_len(128).null())
                    .col(ColumnDef::new(UserProfiles::PhotoUrl).string_len(512).null())
                    .col(
                        ColumnDef::new(UserProfiles::TariffName)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::TariffExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::TrainingMode)
                            .string_len(16)
                            .not_null()
                            .default("gym"),
                    )
                    .col(ColumnDef::new(UserProfiles::HeightCm).integer().null())
                    .col(ColumnDef::new(UserProfiles::WeightKg).double().null())
                    .col(ColumnDef::new(UserProfiles::Age).integer().null())
                    .col(
                        ColumnDef::new(UserProfiles::Role)
                            .string_len(16)
                            .not_null()
                            .default("user"),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::IsCurator)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(UserProfiles::CuratorId).big_integer().null())
                    .col(
                        ColumnDef::new(UserProfiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_profiles_curator")
                            .from(UserProfiles::Table, UserProfiles::CuratorId)
                            .to(UserProfiles::Table, UserProfiles::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Curator dashboards list their assigned clients
        manager
            .create_index(
                Index::create()
                    .name("idx_user_profiles_curator")
                    .table(UserProfiles::Table)
                    .col(UserProfiles::CuratorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserProfiles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserProfiles {
    Table,
    Id,
    TgId,
    Username,
    FirstName,
    LastName,
    PhotoUrl,
    TariffName,
    TariffExpiresAt,
    TrainingMode,
    HeightCm,
    WeightKg,
    Age,
    Role,
    IsCurator,
    CuratorId,
    CreatedAt,
}
