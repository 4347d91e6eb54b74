use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub tg_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
    pub tariff_name: Option<String>,
    pub tariff_expires_at: Option<DateTimeWithTimeZone>,
    pub training_mode: String,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<f64>,
    pub age: Option<i32>,
    pub role: String,
    pub is_curator: bool,
    pub curator_id: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::CuratorId",
        to = "Column::Id"
    )]
    Curator,
}

impl ActiveModelBehavior for ActiveModel {}
