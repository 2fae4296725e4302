//! Video entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "videos")]
pub struct Model {
    /// Internal numeric id resolved from the public identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub video_id: i64,

    #[sea_orm(unique)]
    pub bvid: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub cover_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub owner_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub owner_face: Option<String>,

    pub view_count: i64,

    pub like_count: i64,

    pub danmaku_count: i64,

    /// Maintained by a storage trigger, never written by the application
    pub avg_sentiment: Option<f64>,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::comment::Entity")]
    Comments,
}

impl Related<super::comment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
