//! Comment entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub rpid: i64,

    pub video_id: i64,

    /// Enclosing main comment for nested replies
    pub parent_id: Option<i64>,

    pub uname: String,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Always within [0.01, 0.99]
    #[sea_orm(column_type = "Double")]
    pub sentiment_score: f64,

    #[sea_orm(column_type = "Double")]
    pub relevance_score: f64,
}

impl Model {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::video::Entity",
        from = "Column::VideoId",
        to = "super::video::Column::VideoId",
        on_delete = "Cascade"
    )]
    Video,

    #[sea_orm(has_many = "super::comment_tag::Entity")]
    CommentTags,
}

impl Related<super::video::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Video.def()
    }
}

impl Related<super::tag::Entity> for Entity {
    fn to() -> RelationDef {
        super::comment_tag::Relation::Tag.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::comment_tag::Relation::Comment.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
