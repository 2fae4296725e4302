//! Tag dictionary entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags_dict")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub tag_id: i32,

    #[sea_orm(unique)]
    pub tag_name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::comment_tag::Entity")]
    CommentTags,
}

impl Related<super::comment::Entity> for Entity {
    fn to() -> RelationDef {
        super::comment_tag::Relation::Comment.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::comment_tag::Relation::Tag.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
