//! SeaORM entity models
//!
//! Database entities for ReplyLens

mod comment;
mod comment_tag;
mod tag;
mod video;

pub use video::{
    Entity as VideoEntity,
    Model as Video,
    ActiveModel as VideoActiveModel,
    Column as VideoColumn,
};

pub use comment::{
    Entity as CommentEntity,
    Model as StoredComment,
    ActiveModel as CommentActiveModel,
    Column as CommentColumn,
};

pub use tag::{
    Entity as TagEntity,
    Model as Tag,
    ActiveModel as TagActiveModel,
    Column as TagColumn,
};

pub use comment_tag::{
    Entity as CommentTagEntity,
    Model as CommentTag,
    ActiveModel as CommentTagActiveModel,
    Column as CommentTagColumn,
};
