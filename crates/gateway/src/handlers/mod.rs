//! API handlers module

pub mod admin;
pub mod health;
pub mod runs;
pub mod videos;
