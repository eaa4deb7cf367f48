pub mod chat;
pub mod feed;
