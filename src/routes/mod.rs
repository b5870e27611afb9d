pub mod discover;
pub mod feed;
