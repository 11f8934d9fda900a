pub mod database;
pub mod job;
pub mod lesson_media;
pub mod media_asset;
