//! Database repositories for the coursepipe data access layer.
//!
//! Every persisted entity is a concrete struct; conversion from the storage
//! row happens here at the repository boundary and nowhere else. The
//! [`Database`] handle is constructed explicitly and injected into each
//! repository, with open/close bracketing the worker process's lifetime.

pub mod db;

pub use db::database::Database;
pub use db::job::{PgJobStore, JOB_NOTIFY_CHANNEL};
pub use db::lesson_media::{LessonMediaRepository, MAX_POSITION_ATTEMPTS};
pub use db::media_asset::MediaAssetRepository;
