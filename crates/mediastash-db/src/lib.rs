//! Database repositories for the cache subsystem.
//!
//! Postgres implementations of the store traits defined in
//! `mediastash-core`, plus pool setup and migrations. Repositories use the
//! same conventions throughout: `query_as` row mapping, conditional updates
//! for status transitions, and `FOR UPDATE SKIP LOCKED` for queue claims.

pub mod db;
pub mod setup;

pub use db::cache_asset::PgCacheAssetStore;
pub use db::cache_job::{PgCacheJobQueue, JOB_NOTIFY_CHANNEL};
pub use db::upload_record::PgUploadRecordStore;
pub use setup::setup_database;
