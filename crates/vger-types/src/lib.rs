pub mod archive_id;
pub mod chunk_id;
pub mod error;
pub mod hardlink_id;
