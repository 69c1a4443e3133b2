//! Core Type Definitions
//!
//! Defines fundamental types shared across the engine.

/// Video entity identifier (UUID v4, generated once per entity)
pub type VideoId = uuid::Uuid;

/// Key under which a directory access grant is persisted
pub type AccessKey = String;

/// Returns the first eight hex digits of a video id.
///
/// Used to keep generated file names unique per entity while staying short.
pub fn short_id(id: &VideoId) -> String {
    id.simple().to_string()[..8].to_string()
}
