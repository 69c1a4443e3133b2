//! Video Entity Module
//!
//! The `VideoItem` model and the store that owns every item.

mod models;
mod store;

pub use models::*;
pub use store::VideoStore;

pub use crate::core::ffmpeg::MediaDetails;
