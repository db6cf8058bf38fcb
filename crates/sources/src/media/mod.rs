//! Media model shared by resolvers and the download pipeline.

mod filename;
mod item;
mod post;
mod status;

pub use filename::{image_extension, sanitize_filename};
pub use item::{MediaItem, MediaKind};
pub use post::{Post, PostSidecar};
pub use status::{MediaStatus, TransitionError};
