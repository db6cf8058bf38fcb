//! Account resolution for hoard.
//!
//! A resolver turns a username into the ordered list of [`MediaItem`]s the
//! account posted. The only implementation scrapes a Nitter front-end.

pub mod error;
pub mod media;
pub mod nitter;
pub mod resolver;
pub mod session;

pub use error::SourceError;
pub use media::{MediaItem, MediaKind, MediaStatus, Post, PostSidecar, TransitionError};
pub use nitter::{NitterConfig, NitterResolver};
pub use resolver::{AccountResolver, TimelineSource, normalize_username};
pub use session::SourceSession;
