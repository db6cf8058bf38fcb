//! Native HLS support: playlist planning, AES-128 decryption and segment
//! fetching.

pub mod decryption;
pub mod playlist;
pub mod segment;

pub use decryption::{KeyCache, decrypt_segment};
pub use playlist::{
    ByteSpan, HlsMedia, InitSection, SegmentKey, SegmentPlan, parse_playlist, plan_segments,
    select_variant,
};
pub use segment::SegmentFetcher;
