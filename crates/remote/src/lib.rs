//! Remote storage for completed downloads.
//!
//! [`Uploader`] drives any [`RemoteStorage`]; [`RcloneStorage`] talks to MEGA
//! (or another rclone backend) and [`LocalDirStorage`] copies into a local
//! directory.

pub mod credential;
pub mod error;
pub mod local;
pub mod rclone;
pub mod storage;
pub mod uploader;

pub use credential::Credential;
pub use error::StorageError;
pub use local::LocalDirStorage;
pub use rclone::RcloneStorage;
pub use storage::{RemoteEntry, RemoteStorage, render_folder};
pub use uploader::{UploadReceipt, Uploader};
