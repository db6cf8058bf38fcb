//! Output files that only appear under their final name once complete.
//!
//! Data is written to `<name>.part` and renamed on [`PartFile::commit`]. A
//! part file that is dropped without being committed is removed, so failed
//! or cancelled downloads never leave partial output behind.

use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// `path` with `suffix` appended to its file name.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[derive(Debug)]
pub struct PartFile {
    target: PathBuf,
    part: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    committed: bool,
}

impl PartFile {
    /// Create `<target>.part` for writing, truncating any stale leftover.
    pub async fn create(target: &Path) -> std::io::Result<Self> {
        let mut part = Self::reserve(target).await?;
        let file = File::create(&part.part).await?;
        part.writer = Some(BufWriter::new(file));
        Ok(part)
    }

    /// Reserve `<target>.part` for an external writer such as ffmpeg.
    pub async fn reserve(target: &Path) -> std::io::Result<Self> {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            target: target.to_path_buf(),
            part: with_suffix(target, ".part"),
            writer: None,
            written: 0,
            committed: false,
        })
    }

    pub fn part_path(&self) -> &Path {
        &self.part
    }

    /// Bytes written through [`PartFile::write`].
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("part file is not open for writing"))?;
        writer.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Discard everything written so far.
    pub async fn reset(&mut self) -> std::io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
            let file = writer.get_mut();
            file.set_len(0).await?;
            file.seek(SeekFrom::Start(0)).await?;
        }
        self.written = 0;
        Ok(())
    }

    /// Flush and close the file, keeping it as `.part`.
    pub async fn close(&mut self) -> std::io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.get_mut().sync_all().await?;
        }
        Ok(())
    }

    /// Close the file and move it to its final name. Returns its size.
    pub async fn commit(mut self) -> std::io::Result<u64> {
        self.close().await?;
        tokio::fs::rename(&self.part, &self.target).await?;
        self.committed = true;
        let size = tokio::fs::metadata(&self.target).await?.len();
        debug!(path = %self.target.display(), size, "Committed output file");
        Ok(size)
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.part) {
            Ok(()) => debug!(path = %self.part.display(), "Removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.part.display(), error = %e, "Failed to remove partial file"),
        }
    }
}
