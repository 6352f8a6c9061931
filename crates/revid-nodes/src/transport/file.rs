// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Writes clips to disk, rotating by max file size or one-file-per-clip,
//! refusing to write when free disk space is low.

use async_trait::async_trait;
use revid_core::RevidError;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use time::format_description;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::ClipTransport;

/// Below this much free space on the output filesystem, every write is
/// refused rather than risking filling the device.
const MIN_FREE_BYTES: u64 = 50 * 1024 * 1024;

pub struct FileTransport {
    output_path: PathBuf,
    max_file_size: u64,
    multi_file: bool,
    current: Option<File>,
    current_size: u64,
    next_file_seq: u64,
    min_free_bytes: u64,
}

impl FileTransport {
    #[must_use]
    pub fn new(output_path: impl Into<PathBuf>, max_file_size: u64, multi_file: bool) -> Self {
        Self {
            output_path: output_path.into(),
            max_file_size,
            multi_file,
            current: None,
            current_size: 0,
            next_file_seq: 0,
            min_free_bytes: MIN_FREE_BYTES,
        }
    }

    /// Test-only hook to simulate low free disk space without depending on
    /// the real filesystem's state (scenario E6: disk guard).
    #[cfg(test)]
    fn with_min_free_bytes(mut self, min_free_bytes: u64) -> Self {
        self.min_free_bytes = min_free_bytes;
        self
    }

    fn free_bytes_available(path: &Path) -> u64 {
        let disks = Disks::new_with_refreshed_list();
        let mut best: Option<(usize, u64)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if path.starts_with(mount) {
                let score = mount.components().count();
                let better = match best {
                    Some((best_score, _)) => score >= best_score,
                    None => true,
                };
                if better {
                    best = Some((score, disk.available_space()));
                }
            }
        }
        best.map_or(u64::MAX, |(_, avail)| avail)
    }

    /// Builds `<OutputPath><yyyy-MM-dd_HH-mm-ss>`, with a monotonic sequence
    /// suffix since the second-resolution timestamp alone cannot disambiguate
    /// two rotations inside the same wall-clock second.
    fn timestamped_path(&mut self) -> PathBuf {
        let format = format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
            .unwrap_or_else(|_| Vec::new());
        let now = time::OffsetDateTime::now_utc();
        let stamp = now.format(&format).unwrap_or_default();
        let seq = self.next_file_seq;
        self.next_file_seq += 1;
        let mut name = self.output_path.clone().into_os_string();
        name.push(format!("{stamp}_{seq:06}"));
        PathBuf::from(name)
    }

    async fn open_new_file(&mut self, path: &Path) -> Result<(), RevidError> {
        let file = File::create(path).await.map_err(|e| {
            RevidError::Io(e)
        })?;
        tracing::info!(path = %path.display(), "FileSender opened new output file");
        self.current = Some(file);
        self.current_size = 0;
        Ok(())
    }
}

#[async_trait]
impl ClipTransport for FileTransport {
    async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
        let free = Self::free_bytes_available(&self.output_path);
        if free < self.min_free_bytes {
            return Err(RevidError::ResourceExhausted(format!(
                "free disk space {free} bytes below the {}-byte guard",
                self.min_free_bytes
            )));
        }

        if self.multi_file {
            let path = self.timestamped_path();
            self.open_new_file(&path).await?;
        } else if self.current.is_none() {
            let path = self.output_path.clone();
            self.open_new_file(&path).await?;
        } else if self.max_file_size > 0
            && self.current_size + clip.len() as u64 > self.max_file_size
        {
            let path = self.timestamped_path();
            self.open_new_file(&path).await?;
        }

        let file = self.current.as_mut().ok_or_else(|| {
            RevidError::Runtime("FileSender has no open file to write to".to_string())
        })?;
        file.write_all(clip).await.map_err(RevidError::Io)?;
        self.current_size += clip.len() as u64;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.current.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, "FileSender failed to flush on close");
            }
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_file_mode_appends_clips_to_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut transport = FileTransport::new(&path, 0, false);

        transport.send(b"clip-one").await.unwrap();
        transport.send(b"clip-two").await.unwrap();
        transport.close().await;

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"clip-oneclip-two");
    }

    #[tokio::test]
    async fn rotates_to_a_new_file_when_max_size_would_be_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut transport = FileTransport::new(&path, 10, false);

        transport.send(b"123456").await.unwrap(); // 6 bytes, fits
        transport.send(b"123456").await.unwrap(); // would exceed 10, rotates
        transport.close().await;

        let first = tokio::fs::read(&path).await.unwrap();
        assert_eq!(first, b"123456");

        let mut rotated_entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while rotated_entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2, "original file plus one rotated file");
    }

    #[tokio::test]
    async fn multi_file_mode_opens_a_fresh_file_per_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut transport = FileTransport::new(&path, 0, true);

        transport.send(b"first").await.unwrap();
        transport.send(b"second").await.unwrap();
        transport.close().await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2, "one file per write in multi-file mode");
    }

    #[tokio::test]
    async fn refuses_every_write_when_free_space_is_below_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut transport = FileTransport::new(&path, 0, false).with_min_free_bytes(u64::MAX);

        let err = transport.send(b"clip").await.unwrap_err();
        assert!(matches!(err, RevidError::ResourceExhausted(_)));
        assert!(!path.exists(), "no file should be created when the guard refuses the write");
    }
}
