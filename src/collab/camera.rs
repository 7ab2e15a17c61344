use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{Camera, CapturedFrame, CollabError};

const IMAGE_EXTS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays the still images of a directory in file-name order.
#[derive(Debug)]
pub struct DirectoryCamera {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
}

impl DirectoryCamera {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl Camera for DirectoryCamera {
    async fn start(&mut self) -> Result<(), CollabError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image {
                files.push(path);
            }
        }
        files.sort();
        info!(dir = %self.dir.display(), frames = files.len(), "replay source opened");
        self.pending = files.into();
        Ok(())
    }

    async fn capture(&mut self) -> Result<Option<CapturedFrame>, CollabError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        debug!(file = %path.display(), "replaying frame");
        let image =
            tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
                .await??;
        Ok(Some(CapturedFrame {
            captured_ms: Utc::now().timestamp_millis(),
            image,
        }))
    }
}
