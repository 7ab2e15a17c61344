//! # Uploader: queue-driven conversion and cloud upload.
//!
//! ```text
//! path.{raw_ext} ── convert (retry) ──► path.{std_ext} ── upload (retry) ──► remove local
//!                      └─ exhausted: warn, keep file        └─ exhausted: warn, keep file
//! ```
//!
//! Several uploaders share one queue; the runner enqueues one `Work::End` per worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::collab::{CloudStore, CollabError, Transcoder};
use crate::config::Config;
use crate::error::WorkerError;
use crate::policies::{BackoffPolicy, JitterPolicy, RetryError, RetryPolicy};
use crate::queue::{MsgQueue, Work};
use crate::worker::{queue_loop, QueueWorker, Worker, WorkerCtx};

pub struct Uploader {
    cfg: Arc<Config>,
    input: MsgQueue<Work<PathBuf>>,
    transcoder: Arc<dyn Transcoder>,
    store: Arc<dyn CloudStore>,
    retry: RetryPolicy,
    uploaded: u32,
    failed: u32,
}

impl Uploader {
    pub fn new(
        cfg: Arc<Config>,
        input: MsgQueue<Work<PathBuf>>,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<dyn CloudStore>,
    ) -> Self {
        Self {
            retry: RetryPolicy::new(
                cfg.advanced.max_tries,
                BackoffPolicy::default().with_jitter(JitterPolicy::Equal),
            ),
            cfg,
            input,
            transcoder,
            store,
            uploaded: 0,
            failed: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store path for `local`: relative to `data_dir`, `/`-separated.
    pub fn remote_name(&self, local: &Path) -> String {
        let rel = local.strip_prefix(&self.cfg.data_dir).unwrap_or(local);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn is_raw(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|e| e == self.cfg.advanced.raw_ext.as_str())
    }

    async fn convert(&self, raw: &Path, ctx: &WorkerCtx) -> Result<PathBuf, RetryError<CollabError>> {
        let dest = raw.with_extension(&self.cfg.advanced.std_ext);
        let transcoder: &dyn Transcoder = &*self.transcoder;
        let (src, out) = (raw, dest.as_path());
        self.retry
            .run("convert", &ctx.shutdown, move |_| transcoder.convert(src, out))
            .await?;
        Ok(dest)
    }
}

#[async_trait]
impl QueueWorker for Uploader {
    type Item = PathBuf;

    fn work_queue(&self) -> MsgQueue<Work<PathBuf>> {
        self.input.clone()
    }

    async fn main_func(&mut self, path: PathBuf, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let local = if self.is_raw(&path) {
            match self.convert(&path, ctx).await {
                Ok(converted) => converted,
                Err(RetryError::Cancelled) => return Ok(()),
                Err(err) => {
                    self.failed += 1;
                    warn!(file = %path.display(), label = err.as_label(), error = %err, "conversion abandoned");
                    return Ok(());
                }
            }
        } else {
            path
        };

        let remote = self.remote_name(&local);
        let store: &dyn CloudStore = &*self.store;
        let (src, dst) = (local.as_path(), remote.as_str());
        match self
            .retry
            .run("upload", &ctx.shutdown, move |_| store.upload(src, dst))
            .await
        {
            Ok(()) => {
                if let Err(err) = tokio::fs::remove_file(&local).await {
                    warn!(file = %local.display(), error = %err, "uploaded but not removed");
                }
                self.uploaded += 1;
                debug!(file = %local.display(), remote = %remote, "upload complete");
            }
            Err(RetryError::Cancelled) => {}
            Err(err) => {
                self.failed += 1;
                warn!(file = %local.display(), label = err.as_label(), error = %err, "upload abandoned");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for Uploader {
    async fn main_loop(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        queue_loop(self, ctx).await
    }

    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        info!(uploaded = self.uploaded, failed = self.failed, "uploader stopping");
        Ok(())
    }
}

/// Every raw or standard video under `roots`, recursively, sorted.
pub fn pending_files(roots: &[PathBuf], cfg: &Config) -> Vec<PathBuf> {
    let exts = [cfg.advanced.raw_ext.as_str(), cfg.advanced.std_ext.as_str()];
    let mut found = Vec::new();
    let mut stack: Vec<PathBuf> = roots.to_vec();
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| exts.contains(&e))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Every project directory under `data_dir`, excluding the sentinel directory.
pub fn project_dirs(cfg: &Config) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(&cfg.data_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir() && *p != cfg.sentinel_dir)
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::testkit::{test_config, worker_ctx, MockStore, MockTranscoder};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(
            3,
            BackoffPolicy {
                first: Duration::from_millis(1),
                max: Duration::from_millis(2),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        )
    }

    fn uploader(cfg: Config, transcoder: Arc<MockTranscoder>, store: Arc<MockStore>) -> Uploader {
        Uploader::new(Arc::new(cfg), MsgQueue::new(8), transcoder, store).with_retry(quick_retry())
    }

    #[tokio::test]
    async fn test_raw_file_is_converted_uploaded_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let raw = cfg.video_dir.join("clip.h264");
        std::fs::write(&raw, b"raw").unwrap();

        let transcoder = Arc::new(MockTranscoder::default());
        let store = Arc::new(MockStore::default());
        let mut up = uploader(cfg, transcoder.clone(), store.clone());
        let ctx = worker_ctx("UPLOAD_0", &Bus::new(4));
        up.main_func(raw.clone(), &ctx).await.unwrap();

        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *store.uploaded.lock().unwrap(),
            vec!["abc_t1_mz_050124/Videos/clip.mp4".to_string()]
        );
        assert!(!raw.exists());
        assert!(!raw.with_extension("mp4").exists());
    }

    #[tokio::test]
    async fn test_exhausted_upload_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let clip = cfg.video_dir.join("clip.mp4");
        std::fs::write(&clip, b"mp4").unwrap();

        let store = Arc::new(MockStore {
            fail: true,
            ..MockStore::default()
        });
        let transcoder = Arc::new(MockTranscoder::default());
        let mut up = uploader(cfg, transcoder.clone(), store.clone());
        let ctx = worker_ctx("UPLOAD_0", &Bus::new(4));
        up.main_func(clip.clone(), &ctx).await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
        assert!(clip.exists());
        assert_eq!(up.failed, 1);
    }

    #[tokio::test]
    async fn test_failed_conversion_skips_upload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let raw = cfg.video_dir.join("bad.h264");
        std::fs::write(&raw, b"raw").unwrap();

        let transcoder = Arc::new(MockTranscoder {
            fail: true,
            ..MockTranscoder::default()
        });
        let store = Arc::new(MockStore::default());
        let mut up = uploader(cfg, transcoder.clone(), store.clone());
        let ctx = worker_ctx("UPLOAD_0", &Bus::new(4));
        up.main_func(raw.clone(), &ctx).await.unwrap();

        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
        assert!(raw.exists());
    }

    #[test]
    fn test_pending_files_walks_projects() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let other = dir.path().join("xyz_t2_mz_010124").join("Videos");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(cfg.video_dir.join("a.h264"), b"").unwrap();
        std::fs::write(cfg.video_dir.join("b.mp4"), b"").unwrap();
        std::fs::write(cfg.image_dir.join("c.jpg"), b"").unwrap();
        std::fs::write(other.join("d.mp4"), b"").unwrap();
        std::fs::write(cfg.sentinel_dir.join("e.mp4"), b"").unwrap();

        assert_eq!(pending_files(&[cfg.proj_dir.clone()], &cfg).len(), 2);
        let dirs = project_dirs(&cfg);
        assert_eq!(dirs.len(), 2);
        assert_eq!(pending_files(&dirs, &cfg).len(), 3);
    }
}
