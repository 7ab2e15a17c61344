//! External collaborators: narrow interfaces to everything the device does not
//! implement itself (capture, inference, video encoding, upload, mail, host control).
//!
//! Workers only see these traits. The process-backed adapters (`ffmpeg`, `rclone`, a
//! reboot command) and a directory-replay camera are provided; a live camera driver,
//! an inference backend and a mail transport are plugged in by the embedding binary.
//!
//! ```text
//! Collector ──► Camera          Detector ──► Inference, ClipWriter
//! Uploader  ──► Transcoder, CloudStore
//! Notifier  ──► Mailer          Runner   ──► HostControl
//! ```

mod camera;
mod process;

pub use camera::DirectoryCamera;
pub use process::{run_command, CommandHost, FfmpegClipWriter, FfmpegTranscoder, RcloneStore};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

use crate::config::Config;
use crate::detection::Detection;
use crate::events::Notification;

/// Transient collaborator failure; callers retry or skip.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{program} failed ({status}): {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl CollabError {
    pub fn as_label(&self) -> &'static str {
        match self {
            CollabError::Io(_) => "collab_io",
            CollabError::Image(_) => "collab_image",
            CollabError::Command { .. } => "collab_command",
            CollabError::Rejected(_) => "collab_rejected",
            CollabError::Blocking(_) => "collab_blocking",
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Capture time, milliseconds since the Unix epoch.
    pub captured_ms: i64,
    pub image: RgbImage,
}

#[async_trait]
pub trait Camera: Send {
    async fn start(&mut self) -> Result<(), CollabError> {
        Ok(())
    }

    /// Next frame, or `None` once the source is exhausted.
    async fn capture(&mut self) -> Result<Option<CapturedFrame>, CollabError>;

    async fn stop(&mut self) -> Result<(), CollabError> {
        Ok(())
    }
}

/// Opens a camera for a project. Called once per Active mode.
pub type CameraFactory =
    Arc<dyn Fn(&Config) -> Result<Box<dyn Camera>, CollabError> + Send + Sync>;

#[async_trait]
pub trait Inference: Send + Sync {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, CollabError>;
}

/// Assembles frames into one evidence clip at `dest`.
#[async_trait]
pub trait ClipWriter: Send + Sync {
    async fn write_clip(&self, frames: Vec<RgbImage>, dest: &Path) -> Result<(), CollabError>;
}

/// Converts a raw video into the standard container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn convert(&self, src: &Path, dest: &Path) -> Result<(), CollabError>;
}

/// Uploads a local file to `remote` (a path relative to the store root) and verifies it.
#[async_trait]
pub trait CloudStore: Send + Sync {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), CollabError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, note: &Notification, recipient: &str) -> Result<(), CollabError>;
}

#[async_trait]
pub trait HostControl: Send + Sync {
    async fn request_reboot(&self) -> Result<(), CollabError>;
}

/// Every collaborator the runner wires into its workers.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: CameraFactory,
    pub inference: Arc<dyn Inference>,
    pub clips: Arc<dyn ClipWriter>,
    pub transcoder: Arc<dyn Transcoder>,
    pub store: Arc<dyn CloudStore>,
    pub mailer: Arc<dyn Mailer>,
    pub host: Arc<dyn HostControl>,
}

impl Collaborators {
    /// Camera factory replaying `Config::source`; fails when no source is set.
    pub fn replay_camera() -> CameraFactory {
        Arc::new(|cfg: &Config| match &cfg.source {
            Some(dir) => Ok(Box::new(DirectoryCamera::new(dir.clone())) as Box<dyn Camera>),
            None => Err(CollabError::Rejected(
                "no capture source configured".to_string(),
            )),
        })
    }
}
