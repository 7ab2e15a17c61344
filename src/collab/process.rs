//! Adapters that shell out to system tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClipWriter, CloudStore, CollabError, HostControl, Transcoder};

/// Runs `program args..` to completion and returns its stdout.
///
/// A non-zero exit becomes [`CollabError::Command`] carrying stderr. The child is
/// killed if the returned future is dropped.
pub async fn run_command<I, S>(program: &str, args: I) -> Result<String, CollabError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(CollabError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Raw camera stream to standard container via `ffmpeg`, stream-copied.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    pub program: String,
    pub framerate: u32,
}

impl FfmpegTranscoder {
    pub fn new(framerate: u32) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            framerate,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, src: &Path, dest: &Path) -> Result<(), CollabError> {
        let rate = self.framerate.to_string();
        run_command(
            &self.program,
            [
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-framerate"),
                OsStr::new(&rate),
                OsStr::new("-i"),
                src.as_os_str(),
                OsStr::new("-c:v"),
                OsStr::new("copy"),
                dest.as_os_str(),
            ],
        )
        .await?;

        let src_len = tokio::fs::metadata(src).await?.len();
        let dest_len = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if dest_len <= src_len {
            return Err(CollabError::Rejected(format!(
                "{} is {dest_len} bytes, source {src_len}",
                dest.display()
            )));
        }
        tokio::fs::remove_file(src).await?;
        debug!(src = %src.display(), dest = %dest.display(), "converted");
        Ok(())
    }
}

/// Writes frames as numbered JPEGs next to `dest`, encodes them with `ffmpeg`,
/// then removes the frames.
#[derive(Debug, Clone)]
pub struct FfmpegClipWriter {
    pub program: String,
    pub framerate: u32,
}

impl FfmpegClipWriter {
    pub fn new(framerate: u32) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            framerate,
        }
    }

    fn frame_dir(dest: &Path) -> PathBuf {
        dest.with_extension("frames")
    }
}

#[async_trait]
impl ClipWriter for FfmpegClipWriter {
    async fn write_clip(&self, frames: Vec<RgbImage>, dest: &Path) -> Result<(), CollabError> {
        if frames.is_empty() {
            return Err(CollabError::Rejected("no frames".to_string()));
        }
        let dir = Self::frame_dir(dest);
        tokio::fs::create_dir_all(&dir).await?;
        let staging = dir.clone();
        let staged = tokio::task::spawn_blocking(move || -> Result<(), CollabError> {
            for (i, frame) in frames.iter().enumerate() {
                frame.save(staging.join(format!("{i:05}.jpg")))?;
            }
            Ok(())
        })
        .await
        .map_err(CollabError::from)
        .and_then(|res| res);
        if let Err(err) = staged {
            tokio::fs::remove_dir_all(&dir).await?;
            return Err(err);
        }

        let rate = self.framerate.to_string();
        let pattern = dir.join("%05d.jpg");
        let res = run_command(
            &self.program,
            [
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-framerate"),
                OsStr::new(&rate),
                OsStr::new("-i"),
                pattern.as_os_str(),
                OsStr::new("-c:v"),
                OsStr::new("libx264"),
                OsStr::new("-pix_fmt"),
                OsStr::new("yuv420p"),
                dest.as_os_str(),
            ],
        )
        .await;
        tokio::fs::remove_dir_all(&dir).await?;
        res.map(|_| ())
    }
}

/// Cloud storage through `rclone copyto`, verified with `rclone lsf`.
#[derive(Debug, Clone)]
pub struct RcloneStore {
    pub program: String,
    /// Remote prefix, e.g. `cloudstorage:` or `remote:bucket/devices`.
    pub root: String,
}

impl RcloneStore {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            program: "rclone".to_string(),
            root: root.into(),
        }
    }

    fn remote_path(&self, remote: &str) -> String {
        if self.root.ends_with(':') || self.root.ends_with('/') {
            format!("{}{remote}", self.root)
        } else {
            format!("{}/{remote}", self.root)
        }
    }
}

#[async_trait]
impl CloudStore for RcloneStore {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), CollabError> {
        let target = self.remote_path(remote);
        run_command(
            &self.program,
            [OsStr::new("copyto"), local.as_os_str(), OsStr::new(&target)],
        )
        .await?;
        let listing = run_command(&self.program, ["lsf", target.as_str()]).await?;
        if listing.trim().is_empty() {
            return Err(CollabError::Rejected(format!("{target} missing after upload")));
        }
        info!(local = %local.display(), remote = %target, "uploaded");
        Ok(())
    }
}

/// Requests a reboot by running a configured command.
#[derive(Debug, Clone)]
pub struct CommandHost {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CommandHost {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
            args: vec!["reboot".to_string()],
        }
    }
}

#[async_trait]
impl HostControl for CommandHost {
    async fn request_reboot(&self) -> Result<(), CollabError> {
        run_command(&self.program, &self.args).await.map(|_| ())
    }
}
