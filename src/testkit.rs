//! Mock collaborators and small-timing fixtures shared by unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::collab::{
    Camera, CameraFactory, CapturedFrame, ClipWriter, CloudStore, CollabError, Collaborators,
    HostControl, Inference, Mailer, Transcoder,
};
use crate::config::{Config, RawConfig};
use crate::core::SupervisionConfig;
use crate::detection::{BBox, Detection};
use crate::events::{Bus, Notification};
use crate::runner::{Clock, Mode, Schedule};
use crate::error::WorkerError;
use crate::worker::{Worker, WorkerCtx};

pub const FISH: u32 = 0;
pub const PIPE: u32 = 1;

/// Project config rooted at `dir` with test-friendly timing.
pub fn test_config(dir: &Path) -> Config {
    let mut raw = RawConfig {
        owner: Some("abc".into()),
        email: Some("abc@lab.org".into()),
        tank_id: Some("t1".into()),
        species: Some("mz".into()),
        created: NaiveDate::from_ymd_opt(2024, 5, 1),
        data_dir: Some(dir.to_path_buf()),
        subject_class: Some(FISH),
        site_class: Some(PIPE),
        ..RawConfig::default()
    };
    raw.advanced.interval_secs = 0.01;
    raw.advanced.hit_thresh_secs = 0.1;
    raw.advanced.img_buffer_secs = 0.3;
    raw.advanced.startup_wait_secs = 1.0;
    raw.advanced.shutdown_wait_secs = 0.5;
    raw.advanced.min_notification_interval = 600;
    let cfg = Config::from_raw(raw).expect("valid test config");
    cfg.create_project_tree().expect("project tree");
    cfg
}

pub fn fast_supervision() -> SupervisionConfig {
    SupervisionConfig::default()
        .with_startup_wait(Duration::from_secs(1))
        .with_shutdown_wait(Duration::from_millis(500))
        .with_poll_timeout(Duration::from_millis(10))
}

pub fn worker_ctx(name: &str, bus: &Bus) -> WorkerCtx {
    WorkerCtx::new(name, CancellationToken::new(), bus.clone(), fast_supervision())
}

pub fn frame(ms: i64) -> CapturedFrame {
    CapturedFrame {
        captured_ms: ms,
        image: RgbImage::new(32, 32),
    }
}

/// Two overlapping subjects on one site.
pub fn spawning_dets() -> Vec<Detection> {
    vec![
        Detection::new(FISH, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0)),
        Detection::new(FISH, 0.8, BBox::new(5.0, 5.0, 15.0, 15.0)),
        Detection::new(PIPE, 0.7, BBox::new(3.0, 3.0, 13.0, 13.0)),
    ]
}

#[derive(Default)]
pub struct MockInference {
    pub script: Mutex<VecDeque<Result<Vec<Detection>, String>>>,
    pub fallback: Vec<Detection>,
    pub calls: AtomicU32,
}

impl MockInference {
    pub fn always(dets: Vec<Detection>) -> Self {
        Self {
            fallback: dets,
            ..Self::default()
        }
    }

    pub fn scripted(script: Vec<Result<Vec<Detection>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Inference for MockInference {
    async fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("lock").pop_front();
        match next {
            Some(Ok(dets)) => Ok(dets),
            Some(Err(msg)) => Err(CollabError::Rejected(msg)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[derive(Default)]
pub struct MockClipWriter {
    pub fail: bool,
    pub written: Mutex<Vec<(PathBuf, usize)>>,
}

#[async_trait]
impl ClipWriter for MockClipWriter {
    async fn write_clip(&self, frames: Vec<RgbImage>, dest: &Path) -> Result<(), CollabError> {
        if self.fail {
            return Err(CollabError::Rejected("encoder down".into()));
        }
        self.written
            .lock()
            .expect("lock")
            .push((dest.to_path_buf(), frames.len()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTranscoder {
    pub fail: bool,
    pub calls: AtomicU32,
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn convert(&self, src: &Path, dest: &Path) -> Result<(), CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollabError::Rejected("corrupt stream".into()));
        }
        tokio::fs::rename(src, dest).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockStore {
    pub fail: bool,
    pub attempts: AtomicU32,
    pub uploaded: Mutex<Vec<String>>,
}

#[async_trait]
impl CloudStore for MockStore {
    async fn upload(&self, _local: &Path, remote: &str) -> Result<(), CollabError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollabError::Rejected("remote unreachable".into()));
        }
        self.uploaded.lock().expect("lock").push(remote.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMailer {
    /// Number of initial attempts that fail.
    pub fail_first: AtomicU32,
    pub attempts: AtomicU32,
    pub delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Mailer for MockMailer {
    async fn deliver(&self, note: &Notification, _recipient: &str) -> Result<(), CollabError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.fail_first.load(Ordering::SeqCst);
        if left > 0 {
            self.fail_first.store(left - 1, Ordering::SeqCst);
            return Err(CollabError::Rejected("smtp busy".into()));
        }
        self.delivered.lock().expect("lock").push(note.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHost {
    pub reboots: AtomicU32,
}

#[async_trait]
impl HostControl for MockHost {
    async fn request_reboot(&self) -> Result<(), CollabError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Camera yielding a fixed number of blank frames, then end of source.
pub struct ScriptedCamera {
    pub remaining: u32,
    pub next_ms: i64,
}

#[async_trait]
impl Camera for ScriptedCamera {
    async fn capture(&mut self) -> Result<Option<CapturedFrame>, CollabError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.next_ms += 10;
        Ok(Some(frame(self.next_ms)))
    }
}

pub fn scripted_camera(frames: u32) -> CameraFactory {
    Arc::new(move |_cfg: &Config| {
        Ok(Box::new(ScriptedCamera {
            remaining: frames,
            next_ms: 0,
        }) as Box<dyn Camera>)
    })
}

pub struct Mocks {
    pub inference: Arc<MockInference>,
    pub clips: Arc<MockClipWriter>,
    pub transcoder: Arc<MockTranscoder>,
    pub store: Arc<MockStore>,
    pub mailer: Arc<MockMailer>,
    pub host: Arc<MockHost>,
}

pub fn mock_collab(camera: CameraFactory, inference: MockInference) -> (Collaborators, Mocks) {
    let mocks = Mocks {
        inference: Arc::new(inference),
        clips: Arc::new(MockClipWriter::default()),
        transcoder: Arc::new(MockTranscoder::default()),
        store: Arc::new(MockStore::default()),
        mailer: Arc::new(MockMailer::default()),
        host: Arc::new(MockHost::default()),
    };
    let collab = Collaborators {
        camera,
        inference: mocks.inference.clone(),
        clips: mocks.clips.clone(),
        transcoder: mocks.transcoder.clone(),
        store: mocks.store.clone(),
        mailer: mocks.mailer.clone(),
        host: mocks.host.clone(),
    };
    (collab, mocks)
}

/// Clock frozen at a settable instant.
#[derive(Clone)]
pub struct FixedClock(pub Arc<Mutex<NaiveDateTime>>);

impl FixedClock {
    pub fn at(t: NaiveDateTime) -> Self {
        Self(Arc::new(Mutex::new(t)))
    }

    pub fn set(&self, t: NaiveDateTime) {
        *self.0.lock().expect("lock") = t;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().expect("lock")
    }
}

/// Schedule that always expects one settable mode and never transitions.
#[derive(Clone)]
pub struct FixedSchedule(pub Arc<Mutex<Mode>>);

impl FixedSchedule {
    pub fn new(mode: Mode) -> Self {
        Self(Arc::new(Mutex::new(mode)))
    }

    pub fn set(&self, mode: Mode) {
        *self.0.lock().expect("lock") = mode;
    }
}

impl Schedule for FixedSchedule {
    fn expected_mode(&self, _now: NaiveDateTime) -> Mode {
        *self.0.lock().expect("lock")
    }

    fn next_transition(&self, _now: NaiveDateTime) -> Option<NaiveDateTime> {
        None
    }
}

/// Worker that blocks its thread for the given time without yielding, so neither
/// cancellation nor abort can reach it. Needs a multi-thread runtime.
pub struct Wedged(pub Duration);

#[async_trait]
impl Worker for Wedged {
    async fn main_loop(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        std::thread::sleep(self.0);
        Ok(())
    }
}
