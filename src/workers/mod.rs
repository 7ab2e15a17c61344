//! Domain workers wired by the runner.
//!
//! ```text
//! Active:   COLLECT ──img queue──► DETECT ──NOTIFY event──► bus
//! Passive:  pending files ──file queue──► UPLOAD_0..N
//! Always:   notify queue ──► NOTIFY
//! ```

mod collector;
mod detector;
mod notifier;
mod uploader;

pub use collector::Collector;
pub use detector::{Detector, SPAWNING_KIND};
pub use notifier::Notifier;
pub use uploader::{pending_files, project_dirs, Uploader};
