//! Supervision core: supervisors, contexts, timing and OS signals.
//!
//! - [`supervisor`]: owns one worker task; startup acknowledgement, stop, terminate;
//! - [`context`]: registry of supervisors and queues with bulk stop, plus secondaries;
//! - [`config`]: supervision timing knobs;
//! - [`signals`]: termination signals escalated into events and forced stop.
//!
//! ```text
//! Runner ──owns──► Context(main) ──► [Supervisor NOTIFY] [queue NOTIFY] [Bus]
//!                     │
//!                     └─secondary─► Context(mode) ──► [Supervisor COLLECT] [Supervisor DETECT] [queue IMG]
//! ```

mod config;
mod context;
mod signals;
mod supervisor;

pub use config::SupervisionConfig;
pub use context::{stop_with_retries, Context, StopReport};
pub use signals::{spawn_signal_escalation, wait_for_shutdown_signal};
pub use supervisor::Supervisor;
