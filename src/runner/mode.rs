use std::fmt;

use serde::Serialize;

use crate::events::EventKind;

/// Operating mode of the runner. `End` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Capture and detection.
    Active,
    /// Upload of the current project's videos.
    Passive,
    /// Final upload of every project, then shutdown.
    End,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Active => "active",
            Mode::Passive => "passive",
            Mode::End => "end",
        }
    }

    /// Event that requests this mode.
    pub fn entry_event(&self) -> EventKind {
        match self {
            Mode::Active => EventKind::EnterActiveMode,
            Mode::Passive => EventKind::EnterPassiveMode,
            Mode::End => EventKind::EnterEndMode,
        }
    }

    /// Mode requested by `kind`, if it is a mode-change event.
    pub fn requested_by(kind: EventKind) -> Option<Mode> {
        match kind {
            EventKind::EnterActiveMode => Some(Mode::Active),
            EventKind::EnterPassiveMode => Some(Mode::Passive),
            EventKind::EnterEndMode => Some(Mode::End),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
