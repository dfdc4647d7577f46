use std::fmt;

/// Session lifecycle as seen by the UI.
///
/// `Idle → Scanning` on start, `Scanning → Active` once an anchor is placed,
/// `Active ⇄ Capturing` around each still-image request. A reset returns to
/// `Idle` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Active,
    Capturing,
}

impl SessionState {
    pub fn has_anchor(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Capturing)
    }

    /// State after the sensor streams start.
    pub(crate) fn started(self) -> SessionState {
        match self {
            SessionState::Idle => SessionState::Scanning,
            other => other,
        }
    }

    /// State after the sensor streams stop. Anchored sessions keep their
    /// state so they can resume after backgrounding.
    pub(crate) fn stopped(self) -> SessionState {
        match self {
            SessionState::Scanning => SessionState::Idle,
            other => other,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Active => "active",
            SessionState::Capturing => "capturing",
        };
        f.write_str(s)
    }
}
