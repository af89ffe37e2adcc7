//! Admission controller — turns confident matches into at-most-once
//! attendance events, gated by a daily time window.

use crate::types::{AttendanceEvent, Identity};
use chrono::{DateTime, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Confidence a match must strictly exceed to be admitted.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 92.5;

/// Daily time-of-day interval during which attendance may be recorded.
///
/// Both ends are inclusive. A window whose start is after its end wraps
/// past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AdmissionWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

impl Default for AdmissionWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).expect("08:00 is a valid time"),
            end: NaiveTime::from_hms_opt(9, 30, 0).expect("09:30 is a valid time"),
        }
    }
}

impl fmt::Display for AdmissionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%I:%M %p"),
            self.end.format("%I:%M %p")
        )
    }
}

/// When the window is compared against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowCheck {
    /// Every admission decision re-reads the clock.
    #[default]
    PerDecision,
    /// The clock is read once when the session starts.
    AtStart,
}

impl FromStr for WindowCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "per-decision" => Ok(Self::PerDecision),
            "at-start" => Ok(Self::AtStart),
            other => Err(format!(
                "unknown window check {other:?} (expected per-decision or at-start)"
            )),
        }
    }
}

/// Why a match was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    WindowClosed,
    AlreadyRecorded,
    LowConfidence,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WindowClosed => "not admitted, window closed",
            Self::AlreadyRecorded => "not admitted, already recorded this session",
            Self::LowConfidence => "not admitted, low confidence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Admitted(AttendanceEvent),
    Rejected(Rejection),
}

/// Gatekeeper holding the per-session seen set.
pub struct AdmissionController {
    window: AdmissionWindow,
    min_confidence: f64,
    check: WindowCheck,
    open_at_start: bool,
    seen: HashSet<Identity>,
}

impl AdmissionController {
    pub fn new(
        window: AdmissionWindow,
        min_confidence: f64,
        check: WindowCheck,
        started_at: DateTime<Local>,
    ) -> Self {
        let open_at_start = window.contains(started_at.time());
        if !open_at_start {
            tracing::info!(%window, "attendance is only taken inside the admission window");
        }
        Self {
            window,
            min_confidence,
            check,
            open_at_start,
            seen: HashSet::new(),
        }
    }

    /// Mark identities as already admitted (e.g. recorded earlier today).
    pub fn seed<I: IntoIterator<Item = Identity>>(&mut self, identities: I) {
        self.seen.extend(identities);
    }

    pub fn is_open(&self, now: DateTime<Local>) -> bool {
        match self.check {
            WindowCheck::PerDecision => self.window.contains(now.time()),
            WindowCheck::AtStart => self.open_at_start,
        }
    }

    pub fn has_seen(&self, identity: Identity) -> bool {
        self.seen.contains(&identity)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Decide whether a matched identity produces an attendance event.
    ///
    /// The identity enters the seen set on admission and never leaves it.
    pub fn consider(
        &mut self,
        identity: Identity,
        confidence: f64,
        now: DateTime<Local>,
    ) -> Decision {
        if !self.is_open(now) {
            return Decision::Rejected(Rejection::WindowClosed);
        }
        if self.seen.contains(&identity) {
            return Decision::Rejected(Rejection::AlreadyRecorded);
        }
        if !confidence.is_finite() || confidence <= self.min_confidence {
            return Decision::Rejected(Rejection::LowConfidence);
        }

        self.seen.insert(identity);
        tracing::info!(%identity, confidence, "admitted");
        Decision::Admitted(AttendanceEvent { identity, at: now })
    }
}
