//! Recording window gate.
//!
//! The gate is a two-state machine driven purely by the local wall-clock
//! hour. It only logs when the state actually changes, so polling while idle
//! stays quiet.

use chrono::{Local, Timelike};

use crate::config::ScheduleConfig;

/// Hours during which recording is allowed: `[start_hour, end_hour)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ScheduleWindow {
    /// A disabled window, which is always open
    pub fn always_open() -> Self {
        Self {
            enabled: false,
            start_hour: 0,
            end_hour: 0,
        }
    }

    pub fn is_open(&self, hour: u32) -> bool {
        if !self.enabled {
            return true;
        }

        if self.start_hour <= self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            // Window wraps past midnight, e.g. 22-6
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl From<&ScheduleConfig> for ScheduleWindow {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            enabled: config.enabled,
            start_hour: config.start_hour,
            end_hour: config.end_hour,
        }
    }
}

impl std::fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.enabled {
            write!(f, "{:02}:00-{:02}:00", self.start_hour, self.end_hour)
        } else {
            f.write_str("always")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    Recording,
}

/// A state change reported by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// `None` on the very first observation
    pub from: Option<ScheduleState>,
    pub to: ScheduleState,
}

/// Edge-triggered view of the schedule window
#[derive(Debug, Clone)]
pub struct ScheduleGate {
    window: ScheduleWindow,
    state: Option<ScheduleState>,
}

impl ScheduleGate {
    pub fn new(window: ScheduleWindow) -> Self {
        Self {
            window,
            state: None,
        }
    }

    pub fn window(&self) -> ScheduleWindow {
        self.window
    }

    /// Current state; `Idle` before the first observation
    pub fn state(&self) -> ScheduleState {
        self.state.unwrap_or(ScheduleState::Idle)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ScheduleState::Recording
    }

    /// Feed the current hour; returns a transition only on an edge
    pub fn observe(&mut self, hour: u32) -> Option<Transition> {
        let next = if self.window.is_open(hour) {
            ScheduleState::Recording
        } else {
            ScheduleState::Idle
        };

        if self.state == Some(next) {
            return None;
        }

        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = Some(next);

        match next {
            ScheduleState::Recording => {
                tracing::info!("Recording window open ({})", self.window)
            }
            ScheduleState::Idle => {
                tracing::info!("Outside recording window ({}). Waiting...", self.window)
            }
        }

        Some(transition)
    }

    /// Observe the local wall clock
    pub fn observe_now(&mut self) -> Option<Transition> {
        self.observe(Local::now().hour())
    }
}
