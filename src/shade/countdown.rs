use serde::Serialize;

pub const DEFAULT_SYNC_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CountdownState {
    #[default]
    Idle,
    Running {
        seconds_left: u64,
    },
    Finished,
}

/// Outcome of a one-second tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No countdown is running.
    Idle,
    /// Still running; `sync` asks for the remaining time to be pushed remotely.
    Running { seconds_left: u64, sync: bool },
    /// The tick exhausted the countdown.
    Finished,
}

/// Local countdown of a manual shade extension.
#[derive(Debug, Clone)]
pub struct Countdown {
    state: CountdownState,
    sync_interval: u64,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_INTERVAL)
    }
}

impl Countdown {
    pub fn new(sync_interval: u64) -> Self {
        Self {
            state: CountdownState::Idle,
            sync_interval: sync_interval.max(1),
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn seconds_left(&self) -> Option<u64> {
        match self.state {
            CountdownState::Running { seconds_left } => Some(seconds_left),
            CountdownState::Finished => Some(0),
            CountdownState::Idle => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, CountdownState::Running { .. })
    }

    /// Replaces any running countdown. Zero seconds leaves the countdown idle.
    pub fn start(&mut self, seconds: u64) {
        self.state = if seconds == 0 {
            CountdownState::Idle
        } else {
            CountdownState::Running {
                seconds_left: seconds,
            }
        };
    }

    /// Adds `minutes` to the time left (zero when idle) and returns the new total.
    pub fn add_minutes(&mut self, minutes: u32) -> u64 {
        let current = match self.state {
            CountdownState::Running { seconds_left } => seconds_left,
            _ => 0,
        };
        let total = current + u64::from(minutes) * 60;
        self.start(total);
        total
    }

    /// Returns whether a countdown was stopped.
    pub fn stop(&mut self) -> bool {
        let was_active = self.state != CountdownState::Idle;
        self.state = CountdownState::Idle;
        was_active
    }

    pub fn tick(&mut self) -> Tick {
        match self.state {
            CountdownState::Running { seconds_left } if seconds_left > 1 => {
                let seconds_left = seconds_left - 1;
                self.state = CountdownState::Running { seconds_left };
                Tick::Running {
                    seconds_left,
                    sync: seconds_left % self.sync_interval == 0,
                }
            }
            CountdownState::Running { .. } => {
                self.state = CountdownState::Finished;
                Tick::Finished
            }
            CountdownState::Finished | CountdownState::Idle => Tick::Idle,
        }
    }

    pub fn display(&self) -> Option<String> {
        self.seconds_left().map(format_remaining)
    }
}

/// Renders seconds as `MM:SS`.
pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_from_idle_counts_full_minutes() {
        for minutes in [1u32, 10, 59, 120] {
            let mut countdown = Countdown::default();
            assert_eq!(countdown.add_minutes(minutes), u64::from(minutes) * 60);
            assert_eq!(countdown.seconds_left(), Some(u64::from(minutes) * 60));
        }
    }

    #[test]
    fn add_time_accumulates() {
        let mut countdown = Countdown::default();
        countdown.add_minutes(5);
        countdown.tick();
        assert_eq!(countdown.add_minutes(5), 599);
    }

    #[test]
    fn ticks_until_finished() {
        let mut countdown = Countdown::default();
        countdown.start(90);
        for expected in (1..90).rev() {
            match countdown.tick() {
                Tick::Running { seconds_left, .. } => assert_eq!(seconds_left, expected),
                other => panic!("unexpected tick {other:?}"),
            }
        }
        assert_eq!(countdown.tick(), Tick::Finished);
        assert_eq!(countdown.state(), CountdownState::Finished);
        assert_eq!(countdown.tick(), Tick::Idle);
        assert!(countdown.stop());
        assert_eq!(countdown.state(), CountdownState::Idle);
    }

    #[test]
    fn sync_requested_on_interval_boundaries() {
        let mut countdown = Countdown::default();
        countdown.start(600);
        let synced: Vec<u64> = std::iter::from_fn(|| match countdown.tick() {
            Tick::Running { seconds_left, sync } => Some((seconds_left, sync)),
            _ => None,
        })
        .filter(|(_, sync)| *sync)
        .map(|(seconds, _)| seconds)
        .collect();
        assert_eq!(synced.first(), Some(&570));
        assert_eq!(synced.last(), Some(&30));
        assert_eq!(synced.len(), 19);
    }

    #[test]
    fn start_zero_is_idle() {
        let mut countdown = Countdown::default();
        countdown.start(0);
        assert_eq!(countdown.state(), CountdownState::Idle);
        assert!(!countdown.stop());
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_remaining(600), "10:00");
        assert_eq!(format_remaining(599), "09:59");
        assert_eq!(format_remaining(5), "00:05");
        assert_eq!(format_remaining(7265), "121:05");
    }
}
