use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ClockStatus {
    /// No summary has been applied yet; the clock refuses to run.
    #[default]
    Unseeded,
    Paused,
    Running,
}

/// Stopwatch over billable seconds, seeded from the server's accumulated total.
///
/// Elapsed time is computed from a monotonic anchor rather than by counting
/// ticks, so a stalled heartbeat never makes the display drift.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    status: ClockStatus,
    /// Seconds accumulated before the current running window; combines with
    /// `running_anchor` to compute the displayed value.
    baseline_secs: u64,
    running_anchor: Option<Instant>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ClockStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ClockStatus::Running
    }

    pub fn is_seeded(&self) -> bool {
        self.status != ClockStatus::Unseeded
    }

    /// Begins counting up from `seed_secs`. Returns `false` and stays put when
    /// no seed is available yet.
    pub fn start(&mut self, seed_secs: Option<u64>, now: Instant) -> bool {
        let Some(seed) = seed_secs else {
            return false;
        };
        self.status = ClockStatus::Running;
        self.baseline_secs = seed;
        self.running_anchor = Some(now);
        true
    }

    /// Freezes the clock and returns the exact elapsed value at `now`.
    pub fn pause(&mut self, now: Instant) -> u64 {
        let elapsed = self.elapsed_secs(now);
        if self.status == ClockStatus::Running {
            self.status = ClockStatus::Paused;
            self.baseline_secs = elapsed;
            self.running_anchor = None;
        }
        elapsed
    }

    /// Re-seeds the clock in place. A running clock keeps running from the new
    /// seed; a paused or unseeded one shows the seed and stays paused.
    pub fn reset(&mut self, seed_secs: u64, now: Instant) {
        self.baseline_secs = seed_secs;
        match self.status {
            ClockStatus::Running => self.running_anchor = Some(now),
            ClockStatus::Paused | ClockStatus::Unseeded => {
                self.status = ClockStatus::Paused;
                self.running_anchor = None;
            }
        }
    }

    /// Re-seeds a running clock only when `seed_secs` is ahead of what it
    /// shows, so the display never steps backward. Returns `true` on a jump.
    pub fn advance_to(&mut self, seed_secs: u64, now: Instant) -> bool {
        if self.status != ClockStatus::Running || seed_secs <= self.elapsed_secs(now) {
            return false;
        }
        self.reset(seed_secs, now);
        true
    }

    pub fn elapsed_secs(&self, now: Instant) -> u64 {
        match (self.status, self.running_anchor) {
            (ClockStatus::Running, Some(anchor)) => self
                .baseline_secs
                .saturating_add(now.saturating_duration_since(anchor).as_secs()),
            _ => self.baseline_secs,
        }
    }

    pub fn display(&self, now: Instant) -> String {
        format_hms(self.elapsed_secs(now))
    }
}

/// Renders seconds as `H:MM:SS`, dropping the hour segment when it is zero.
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn formats_with_and_without_hours() {
        assert_eq!(format_hms(0), "00:00");
        assert_eq!(format_hms(65), "01:05");
        assert_eq!(format_hms(1085), "18:05");
        assert_eq!(format_hms(3725), "1:02:05");
        assert_eq!(format_hms(36_000), "10:00:00");
    }

    #[test]
    fn refuses_to_start_without_seed() {
        let mut clock = SessionClock::new();
        assert!(!clock.start(None, Instant::now()));
        assert_eq!(clock.status(), ClockStatus::Unseeded);
        assert!(!clock.is_seeded());
    }

    #[test]
    fn counts_from_wall_clock_offset() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        assert!(clock.start(Some(1080), t0));

        assert_eq!(clock.elapsed_secs(t0), 1080);
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_millis(4_999)), 1084);
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_secs(5)), 1085);
    }

    #[test]
    fn pause_captures_exact_value_and_freezes() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(Some(100), t0);

        let captured = clock.pause(t0 + Duration::from_secs(7));
        assert_eq!(captured, 107);
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_secs(60)), 107);
        assert_eq!(clock.status(), ClockStatus::Paused);

        // Pausing twice does not change the captured value.
        assert_eq!(clock.pause(t0 + Duration::from_secs(90)), 107);
    }

    #[test]
    fn reseeding_twice_with_same_value_is_idempotent() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(Some(1080), t0);

        let later = t0 + Duration::from_secs(5);
        clock.reset(1085, later);
        let first = clock.elapsed_secs(later);
        clock.reset(1085, later);
        assert_eq!(clock.elapsed_secs(later), first);
        assert_eq!(clock.elapsed_secs(later + Duration::from_secs(2)), 1087);
    }

    #[test]
    fn reset_on_paused_clock_stays_paused() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.reset(42, t0);
        assert_eq!(clock.status(), ClockStatus::Paused);
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_secs(30)), 42);
        assert_eq!(clock.display(t0), "00:42");
    }

    #[test]
    fn advance_to_never_moves_running_clock_backward() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(Some(1080), t0);

        let mid_window = t0 + Duration::from_millis(4_600);
        assert!(!clock.advance_to(1080, mid_window));
        assert_eq!(clock.elapsed_secs(mid_window), 1084);
        // Sub-second progress is kept too: the next second still lands on time.
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_secs(5)), 1085);

        assert!(clock.advance_to(1100, mid_window));
        assert_eq!(clock.elapsed_secs(mid_window), 1100);
        assert_eq!(clock.status(), ClockStatus::Running);
    }

    #[test]
    fn advance_to_ignores_paused_clock() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(Some(60), t0);
        clock.pause(t0 + Duration::from_secs(3));

        assert!(!clock.advance_to(500, t0 + Duration::from_secs(4)));
        assert_eq!(clock.elapsed_secs(t0 + Duration::from_secs(9)), 63);
    }
}
