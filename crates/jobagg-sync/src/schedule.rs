use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use tracing::{info, warn};

use crate::fleet::FleetManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScrapeWindow {
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Option<Self> {
        let start = NaiveTime::from_hms_opt(start.0, start.1, 0)?;
        let end = NaiveTime::from_hms_opt(end.0, end.1, 0)?;
        (start < end).then_some(Self { start, end })
    }

    fn random_minute(&self, rng: &mut fastrand::Rng) -> NaiveTime {
        let span = (self.end - self.start).num_minutes().max(1);
        self.start + chrono::Duration::minutes(rng.i64(0..span))
    }
}

/// Off-peak windows, local time.
pub fn default_windows() -> Vec<ScrapeWindow> {
    [((1, 0), (5, 0)), ((9, 0), (11, 0)), ((15, 0), (17, 0)), ((19, 20), (22, 15))]
        .into_iter()
        .filter_map(|(start, end)| ScrapeWindow::new(start, end))
        .collect()
}

/// A random minute in the first window that has not started yet today, or in
/// tomorrow's first window once every window today has started.
pub fn next_fire_time(
    now: NaiveDateTime,
    windows: &[ScrapeWindow],
    rng: &mut fastrand::Rng,
) -> Option<NaiveDateTime> {
    let first = windows.iter().min_by_key(|w| w.start)?;
    let today = now.date();
    let upcoming = windows
        .iter()
        .filter(|w| w.start > now.time())
        .min_by_key(|w| w.start);
    Some(match upcoming {
        Some(window) => today.and_time(window.random_minute(rng)),
        None => today.succ_opt()?.and_time(first.random_minute(rng)),
    })
}

/// Fires a full scrape pass at randomized times. Passes never overlap since
/// the next time is only picked after the previous pass returns.
pub struct ScrapeScheduler {
    fleet: Arc<FleetManager>,
    windows: Vec<ScrapeWindow>,
    rng: fastrand::Rng,
}

impl ScrapeScheduler {
    pub fn new(fleet: Arc<FleetManager>) -> Self {
        Self::with_rng(fleet, default_windows(), fastrand::Rng::new())
    }

    pub fn with_rng(fleet: Arc<FleetManager>, windows: Vec<ScrapeWindow>, rng: fastrand::Rng) -> Self {
        Self { fleet, windows, rng }
    }

    pub async fn run_forever(mut self) {
        loop {
            let now = Local::now().naive_local();
            let Some(next) = next_fire_time(now, &self.windows, &mut self.rng) else {
                warn!("no scrape windows configured; scheduler idle");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next, wait_secs = wait.as_secs(), "next scheduled scrape");
            tokio::time::sleep(wait).await;

            let summary = self.fleet.scrape_all().await;
            info!(run_id = %summary.run_id, inserted = summary.inserted(), "scheduled scrape done");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn picks_next_window_today() {
        let windows = default_windows();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let next = next_fire_time(at(7, 30), &windows, &mut rng).unwrap();
            assert_eq!(next.date(), at(7, 30).date());
            assert!(next.time() >= time(9, 0) && next.time() < time(11, 0));
        }
    }

    #[test]
    fn inside_a_window_moves_to_the_following_one() {
        let windows = default_windows();
        let mut rng = fastrand::Rng::with_seed(1);
        let next = next_fire_time(at(16, 0), &windows, &mut rng).unwrap();
        assert!(next.time() >= time(19, 20) && next.time() < time(22, 15));
    }

    #[test]
    fn after_last_start_rolls_to_tomorrow() {
        let windows = default_windows();
        let mut rng = fastrand::Rng::with_seed(3);
        let next = next_fire_time(at(21, 0), &windows, &mut rng).unwrap();
        assert_eq!(next.date(), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        assert!(next.time() >= time(1, 0) && next.time() < time(5, 0));
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let windows = default_windows();
        let a = next_fire_time(at(0, 0), &windows, &mut fastrand::Rng::with_seed(42));
        let b = next_fire_time(at(0, 0), &windows, &mut fastrand::Rng::with_seed(42));
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert!(ScrapeWindow::new((5, 0), (1, 0)).is_none());
        assert!(next_fire_time(at(0, 0), &[], &mut fastrand::Rng::with_seed(0)).is_none());
    }
}
