use chrono::{NaiveDate, NaiveDateTime};
use tickr_core::TimeOfDay;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::{Boundary, BoundaryState};

#[derive(Debug, Clone, Copy)]
struct Slot {
    at: TimeOfDay,
    state: BoundaryState,
    /// Survives re-arming so a boundary never fires twice on one date.
    last_fired: Option<NaiveDate>,
}

impl Slot {
    fn new(at: TimeOfDay) -> Self {
        Self {
            at,
            state: BoundaryState::Pending,
            last_fired: None,
        }
    }

    fn armed_for(&self, date: NaiveDate) -> bool {
        self.state == BoundaryState::Pending && self.last_fired != Some(date)
    }
}

/// Tracks the open/close boundaries of one scheduler instance.
///
/// Pure state machine: feed it local wall-clock instants via [`evaluate`]
/// and it reports which boundary (if any) was crossed.
///
/// [`evaluate`]: BoundaryTracker::evaluate
#[derive(Debug, Clone)]
pub struct BoundaryTracker {
    open: Slot,
    close: Slot,
}

impl BoundaryTracker {
    pub fn new(open: TimeOfDay, close: TimeOfDay) -> Result<Self> {
        if open >= close {
            return Err(SchedulerError::Config(format!(
                "open boundary {open} must be before close boundary {close}"
            )));
        }
        Ok(Self {
            open: Slot::new(open),
            close: Slot::new(close),
        })
    }

    pub fn time_of(&self, boundary: Boundary) -> TimeOfDay {
        self.slot(boundary).at
    }

    pub fn state(&self, boundary: Boundary) -> BoundaryState {
        self.slot(boundary).state
    }

    /// Which boundary a schedule entry belongs to, if any.
    pub fn boundary_at(&self, time: TimeOfDay) -> Option<Boundary> {
        if time == self.open.at {
            Some(Boundary::Open)
        } else if time == self.close.at {
            Some(Boundary::Close)
        } else {
            None
        }
    }

    /// Evaluate one tick. Marks and returns the boundary that fires, if any.
    ///
    /// - open fires inside `[open, close)` and re-arms close;
    /// - close fires at or after `close` and re-arms open.
    pub fn evaluate(&mut self, local: NaiveDateTime) -> Option<Boundary> {
        let date = local.date();
        let time = local.time();

        let in_open_window = self.open.at.reached_by(time) && !self.close.at.reached_by(time);
        if in_open_window && self.open.armed_for(date) {
            self.fire(Boundary::Open, date);
            return Some(Boundary::Open);
        }

        if self.close.at.reached_by(time) && self.close.armed_for(date) {
            self.fire(Boundary::Close, date);
            return Some(Boundary::Close);
        }

        None
    }

    fn fire(&mut self, boundary: Boundary, date: NaiveDate) {
        let slot = self.slot_mut(boundary);
        slot.state = BoundaryState::Fired(date);
        slot.last_fired = Some(date);
        self.slot_mut(boundary.other()).state = BoundaryState::Pending;
        debug!(%boundary, %date, "boundary fired");
    }

    fn slot(&self, boundary: Boundary) -> &Slot {
        match boundary {
            Boundary::Open => &self.open,
            Boundary::Close => &self.close,
        }
    }

    fn slot_mut(&mut self, boundary: Boundary) -> &mut Slot {
        match boundary {
            Boundary::Open => &mut self.open,
            Boundary::Close => &mut self.close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> BoundaryTracker {
        BoundaryTracker::new(
            TimeOfDay::new(9, 30).unwrap(),
            TimeOfDay::new(16, 0).unwrap(),
        )
        .unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn nothing_before_open() {
        let mut t = tracker();
        assert_eq!(t.evaluate(at(10, 8, 0)), None);
        assert_eq!(t.evaluate(at(10, 9, 29)), None);
        assert_eq!(t.state(Boundary::Open), BoundaryState::Pending);
    }

    #[test]
    fn open_then_close_each_once_per_day() {
        let mut t = tracker();
        let mut fired = Vec::new();
        // one tick per minute for the whole day
        for minute in 0..(24 * 60) {
            if let Some(b) = t.evaluate(at(10, minute / 60, minute % 60)) {
                fired.push(b);
            }
        }
        assert_eq!(fired, vec![Boundary::Open, Boundary::Close]);
    }

    #[test]
    fn open_fires_at_exact_boundary_minute() {
        let mut t = tracker();
        assert_eq!(t.evaluate(at(10, 9, 30)), Some(Boundary::Open));
        assert_eq!(t.state(Boundary::Open), BoundaryState::Fired(at(10, 0, 0).date()));
        assert_eq!(t.evaluate(at(10, 9, 31)), None);
    }

    #[test]
    fn start_after_close_fires_only_close() {
        let mut t = tracker();
        assert_eq!(t.evaluate(at(10, 18, 0)), Some(Boundary::Close));
        assert_eq!(t.evaluate(at(10, 23, 59)), None);
        // next day the open boundary is armed again
        assert_eq!(t.evaluate(at(11, 9, 45)), Some(Boundary::Open));
        assert_eq!(t.evaluate(at(11, 16, 0)), Some(Boundary::Close));
    }

    #[test]
    fn out_of_order_ticks_never_refire_same_day() {
        let mut t = tracker();
        assert_eq!(t.evaluate(at(10, 10, 0)), Some(Boundary::Open));
        assert_eq!(t.evaluate(at(10, 17, 0)), Some(Boundary::Close));
        // clock jumps back into the open window on the same date
        assert_eq!(t.evaluate(at(10, 10, 0)), None);
        assert_eq!(t.evaluate(at(10, 17, 0)), None);
    }

    #[test]
    fn multi_day_run_fires_twice_per_day() {
        let mut t = tracker();
        let mut count = 0;
        for day in 10..15 {
            for hour in 0..24 {
                if t.evaluate(at(day, hour, 0)).is_some() {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn boundary_lookup_by_time() {
        let t = tracker();
        assert_eq!(t.boundary_at(TimeOfDay::new(9, 30).unwrap()), Some(Boundary::Open));
        assert_eq!(t.boundary_at(TimeOfDay::new(16, 0).unwrap()), Some(Boundary::Close));
        assert_eq!(t.boundary_at(TimeOfDay::new(12, 0).unwrap()), None);
    }

    #[test]
    fn inverted_boundaries_rejected() {
        assert!(BoundaryTracker::new(
            TimeOfDay::new(16, 0).unwrap(),
            TimeOfDay::new(9, 30).unwrap()
        )
        .is_err());
    }
}
