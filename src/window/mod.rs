//! Bounded, time-ordered history of (state, information) pairs.
//!
//! Moments are kept in a monotone queue: a new moment is only accepted if it is strictly
//! newer than the last one and eviction always removes the oldest moment.

mod config;

use std::collections::VecDeque;

use log::{debug, trace};
use nalgebra::DMatrix;

use crate::error::{check_shape, Result};
use crate::manifold::State;
use crate::utils::time::{Duration, TimePoint};

pub use config::WindowConfig;

/// One entry of the window. Owns its state and information, later changes to the
/// estimator's working state never reach the history.
#[derive(Debug, Clone, PartialEq)]
pub struct Moment {
    pub time: TimePoint,
    pub state: State,
    pub information: DMatrix<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Oversized,
    Cut,
    Clean,
}

#[derive(Debug, Clone)]
pub struct Window {
    moments: VecDeque<Moment>,
    size: Duration,
    diagnostics_level: u32,
    crop_with_measurements: bool,
}

impl Default for Window {
    fn default() -> Self {
        Window::new(WindowConfig::default())
    }
}

impl Window {
    pub fn new(config: WindowConfig) -> Window {
        let mut window = Window {
            moments: VecDeque::new(),
            size: Duration::ZERO,
            diagnostics_level: 0,
            crop_with_measurements: false,
        };
        window.configure(&config);
        window
    }

    /// Applies new settings. Existing moments are kept until the next `shrink`.
    pub fn configure(&mut self, config: &WindowConfig) {
        self.size = Duration::from_sec(config.size);
        self.diagnostics_level = config.diagnostics_level;
        self.crop_with_measurements = config.crop_with_measurements;
    }

    pub fn config(&self) -> WindowConfig {
        WindowConfig {
            size: self.size.to_sec(),
            diagnostics_level: self.diagnostics_level,
            crop_with_measurements: self.crop_with_measurements,
        }
    }

    /// Appends a moment. Returns `Ok(false)` without touching the history if `t` is not
    /// strictly after the last moment. The information matrix must match the state's
    /// tangent dimension.
    pub fn add_moment(
        &mut self,
        t: TimePoint,
        state: State,
        information: DMatrix<f64>,
    ) -> Result<bool> {
        let dim = state.dim();
        check_shape((dim, dim), information.shape())?;
        if self.last_time().map_or(false, |last| t <= last) {
            if self.diagnostics_level > 1 {
                trace!("[Window] Rejected moment at {t}, not after {:?}", self.last_time());
            }
            return Ok(false);
        }
        self.moments.push_back(Moment {
            time: t,
            state,
            information,
        });
        if self.diagnostics_level > 0 {
            debug!("[Window] Added moment ({}) at {t}", self.moments.len());
        }
        Ok(true)
    }

    pub fn first_time(&self) -> Option<TimePoint> {
        self.moments.front().map(|m| m.time)
    }

    pub fn last_time(&self) -> Option<TimePoint> {
        self.moments.back().map(|m| m.time)
    }

    /// Oldest moment, `None` on an empty window.
    pub fn first_moment(&self) -> Option<&Moment> {
        let moment = self.moments.front();
        if self.diagnostics_level > 1 {
            match moment {
                Some(m) => trace!("[Window] First moment at {}", m.time),
                None => trace!("[Window] First moment requested on empty window"),
            }
        }
        moment
    }

    pub fn last_moment(&self) -> Option<&Moment> {
        self.moments.back()
    }

    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Moment> {
        self.moments.iter()
    }

    /// Span between the first and the last moment.
    pub fn span(&self) -> Duration {
        match (self.first_time(), self.last_time()) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::ZERO,
        }
    }

    fn oversized(&self) -> bool {
        self.moments.len() > 1 && self.span() > self.size
    }

    /// True if `t` lies strictly after the first moment and at or before the last one.
    fn does_cut(&self, t: TimePoint) -> bool {
        match (self.first_time(), self.last_time()) {
            (Some(first), Some(last)) => first < t && t <= last,
            _ => false,
        }
    }

    fn remove_first_moment(&mut self, reason: Eviction) {
        if let Some(m) = self.moments.pop_front() {
            if self.diagnostics_level > 1 {
                trace!(
                    "[Window] Removed moment at {} ({reason:?}), {} left",
                    m.time,
                    self.moments.len()
                );
            }
        }
    }

    fn report_evictions(&self, what: &str, count: usize) {
        if count > 0 && self.diagnostics_level > 0 {
            debug!(
                "[Window] {what} removed {count} moment(s), {} left",
                self.moments.len()
            );
        }
    }

    /// Evicts oldest moments until the span fits the configured size. With
    /// `crop_with_measurements` it also evicts while `t` cuts the window. Returns the number
    /// of evicted moments.
    pub fn shrink(&mut self, t: Option<TimePoint>) -> usize {
        let crop = if self.crop_with_measurements { t } else { None };
        let mut count = 0;
        loop {
            let reason = if self.oversized() {
                Eviction::Oversized
            } else if crop.map_or(false, |t| self.does_cut(t)) {
                Eviction::Cut
            } else {
                break;
            };
            self.remove_first_moment(reason);
            count += 1;
        }
        self.report_evictions("Shrink", count);
        count
    }

    /// Drops all history superseded by `t`: afterwards the first moment is at or after
    /// `t`, or `t` lies past the last moment.
    pub fn cut(&mut self, t: TimePoint) -> usize {
        let mut count = 0;
        while self.does_cut(t) {
            self.remove_first_moment(Eviction::Cut);
            count += 1;
        }
        self.report_evictions("Cut", count);
        count
    }

    /// Keeps only the newest moment.
    pub fn clean(&mut self) -> usize {
        let mut count = 0;
        while self.moments.len() > 1 {
            self.remove_first_moment(Eviction::Clean);
            count += 1;
        }
        self.report_evictions("Clean", count);
        count
    }

    pub fn reset(&mut self) {
        if self.diagnostics_level > 0 {
            debug!("[Window] Reset, dropped {} moment(s)", self.moments.len());
        }
        self.moments.clear();
    }
}
