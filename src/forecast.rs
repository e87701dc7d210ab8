//! Seasonal-naive bike availability forecasts.
//!
//! Everything here is pure: no I/O, no clock. The only failure mode is an
//! invalid `(step, horizon)` pair, rejected up front by [`ForecastParams`].

use thiserror::Error;

use crate::model::{ForecastPoint, ForecastResponse, Snapshot};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Number of trailing observations averaged when history is shorter than
/// one full period.
const FALLBACK_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    #[error("step_minutes must be greater than zero")]
    InvalidStep,
    #[error("horizon_minutes ({horizon_minutes}) must cover at least one step of {step_minutes} minutes")]
    InvalidHorizon {
        step_minutes: u32,
        horizon_minutes: u32,
    },
    #[error("step_minutes ({0}) must divide a day (1440 minutes) evenly")]
    StepNotDayDivisor(u32),
}

/// Validated sampling step and horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastParams {
    step_minutes: u32,
    horizon_minutes: u32,
}

impl ForecastParams {
    pub fn new(step_minutes: u32, horizon_minutes: u32) -> Result<Self, ForecastError> {
        if step_minutes == 0 {
            return Err(ForecastError::InvalidStep);
        }
        // A step that does not divide the day would make the period drift
        // against calendar days.
        if MINUTES_PER_DAY % step_minutes != 0 {
            return Err(ForecastError::StepNotDayDivisor(step_minutes));
        }
        if horizon_minutes < step_minutes {
            return Err(ForecastError::InvalidHorizon {
                step_minutes,
                horizon_minutes,
            });
        }
        Ok(Self {
            step_minutes,
            horizon_minutes,
        })
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    pub fn horizon_minutes(&self) -> u32 {
        self.horizon_minutes
    }

    /// Steps per day.
    pub fn period(&self) -> usize {
        (MINUTES_PER_DAY / self.step_minutes) as usize
    }

    /// Number of future steps to forecast.
    pub fn horizon(&self) -> usize {
        (self.horizon_minutes / self.step_minutes) as usize
    }
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            step_minutes: 10,
            horizon_minutes: 60,
        }
    }
}

/// Reuse the value observed at the same phase of the most recent full cycle.
///
/// With fewer than `period` observations every step gets the mean of the
/// last three values (or `0.0` for an empty series). That fallback is the
/// same for every step of the horizon.
pub fn seasonal_naive(history: &[f64], period: usize, horizon: usize) -> Vec<f64> {
    let n = history.len();
    if period > 0 && n >= period {
        return (1..=horizon)
            .map(|h| history[n - period + (h - 1) % period])
            .collect();
    }

    vec![moving_average(history, FALLBACK_WINDOW); horizon]
}

/// Mean of the last `window` values, `0.0` for an empty series.
pub fn moving_average(history: &[f64], window: usize) -> f64 {
    if history.is_empty() || window == 0 {
        return 0.0;
    }
    let tail = &history[history.len() - history.len().min(window)..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Forecast bikes for one station from its history rows (any order).
pub fn make_forecast(rows: &[Snapshot], params: &ForecastParams) -> ForecastResponse {
    let step_minutes = params.step_minutes();
    if rows.is_empty() {
        return ForecastResponse {
            step_minutes,
            points: Vec::new(),
        };
    }

    let mut ordered: Vec<&Snapshot> = rows.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);
    let series: Vec<f64> = ordered.iter().map(|r| r.bikes as f64).collect();
    let last_ts = ordered[ordered.len() - 1].timestamp;

    let step_secs = step_minutes as i64 * 60;
    let points = seasonal_naive(&series, params.period(), params.horizon())
        .into_iter()
        .enumerate()
        .map(|(i, bikes)| ForecastPoint {
            t: last_ts + (i as i64 + 1) * step_secs,
            bikes,
        })
        .collect();

    ForecastResponse {
        step_minutes,
        points,
    }
}
