use std::collections::HashMap;
use std::time::Instant;
use serde::Deserialize;
use super::types::TaskId;

pub const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

/// How transfer speed is derived from byte counters.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedMode {
    /// Bytes since start over time since start. Smooth, lags bursts.
    #[default]
    Cumulative,
    /// Bytes since the previous sample over the time between them.
    Windowed,
}

/// Derived fields for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub progress: u8,
    /// MB/s, two decimals
    pub speed: Option<f64>,
    /// Seconds
    pub estimated_time_left: Option<f64>,
}

struct SampleWindow {
    started_at: Instant,
    last_time: Instant,
    last_loaded: u64,
    bytes_per_second: Option<f64>,
}

impl SampleWindow {
    fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            last_time: now,
            last_loaded: 0,
            bytes_per_second: None,
        }
    }
}

/// Turns raw `(loaded, total, now)` samples into percent, speed and ETA.
///
/// Keeps one small window per active task; callers drop it with
/// [`ProgressTracker::forget`] once the task leaves `active`.
pub struct ProgressTracker {
    mode: SpeedMode,
    windows: HashMap<TaskId, SampleWindow>,
}

impl ProgressTracker {
    pub fn new(mode: SpeedMode) -> Self {
        Self {
            mode,
            windows: HashMap::new(),
        }
    }

    pub fn mode(&self) -> SpeedMode {
        self.mode
    }

    /// Start (or restart) timing a task.
    pub fn begin(&mut self, id: &TaskId, now: Instant) {
        self.windows.insert(id.clone(), SampleWindow::new(now));
    }

    pub fn sample(&mut self, id: &TaskId, loaded: u64, total: u64, now: Instant) -> ProgressSnapshot {
        let window = self.windows
            .entry(id.clone())
            .or_insert_with(|| SampleWindow::new(now));

        match self.mode {
            SpeedMode::Cumulative => {
                let elapsed = now.saturating_duration_since(window.started_at).as_secs_f64();
                if elapsed > 0.0 {
                    window.bytes_per_second = Some(loaded as f64 / elapsed);
                }
            }
            SpeedMode::Windowed => {
                // two events in the same tick keep the previous speed
                let time_diff = now.saturating_duration_since(window.last_time).as_secs_f64();
                if time_diff > 0.0 {
                    let bytes_diff = loaded.saturating_sub(window.last_loaded);
                    window.bytes_per_second = Some(bytes_diff as f64 / time_diff);
                    window.last_time = now;
                    window.last_loaded = loaded;
                }
            }
        }

        let bytes_per_second = window.bytes_per_second.filter(|speed| *speed > 0.0);
        let remaining = total.saturating_sub(loaded);
        let estimated_time_left = match bytes_per_second {
            Some(speed) if remaining > 0 => Some(remaining as f64 / speed),
            _ => None,
        };

        ProgressSnapshot {
            progress: percent(loaded, total),
            speed: bytes_per_second.map(to_megabytes),
            estimated_time_left,
        }
    }

    pub fn forget(&mut self, id: &TaskId) {
        self.windows.remove(id);
    }

    /// Number of tasks with retained sample state.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// `round(loaded / total * 100)` clamped to 0..=100; an unknown or zero
/// total reports 0.
pub fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }

    let percentage = (loaded as f64 / total as f64 * 100.0).round();
    percentage.clamp(0.0, 100.0) as u8
}

fn to_megabytes(bytes_per_second: f64) -> f64 {
    (bytes_per_second / BYTES_PER_MEGABYTE * 100.0).round() / 100.0
}
