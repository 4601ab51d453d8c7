use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::ErrorKind;
use crate::utils::{format_bytes, format_duration, format_speed};
use super::types::{Direction, TaskId, TaskStatus, TransferSource};

/// One tracked transfer. Only the registry mutates it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransferTask {
    pub id: TaskId,
    pub name: String,
    pub direction: Direction,
    pub status: TaskStatus,
    /// 0..=100, 100 only once completed
    pub progress: u8,
    pub size: u64,
    /// MB/s, present only while active
    pub speed: Option<f64>,
    /// Seconds, present only while active with a positive speed
    pub estimated_time_left: Option<f64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub start_time: DateTime<Utc>,
    pub source: TransferSource,
}

impl TransferTask {
    pub fn new(source: TransferSource, size: u64) -> Self {
        let direction = source.direction();

        Self {
            id: TaskId::generate(direction),
            name: source.display_name(),
            direction,
            status: TaskStatus::Pending,
            progress: 0,
            size,
            speed: None,
            estimated_time_left: None,
            error: None,
            error_kind: None,
            start_time: Utc::now(),
            source,
        }
    }

    /// Transitions the state machine accepts. Staying in the same state
    /// is always allowed, it carries field-only updates.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;

        if from == to {
            return true;
        }

        matches!(
            (from, to),
            (Pending, Active)
                | (Pending, Error)
                | (Active, Completed)
                | (Active, Error)
                | (Active, Paused)
                | (Paused, Active)
                | (Error, Pending)
        )
    }

    /// One-line status for a transfer list.
    pub fn summary(&self) -> String {
        match self.status {
            TaskStatus::Pending => format!("Waiting • {}", format_bytes(self.size)),
            TaskStatus::Active => {
                let mut line = format!("{}% • {}", self.progress, format_speed(self.speed.unwrap_or(0.0)));
                if let Some(seconds) = self.estimated_time_left {
                    line.push_str(&format!(" • {} left", format_duration(Duration::from_secs_f64(seconds))));
                }
                line
            }
            TaskStatus::Paused => format!("Paused at {}%", self.progress),
            TaskStatus::Error => match &self.error {
                Some(error) => format!("Interrupted at {}% ({})", self.progress, error),
                None => format!("Interrupted at {}%", self.progress),
            },
            TaskStatus::Completed => format!("Completed • {}", format_bytes(self.size)),
        }
    }
}
