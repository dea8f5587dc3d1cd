//! Small shared types.

use chrono::{DateTime, Utc};

/// Source of the current time. Upload names are derived from it, so tests pin it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    fixed_time: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn new_with_fixed_time(fixed_time: DateTime<Utc>) -> Self {
        Self {
            fixed_time: Some(fixed_time),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.fixed_time.unwrap_or_else(Utc::now)
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_time.is_some()
    }
}
