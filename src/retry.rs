use std::thread;
use std::time::Duration;

use crate::error::EtlError;

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
        }
    }

    pub fn attempt<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, EtlError>,
    ) -> Option<T> {
        let attempts = self.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Some(value),
                Err(err) => {
                    tracing::warn!("{label}: attempt {attempt}/{attempts} failed: {err}");
                    last_error = Some(err);
                    if attempt < attempts {
                        tracing::info!("{label}: retrying in {}s", self.delay.as_secs_f32());
                        thread::sleep(self.delay);
                    }
                }
            }
        }
        if let Some(err) = last_error {
            tracing::error!("{label}: all {attempts} attempts failed: {err}");
        }
        None
    }
}
