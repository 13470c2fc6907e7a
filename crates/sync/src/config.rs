use std::env;
use std::time::Duration;

use reel_shared::constants::{ACTIVE_VISIBILITY_THRESHOLD, DOUBLE_TAP_WINDOW_MS, THREAD_MESSAGE_LIMIT};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub active_threshold: f64,
    pub double_tap_window_ms: u64,
    pub thread_message_limit: usize,
    /// Simulated round trip of the in-memory store.
    pub store_latency_ms: u64,
    /// Probability that an in-memory store write fails with a transport error.
    pub store_failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_threshold: ACTIVE_VISIBILITY_THRESHOLD,
            double_tap_window_ms: DOUBLE_TAP_WINDOW_MS,
            thread_message_limit: THREAD_MESSAGE_LIMIT,
            store_latency_ms: 0,
            store_failure_rate: 0.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            active_threshold: env::var("ACTIVE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|t| *t > 0.0 && *t <= 1.0)
                .unwrap_or(defaults.active_threshold),
            double_tap_window_ms: env::var("DOUBLE_TAP_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.double_tap_window_ms),
            thread_message_limit: env::var("THREAD_MESSAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.thread_message_limit),
            store_latency_ms: env::var("STORE_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.store_latency_ms),
            store_failure_rate: env::var("STORE_FAILURE_RATE")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(defaults.store_failure_rate),
        }
    }

    pub fn double_tap_window(&self) -> Duration {
        Duration::from_millis(self.double_tap_window_ms)
    }

    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store_latency_ms)
    }
}
