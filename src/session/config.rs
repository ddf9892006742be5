//! Session and manager configuration

use std::time::Duration;

use crate::transcode::TranscodeOptions;

/// Restart behavior after a transcoder crash
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Restarts allowed before the failure becomes permanent
    pub max_restarts: u32,

    /// Delay before the first restart
    pub initial_backoff: Duration,

    /// Upper bound on the delay between restarts
    pub max_backoff: Duration,

    /// A process that streams this long resets the restart count
    pub reset_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            reset_after: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Set the restart limit
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    /// Set the initial and maximum backoff
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Set how long a process must stream before the restart count resets
    pub fn reset_after(mut self, duration: Duration) -> Self {
        self.reset_after = duration;
        self
    }

    /// Delay before restart number `attempt` (zero-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Configuration for one stream session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stream name viewers subscribe to
    pub name: String,

    /// Source the transcoder reads
    pub source_url: String,

    /// Transcoder options
    pub transcode: TranscodeOptions,

    /// Restart behavior
    pub retry: RetryPolicy,

    /// Crash the attempt if the transcoder produces no output within this time
    pub ready_timeout: Duration,

    /// How long a stop may take before the process is killed
    pub stop_timeout: Duration,

    /// Send the JSMpeg size header to each viewer on join
    pub jsmpeg_greeting: bool,
}

impl SessionConfig {
    /// Create a config with default transcoder options
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            transcode: TranscodeOptions::default(),
            retry: RetryPolicy::default(),
            ready_timeout: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(5),
            jsmpeg_greeting: true,
        }
    }

    /// Set transcoder options
    pub fn transcode(mut self, options: TranscodeOptions) -> Self {
        self.transcode = options;
        self
    }

    /// Set restart behavior
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the readiness timeout
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Enable or disable the JSMpeg greeting
    pub fn jsmpeg_greeting(mut self, enabled: bool) -> Self {
        self.jsmpeg_greeting = enabled;
        self
    }
}

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Idle sessions without viewers are removed after this long
    pub idle_timeout: Duration,

    /// How often idle sessions are looked for
    pub cleanup_interval: Duration,

    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(5),
            event_capacity: 1024,
        }
    }
}

impl ManagerConfig {
    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the cleanup interval (minimum 1 ms)
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(Duration::from_millis(1));
        self
    }
}
