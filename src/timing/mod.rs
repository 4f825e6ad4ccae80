use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// ----- TimingRecorder --------------------------------------------------------

/// Wall-clock stopwatch around a single backend call.
#[derive(Debug, Clone, Copy)]
pub struct TimingRecorder {
    started_at: Instant,
}

impl TimingRecorder {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop the clock and combine the gateway-side measurement with what the
    /// backend reported.
    pub fn finish(
        self,
        backend_timestamp: impl Into<String>,
        backend_duration: impl Into<String>,
        client_start_time: impl Into<String>,
    ) -> TimingRecord {
        TimingRecord {
            model_server_timestamp: backend_timestamp.into(),
            model_server_duration: backend_duration.into(),
            grpc_duration: format_millis(self.elapsed()),
            start_time: client_start_time.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TimingRecord ----------------------------------------------------------

/// Per-call latency bundle sent back next to every functional result.
///
/// Serializes as the `timingData` object of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimingRecord {
    model_server_timestamp: String,
    model_server_duration: String,
    grpc_duration: String,
    start_time: String,
}

impl TimingRecord {
    pub fn model_server_timestamp(&self) -> &str {
        &self.model_server_timestamp
    }

    pub fn model_server_duration(&self) -> &str {
        &self.model_server_duration
    }

    pub fn grpc_duration(&self) -> &str {
        &self.grpc_duration
    }

    pub fn start_time(&self) -> &str {
        &self.start_time
    }

    /// Same backend figures, new client start time and a zero round trip.
    /// Used when a reconnect is acknowledged without calling the backend.
    pub fn replayed(&self, client_start_time: impl Into<String>) -> TimingRecord {
        TimingRecord {
            model_server_timestamp: self.model_server_timestamp.clone(),
            model_server_duration: self.model_server_duration.clone(),
            grpc_duration: format_millis(Duration::ZERO),
            start_time: client_start_time.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Milliseconds with three decimals, e.g. `12.345`.
pub fn format_millis(elapsed: Duration) -> String {
    format!("{:.3}", elapsed.as_secs_f64() * 1000.0)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
