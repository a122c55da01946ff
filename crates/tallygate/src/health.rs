//! Health check endpoint.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::GatewayMode;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `true` while the process is serving.
    pub ok: bool,
    /// Active mode.
    pub mode: GatewayMode,
}

/// Health checker.
#[derive(Debug)]
pub struct HealthChecker {
    mode: GatewayMode,
    start_time: Instant,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(mode: GatewayMode) -> Self {
        Self {
            mode,
            start_time: Instant::now(),
        }
    }

    /// Get the uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Liveness report. No dependency is probed: the gateway is healthy
    /// whenever it can answer.
    pub fn check(&self) -> HealthResponse {
        HealthResponse {
            ok: true,
            mode: self.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let checker = HealthChecker::new(GatewayMode::Capture);
        let json = serde_json::to_string(&checker.check()).unwrap();
        assert_eq!(json, r#"{"ok":true,"mode":"capture"}"#);
    }

    #[test]
    fn test_uptime() {
        let checker = HealthChecker::new(GatewayMode::Mock);
        std::thread::sleep(Duration::from_millis(5));
        assert!(checker.uptime() >= Duration::from_millis(5));
    }
}
