//! Tallygate - contract-mediated accounting API gateway
//!
//! Tallygate sits in front of a third-party accounting API and serves every
//! request under its routing prefix in one of three modes, fixed at startup:
//!
//! - **mock**: validate the request against the OpenAPI contract and answer
//!   with a response synthesized from it, without touching the backend
//! - **proxy**: forward to the real backend and stream the answer back
//! - **capture**: forward, buffer the answer, append the exchange to an
//!   NDJSON capture log, then answer
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                │                  tallygate                   │
//!                │                                              │
//!   /health ────▶│  HealthChecker                               │
//!   /_tallygate/ │  Prometheus                                  │
//!     metrics ──▶│                                              │
//!                │              ┌────────────┐                  │
//!   /api/... ───▶│ Dispatcher ─▶│ mock       │─▶ Contract        │
//!                │              │ proxy      │─▶ Forwarder ─────┼──▶ upstream
//!                │              │ capture    │─▶ Forwarder ─────┼──▶ upstream
//!                │              └────────────┘   └▶ Recorder ──┼──▶ captures.ndjson
//!                └──────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```bash
//! # Serve mocks from a contract
//! $ TALLYGATE_CONTRACT_PATH=accounting.json tallygate
//!
//! # Record real traffic
//! $ TALLYGATE_MODE=capture \
//!   TALLYGATE_UPSTREAM_URL=https://sandbox-quickbooks.api.intuit.com \
//!   TALLYGATE_BEARER_TOKEN=... \
//!   tallygate
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod body;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod headers;
pub mod health;
pub mod recorder;
pub mod server;
pub mod telemetry;

pub use config::{GatewayConfig, GatewayConfigBuilder, GatewayMode};
pub use dispatch::Dispatcher;
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use forward::{BufferedResponse, Forwarder, ProxyOptions, Relay, RelayStrategy};
pub use health::{HealthChecker, HealthResponse};
pub use recorder::{Exchange, ExchangeRecorder};
pub use server::GatewayServer;

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
