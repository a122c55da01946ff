//! Tallygate - Entry point
//!
//! This is the main binary for the tallygate gateway.

use std::path::PathBuf;

use tracing::{error, info};

use tallygate::{telemetry, GatewayConfig, GatewayServer};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("tallygate {}", tallygate::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Tallygate - contract-mediated accounting API gateway

USAGE:
    tallygate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    TALLYGATE_MODE               mock | proxy | capture (default: mock)
    TALLYGATE_LISTEN_ADDR        Listen address (default: 0.0.0.0)
    TALLYGATE_LISTEN_PORT        Listen port (default: 8080)
    TALLYGATE_ROUTE_PREFIX       Routing prefix (default: /api)
    TALLYGATE_UPSTREAM_URL       Upstream base URL
    TALLYGATE_BEARER_TOKEN       Bearer credential injected upstream
    TALLYGATE_UPSTREAM_TIMEOUT   Upstream timeout, e.g. 500ms, 30s (default: 30s)
    TALLYGATE_CONTRACT_PATH      OpenAPI document (JSON or YAML)
    TALLYGATE_VALIDATE_CAPTURES  Validate requests in capture mode (default: false)
    TALLYGATE_CAPTURE_LOG        Capture log path (default: captures.ndjson)
    TALLYGATE_LOG_LEVEL          Log filter (default: info)

EXAMPLES:
    # Run with configuration file
    tallygate --config /etc/tallygate/tallygate.toml

    # Mock from a contract
    TALLYGATE_CONTRACT_PATH=accounting.json tallygate
"
    );
}

#[tokio::main]
async fn main() {
    // Parse arguments
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => match GatewayConfig::from_file(path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default().with_env_overrides(),
    };

    // Initialize tracing
    if let Err(e) = telemetry::init_logging(&config.telemetry) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    match &args.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Using default configuration with environment overrides"),
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!(
        service = %config.telemetry.service_name,
        "Starting tallygate v{}",
        tallygate::VERSION
    );

    // Create and run server
    let server = match GatewayServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
