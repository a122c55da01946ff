//! Gateway HTTP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tallygate_contract::Contract;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::body::{error_response, full, json_response, BoxError, ResponseBody};
use crate::config::{GatewayConfig, GatewayMode};
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::forward::strip_route_prefix;
use crate::headers::{new_request_id, set_request_id};
use crate::health::HealthChecker;
use crate::telemetry;

/// Gateway server.
#[derive(Debug)]
pub struct GatewayServer {
    /// Configuration.
    config: Arc<GatewayConfig>,
    /// Mode dispatcher.
    dispatcher: Arc<Dispatcher>,
    /// Health checker.
    health: Arc<HealthChecker>,
}

impl GatewayServer {
    /// Create a new gateway server, loading the contract if the mode needs
    /// one.
    pub async fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let contract = match (&config.contract.path, config.needs_contract()) {
            (Some(path), true) => {
                let contract = Contract::from_file(path).await?;
                info!(
                    path = %path.display(),
                    title = contract.title(),
                    version = contract.version(),
                    operations = contract.operation_count(),
                    "contract loaded"
                );
                let mut methods = contract.methods();
                methods.sort_unstable();
                for method in methods {
                    debug!(method, routes = ?contract.routes_for_method(method), "contract routes");
                }
                Some(Arc::new(contract))
            }
            _ => None,
        };

        Self::with_contract(config, contract)
    }

    /// Create a gateway server around an already loaded contract.
    pub fn with_contract(config: GatewayConfig, contract: Option<Arc<Contract>>) -> GatewayResult<Self> {
        if config.telemetry.metrics_enabled {
            telemetry::init_metrics();
        }

        let dispatcher = Arc::new(Dispatcher::new(&config, contract)?);
        let health = Arc::new(HealthChecker::new(dispatcher.mode()));

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            health,
        })
    }

    /// The active mode.
    pub fn mode(&self) -> GatewayMode {
        self.dispatcher.mode()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> GatewayResult<TcpListener> {
        let addr = SocketAddr::new(
            self.config
                .gateway
                .listen_addr
                .parse()
                .map_err(|e| GatewayError::config(format!("invalid listen address: {e}")))?,
            self.config.gateway.listen_port,
        );

        TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::server(format!("failed to bind {addr}: {e}")))
    }

    /// Run the gateway until Ctrl-C.
    pub async fn run(self) -> GatewayResult<()> {
        let listener = self.bind().await?;
        self.serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve connections from `listener` forever.
    pub async fn serve(self, listener: TcpListener) -> GatewayResult<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve connections from `listener` until `shutdown` completes.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            mode = %self.mode(),
            route_prefix = %self.config.gateway.route_prefix,
            "tallygate listening"
        );
        if self.mode() != GatewayMode::Mock {
            info!(upstream = %self.config.upstream.base_url, "forwarding to upstream");
        }

        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(uptime_secs = self.health.uptime().as_secs(), "shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let config = self.config.clone();
            let dispatcher = self.dispatcher.clone();
            let health = self.health.clone();

            // Spawn handler for this connection
            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let config = config.clone();
                    let dispatcher = dispatcher.clone();
                    let health = health.clone();
                    async move { Ok::<_, Infallible>(route(req, &config, &dispatcher, &health).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer_addr, "Connection error: {}", e);
                }
            });
        }
    }
}

/// Route a request to the health endpoint, the metrics endpoint or the
/// dispatcher.
async fn route<B>(
    req: Request<B>,
    config: &GatewayConfig,
    dispatcher: &Dispatcher,
    health: &HealthChecker,
) -> Response<ResponseBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let path = req.uri().path();

    if path == config.gateway.health_path {
        return json_response(StatusCode::OK, &health.check());
    }

    if path == config.gateway.metrics_path && config.telemetry.metrics_enabled {
        if let Some(metrics) = telemetry::render_metrics() {
            let mut response = Response::new(full(metrics));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            return response;
        }
    }

    if strip_route_prefix(path, &config.gateway.route_prefix).is_some() {
        return dispatcher.dispatch(req).await;
    }

    let request_id = new_request_id();
    debug!(path = %path, "route not handled");
    let mut response = error_response(&GatewayError::route_not_handled(path), &request_id);
    set_request_id(response.headers_mut(), &request_id);
    response
}
