//! Shared helpers for gateway integration tests: an in-process upstream and
//! a gateway bound to an ephemeral port.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tallygate::{GatewayConfig, GatewayServer};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// The accounting contract used by every mock-mode test.
pub const FIXTURE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../tallygate-contract/tests/fixtures/accounting.json"
);

type UpstreamBody = UnsyncBoxBody<Bytes, Infallible>;

/// A request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
enum Reply {
    Fixed {
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
    },
    /// Sends `first`, waits for `release`, then sends `second`.
    Streamed {
        first: Bytes,
        second: Bytes,
        release: Arc<Notify>,
    },
}

/// Configurable upstream server.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    reply: Reply,
    delay: Option<Duration>,
}

impl MockUpstream {
    /// Reply with a fixed JSON body.
    pub fn json(status: StatusCode, body: &'static str) -> Self {
        Self::fixed(status, "application/json", Bytes::from_static(body.as_bytes()))
    }

    /// Reply with fixed bytes.
    pub fn fixed(status: StatusCode, content_type: &'static str, body: Bytes) -> Self {
        Self {
            reply: Reply::Fixed {
                status,
                content_type,
                body,
            },
            delay: None,
        }
    }

    /// Reply with two chunks, the second only after `release` is notified.
    pub fn streamed(first: &'static str, second: &'static str, release: Arc<Notify>) -> Self {
        Self {
            reply: Reply::Streamed {
                first: Bytes::from_static(first.as_bytes()),
                second: Bytes::from_static(second.as_bytes()),
                release,
            },
            delay: None,
        }
    }

    /// Wait before replying.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Start the server on an ephemeral port.
    pub async fn start(self) -> UpstreamHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let upstream = Arc::new(self);

        let log = received.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let upstream = upstream.clone();
                let log = log.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let upstream = upstream.clone();
                        let log = log.clone();
                        async move { Ok::<_, Infallible>(upstream.respond(req, &log).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        UpstreamHandle {
            addr,
            received,
            task,
        }
    }

    async fn respond(
        &self,
        req: Request<Incoming>,
        log: &Mutex<Vec<ReceivedRequest>>,
    ) -> Response<UpstreamBody> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
        log.lock().unwrap().push(ReceivedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            Reply::Fixed {
                status,
                content_type,
                body,
            } => Response::builder()
                .status(*status)
                .header("content-type", *content_type)
                .header("x-upstream", "yes")
                .body(Full::new(body.clone()).boxed_unsync())
                .unwrap(),
            Reply::Streamed {
                first,
                second,
                release,
            } => {
                let (tx, rx) = mpsc::channel::<Bytes>(2);
                let (first, second, release) = (first.clone(), second.clone(), release.clone());
                tokio::spawn(async move {
                    let _ = tx.send(first).await;
                    release.notified().await;
                    let _ = tx.send(second).await;
                });

                let chunks = stream::unfold(rx, |mut rx| async move {
                    rx.recv()
                        .await
                        .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
                });
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/plain")
                    .body(StreamBody::new(chunks).boxed_unsync())
                    .unwrap()
            }
        }
    }
}

/// A running mock upstream.
#[derive(Debug)]
pub struct UpstreamHandle {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    task: JoinHandle<()>,
}

impl UpstreamHandle {
    /// Base URL of the upstream, with an optional base path.
    pub fn url(&self, base_path: &str) -> String {
        format!("http://{}{}", self.addr, base_path)
    }

    /// Requests received so far.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a gateway on an ephemeral port and return its base URL.
pub async fn spawn_gateway(config: GatewayConfig) -> String {
    let server = GatewayServer::new(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    format!("http://{addr}")
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// HTTP client for talking to the gateway.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
