// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{body::Incoming, http, Method, Request, Response, StatusCode};
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::Config;
use crate::delivery::SandboxState;
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, ResponseBody,
};
use crate::queue::Destination;
use crate::relay::{Accepted, Relay};

/// Ingress HTTP server: accepts observation batches from collectors and
/// hands them to the relay. Every call gets an immediate answer, delivered
/// (200), queued (202), or rejected (4xx/500); none waits for reconciliation.
pub struct RelayServer {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    /// Present only when the process runs against the sandbox sink; enables
    /// the connectivity toggle and sink view endpoints.
    pub sandbox: Option<Arc<SandboxState>>,
}

impl RelayServer {
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config = Arc::clone(&self.config);
        let relay = Arc::clone(&self.relay);
        let sandbox = self.sandbox.clone();

        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&config);
            let relay = Arc::clone(&relay);
            let sandbox = sandbox.clone();

            RelayServer::endpoint_handler(config, relay, sandbox, req)
        });

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        debug!(
            "Relay server started: listening on port {}",
            listener.local_addr()?.port()
        );

        Self::serve_tcp(listener, service).await
    }

    async fn serve_tcp<S>(
        listener: tokio::net::TcpListener,
        service: S,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        S: hyper::service::Service<
                Request<Incoming>,
                Response = Response<ResponseBody>,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        config: Arc<Config>,
        relay: Arc<Relay>,
        sandbox: Option<Arc<SandboxState>>,
        req: Request<Incoming>,
    ) -> http::Result<Response<ResponseBody>> {
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (req.method(), segments.as_slice()) {
            (&Method::POST, ["cameras", camera_id, "observations", observation_type]) => {
                let destination = Destination::new(*camera_id, *observation_type);
                match Self::observations_handler(config, relay, destination, req).await {
                    Ok(res) => Ok(res),
                    Err(err) => log_and_create_http_response(
                        &format!("Error processing observations: {err}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
            (&Method::GET, ["health"]) => match Self::health_handler() {
                Ok(res) => Ok(res),
                Err(err) => log_and_create_http_response(
                    &format!("Health endpoint error: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            },
            (&Method::POST, ["sandbox", "connectivity"]) => match sandbox.as_ref() {
                Some(state) => Self::sandbox_connectivity_handler(state),
                None => Self::not_found(),
            },
            (&Method::GET, ["sandbox", "sink"]) => match sandbox.as_ref() {
                Some(state) => Self::sandbox_sink_handler(state),
                None => Self::not_found(),
            },
            _ => Self::not_found(),
        }
    }

    fn not_found() -> http::Result<Response<ResponseBody>> {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
    }

    /// Handles one inbound observation batch: validate, then let the relay
    /// attempt delivery or buffer.
    async fn observations_handler(
        config: Arc<Config>,
        relay: Arc<Relay>,
        destination: Destination,
        req: Request<Incoming>,
    ) -> http::Result<Response<ResponseBody>> {
        debug!(
            "Received observations for {}",
            destination.storage_key()
        );

        if !config
            .observation_types
            .contains(&destination.observation_type)
        {
            return log_and_create_http_response(
                &format!(
                    "Observation type {:?} is not accepted",
                    destination.observation_type
                ),
                StatusCode::BAD_REQUEST,
            );
        }

        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing observations",
        ) {
            return response;
        }

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading observations body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let payload: serde_json::Value = match serde_json::from_slice(&body_bytes) {
            Ok(value) => value,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Observations body is not valid JSON: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        if !payload.is_array() {
            return log_and_create_http_response(
                "Observations body must be a JSON array",
                StatusCode::BAD_REQUEST,
            );
        }

        let headers = forwarded_headers(&parts.headers);

        match relay.accept(destination, payload, headers).await {
            Ok(Accepted { delivered: true }) => {
                log_and_create_http_response("Observations delivered to sink", StatusCode::OK)
            }
            Ok(Accepted { delivered: false }) => log_and_create_http_response(
                "Observations queued for later delivery",
                StatusCode::ACCEPTED,
            ),
            Err(e) => log_and_create_http_response(
                &format!("Failed to buffer observations: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    fn health_handler() -> http::Result<Response<ResponseBody>> {
        let response_json = json!({ "status": "OK" });
        Response::builder()
            .status(200)
            .body(Full::new(Bytes::from(response_json.to_string())))
    }

    fn sandbox_connectivity_handler(
        sandbox: &Arc<SandboxState>,
    ) -> http::Result<Response<ResponseBody>> {
        let online = sandbox.toggle_online();
        debug!("Sandbox sink connectivity set to: {online}");
        let response_json = json!({ "online": online });
        Response::builder()
            .status(200)
            .body(Full::new(Bytes::from(response_json.to_string())))
    }

    fn sandbox_sink_handler(sandbox: &Arc<SandboxState>) -> http::Result<Response<ResponseBody>> {
        let response_json = json!(sandbox.accepted());
        Response::builder()
            .status(200)
            .body(Full::new(Bytes::from(response_json.to_string())))
    }
}

/// Custom metadata headers forwarded along with a buffered batch. Standard
/// request headers stay behind; the delivery client sets its own.
fn forwarded_headers(header_map: &hyper::http::HeaderMap) -> std::collections::BTreeMap<String, String> {
    header_map
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-"))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
