//! The Stream Server: the `ExternalProcessor` gRPC service implementation (spec §4.1).
//! One `Process` call is one bidirectional stream; its role (router or upstream) is
//! decided from its first message and held for the stream's lifetime.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use protos::ext_proc_v3 as ep;
use protos::health_v1;

use crate::config::watcher::ConfigHandle;
use crate::endpoint::EndpointKind;
use crate::error::ProcessorError;
use crate::metrics::Metrics;
use crate::processor::router::RouterProcessor;
use crate::processor::upstream::UpstreamProcessor;
use crate::processor::{stream_role, StreamRole};
use crate::registry::Registry;
use crate::session::SessionTable;
use crate::tracing_span::Tracer;
use crate::types::Config;

type ResponseStream = ReceiverStream<Result<ep::ProcessingResponse, Status>>;

pub struct GatewayServer {
    config: ConfigHandle,
    sessions: Arc<SessionTable>,
    metrics: Arc<Metrics>,
    tracer: Arc<Tracer>,
    registry: Registry,
}

impl GatewayServer {
    pub fn new(config: ConfigHandle, metrics: Arc<Metrics>, tracer: Arc<Tracer>) -> Self {
        GatewayServer {
            config,
            sessions: Arc::new(SessionTable::new()),
            metrics,
            tracer,
            registry: Registry::new(),
        }
    }
}

enum Role {
    Router {
        router: Arc<Mutex<RouterProcessor>>,
        request_id: String,
    },
    Upstream {
        upstream: Arc<Mutex<UpstreamProcessor>>,
    },
}

async fn handle_stream(
    config: ConfigHandle,
    sessions: Arc<SessionTable>,
    metrics: Arc<Metrics>,
    tracer: Arc<Tracer>,
    registry: Registry,
    mut inbound: Streaming<ep::ProcessingRequest>,
    tx: mpsc::Sender<Result<ep::ProcessingResponse, Status>>,
) {
    let mut role: Option<Role> = None;

    loop {
        let message = match inbound.message().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(status) => {
                warn!(error = %status, "ext_proc stream receive error");
                break;
            }
        };

        let result = dispatch(
            &config,
            &sessions,
            &metrics,
            &tracer,
            &registry,
            &mut role,
            message,
        )
        .await;

        match result {
            Ok(response) => {
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
            Err(err) if err.is_terminal_ok() => break,
            Err(err) => {
                let _ = tx.send(Err(Status::from(&err))).await;
                break;
            }
        }
    }

    if let Some(Role::Router { request_id, .. }) = &role {
        sessions.remove(request_id);
    }
}

async fn dispatch(
    config: &ConfigHandle,
    sessions: &Arc<SessionTable>,
    metrics: &Arc<Metrics>,
    tracer: &Arc<Tracer>,
    registry: &Registry,
    role: &mut Option<Role>,
    message: ep::ProcessingRequest,
) -> Result<ep::ProcessingResponse, ProcessorError> {
    let attributes_present = !message.attributes.is_empty();

    match message.request {
        Some(ep::processing_request::Request::RequestHeaders(headers)) => {
            let header_map = headers.headers.clone().unwrap_or_default();
            let pairs = crate::processor::wire::headers_to_pairs(&header_map);
            log_headers(&pairs, config.load().as_ref());

            match stream_role(attributes_present) {
                StreamRole::Router => {
                    let path = pairs
                        .iter()
                        .find(|(k, _)| k == ":path")
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    let request_id = pairs
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("x-request-id"))
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    let kind: EndpointKind = registry.resolve(&path)?;

                    let router = Arc::new(Mutex::new(RouterProcessor::new(
                        kind,
                        config.load_full(),
                        tracer.clone(),
                        path,
                        pairs,
                    )));
                    sessions.register(request_id.clone(), router.clone());
                    *role = Some(Role::Router {
                        router: router.clone(),
                        request_id,
                    });

                    let mut guard = router.lock().await;
                    guard.process_request_headers()
                }
                StreamRole::Upstream => {
                    let request_id = pairs
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("x-request-id"))
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    let backend_name = extract_backend_name(&message.attributes, &config.load().metadata_namespace)
                        .ok_or_else(|| ProcessorError::InternalInvariantError("SetBackend attributes missing backend name".to_string()))?;

                    let router = sessions.lookup(&request_id).ok_or_else(|| {
                        ProcessorError::InternalInvariantError(format!(
                            "no router registered for request id {request_id}"
                        ))
                    })?;
                    let upstream = UpstreamProcessor::set_backend_for_router(&router, metrics.clone(), tracer.clone(), &backend_name).await?;
                    *role = Some(Role::Upstream { upstream: upstream.clone() });

                    let mut guard = upstream.lock().await;
                    guard.process_request_headers()
                }
            }
        }
        Some(ep::processing_request::Request::RequestBody(body)) => match role {
            Some(Role::Router { router, .. }) => {
                let mut guard = router.lock().await;
                guard.process_request_body(body.body.into())
            }
            Some(Role::Upstream { upstream }) => {
                let mut guard = upstream.lock().await;
                guard.process_request_body(body)
            }
            None => Err(ProcessorError::InternalInvariantError("RequestBody before RequestHeaders".to_string())),
        },
        Some(ep::processing_request::Request::ResponseHeaders(headers)) => match role {
            Some(Role::Router { router, .. }) => {
                let mut guard = router.lock().await;
                guard.process_response_headers(headers).await
            }
            Some(Role::Upstream { upstream }) => {
                let mut guard = upstream.lock().await;
                guard.process_response_headers(headers).await
            }
            None => Err(ProcessorError::InternalInvariantError("ResponseHeaders before RequestHeaders".to_string())),
        },
        Some(ep::processing_request::Request::ResponseBody(body)) => match role {
            Some(Role::Router { router, .. }) => {
                let mut guard = router.lock().await;
                guard.process_response_body(body).await
            }
            Some(Role::Upstream { upstream }) => {
                let mut guard = upstream.lock().await;
                guard.process_response_body(body).await
            }
            None => Err(ProcessorError::InternalInvariantError("ResponseBody before RequestHeaders".to_string())),
        },
        Some(ep::processing_request::Request::RequestTrailers(_)) | Some(ep::processing_request::Request::ResponseTrailers(_)) => {
            Ok(ep::ProcessingResponse::default())
        }
        None => Err(ProcessorError::Eof),
    }
}

fn extract_backend_name(attributes: &std::collections::HashMap<String, prost_wkt_types::Struct>, namespace: &str) -> Option<String> {
    let fields = &attributes.get(namespace)?.fields;
    match fields.get("backend")?.kind.as_ref()? {
        prost_wkt_types::value::Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

fn log_headers(pairs: &[(String, String)], config: &Config) {
    for (key, value) in pairs {
        if config.is_sensitive_header(key) {
            debug!(header = %key, value = "<redacted>", "request header");
        } else {
            debug!(header = %key, value = %value, "request header");
        }
    }
}

#[tonic::async_trait]
impl ep::external_processor_server::ExternalProcessor for GatewayServer {
    type ProcessStream = ResponseStream;

    async fn process(
        &self,
        request: Request<Streaming<ep::ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let (tx, rx) = mpsc::channel(16);
        let inbound = request.into_inner();

        let config = self.config.clone();
        let sessions = self.sessions.clone();
        let metrics = self.metrics.clone();
        let tracer = self.tracer.clone();
        let registry = Registry::new();

        tokio::spawn(handle_stream(config, sessions, metrics, tracer, registry, inbound, tx));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

pub struct HealthServer;

#[tonic::async_trait]
impl health_v1::health_server::Health for HealthServer {
    async fn check(
        &self,
        _request: Request<health_v1::HealthCheckRequest>,
    ) -> Result<Response<health_v1::HealthCheckResponse>, Status> {
        Ok(Response::new(health_v1::HealthCheckResponse {
            status: health_v1::health_check_response::ServingStatus::Serving as i32,
        }))
    }

    type WatchStream = ReceiverStream<Result<health_v1::HealthCheckResponse, Status>>;

    async fn watch(
        &self,
        _request: Request<health_v1::HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("watch is not supported"))
    }
}
