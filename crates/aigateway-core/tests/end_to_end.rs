//! Full Router -> Upstream lifecycle tests, driving `RouterProcessor`/`UpstreamProcessor`
//! directly the way the Stream Server does (the gRPC transport itself is out of scope:
//! no real socket or tonic client is involved here).

use std::sync::Arc;

use aigateway_core::metrics::Metrics;
use aigateway_core::processor::router::RouterProcessor;
use aigateway_core::processor::upstream::UpstreamProcessor;
use aigateway_core::tracing_span::{Tracer, TracerConfig};
use aigateway_core::types::{
    AuthConfig, AuthKind, Backend, BackendSchema, Config, CostVars, HeaderMutationConfig,
    RequestCost, RequestCostKind, SchemaFamily,
};
use aigateway_core::endpoint::EndpointKind;
use bytes::Bytes;
use protos::ext_proc_v3 as ep;

fn backend(name: &str) -> Backend {
    Backend {
        name: name.to_string(),
        schema: BackendSchema {
            family_tag: SchemaFamily::OpenAi,
            version: "v1".to_string(),
        },
        model_name_override: None,
        header_mutation: Some(HeaderMutationConfig {
            set: vec![("x-api-key".to_string(), "sekret".to_string())],
            remove: vec!["authorization".to_string()],
        }),
        body_mutation: None,
        auth: Some(AuthConfig {
            kind: AuthKind::StaticApiKey,
            header_name: Some("x-api-key".to_string()),
            key: Some("sekret".to_string()),
        }),
    }
}

fn config_with(backends: Vec<Backend>) -> Config {
    let mut config = Config::default_config();
    for b in backends {
        config.rules.insert(b.name.clone(), b);
    }
    config
}

async fn tracer() -> Arc<Tracer> {
    Arc::new(Tracer::new(&TracerConfig::default()).unwrap())
}

fn response_headers(status: u16, extra: &[(&str, &str)]) -> ep::HttpHeaders {
    let mut headers = vec![protos::core_v3::HeaderValue {
        key: ":status".to_string(),
        value: status.to_string(),
        raw_value: Vec::new(),
    }];
    for (k, v) in extra {
        headers.push(protos::core_v3::HeaderValue {
            key: k.to_string(),
            value: v.to_string(),
            raw_value: Vec::new(),
        });
    }
    ep::HttpHeaders {
        headers: Some(protos::core_v3::HeaderMap { headers }),
        end_of_stream: false,
    }
}

fn body(bytes: &[u8], end_of_stream: bool) -> ep::HttpBody {
    ep::HttpBody {
        body: bytes.to_vec(),
        end_of_stream,
    }
}

/// Scenario 1 (spec §8): a plain non-streaming chat completion round trip records usage
/// and produces a dynamic-metadata `content_length` struct alongside the replaced body.
#[tokio::test]
async fn openai_non_streaming_round_trip() {
    let config = Arc::new(config_with(vec![backend("openai-main")]));
    let mut router = RouterProcessor::new(
        EndpointKind::ChatCompletions,
        config.clone(),
        tracer().await,
        "/v1/chat/completions".to_string(),
        vec![
            ("authorization".to_string(), "Bearer client-token".to_string()),
            ("x-request-id".to_string(), "req-1".to_string()),
        ],
    );
    router.process_request_headers().unwrap();
    router
        .process_request_body(Bytes::from_static(
            br#"{"model":"gpt-4o-mini","messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();
    let router = Arc::new(tokio::sync::Mutex::new(router));

    let metrics = Arc::new(Metrics::new());
    let upstream = UpstreamProcessor::set_backend_for_router(&router, metrics, tracer().await, "openai-main")
        .await
        .unwrap();

    let request_headers_response = {
        let mut guard = upstream.lock().await;
        guard.process_request_headers().unwrap()
    };
    match request_headers_response.response.unwrap() {
        ep::processing_response::Response::RequestHeaders(h) => {
            let common = h.response.unwrap();
            assert_eq!(common.status, ep::common_response::ResponseStatus::ContinueAndReplace as i32);
            let mutation = common.header_mutation.unwrap();
            assert!(mutation.remove_headers.contains(&"authorization".to_string()));
            assert!(mutation
                .set_headers
                .iter()
                .any(|hv| hv.header.as_ref().unwrap().key == "x-api-key"));
        }
        _ => panic!("expected RequestHeaders response"),
    }

    {
        let mut guard = upstream.lock().await;
        guard
            .process_response_headers(response_headers(200, &[("content-type", "application/json")]))
            .await
            .unwrap();
    }

    let final_response = {
        let mut guard = upstream.lock().await;
        guard
            .process_response_body(body(
                br#"{"model":"gpt-4o-mini","usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#,
                true,
            ))
            .await
            .unwrap()
    };

    match final_response.response.unwrap() {
        ep::processing_response::Response::ResponseBody(b) => {
            assert!(b.response.unwrap().body_mutation.is_none());
        }
        _ => panic!("expected ResponseBody response"),
    }
}

/// Scenario 2 (spec §8): the router forces `stream_options.include_usage` onto a
/// streaming request that didn't already opt in, and the upstream translator keeps
/// accumulating usage across SSE chunks until the final one.
#[tokio::test]
async fn streaming_request_forces_usage_opt_in_and_accumulates_deltas() {
    let config = Arc::new(config_with(vec![backend("openai-main")]));
    let mut router = RouterProcessor::new(
        EndpointKind::ChatCompletions,
        config.clone(),
        tracer().await,
        "/v1/chat/completions".to_string(),
        vec![("x-request-id".to_string(), "req-2".to_string())],
    );
    router.process_request_headers().unwrap();
    // Force request-cost config so the router's opt-in logic actually kicks in.
    let mut cost_config = Config::default_config();
    cost_config.rules.insert("openai-main".to_string(), backend("openai-main"));
    cost_config.llm_request_costs.push(RequestCost {
        kind: RequestCostKind::TotalToken,
        metadata_key: "total_token_usage".to_string(),
        cel_program: None,
    });
    router.config = Arc::new(cost_config);

    router
        .process_request_body(Bytes::from_static(br#"{"model":"gpt-4o-mini","stream":true}"#))
        .unwrap();
    assert!(router.forced_stream_usage_opt_in);
    assert_eq!(router.original_request_body["stream_options"]["include_usage"], true);

    let router = Arc::new(tokio::sync::Mutex::new(router));
    let metrics = Arc::new(Metrics::new());
    let upstream = UpstreamProcessor::set_backend_for_router(&router, metrics, tracer().await, "openai-main")
        .await
        .unwrap();

    {
        let mut guard = upstream.lock().await;
        guard.process_request_headers().unwrap();
        guard.process_response_headers(response_headers(200, &[])).await.unwrap();
    }

    let chunk1 = body(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n", false);
    let chunk2 = body(
        b"data: {\"usage\":{\"prompt_tokens\":6,\"completion_tokens\":10,\"total_tokens\":16}}\n\ndata: [DONE]\n\n",
        true,
    );

    {
        let mut guard = upstream.lock().await;
        guard.process_response_body(chunk1).await.unwrap();
        let final_response = guard.process_response_body(chunk2).await.unwrap();
        let metadata = final_response
            .dynamic_metadata
            .clone()
            .expect("cost metadata attached at end of stream");
        let inner = metadata.filter_metadata.get("aigateway.envoy.io").unwrap();
        assert!(inner.fields.contains_key("total_token_usage"));
        assert!(matches!(
            final_response.response.unwrap(),
            ep::processing_response::Response::ResponseBody(_)
        ));
    }
}

/// Scenario 3 (spec §8): a retried try re-applies the header mutator from the
/// original client headers, not from a previous try's mutated output.
#[tokio::test]
async fn retry_reapplies_header_mutation_idempotently() {
    let mut backend_cfg = backend("openai-main");
    backend_cfg.header_mutation = Some(HeaderMutationConfig {
        set: vec![("x-retry-count".to_string(), "bumped".to_string())],
        remove: vec![],
    });
    let config = Arc::new(config_with(vec![backend_cfg]));

    let mut router = RouterProcessor::new(
        EndpointKind::ChatCompletions,
        config.clone(),
        tracer().await,
        "/v1/chat/completions".to_string(),
        vec![("x-request-id".to_string(), "req-3".to_string())],
    );
    router.process_request_headers().unwrap();
    router
        .process_request_body(Bytes::from_static(br#"{"model":"gpt-4o-mini"}"#))
        .unwrap();
    let router = Arc::new(tokio::sync::Mutex::new(router));

    let metrics = Arc::new(Metrics::new());
    let try1 = UpstreamProcessor::set_backend_for_router(&router, metrics.clone(), tracer().await, "openai-main")
        .await
        .unwrap();
    let try1_headers = {
        let mut guard = try1.lock().await;
        guard.process_request_headers().unwrap()
    };

    let try2 = UpstreamProcessor::set_backend_for_router(&router, metrics, tracer().await, "openai-main")
        .await
        .unwrap();
    let try2_headers = {
        let mut guard = try2.lock().await;
        assert_eq!(guard.try_count, 2);
        guard.process_request_headers().unwrap()
    };

    for response in [try1_headers, try2_headers] {
        match response.response.unwrap() {
            ep::processing_response::Response::RequestHeaders(h) => {
                let mutation = h.response.unwrap().header_mutation.unwrap();
                assert!(mutation
                    .set_headers
                    .iter()
                    .any(|hv| hv.header.as_ref().unwrap().value == "bumped"));
            }
            _ => panic!("expected RequestHeaders response"),
        }
    }
}

/// Scenario 4 (spec §8): a non-2xx gzip-encoded error body is fully buffered and
/// decoded before the completion is recorded and the span closed on the error path.
#[tokio::test]
async fn non_2xx_gzip_error_path_decodes_before_completion() {
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    let config = Arc::new(config_with(vec![backend("openai-main")]));
    let mut router = RouterProcessor::new(
        EndpointKind::ChatCompletions,
        config.clone(),
        tracer().await,
        "/v1/chat/completions".to_string(),
        vec![("x-request-id".to_string(), "req-4".to_string())],
    );
    router.process_request_headers().unwrap();
    router
        .process_request_body(Bytes::from_static(br#"{"model":"gpt-4o-mini"}"#))
        .unwrap();
    let router = Arc::new(tokio::sync::Mutex::new(router));

    let metrics = Arc::new(Metrics::new());
    let upstream = UpstreamProcessor::set_backend_for_router(&router, metrics, tracer().await, "openai-main")
        .await
        .unwrap();

    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(br#"{"error":{"message":"rate limited"}}"#).await.unwrap();
    encoder.shutdown().await.unwrap();
    let compressed = encoder.into_inner();

    let mut guard = upstream.lock().await;
    guard.process_request_headers().unwrap();
    let status_response = guard
        .process_response_headers(response_headers(429, &[("content-encoding", "gzip")]))
        .await
        .unwrap();
    assert!(
        status_response.mode_override.is_none(),
        "error responses are not put into streamed mode"
    );
    assert!(matches!(
        status_response.response.unwrap(),
        ep::processing_response::Response::ResponseHeaders(_)
    ));

    // The real dispatch path only ever calls `process_response_body`; a 429 observed on
    // `ProcessResponseHeaders` must still route to the error tail from here.
    let error_response = guard.process_response_body(body(&compressed, true)).await.unwrap();
    match error_response.response.unwrap() {
        ep::processing_response::Response::ResponseBody(b) => {
            let common = b.response.unwrap();
            assert!(common.header_mutation.is_none());
        }
        _ => panic!("expected ResponseBody response"),
    }
    assert!(guard.responded_error());
}

/// Scenario 5 (spec §8): a CEL-kind request cost evaluates against the final usage
/// snapshot and lands in the end-of-stream dynamic metadata next to the token counters.
#[tokio::test]
async fn cel_cost_program_contributes_to_dynamic_metadata() {
    let mut cost_config = Config::default_config();
    cost_config.rules.insert("openai-main".to_string(), backend("openai-main"));
    let program = aigateway_core::metadata::compile_cel("input + output").unwrap();
    cost_config.llm_request_costs.push(RequestCost {
        kind: RequestCostKind::Cel,
        metadata_key: "billed_tokens".to_string(),
        cel_program: Some(program),
    });
    let config = Arc::new(cost_config);

    let mut router = RouterProcessor::new(
        EndpointKind::ChatCompletions,
        config.clone(),
        tracer().await,
        "/v1/chat/completions".to_string(),
        vec![("x-request-id".to_string(), "req-5".to_string())],
    );
    router.process_request_headers().unwrap();
    router
        .process_request_body(Bytes::from_static(br#"{"model":"gpt-4o-mini"}"#))
        .unwrap();
    let router = Arc::new(tokio::sync::Mutex::new(router));

    let metrics = Arc::new(Metrics::new());
    let upstream = UpstreamProcessor::set_backend_for_router(&router, metrics, tracer().await, "openai-main")
        .await
        .unwrap();

    let mut guard = upstream.lock().await;
    guard.process_request_headers().unwrap();
    guard.process_response_headers(response_headers(200, &[])).await.unwrap();
    let final_response = guard
        .process_response_body(body(
            br#"{"model":"gpt-4o-mini","usage":{"prompt_tokens":4,"completion_tokens":6,"total_tokens":10}}"#,
            true,
        ))
        .await
        .unwrap();

    let metadata = final_response
        .dynamic_metadata
        .clone()
        .expect("metadata expected at end of stream");
    let inner = metadata.filter_metadata.get("aigateway.envoy.io").unwrap();
    let billed = inner.fields.get("billed_tokens").unwrap();
    match billed.kind.as_ref().unwrap() {
        prost_wkt_types::value::Kind::NumberValue(n) => assert_eq!(*n, 10.0),
        other => panic!("expected a number, got {other:?}"),
    }
    assert!(matches!(
        final_response.response.unwrap(),
        ep::processing_response::Response::ResponseBody(_)
    ));
}

/// Scenario 6 (spec §8): the config watcher swaps in a new snapshot on mtime change and
/// leaves the previous one serving if a later edit fails to parse.
#[tokio::test]
async fn config_watcher_reloads_and_survives_bad_edits() {
    use aigateway_core::config::watcher::Watcher;
    use std::io::Write;
    use std::time::Duration;

    let dir = std::env::temp_dir().join(format!("aigateway-e2e-watcher-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.yaml");
    std::fs::write(&path, "uuid: v1\n").unwrap();

    let (mut watcher, handle) = Watcher::start(path.clone(), Duration::from_millis(10)).unwrap();
    assert_eq!(handle.load().uuid, "v1");

    std::thread::sleep(Duration::from_millis(20));
    let mut f = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
    write!(f, "uuid: v2\n").unwrap();
    drop(f);
    watcher.tick_once();
    assert_eq!(handle.load().uuid, "v2");

    std::thread::sleep(Duration::from_millis(20));
    let mut f = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
    write!(f, "not: valid: yaml: [").unwrap();
    drop(f);
    watcher.tick_once();
    assert_eq!(handle.load().uuid, "v2", "a failed parse keeps the previous snapshot serving");

    std::fs::remove_dir_all(&dir).ok();
}

/// CEL variables mirror the four accounting fields plus model/backend (spec §4.6).
#[test]
fn cost_vars_expose_model_and_backend_alongside_counters() {
    let vars = CostVars {
        model: "gpt-4o-mini".to_string(),
        backend: "openai-main".to_string(),
        input: 1,
        cached_input: 0,
        output: 2,
        total: 3,
    };
    let map = vars.as_map();
    assert!(map.contains_key("model"));
    assert!(map.contains_key("backend"));
}
