//! Conversions between the Envoy ext_proc wire types and the processors' plain
//! `Vec<(String, String)>` header views / `HeaderMutationOut`/`BodyMutationOut`.

use bytes::Bytes;
use prost_wkt_types::Struct;
use protos::core_v3 as core;
use protos::ext_proc_v3 as ep;

use crate::translator::HeaderMutationOut;

pub fn headers_to_pairs(h: &core::HeaderMap) -> Vec<(String, String)> {
    h.headers
        .iter()
        .map(|hv| {
            let value = if !hv.raw_value.is_empty() {
                String::from_utf8_lossy(&hv.raw_value).to_string()
            } else {
                hv.value.clone()
            };
            (hv.key.clone(), value)
        })
        .collect()
}

pub fn to_header_mutation(out: &HeaderMutationOut) -> Option<core::HeaderMutation> {
    if out.is_empty() {
        return None;
    }
    Some(core::HeaderMutation {
        set_headers: out
            .set
            .iter()
            .map(|(k, v)| core::HeaderValueOption {
                header: Some(core::HeaderValue {
                    key: k.clone(),
                    value: v.clone(),
                    raw_value: Vec::new(),
                }),
                append_action: core::header_value_option::HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
                keep_empty_value: false,
            })
            .collect(),
        remove_headers: out.remove.clone(),
    })
}

pub fn request_headers_response(
    status: ep::common_response::ResponseStatus,
    header_mutation: Option<core::HeaderMutation>,
    body_mutation: Option<ep::BodyMutation>,
    dynamic_metadata: Option<core::Metadata>,
) -> ep::ProcessingResponse {
    ep::ProcessingResponse {
        response: Some(ep::processing_response::Response::RequestHeaders(ep::HeadersResponse {
            response: Some(ep::CommonResponse {
                status: status as i32,
                header_mutation,
                body_mutation,
                clear_route_cache: false,
            }),
        })),
        mode_override: None,
        override_message_timeout: None,
        dynamic_metadata,
    }
}

pub fn request_body_response(
    header_mutation: Option<core::HeaderMutation>,
    clear_route_cache: bool,
) -> ep::ProcessingResponse {
    ep::ProcessingResponse {
        response: Some(ep::processing_response::Response::RequestBody(ep::BodyResponse {
            response: Some(ep::CommonResponse {
                status: ep::common_response::ResponseStatus::Continue as i32,
                header_mutation,
                body_mutation: None,
                clear_route_cache,
            }),
        })),
        mode_override: None,
        override_message_timeout: None,
        dynamic_metadata: None,
    }
}

pub fn request_headers_continue_and_replace(
    header_mutation: Option<core::HeaderMutation>,
    body_mutation: Option<ep::BodyMutation>,
    dynamic_metadata: Option<core::Metadata>,
) -> ep::ProcessingResponse {
    request_headers_response(
        ep::common_response::ResponseStatus::ContinueAndReplace,
        header_mutation,
        body_mutation,
        dynamic_metadata,
    )
}

pub fn response_headers_response(
    header_mutation: Option<core::HeaderMutation>,
    stream_mode: bool,
) -> ep::ProcessingResponse {
    ep::ProcessingResponse {
        response: Some(ep::processing_response::Response::ResponseHeaders(ep::HeadersResponse {
            response: Some(ep::CommonResponse {
                status: ep::common_response::ResponseStatus::Continue as i32,
                header_mutation,
                body_mutation: None,
                clear_route_cache: false,
            }),
        })),
        mode_override: if stream_mode {
            Some(ep::ProcessingMode {
                request_header_mode: 0,
                response_header_mode: 0,
                request_body_mode: 0,
                response_body_mode: ep::processing_mode::BodySendMode::Streamed as i32,
                request_trailer_mode: 0,
                response_trailer_mode: 0,
            })
        } else {
            None
        },
        override_message_timeout: None,
        dynamic_metadata: None,
    }
}

pub fn response_body_response(
    header_mutation: Option<core::HeaderMutation>,
    body_mutation: Option<ep::BodyMutation>,
    dynamic_metadata: Option<core::Metadata>,
) -> ep::ProcessingResponse {
    ep::ProcessingResponse {
        response: Some(ep::processing_response::Response::ResponseBody(ep::BodyResponse {
            response: Some(ep::CommonResponse {
                status: ep::common_response::ResponseStatus::Continue as i32,
                header_mutation,
                body_mutation,
                clear_route_cache: false,
            }),
        })),
        mode_override: None,
        override_message_timeout: None,
        dynamic_metadata,
    }
}

pub fn metadata_of(namespace_key: String, inner: Struct) -> core::Metadata {
    let mut filter_metadata = std::collections::HashMap::new();
    filter_metadata.insert(namespace_key, inner);
    core::Metadata { filter_metadata }
}

pub fn bytes_body_mutation(body: Bytes) -> ep::BodyMutation {
    ep::BodyMutation {
        mutation: Some(ep::body_mutation::Mutation::Body(body.to_vec())),
    }
}
