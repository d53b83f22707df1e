//! # JSON-RPC Envelope
//!
//! Parses and re-emits JSON-RPC 1.0 and 2.0 envelopes, grounded on the
//! request/response shaping in
//! `original_source/opsiconfd/application/jsonrpc.py`. Per spec §9, an
//! envelope that mixes 1.0-only and 2.0-only fields is never guessed at —
//! it is rejected with [`ServiceError::MalformedEnvelope`] (400).

use core_shared::{ServiceError, ServiceResult};
use serde_json::{json, Map, Value};

/// Which envelope shape a call arrived in, and therefore which shape its
/// response must echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeVersion {
    /// No `"jsonrpc"` field; params must be positional.
    V1,
    /// `"jsonrpc": "2.0"`; params may be positional or named.
    V2,
}

/// Parameters as submitted by the caller, prior to argument coercion
/// against a method's declared signature.
#[derive(Debug, Clone)]
pub enum RpcParams {
    /// No parameters (an empty array or omitted `params`).
    None,
    /// Positional arguments, mapped onto a method's declared parameter
    /// order during coercion.
    Positional(Vec<Value>),
    /// Named arguments. Only legal in a 2.0 envelope; a trailing mapping
    /// is accepted as `**kwargs` when the method declares it.
    Named(Map<String, Value>),
}

impl RpcParams {
    /// Number of parameters supplied, for the RPC log record.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(items) => items.len(),
            Self::Named(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded call, prior to dispatch.
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// Echoed back verbatim in the response; `None` for 2.0 notifications.
    pub id: Option<Value>,
    pub method: String,
    pub params: RpcParams,
    pub envelope_version: EnvelopeVersion,
}

/// Decodes a whole request body (single call or batch) into its calls.
/// A batch with zero elements is itself malformed per spec §8.
pub fn parse_request(body: &Value) -> ServiceResult<Vec<RpcCall>> {
    match body {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ServiceError::BadRequest { message: "empty batch".to_string() });
            }
            items.iter().map(parse_call).collect()
        }
        Value::Object(_) => Ok(vec![parse_call(body)?]),
        _ => Err(ServiceError::MalformedEnvelope),
    }
}

fn parse_call(value: &Value) -> ServiceResult<RpcCall> {
    let obj = value.as_object().ok_or(ServiceError::MalformedEnvelope)?;

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or(ServiceError::MalformedEnvelope)?
        .to_string();

    let id = obj.get("id").cloned();

    let envelope_version = match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => EnvelopeVersion::V2,
        // Any other explicit "jsonrpc" value is self-contradictory: not
        // absent (1.0-shaped) and not the one string that means 2.0.
        Some(_) => return Err(ServiceError::MalformedEnvelope),
        None => EnvelopeVersion::V1,
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => RpcParams::None,
        Some(Value::Array(items)) => {
            if items.is_empty() {
                RpcParams::None
            } else {
                RpcParams::Positional(items.clone())
            }
        }
        Some(Value::Object(map)) => {
            if envelope_version == EnvelopeVersion::V1 {
                // 1.0 has no named-parameter shape; an object here is a
                // 2.0-only field smuggled into a 1.0-shaped envelope.
                return Err(ServiceError::MalformedEnvelope);
            }
            RpcParams::Named(map.clone())
        }
        Some(_) => return Err(ServiceError::MalformedEnvelope),
    };

    Ok(RpcCall { id, method, params, envelope_version })
}

/// JSON-RPC numeric error codes (the spec's standard reserved range).
fn jsonrpc_error_code(error: &ServiceError) -> i64 {
    match error {
        ServiceError::UnknownMethod { .. } => -32601,
        ServiceError::BadRequest { .. } | ServiceError::MalformedEnvelope => -32602,
        ServiceError::MissingCredentials
        | ServiceError::InvalidCredentials
        | ServiceError::Blocked
        | ServiceError::PermissionDenied
        | ServiceError::AccessDenied => -32001,
        ServiceError::NotFound { .. } => -32002,
        ServiceError::Conflict { .. } | ServiceError::Unaccomplishable { .. } => -32003,
        ServiceError::Overloaded { .. } => -32004,
        ServiceError::RedisError(_) | ServiceError::Transient { .. } | ServiceError::Internal { .. } => {
            -32603
        }
    }
}

/// Builds one call's response element, in the shape its envelope version
/// demands. Stack-trace-equivalent detail (`error.to_string()` for server
/// errors) is only attached for admin sessions, per spec §4.F.
pub fn build_response(
    call: &RpcCall,
    outcome: &Result<Value, ServiceError>,
    is_admin: bool,
) -> Value {
    let error_value = |error: &ServiceError| -> Value {
        let message = if error.is_server_error() && !is_admin {
            error.client_message()
        } else {
            error.to_string()
        };
        json!({ "code": jsonrpc_error_code(error), "message": message })
    };

    match call.envelope_version {
        EnvelopeVersion::V1 => json!({
            "id": call.id,
            "result": outcome.as_ref().ok(),
            "error": outcome.as_ref().err().map(error_value),
        }),
        EnvelopeVersion::V2 => match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": call.id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": call.id, "error": error_value(error) }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_v2_envelope_from_jsonrpc_field() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "backend_info", "params": []});
        let calls = parse_request(&body).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].envelope_version, EnvelopeVersion::V2);
    }

    #[test]
    fn v1_envelope_with_named_params_is_rejected() {
        let body = json!({"id": 1, "method": "m", "params": {"a": 1}});
        let err = parse_request(&body).unwrap_err();
        assert!(matches!(err, ServiceError::MalformedEnvelope));
    }

    #[test]
    fn empty_batch_is_bad_request() {
        let body = json!([]);
        let err = parse_request(&body).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest { .. }));
    }

    #[test]
    fn batch_parses_each_element_independently() {
        let body = json!([
            {"id": 1, "method": "a", "params": []},
            {"jsonrpc": "2.0", "id": 2, "method": "b", "params": {"x": 1}},
        ]);
        let calls = parse_request(&body).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].envelope_version, EnvelopeVersion::V1);
        assert_eq!(calls[1].envelope_version, EnvelopeVersion::V2);
    }

    #[test]
    fn response_shape_mirrors_request_envelope() {
        let call = RpcCall {
            id: Some(json!(7)),
            method: "m".into(),
            params: RpcParams::None,
            envelope_version: EnvelopeVersion::V1,
        };
        let response = build_response(&call, &Ok(json!(42)), false);
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["result"], json!(42));
        assert_eq!(response["error"], Value::Null);
    }

    #[test]
    fn server_error_detail_hidden_from_non_admin() {
        let call = RpcCall {
            id: None,
            method: "m".into(),
            params: RpcParams::None,
            envelope_version: EnvelopeVersion::V2,
        };
        let err = ServiceError::Internal { message: "disk on fire".into() };
        let response = build_response(&call, &Err(err), false);
        assert_eq!(response["error"]["message"], json!("Internal server error"));
    }
}
