//! Turning decoded JSON into a [`Message`].
//!
//! Classification is total: every JSON value either becomes a message or a
//! [`ParseError`] that already knows what to answer (and to which id).

use serde_json::{Map, Value};

use crate::{
    ErrorCode, ErrorObject, ErrorResponse, Message, RequestId, JSONRPC_VERSION,
};

/// A frame (or batch element) that was rejected during classification.
///
/// Carries the error object to send back and the request id, when one could
/// be read before the problem was found.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ParseError {
    /// The id the rejection answers, if known.
    pub id: Option<RequestId>,
    /// The error to send back.
    pub error: ErrorObject,
}

impl ParseError {
    /// -32700: the bytes are not JSON.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self {
            id: None,
            error: ErrorObject::new(ErrorCode::ParseError).with_data(detail.into()),
        }
    }

    /// -32600: valid JSON, but not a valid message.
    pub fn invalid_request(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self {
            id,
            error: ErrorObject::new(ErrorCode::InvalidRequest).with_data(detail.into()),
        }
    }

    /// Converts into the error reply for this rejection.
    pub fn into_response(self) -> ErrorResponse {
        ErrorResponse {
            id: self.id,
            error: self.error,
        }
    }
}

/// Classifies a decoded JSON value.
///
/// - A non-empty array is a batch; each element is classified on its own,
///   so one bad element never spoils its neighbours. Nested arrays inside
///   a batch are rejected as elements.
/// - An empty array is rejected as a whole (-32600, null id).
/// - Objects are classified by which of `method`, `id`, `result` and
///   `error` they carry.
pub fn classify(value: Value) -> Result<Message, ParseError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ParseError::invalid_request(None, "empty batch"));
            }
            Ok(Message::Batch(items.into_iter().map(classify_single).collect()))
        }
        other => classify_single(other),
    }
}

fn classify_single(value: Value) -> Result<Message, ParseError> {
    let Value::Object(mut object) = value else {
        return Err(ParseError::invalid_request(None, "message must be an object"));
    };

    // Read the id first so every later rejection can still be correlated.
    let id = match object.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_id(raw)?),
    };

    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => {
            return Err(ParseError::invalid_request(id, "Invalid JSON RPC version"));
        }
    }

    if let Some(method) = object.remove("method") {
        let Value::String(method) = method else {
            return Err(ParseError::invalid_request(id, "method must be a string"));
        };
        let params = parse_params(&mut object).map_err(|detail| {
            ParseError::invalid_request(id.clone(), detail)
        })?;
        return Ok(match id {
            Some(id) => Message::request(id, method, params),
            None => Message::notification(method, params),
        });
    }

    match (object.remove("result"), object.remove("error")) {
        (Some(_), Some(_)) => Err(ParseError::invalid_request(
            id,
            "response carries both result and error",
        )),
        (None, Some(error)) => {
            let error = parse_error_object(error)
                .map_err(|detail| ParseError::invalid_request(id.clone(), detail))?;
            Ok(Message::error(id, error))
        }
        // A reply with an id but no result counts as a null result.
        (result, None) => match id {
            Some(id) => Ok(Message::response(id, result.unwrap_or(Value::Null))),
            None => Err(ParseError::invalid_request(None, "missing method")),
        },
    }
}

fn parse_id(raw: Value) -> Result<RequestId, ParseError> {
    match raw {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n.as_i64().map(RequestId::Number).ok_or_else(|| {
            ParseError::invalid_request(None, "id must be an integer or a string")
        }),
        _ => Err(ParseError::invalid_request(
            None,
            "id must be an integer or a string",
        )),
    }
}

fn parse_params(object: &mut Map<String, Value>) -> Result<Option<Value>, &'static str> {
    match object.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Array(_) | Value::Object(_))) => Ok(Some(params)),
        Some(_) => Err("params must be an array or an object"),
    }
}

fn parse_error_object(raw: Value) -> Result<ErrorObject, &'static str> {
    let Value::Object(mut object) = raw else {
        return Err("error must be an object");
    };
    let code = object
        .get("code")
        .and_then(Value::as_i64)
        .ok_or("error code must be an integer")?;
    let message = match object.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err("error message must be a string"),
    };
    Ok(ErrorObject {
        code,
        message,
        data: object.remove("data"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Notification, Request};
    use serde_json::json;

    fn rejected(value: Value) -> ParseError {
        classify(value).expect_err("should be rejected")
    }

    #[test]
    fn test_classify_request() {
        let msg = classify(json!({"jsonrpc":"2.0","method":"sum","params":[2,3],"id":1}))
            .unwrap();
        assert_eq!(
            msg,
            Message::Request(Request {
                id: 1.into(),
                method: "sum".into(),
                params: Some(json!([2, 3])),
            })
        );
    }

    #[test]
    fn test_classify_internal_request() {
        let msg = classify(json!({"jsonrpc":"2.0","method":"rpc.on","params":["x"],"id":"a"}))
            .unwrap();
        assert!(matches!(msg, Message::InternalRequest(r) if r.id == RequestId::from("a")));
    }

    #[test]
    fn test_classify_notification_with_absent_or_null_id() {
        for value in [
            json!({"jsonrpc":"2.0","method":"tick"}),
            json!({"jsonrpc":"2.0","method":"tick","id":null}),
        ] {
            assert_eq!(
                classify(value).unwrap(),
                Message::Notification(Notification {
                    method: "tick".into(),
                    params: None,
                })
            );
        }
    }

    #[test]
    fn test_classify_internal_notification() {
        let msg = classify(json!({"jsonrpc":"2.0","method":"rpc.ping"})).unwrap();
        assert!(matches!(msg, Message::InternalNotification(_)));
    }

    #[test]
    fn test_classify_response_and_null_result() {
        assert_eq!(
            classify(json!({"jsonrpc":"2.0","result":5,"id":1})).unwrap(),
            Message::response(1.into(), json!(5))
        );
        assert_eq!(
            classify(json!({"jsonrpc":"2.0","id":2})).unwrap(),
            Message::response(2.into(), Value::Null)
        );
    }

    #[test]
    fn test_classify_error_response_keeps_data() {
        let msg = classify(json!({
            "jsonrpc":"2.0",
            "error":{"code":-32601,"message":"Method not found","data":"x"},
            "id":3
        }))
        .unwrap();
        let Message::Error(err) = msg else {
            panic!("expected error response");
        };
        assert_eq!(err.id, Some(3.into()));
        assert_eq!(err.error.code, -32601);
        assert_eq!(err.error.data, Some(json!("x")));
    }

    #[test]
    fn test_classify_error_response_with_null_id() {
        let msg = classify(json!({
            "jsonrpc":"2.0",
            "error":{"code":-32700,"message":"Parse error"},
            "id":null
        }))
        .unwrap();
        assert!(matches!(msg, Message::Error(ErrorResponse { id: None, .. })));
    }

    #[test]
    fn test_classify_wrong_version_keeps_id() {
        let err = rejected(json!({"jsonrpc":"1.0","method":"sum","id":9}));
        assert_eq!(err.error.code, -32600);
        assert_eq!(err.id, Some(9.into()));
        assert_eq!(err.error.data, Some(json!("Invalid JSON RPC version")));
    }

    #[test]
    fn test_classify_missing_version() {
        assert_eq!(rejected(json!({"method":"sum","id":1})).error.code, -32600);
    }

    #[test]
    fn test_classify_non_object_is_invalid_request() {
        for value in [json!(42), json!("hi"), json!(null), json!(true)] {
            let err = rejected(value);
            assert_eq!(err.error.code, -32600);
            assert_eq!(err.id, None);
        }
    }

    #[test]
    fn test_classify_scalar_params_rejected() {
        let err = rejected(json!({"jsonrpc":"2.0","method":"sum","params":5,"id":1}));
        assert_eq!(err.error.code, -32600);
        assert_eq!(err.id, Some(1.into()));
    }

    #[test]
    fn test_classify_both_result_and_error_rejected() {
        let err = rejected(json!({
            "jsonrpc":"2.0","result":1,
            "error":{"code":1,"message":"x"},"id":1
        }));
        assert_eq!(err.error.code, -32600);
    }

    #[test]
    fn test_classify_malformed_error_object_rejected() {
        for error in [json!("boom"), json!({"code":"x","message":"m"}), json!({"code":1})] {
            let err = rejected(json!({"jsonrpc":"2.0","error":error,"id":1}));
            assert_eq!(err.error.code, -32600);
        }
    }

    #[test]
    fn test_classify_bad_id_types_rejected() {
        for id in [json!(1.5), json!([1]), json!({"a":1}), json!(true)] {
            let err = rejected(json!({"jsonrpc":"2.0","method":"m","id":id}));
            assert_eq!(err.error.code, -32600);
            assert_eq!(err.id, None);
        }
    }

    #[test]
    fn test_classify_nothing_recognisable_rejected() {
        assert_eq!(rejected(json!({"jsonrpc":"2.0"})).error.code, -32600);
    }

    #[test]
    fn test_classify_empty_batch_rejected_as_whole() {
        let err = rejected(json!([]));
        assert_eq!(err.error.code, -32600);
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_classify_batch_classifies_each_element() {
        let msg = classify(json!([
            {"jsonrpc":"2.0","method":"sum","params":[1,2],"id":1},
            1,
            [{"jsonrpc":"2.0","method":"nested","id":2}],
            {"jsonrpc":"2.0","method":"tick"}
        ]))
        .unwrap();
        let Message::Batch(items) = msg else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(items[0], Ok(Message::Request(_))));
        assert!(matches!(&items[1], Err(e) if e.error.code == -32600));
        assert!(matches!(&items[2], Err(e) if e.error.code == -32600));
        assert!(matches!(items[3], Ok(Message::Notification(_))));
    }
}
