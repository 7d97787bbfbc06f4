//! JSON-RPC message construction and the capstan method set.
//!
//! Custom traffic rides on method names under the `capstan/` prefix; the
//! `$`-prefixed notification follows the LSP convention for messages a peer
//! may ignore. `shutdown` and `exit` keep their standard names so the
//! service can reuse stock machinery for the handshake.

use serde::Serialize;

use capstan_types::{ConfigurationProfile, CrashInfo, LoadingState};

/// Client → service, once the session is ready to receive traffic.
pub(crate) const CLIENT_READY: &str = "capstan/clientReady";
/// Client → service, carries the updated settings after a live-applicable
/// configuration change.
pub(crate) const CONFIGURATION_CHANGED: &str = "capstan/configurationChanged";
/// Service → client request for the active configuration.
pub(crate) const GET_CONFIGURATION: &str = "capstan/getConfiguration";
/// Service → client notification marking the start and end of its loading
/// phase.
pub(crate) const LOADING_STATUS_UPDATE: &str = "$capstan/loadingStatusUpdate";
/// Service → client notification reporting an unrecoverable failure.
pub(crate) const DISPLAY_CRASH_NOTIFICATION: &str = "capstan/displayCrashNotification";

pub(crate) const SHUTDOWN: &str = "shutdown";
pub(crate) const EXIT: &str = "exit";

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) enum IncomingMessage {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    Request {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a raw frame by the JSON-RPC shape rules: an `id` without a
/// `method` plus a `result` or `error` is a response, an `id` with a
/// `method` is a peer request, a `method` alone is a notification.
pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingMessage> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingMessage::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method), _) => Some(IncomingMessage::Request {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingMessage::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Payload for `capstan/configurationChanged` and the result of
/// `capstan/getConfiguration`. `None` means no profile is active and
/// serializes as a null settings object.
pub(crate) fn settings_value(profile: Option<&ConfigurationProfile>) -> serde_json::Value {
    let settings = profile
        .and_then(|p| serde_json::to_value(p).ok())
        .unwrap_or(serde_json::Value::Null);
    serde_json::json!({ "settings": settings })
}

/// Extract the loading phase from a `$capstan/loadingStatusUpdate` payload.
pub(crate) fn loading_state(params: Option<&serde_json::Value>) -> Option<LoadingState> {
    params
        .and_then(|p| p.get("state"))
        .and_then(|s| s.as_str())
        .and_then(LoadingState::from_wire)
}

/// Extract crash context from a `capstan/displayCrashNotification` payload.
pub(crate) fn crash_info(params: Option<serde_json::Value>) -> Option<CrashInfo> {
    serde_json::from_value(params?).ok()
}

/// Successful response to a peer request.
pub(crate) fn response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// `-32601` error response for peer requests outside the method set.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": -32601,
            "message": format!("Method not found: {method}"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_types::ProfileId;

    #[test]
    fn test_parse_incoming_response() {
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": {}});
        match parse_incoming(&frame) {
            Some(IncomingMessage::Response { id, body }) => {
                assert_eq!(id, 3);
                assert!(body["result"].is_object());
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn test_parse_incoming_error_response() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 8,
            "error": {"code": -32600, "message": "invalid request"}
        });
        assert!(matches!(
            parse_incoming(&frame),
            Some(IncomingMessage::Response { id: 8, .. })
        ));
    }

    #[test]
    fn test_parse_incoming_peer_request() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 12,
            "method": "capstan/getConfiguration"
        });
        match parse_incoming(&frame) {
            Some(IncomingMessage::Request { id, method }) => {
                assert_eq!(id, serde_json::json!(12));
                assert_eq!(method, GET_CONFIGURATION);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn test_parse_incoming_notification() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "$capstan/loadingStatusUpdate",
            "params": {"state": "stop"}
        });
        match parse_incoming(&frame) {
            Some(IncomingMessage::Notification { method, params }) => {
                assert_eq!(method, LOADING_STATUS_UPDATE);
                assert_eq!(loading_state(params.as_ref()), Some(LoadingState::Stopped));
            }
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn test_parse_incoming_rejects_shapeless_frames() {
        assert!(parse_incoming(&serde_json::json!({"jsonrpc": "2.0"})).is_none());
        // A response whose id is not an integer has nowhere to route.
        assert!(parse_incoming(&serde_json::json!({"id": "abc", "result": {}})).is_none());
    }

    #[test]
    fn test_settings_value_wraps_profile() {
        let mut profile = ConfigurationProfile::new(ProfileId::new(1));
        profile.interpreter_path = "/usr/bin/python3.11".to_string();
        let value = settings_value(Some(&profile));
        assert_eq!(value["settings"]["interpreter_path"], "/usr/bin/python3.11");

        assert!(settings_value(None)["settings"].is_null());
    }

    #[test]
    fn test_loading_state_rejects_unknown_phase() {
        let params = serde_json::json!({"state": "restart"});
        assert_eq!(loading_state(Some(&params)), None);
        assert_eq!(loading_state(None), None);
    }

    #[test]
    fn test_crash_info_from_wire_payload() {
        let params = serde_json::json!({
            "operation": "indexing",
            "error": "worker thread panicked",
            "activeDocument": "/work/addons/sale/models.py"
        });
        let info = crash_info(Some(params)).unwrap();
        assert_eq!(info.operation, "indexing");
        assert_eq!(
            info.active_document.as_deref(),
            Some("/work/addons/sale/models.py")
        );
    }

    #[test]
    fn test_method_not_found_shape() {
        let id = serde_json::json!(5);
        let reply = method_not_found(&id, "capstan/unknownThing");
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32601);
    }
}
