//! The JSON-RPC 1.0 message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// An outbound request. `id` is `null` for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Json>,
    /// Correlation id; `null` for notifications.
    pub id: Json,
}

impl Request {
    /// Creates a request with a correlation id.
    pub fn call(method: impl Into<String>, params: Vec<Json>, id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            id: Json::from(id),
        }
    }

    /// Creates a notification (no reply expected).
    pub fn notification(method: impl Into<String>, params: Vec<Json>) -> Self {
        Self {
            method: method.into(),
            params,
            id: Json::Null,
        }
    }
}

/// An inbound reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The call's result; `null` on error.
    #[serde(default)]
    pub result: Json,
    /// The call's error; `null` on success.
    #[serde(default)]
    pub error: Json,
    /// Correlation id of the request being answered.
    pub id: Json,
}

impl Response {
    /// Whether the reply carries an error.
    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }
}

/// Any inbound message: a reply to one of our calls, a server request
/// (`echo` pings arrive as requests), or a notification.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// A reply correlated to one of our requests.
    Response(Response),
    /// A request or notification from the server.
    Request(Request),
}

impl Incoming {
    /// Classifies a decoded JSON object.
    pub fn classify(value: Json) -> Result<Self, serde_json::Error> {
        // A message with a method is a request; anything else must parse
        // as a response.
        if value.get("method").map_or(false, |m| !m.is_null()) {
            Ok(Incoming::Request(serde_json::from_value(value)?))
        } else {
            Ok(Incoming::Response(serde_json::from_value(value)?))
        }
    }
}

/// Well-known method names.
pub mod methods {
    /// Lists databases served by the peer.
    pub const LIST_DBS: &str = "list_dbs";
    /// Fetches a database schema.
    pub const GET_SCHEMA: &str = "get_schema";
    /// Executes a transaction.
    pub const TRANSACT: &str = "transact";
    /// Cancels an outstanding transaction.
    pub const CANCEL: &str = "cancel";
    /// Starts a classic-dialect monitor.
    pub const MONITOR: &str = "monitor";
    /// Cancels a monitor.
    pub const MONITOR_CANCEL: &str = "monitor_cancel";
    /// Acquires an advisory lock.
    pub const LOCK: &str = "lock";
    /// Steals an advisory lock.
    pub const STEAL: &str = "steal";
    /// Releases an advisory lock.
    pub const UNLOCK: &str = "unlock";
    /// Liveness probe.
    pub const ECHO: &str = "echo";
    /// Classic-dialect update notification.
    pub const UPDATE: &str = "update";
    /// Differential-dialect update notification.
    pub const UPDATE2: &str = "update2";
    /// Lock-granted notification.
    pub const LOCKED: &str = "locked";
    /// Lock-stolen notification.
    pub const STOLEN: &str = "stolen";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request::call(methods::LIST_DBS, vec![], 3);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"method": "list_dbs", "params": [], "id": 3})
        );
    }

    #[test]
    fn notification_has_null_id() {
        let req = Request::notification(methods::UPDATE, vec![json!("m1")]);
        assert_eq!(serde_json::to_value(&req).unwrap()["id"], Json::Null);
    }

    #[test]
    fn classify_splits_requests_and_responses() {
        let inbound = Incoming::classify(json!({
            "method": "echo", "params": [], "id": 0
        }))
        .unwrap();
        assert!(matches!(inbound, Incoming::Request(_)));

        let inbound = Incoming::classify(json!({
            "result": ["Open_vSwitch"], "error": null, "id": 1
        }))
        .unwrap();
        match inbound {
            Incoming::Response(r) => {
                assert!(!r.is_error());
                assert_eq!(r.id, json!(1));
            }
            Incoming::Request(_) => panic!("expected a response"),
        }
    }
}
