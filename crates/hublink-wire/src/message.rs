//! Wire envelopes.
//!
//! Every text frame carries exactly one JSON envelope:
//!
//! ```text
//! request:  {"id": 7, "path": "files/list", "body": {...}}
//! success:  {"id": 7, "body": {...}}
//! failure:  {"id": 7, "error": "message"}
//! ```
//!
//! The presence of `path` marks a request; among responses, the presence of
//! `error` marks a failure. `body` is omitted when there is nothing to send.

use crate::error::WireError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// A request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id, unique among outstanding requests of the sender.
    pub id: u32,
    /// Target path on the receiving node.
    pub path: String,
    /// Optional JSON input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// How a request ended on the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The handler produced this body (or none).
    Success(Option<Value>),
    /// The handler failed with this message.
    Failure(String),
}

/// A response envelope, always tied to one request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u32,
    pub outcome: Outcome,
}

impl Response {
    /// A successful response carrying `body`.
    pub fn success(id: u32, body: Option<Value>) -> Self {
        Self {
            id,
            outcome: Outcome::Success(body.filter(|b| !b.is_null())),
        }
    }

    /// A failed response carrying `message`.
    pub fn failure(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failure(message.into()),
        }
    }

    /// Decode the body as `T`, or surface the peer's error.
    ///
    /// A missing body decodes as JSON `null`, so `()` and `Option<_>` outputs
    /// accept bodiless responses.
    pub fn into_body<T: DeserializeOwned>(self) -> Result<T, WireError> {
        match self.outcome {
            Outcome::Success(body) => {
                serde_json::from_value(body.unwrap_or(Value::Null)).map_err(WireError::Decode)
            }
            Outcome::Failure(message) => Err(WireError::Remote(message)),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Shape<'a> {
            id: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            body: Option<&'a Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
        }

        let (body, error) = match &self.outcome {
            Outcome::Success(body) => (body.as_ref(), None),
            Outcome::Failure(message) => (None, Some(message.as_str())),
        };
        Shape {
            id: self.id,
            body,
            error,
        }
        .serialize(serializer)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The peer asks this node to serve a path.
    Request(Request),
    /// The peer answers one of this node's requests.
    Response(Response),
}

/// Every field any envelope may carry; classified after a single parse.
#[derive(Deserialize)]
struct RawEnvelope {
    id: u32,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one text frame into an envelope.
pub fn decode_frame(text: &str) -> Result<Inbound, WireError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| WireError::MalformedFrame(e.to_string()))?;

    let inbound = match (raw.path, raw.error) {
        (Some(path), _) => Inbound::Request(Request {
            id: raw.id,
            path,
            body: raw.body,
        }),
        (None, Some(message)) => Inbound::Response(Response::failure(raw.id, message)),
        (None, None) => Inbound::Response(Response::success(raw.id, raw.body)),
    };
    Ok(inbound)
}

/// Serialize an outbound value as an optional body. `null` becomes no body.
pub fn encode_body<T: Serialize + ?Sized>(value: &T) -> Result<Option<Value>, WireError> {
    let value = serde_json::to_value(value).map_err(WireError::Encode)?;
    Ok((!value.is_null()).then_some(value))
}

/// Build and serialize a request frame.
pub fn encode_request<B: Serialize + ?Sized>(
    id: u32,
    path: &str,
    body: Option<&B>,
) -> Result<String, WireError> {
    let body = match body {
        Some(body) => encode_body(body)?,
        None => None,
    };
    let request = Request {
        id,
        path: path.to_string(),
        body,
    };
    serde_json::to_string(&request).map_err(WireError::Encode)
}

/// Serialize a response frame.
pub fn encode_response(response: &Response) -> Result<String, WireError> {
    serde_json::to_string(response).map_err(WireError::Encode)
}
