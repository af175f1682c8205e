use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, ResponseError, Result, Value};

pub type SubscriptionKey = i64;

/// Outcome of one endpoint: exactly one of `result` and `error` is meaningful.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EndpointResponse {
    pub result: Value,
    pub error: Option<ResponseError>,
}

impl EndpointResponse {
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    #[must_use]
    pub fn err(error: &Error) -> Self {
        Self {
            result: Value::Null,
            error: Some(error.to_response()),
        }
    }
}

impl From<Result<Value>> for EndpointResponse {
    fn from(value: Result<Value>) -> Self {
        match value {
            Ok(result) => Self::ok(result),
            Err(err) => Self::err(&err),
        }
    }
}

/// Envelope shared by batch responses and subscription frames.
///
/// `result` maps endpoint names to their outcomes; `error` is set when the
/// whole unit of work failed. Both null is a subscription acknowledgement.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub result: Option<BTreeMap<String, EndpointResponse>>,
    pub error: Option<ResponseError>,
}

impl Response {
    #[must_use]
    pub fn ack() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error(error: &Error) -> Self {
        Self {
            result: None,
            error: Some(error.to_response()),
        }
    }

    #[must_use]
    pub fn results(results: BTreeMap<String, EndpointResponse>) -> Self {
        Self {
            result: Some(results),
            error: None,
        }
    }

    #[must_use]
    pub fn single(name: impl Into<String>, response: EndpointResponse) -> Self {
        Self::results(BTreeMap::from([(name.into(), response)]))
    }
}

/// A frame sent on a subscription connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub subscription_key: SubscriptionKey,
    pub response: Response,
}

/// A decoded client frame on a subscription connection.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Subscribe {
        key: SubscriptionKey,
        endpoint: serde_json::Value,
    },
    Unsubscribe {
        key: SubscriptionKey,
    },
}

impl ClientMessage {
    /// Decodes `{subscriptionKey, endpoint}`. A null `endpoint` means
    /// unsubscribe. Frames that are not JSON objects, lack either field or
    /// carry a non-integer key yield `None`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let serde_json::Value::Object(mut map) = serde_json::from_str(text).ok()? else {
            return None;
        };
        let key = map.get("subscriptionKey")?.as_i64()?;
        match map.remove("endpoint")? {
            serde_json::Value::Null => Some(Self::Unsubscribe { key }),
            endpoint => Some(Self::Subscribe { key, endpoint }),
        }
    }

    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        match self {
            Self::Subscribe { key, .. } | Self::Unsubscribe { key } => *key,
        }
    }
}
