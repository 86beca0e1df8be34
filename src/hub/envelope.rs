//! Wire format of requests and responses
//!
//! Both are JSON objects which travel base64 encoded. Requests are published to
//! `/SND/<recipient>/<mid>`, responses to `/RSP/<requester>/<mid>`.

use crate::library::communication::{Message, MessageError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::convert::TryFrom;
use thiserror::Error;

pub(crate) const KEY_SERVICE: &str = "service";
pub(crate) const KEY_METHODS: &str = "methods";
pub(crate) const KEY_OWNER: &str = "owner";
pub(crate) const KEY_METHOD: &str = "method";
pub(crate) const KEY_INPUT: &str = "input";

/// Integer on the wire that maps to no known variant
#[derive(Error, Debug)]
#[error("unknown wire code {0}")]
pub struct UnknownCode(pub i32);

/// Kind of request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Action {
    /// A client announces itself to the daemon
    ClientOnline,
    /// Liveness probe
    ServerPing,
    /// Publish a service in the directory
    ServiceAdd,
    /// Look up a service in the directory
    ServiceGet,
    /// Invoke a method on a local service
    CallMethod,
}

impl From<Action> for i32 {
    fn from(action: Action) -> Self {
        match action {
            Action::ClientOnline => 0,
            Action::ServerPing => 1,
            Action::ServiceAdd => 2,
            Action::ServiceGet => 3,
            Action::CallMethod => 4,
        }
    }
}

impl TryFrom<i32> for Action {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::ClientOnline),
            1 => Ok(Action::ServerPing),
            2 => Ok(Action::ServiceAdd),
            3 => Ok(Action::ServiceGet),
            4 => Ok(Action::CallMethod),
            _ => Err(UnknownCode(code)),
        }
    }
}

/// Outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Status {
    /// Request was served
    Ok,
    /// Request was refused or failed
    Failed,
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => 0,
            Status::Failed => -1,
        }
    }
}

impl TryFrom<i32> for Status {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Ok),
            -1 => Ok(Status::Failed),
            _ => Err(UnknownCode(code)),
        }
    }
}

/// Request sent to another client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id, echoed by the response
    pub mid: u64,
    /// Client id of the requester
    pub from: String,
    /// Client id of the recipient
    pub to: String,
    /// Kind of request
    pub action: Action,
    /// Action specific payload
    #[serde(default)]
    pub data: Message,
}

/// Response to an [`Envelope`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Outcome of the request
    pub status: Status,
    /// Correlation id of the request
    pub mid: u64,
    /// Client id of the responder
    pub from: String,
    /// Client id of the requester
    pub to: String,
    /// Action specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Message>,
}

impl Envelope {
    /// Builds the response to this request
    pub fn reply(&self, status: Status, data: Option<Message>) -> Reply {
        Reply {
            status,
            mid: self.mid,
            from: self.to.clone(),
            to: self.from.clone(),
            data,
        }
    }
}

/// Encodes a request or response into its transport form
pub fn encode<T: Serialize>(value: &T) -> Result<String, MessageError> {
    Ok(base64::encode(serde_json::to_string(value)?))
}

/// Decodes a request or response from its transport form
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, MessageError> {
    let bytes = base64::decode(payload.trim())?;
    Ok(serde_json::from_str(&String::from_utf8(bytes)?)?)
}

/// Topic on which a client receives requests
pub fn request_topic(client_id: &str, mid: u64) -> String {
    format!("/SND/{}/{}", client_id, mid)
}

/// Topic on which a client receives responses
pub fn response_topic(client_id: &str, mid: u64) -> String {
    format!("/RSP/{}/{}", client_id, mid)
}

pub(crate) fn request_pattern(client_id: &str) -> String {
    format!("/SND/{}/*", client_id)
}

pub(crate) fn response_pattern(client_id: &str) -> String {
    format!("/RSP/{}/*", client_id)
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serialize_actions_as_integers() {
        let mut data = Message::new();
        data.set_string(KEY_SERVICE, "svc.sum");

        let envelope = Envelope {
            mid: 5,
            from: "b".into(),
            to: "daemon".into(),
            action: Action::ServiceGet,
            data,
        };

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"mid": 5, "from": "b", "to": "daemon", "action": 3, "data": {"service": "svc.sum"}})
        );
    }

    #[test]
    fn omit_missing_reply_data() {
        let reply = Reply {
            status: Status::Failed,
            mid: 1,
            from: "daemon".into(),
            to: "b".into(),
            data: None,
        };

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"status": -1, "mid": 1, "from": "daemon", "to": "b"})
        );
    }

    #[test]
    fn decode_transport_form() {
        let payload = base64::encode(r#"{"mid":9,"from":"a","to":"b","action":1,"data":{}}"#);
        let envelope: Envelope = decode(&payload).unwrap();

        assert_eq!(envelope.action, Action::ServerPing);
        assert_eq!(envelope.mid, 9);

        let reply = envelope.reply(Status::Ok, None);
        assert_eq!((reply.from.as_str(), reply.to.as_str()), ("b", "a"));

        let decoded: Reply = decode(&encode(&reply).unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn reject_unknown_actions() {
        let payload = base64::encode(r#"{"mid":9,"from":"a","to":"b","action":42,"data":{}}"#);
        assert!(decode::<Envelope>(&payload).is_err());
    }

    #[test]
    fn address_topics_by_client() {
        assert_eq!(request_topic("a", 7), "/SND/a/7");
        assert_eq!(response_topic("b", 7), "/RSP/b/7");
        assert_eq!(request_pattern("a"), "/SND/a/*");
        assert_eq!(response_pattern("b"), "/RSP/b/*");
    }
}
