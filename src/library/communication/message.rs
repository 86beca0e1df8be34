use crate::library::ErrorCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors that may occur while reading from or decoding a [`Message`]
#[derive(Error, Debug)]
pub enum MessageError {
    /// Requested key is not present
    #[error("field {0} is missing")]
    MissingField(String),
    /// Field exists but holds a value of a different type
    #[error("field {key} is not of type {expected}")]
    TypeMismatch {
        /// Key of the offending field
        key: String,
        /// Type that was asked for
        expected: &'static str,
    },
    /// Top-level value of a decoded document is not an object
    #[error("document root is not an object")]
    NotAnObject,
    /// Text form could not be parsed or produced
    #[error("malformed json document")]
    Json(#[from] serde_json::Error),
    /// Transport-safe form is not valid base64
    #[error("malformed base64 payload")]
    Base64(#[from] base64::DecodeError),
    /// Decoded base64 bytes are not valid text
    #[error("payload is not valid utf-8")]
    Utf8(#[from] FromUtf8Error),
}

impl MessageError {
    /// Result code classification of the error
    pub fn code(&self) -> ErrorCode {
        match self {
            MessageError::MissingField(_) => ErrorCode::NullPointer,
            MessageError::TypeMismatch { .. } | MessageError::NotAnObject => ErrorCode::InvalidArg,
            _ => ErrorCode::Failed,
        }
    }
}

/// Structured document with named fields
///
/// Fields hold scalars (integers, booleans, floats, strings), nested documents or arrays of
/// scalars. The document has a text form (JSON) and a transport-safe form (base64 of the text).
/// An optional name can be attached for diagnostics, it is not part of either encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    name: Option<String>,
    root: Map<String, Value>,
}

impl Message {
    /// Creates an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty document carrying a diagnostic name
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            root: Map::new(),
        }
    }

    /// Diagnostic name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the document has no fields
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Whether a field of that name exists, regardless of its type
    pub fn contains(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    /// Names of all fields in lexical order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }
}

#[allow(missing_docs)]
impl Message {
    pub fn set_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.set_value(key, Value::from(value))
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.set_value(key, Value::from(value))
    }

    /// Stores a float. Non-finite values have no JSON representation and are stored as null.
    pub fn set_float(&mut self, key: &str, value: f64) -> &mut Self {
        let value = Number::from_f64(value).map_or(Value::Null, Value::Number);
        self.set_value(key, value)
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.set_value(key, Value::from(value))
    }

    pub fn set_message(&mut self, key: &str, value: &Message) -> &mut Self {
        self.set_value(key, Value::Object(value.root.clone()))
    }

    pub fn set_int_array(&mut self, key: &str, values: &[i64]) -> &mut Self {
        self.set_value(key, values.iter().copied().map(Value::from).collect())
    }

    pub fn set_bool_array(&mut self, key: &str, values: &[bool]) -> &mut Self {
        self.set_value(key, values.iter().copied().map(Value::from).collect())
    }

    pub fn set_float_array(&mut self, key: &str, values: &[f64]) -> &mut Self {
        self.set_value(
            key,
            values
                .iter()
                .map(|v| Number::from_f64(*v).map_or(Value::Null, Value::Number))
                .collect(),
        )
    }

    pub fn set_string_array<S: AsRef<str>>(&mut self, key: &str, values: &[S]) -> &mut Self {
        self.set_value(
            key,
            values.iter().map(|v| Value::from(v.as_ref())).collect(),
        )
    }

    pub fn get_int(&self, key: &str) -> Result<i64, MessageError> {
        self.get_value(key)?
            .as_i64()
            .ok_or_else(|| mismatch(key, "int"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, MessageError> {
        self.get_value(key)?
            .as_bool()
            .ok_or_else(|| mismatch(key, "bool"))
    }

    /// Reads a float. Integer fields are widened.
    pub fn get_float(&self, key: &str) -> Result<f64, MessageError> {
        self.get_value(key)?
            .as_f64()
            .ok_or_else(|| mismatch(key, "float"))
    }

    pub fn get_string(&self, key: &str) -> Result<String, MessageError> {
        self.get_value(key)?
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| mismatch(key, "string"))
    }

    pub fn get_message(&self, key: &str) -> Result<Message, MessageError> {
        match self.get_value(key)? {
            Value::Object(map) => Ok(Message {
                name: Some(key.to_owned()),
                root: map.clone(),
            }),
            _ => Err(mismatch(key, "message")),
        }
    }

    pub fn get_int_array(&self, key: &str) -> Result<Vec<i64>, MessageError> {
        self.get_array(key, "int array", Value::as_i64)
    }

    pub fn get_bool_array(&self, key: &str) -> Result<Vec<bool>, MessageError> {
        self.get_array(key, "bool array", Value::as_bool)
    }

    pub fn get_float_array(&self, key: &str) -> Result<Vec<f64>, MessageError> {
        self.get_array(key, "float array", Value::as_f64)
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>, MessageError> {
        self.get_array(key, "string array", |v| v.as_str().map(ToOwned::to_owned))
    }
}

impl Message {
    /// JSON text form
    pub fn to_text(&self) -> String {
        Value::Object(self.root.clone()).to_string()
    }

    /// Parses the JSON text form
    pub fn from_text(text: &str) -> Result<Self, MessageError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Transport-safe form, base64 of the JSON text
    pub fn to_base64(&self) -> String {
        base64::encode(self.to_text())
    }

    /// Decodes the transport-safe form
    pub fn from_base64(encoded: &str) -> Result<Self, MessageError> {
        let bytes = base64::decode(encoded.trim())?;
        Self::from_text(&String::from_utf8(bytes)?)
    }

    /// Wraps an arbitrary JSON value, which has to be an object
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        match value {
            Value::Object(root) => Ok(Self { name: None, root }),
            _ => Err(MessageError::NotAnObject),
        }
    }

    fn set_value(&mut self, key: &str, value: Value) -> &mut Self {
        self.root.insert(key.to_owned(), value);
        self
    }

    fn get_value(&self, key: &str) -> Result<&Value, MessageError> {
        self.root
            .get(key)
            .ok_or_else(|| MessageError::MissingField(key.to_owned()))
    }

    fn get_array<T, F>(&self, key: &str, expected: &'static str, f: F) -> Result<Vec<T>, MessageError>
    where
        F: Fn(&Value) -> Option<T>,
    {
        self.get_value(key)?
            .as_array()
            .and_then(|items| items.iter().map(&f).collect::<Option<Vec<T>>>())
            .ok_or_else(|| mismatch(key, expected))
    }
}

fn mismatch(key: &str, expected: &'static str) -> MessageError {
    MessageError::TypeMismatch {
        key: key.to_owned(),
        expected,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", name, self.to_text()),
            None => write!(f, "{}", self.to_text()),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            name: None,
            root: Map::deserialize(deserializer)?,
        })
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn store_typed_fields() {
        let mut nested = Message::new();
        nested.set_string("inner", "value");

        let mut message = Message::named("request");
        message
            .set_int("a", 3)
            .set_bool("flag", true)
            .set_float("ratio", 0.5)
            .set_string("service", "svc.sum")
            .set_message("nested", &nested)
            .set_string_array("methods", &["sum", "diff"])
            .set_int_array("numbers", &[1, 2, 3]);

        assert_eq!(message.get_int("a").unwrap(), 3);
        assert!(message.get_bool("flag").unwrap());
        assert_eq!(message.get_float("ratio").unwrap(), 0.5);
        assert_eq!(message.get_string("service").unwrap(), "svc.sum");
        assert_eq!(
            message.get_message("nested").unwrap().get_string("inner").unwrap(),
            "value"
        );
        assert_eq!(
            message.get_string_array("methods").unwrap(),
            vec!["sum".to_owned(), "diff".to_owned()]
        );
        assert_eq!(message.get_int_array("numbers").unwrap(), vec![1, 2, 3]);
        assert_eq!(message.name(), Some("request"));
    }

    #[test]
    fn report_missing_and_mistyped_fields() {
        let mut message = Message::new();
        message.set_string("a", "three");

        assert!(matches!(
            message.get_int("b"),
            Err(MessageError::MissingField(key)) if key == "b"
        ));
        assert!(matches!(
            message.get_int("a"),
            Err(MessageError::TypeMismatch { expected: "int", .. })
        ));
        assert_eq!(message.get_int("b").unwrap_err().code(), ErrorCode::NullPointer);
        assert_eq!(message.get_int("a").unwrap_err().code(), ErrorCode::InvalidArg);
    }

    #[test]
    fn reject_heterogeneous_arrays() {
        let message = Message::from_text(r#"{"mixed":[1,"two",3]}"#).unwrap();
        assert!(message.get_int_array("mixed").is_err());
    }

    #[test]
    fn decode_transport_form() {
        let mut message = Message::named("ignored");
        message.set_int("result", 7);

        let encoded = message.to_base64();
        let decoded = Message::from_base64(&encoded).unwrap();

        assert_eq!(decoded.get_int("result").unwrap(), 7);
        assert_eq!(decoded.name(), None);
        assert_eq!(decoded.to_text(), r#"{"result":7}"#);
    }

    #[test]
    fn reject_malformed_payloads() {
        assert!(matches!(
            Message::from_base64("not base64!"),
            Err(MessageError::Base64(_))
        ));
        assert!(matches!(
            Message::from_text("[1,2,3]"),
            Err(MessageError::NotAnObject)
        ));
        assert!(matches!(
            Message::from_text("{"),
            Err(MessageError::Json(_))
        ));
    }

    #[test]
    fn store_non_finite_floats_as_null() {
        let mut message = Message::new();
        message.set_float("nan", f64::NAN);

        assert!(message.contains("nan"));
        assert!(message.get_float("nan").is_err());
    }
}
