use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::constants::MessageType;

/// Errors produced while reading an inbound control message.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,
}

/// An inbound control message.
///
/// The `type` field is split off and the remaining fields are kept
/// as-is, so each handler can deserialize only the body it expects.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msg_type: MessageType,
    /// The raw `type` string as sent (empty when absent).
    pub type_name: String,
    pub body: Map<String, Value>,
}

impl Envelope {
    /// Parses a text message.
    ///
    /// Anything that is not a JSON object is rejected. A missing or
    /// non-string `type` yields [`MessageType::Unknown`].
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut body) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let type_name = match body.remove("type") {
            Some(Value::String(name)) => name,
            _ => String::new(),
        };

        Ok(Self {
            msg_type: MessageType::from_wire(&type_name),
            type_name,
            body,
        })
    }

    /// Deserializes the remaining fields into the given type.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::FileUploadRequest;

    #[test]
    fn parse_splits_type_from_body() {
        let env = Envelope::parse(r#"{"type":"raw","data":"hello"}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::Raw);
        assert_eq!(env.type_name, "raw");
        assert_eq!(env.body.get("data"), Some(&Value::String("hello".into())));
        assert!(!env.body.contains_key("type"));
    }

    #[test]
    fn parse_missing_type_is_unknown() {
        let env = Envelope::parse(r#"{"data":"x"}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::Unknown);
        assert!(env.type_name.is_empty());
    }

    #[test]
    fn parse_non_string_type_is_unknown() {
        let env = Envelope::parse(r#"{"type":42}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::Unknown);
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = Envelope::parse("{not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Json(_)));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(matches!(
            Envelope::parse("[1,2,3]").unwrap_err(),
            EnvelopeError::NotAnObject
        ));
        assert!(matches!(
            Envelope::parse("\"check_connection\"").unwrap_err(),
            EnvelopeError::NotAnObject
        ));
    }

    #[test]
    fn parse_body_into_request() {
        let env = Envelope::parse(
            r#"{"type":"file_upload","filename":"fw.bin","size":3,"data":"AAAA"}"#,
        )
        .unwrap();
        let req: FileUploadRequest = env.parse_body().unwrap();
        assert_eq!(req.filename, "fw.bin");
        assert_eq!(req.size, Some(3));
        assert_eq!(req.data, "AAAA");
    }

    #[test]
    fn parse_body_reports_missing_field() {
        let env = Envelope::parse(r#"{"type":"file_upload","filename":"fw.bin"}"#).unwrap();
        assert!(env.parse_body::<FileUploadRequest>().is_err());
    }
}
