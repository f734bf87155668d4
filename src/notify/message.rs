//! Broker messages and the status updates parsed from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::ParseIntError;
use thiserror::Error;

use crate::correlation::CorrelationKey;

/// Attribute holding the numeric job status code.
pub const CODE_ATTRIBUTE: &str = "code";

/// Attribute holding the textual job status.
pub const STATUS_ATTRIBUTE: &str = "status";

/// A message as delivered by the broker subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerMessage {
    /// Broker-assigned message id, for logging.
    pub id: String,
    /// Raw payload bytes.
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    /// Carries the correlation key of the job that published the message.
    pub ordering_key: String,
}

impl BrokerMessage {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Job output carried in the message payload.
///
/// ```json
/// { "message": "job is still in progress", "progress": 35 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub message: String,
    pub progress: i64,
}

/// A progress or completion notification for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status_payload: JobProgress,
    pub code: i64,
    pub status: String,
    pub correlation_key: CorrelationKey,
}

/// Why a broker message could not be turned into a [`StatusUpdate`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("message attribute '{0}' not found")]
    MissingAttribute(&'static str),

    #[error("message attribute 'code' is not a number ({value:?}): {source}")]
    InvalidCode {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("message has no ordering key")]
    MissingOrderingKey,
}

impl StatusUpdate {
    /// Parse a broker message. Checks run in payload, code, status, ordering
    /// key order and the first failure wins.
    pub fn from_message(message: &BrokerMessage) -> Result<Self, ParseError> {
        let status_payload: JobProgress = serde_json::from_slice(&message.data)?;

        let raw_code = message
            .attribute(CODE_ATTRIBUTE)
            .ok_or(ParseError::MissingAttribute(CODE_ATTRIBUTE))?;
        let code = raw_code
            .trim()
            .parse::<i64>()
            .map_err(|source| ParseError::InvalidCode {
                value: raw_code.to_string(),
                source,
            })?;

        let status = message
            .attribute(STATUS_ATTRIBUTE)
            .ok_or(ParseError::MissingAttribute(STATUS_ATTRIBUTE))?
            .to_string();

        if message.ordering_key.is_empty() {
            return Err(ParseError::MissingOrderingKey);
        }

        Ok(Self {
            status_payload,
            code,
            status,
            correlation_key: CorrelationKey::from(message.ordering_key.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(data: &str, attributes: &[(&str, &str)], ordering_key: &str) -> BrokerMessage {
        BrokerMessage {
            id: "m-1".into(),
            data: data.as_bytes().to_vec(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ordering_key: ordering_key.into(),
        }
    }

    const PAYLOAD: &str = r#"{ "message": "job in progress", "progress": 23 }"#;

    #[test]
    fn parses_complete_message() {
        let update = StatusUpdate::from_message(&message(
            PAYLOAD,
            &[("code", "200"), ("status", "ok")],
            "a1b2c3d4",
        ))
        .unwrap();

        assert_eq!(update.status_payload.message, "job in progress");
        assert_eq!(update.status_payload.progress, 23);
        assert_eq!(update.code, 200);
        assert_eq!(update.status, "ok");
        assert_eq!(update.correlation_key.as_str(), "a1b2c3d4");
    }

    #[test]
    fn missing_code_is_named() {
        let err = StatusUpdate::from_message(&message(PAYLOAD, &[("status", "ok")], "k"))
            .unwrap_err();
        assert!(err.to_string().contains("'code' not found"));
    }

    #[test]
    fn non_numeric_code_is_rejected() {
        let err = StatusUpdate::from_message(&message(
            PAYLOAD,
            &[("code", "invalid code"), ("status", "ok")],
            "k",
        ))
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidCode { ref value, .. } if value == "invalid code"));
    }

    #[test]
    fn missing_status_is_named() {
        let err = StatusUpdate::from_message(&message(PAYLOAD, &[("code", "200")], "k"))
            .unwrap_err();
        assert!(err.to_string().contains("'status' not found"));
    }

    #[test]
    fn payload_must_be_json() {
        let err = StatusUpdate::from_message(&message(
            "not json",
            &[("code", "200"), ("status", "ok")],
            "k",
        ))
        .unwrap_err();
        assert!(matches!(err, ParseError::Payload(_)));
    }

    #[test]
    fn ordering_key_is_required() {
        let err = StatusUpdate::from_message(&message(
            PAYLOAD,
            &[("code", "200"), ("status", "ok")],
            "",
        ))
        .unwrap_err();
        assert!(matches!(err, ParseError::MissingOrderingKey));
    }
}
