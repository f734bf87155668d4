//! JSON frames exchanged with job clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::CorrelationKey;
use crate::notify::message::StatusUpdate;

/// A job submission as sent by the client: a free-form JSON object whose
/// fields only matter to the downstream job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSubmission(Map<String, Value>);

impl JobSubmission {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse a text frame. Anything but a JSON object is rejected.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// Gateway → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// The dispatch service accepted the job.
    Dispatched {
        correlation_key: CorrelationKey,
        job: String,
        submission: JobSubmission,
    },

    /// Asynchronous progress or completion notification.
    Status(StatusUpdate),

    /// Something went wrong handling the client's last frame.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_key: Option<CorrelationKey>,
    },
}

impl OutboundFrame {
    pub fn error(message: impl Into<String>, correlation_key: Option<CorrelationKey>) -> Self {
        OutboundFrame::Error {
            message: message.into(),
            correlation_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::message::JobProgress;
    use serde_json::json;

    #[test]
    fn submission_must_be_an_object() {
        let submission = JobSubmission::from_text(r#"{"url":"https://youtu.be/x","artist":"a"}"#)
            .unwrap();
        assert_eq!(submission.fields()["artist"], "a");

        assert!(JobSubmission::from_text("[1, 2]").is_err());
        assert!(JobSubmission::from_text("not json").is_err());
    }

    #[test]
    fn status_frame_carries_update_fields_at_top_level() {
        let frame = OutboundFrame::Status(StatusUpdate {
            status_payload: JobProgress {
                message: "done".into(),
                progress: 100,
            },
            code: 200,
            status: "ok".into(),
            correlation_key: CorrelationKey::from("k1"),
        });

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status",
                "status_payload": { "message": "done", "progress": 100 },
                "code": 200,
                "status": "ok",
                "correlation_key": "k1",
            })
        );
    }

    #[test]
    fn error_frame_omits_missing_key() {
        let value = serde_json::to_value(OutboundFrame::error("boom", None)).unwrap();
        assert_eq!(value, json!({ "type": "error", "message": "boom" }));
    }
}
