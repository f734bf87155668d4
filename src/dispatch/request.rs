//! HTTP-shaped request descriptions handed to the task queue.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::correlation::CorrelationKey;
use crate::session::frames::JobSubmission;

/// Body field carrying the correlation key to the downstream job.
pub const JOB_KEY_FIELD: &str = "job_key";

/// A request the task queue will execute on our behalf, later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl DispatchRequest {
    /// Build the POST the job target receives: the submission's fields plus
    /// the correlation key under [`JOB_KEY_FIELD`]. A client-supplied
    /// `job_key` is overwritten.
    pub fn for_job(
        target: &str,
        submission: &JobSubmission,
        key: &CorrelationKey,
    ) -> Result<Self, serde_json::Error> {
        let mut fields = submission.fields().clone();
        fields.insert(JOB_KEY_FIELD.to_string(), Value::String(key.to_string()));
        let body = serde_json::to_vec(&fields)?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Ok(Self {
            url: target.to_string(),
            method: "POST".to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_is_submission_plus_key() {
        let submission =
            JobSubmission::from_text(r#"{"url":"https://youtu.be/abc","track":"t","job_key":"spoof"}"#)
                .unwrap();
        let key = CorrelationKey::from("0123456789abcdef");

        let request =
            DispatchRequest::for_job("https://jobs.internal/download", &submission, &key).unwrap();

        assert_eq!(request.url, "https://jobs.internal/download");
        assert_eq!(request.method, "POST");
        assert_eq!(request.headers["Content-Type"], "application/json");

        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(
            body,
            json!({
                "url": "https://youtu.be/abc",
                "track": "t",
                "job_key": "0123456789abcdef",
            })
        );
    }
}
