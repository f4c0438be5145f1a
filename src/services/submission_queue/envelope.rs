use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schemas::exam::ExamSubmission;

/// How the submission JSON is carried inside the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MessageEncoding {
    #[default]
    Plain,
    Base64,
}

impl MessageEncoding {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Base64 => "base64",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    encoding: MessageEncoding,
    payload: String,
}

#[derive(Debug, Error)]
pub(crate) enum EnvelopeError {
    #[error("message is not a tagged envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a valid submission: {0}")]
    Payload(serde_json::Error),
}

pub(crate) fn encode_submission(
    submission: &ExamSubmission,
    encoding: MessageEncoding,
) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(submission)?;
    let payload = match encoding {
        MessageEncoding::Plain => json,
        MessageEncoding::Base64 => STANDARD.encode(json.as_bytes()),
    };

    serde_json::to_string(&Envelope { encoding, payload })
}

pub(crate) fn decode_submission(body: &str) -> Result<ExamSubmission, EnvelopeError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(EnvelopeError::Envelope)?;

    let bytes = match envelope.encoding {
        MessageEncoding::Plain => envelope.payload.into_bytes(),
        MessageEncoding::Base64 => STANDARD.decode(envelope.payload.trim())?,
    };

    serde_json::from_slice(&bytes).map_err(EnvelopeError::Payload)
}
