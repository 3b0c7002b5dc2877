//! Task message handed from the dispatcher to the worker.
//!
//! The message only ever exists on the queue; it is encoded as JSON bytes and
//! decoded again on delivery.

use serde::{Deserialize, Serialize};

use super::credential::CredentialBundle;
use super::ids::{JobId, OwnerId, PropertyId};
use super::job::JobAction;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("json decode: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub property_id: PropertyId,
    pub property_url: String,
    pub action: JobAction,
    pub urls: Vec<String>,
    pub auth: CredentialBundle,
    pub credits_to_charge: u64,
}

impl TaskMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    #[test]
    fn wire_shape_is_stable() {
        let msg = TaskMessage {
            job_id: JobId::from_ulid(Ulid::nil()),
            owner_id: OwnerId::new("u1"),
            property_id: PropertyId::new("s1"),
            property_url: "sc-domain:example.com".into(),
            action: JobAction::Check,
            urls: vec!["https://example.com/a".into()],
            auth: CredentialBundle {
                access_token: "tok".into(),
                expires_at: Utc.timestamp_millis_opt(1_000).unwrap(),
                refresh_token: None,
            },
            credits_to_charge: 1,
        };

        let v: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(v["job_id"], "00000000000000000000000000");
        assert_eq!(v["action"], "check");
        assert_eq!(v["auth"]["expires_at"], 1_000);
        assert!(v["auth"].get("refresh_token").is_none());
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let err = TaskMessage::decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("json decode"));
    }
}
