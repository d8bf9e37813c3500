//! # Check-in Payload & Response
//!
//! Logical shape of one check-in round-trip.
//!
//! ## Message Flow
//! ```text
//! ┌─────────────┐                           ┌─────────────────┐
//! │    Agent    │                           │ Remote Service  │
//! └──────┬──────┘                           └────────┬────────┘
//!        │  CheckInPayload                           │
//!        │  (identity, registry snapshot,            │
//!        │   location?, tag?, receipts, ...)         │
//!        │──────────────────────────────────────────►│
//!        │                                           │
//!        │  CheckInResponse                          │
//!        │  (config?, deviceTagAccepted?, message?)  │
//!        │◄──────────────────────────────────────────│
//! ```
//!
//! Only the logical fields are fixed here. How the transport encodes them on
//! the wire is its own business; JSON with camelCase keys is what
//! [`CheckInPayload::to_json`] and [`CheckInResponse::parse`] speak.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::{DeviceDetails, ExtensionRecord};
use crate::reconcile::ConfigSnapshot;
use crate::types::{utc_format, Location, TransactionReceipt};

// =============================================================================
// Payload
// =============================================================================

/// Everything sent in one check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInPayload {
    /// Stable device identifier from the identity store.
    pub device_uuid: String,

    /// Developer key the agent was set up with.
    pub developer_key: String,

    /// Registered extensions at assembly time.
    pub extensions: Vec<ExtensionRecord>,

    /// Registered custom devices, providers evaluated.
    pub devices: Vec<DeviceDetails>,

    /// Present only when this run uploads location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Pending device tag, if the host set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_tag: Option<String>,

    /// Hex-encoded push token, if registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,

    /// Queued transaction receipts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<TransactionReceipt>,

    /// Ask the remote side to include configuration in its response.
    pub request_config: bool,

    /// Revision of the locally applied configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_revision: Option<u64>,

    #[serde(default, with = "utc_format::option")]
    pub last_check_in: Option<DateTime<Utc>>,

    #[serde(default, with = "utc_format::option")]
    pub last_location_upload: Option<DateTime<Utc>>,

    /// Assembly time.
    #[serde(with = "utc_format")]
    pub sent_at: DateTime<Utc>,
}

impl CheckInPayload {
    /// Encodes the payload as JSON.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// =============================================================================
// Response
// =============================================================================

/// Configuration block embedded in a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl From<RemoteConfig> for ConfigSnapshot {
    fn from(remote: RemoteConfig) -> Self {
        ConfigSnapshot::new(remote.revision, remote.values)
    }
}

/// Decoded body of a successful check-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    #[serde(default)]
    pub config: Option<RemoteConfig>,

    /// Server verdict on a device tag sent with this check-in.
    #[serde(default)]
    pub device_tag_accepted: Option<bool>,

    /// Free-form server message.
    #[serde(default)]
    pub message: Option<String>,
}

impl CheckInResponse {
    /// Parses a response body. An empty (or whitespace) body is a valid,
    /// empty response.
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_payload_uses_camel_case_and_skips_empty_optionals() {
        let payload = CheckInPayload {
            device_uuid: "uuid-1".into(),
            developer_key: "key".into(),
            extensions: vec![],
            devices: vec![],
            location: None,
            device_tag: None,
            push_token: Some("a1b2".into()),
            receipts: vec![],
            request_config: true,
            config_revision: None,
            last_check_in: None,
            last_location_upload: None,
            sent_at: Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap(),
        };

        let value: Value = serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["deviceUuid"], "uuid-1");
        assert_eq!(value["pushToken"], "a1b2");
        assert_eq!(value["requestConfig"], true);
        assert_eq!(value["sentAt"], "2024-02-02T02:02:02Z");
        assert!(value.get("location").is_none());
        assert!(value.get("receipts").is_none());
    }

    #[test]
    fn test_parse_response_with_config() {
        let body = json!({
            "config": { "revision": 4, "values": { "checkInInterval": 600 } },
            "deviceTagAccepted": true
        })
        .to_string();

        let response = CheckInResponse::parse(body.as_bytes()).unwrap();
        let snapshot: ConfigSnapshot = response.config.unwrap().into();
        assert_eq!(snapshot.revision, Some(4));
        assert_eq!(snapshot.values["checkInInterval"], json!(600));
        assert_eq!(response.device_tag_accepted, Some(true));
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert_eq!(CheckInResponse::parse(b"").unwrap(), CheckInResponse::default());
        assert_eq!(CheckInResponse::parse(b"  \n").unwrap(), CheckInResponse::default());
        assert!(CheckInResponse::parse(b"{not json").is_err());
    }
}
