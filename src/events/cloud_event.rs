use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// Content type for a single event in structured mode.
pub const CLOUD_EVENTS_CONTENT_TYPE: &str = "application/cloudevents+json; charset=utf-8";

/// CloudEvents 1.0 envelope, serialized in structured JSON mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl CloudEvent {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            specversion: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            subject: None,
            time: None,
            datacontenttype: None,
            data: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_json_data(mut self, data: JsonValue) -> Self {
        self.datacontenttype = Some("application/json".to_string());
        self.data = Some(data);
        self
    }

    /// Sets `time` if the factory left it empty.
    pub fn stamped(mut self, now: DateTime<Utc>) -> Self {
        if self.time.is_none() {
            self.time = Some(now);
        }
        self
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_json_uses_cloud_events_attribute_names() {
        let event = CloudEvent::new("id-1", "https://example.com/source", "Example")
            .with_subject("/things/1")
            .with_json_data(json!({"a": 1}));

        let value: JsonValue = serde_json::from_slice(&event.to_json_bytes().unwrap()).unwrap();

        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["type"], "Example");
        assert_eq!(value["subject"], "/things/1");
        assert_eq!(value["datacontenttype"], "application/json");
        assert_eq!(value["data"]["a"], 1);
        assert!(value.get("time").is_none());
    }

    #[test]
    fn test_stamped_keeps_existing_time() {
        let earlier: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let later: DateTime<Utc> = "2025-01-01T00:00:00Z".parse().unwrap();

        let event = CloudEvent::new("id", "src", "t").stamped(earlier).stamped(later);

        assert_eq!(event.time, Some(earlier));
    }
}
