use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub attributes: HistoryAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryAttributes {
    #[serde(default)]
    pub first_input_content: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_conversation_at: Option<String>,
}

impl HistoryItem {
    /// The user's first message, unwrapped from its client envelope.
    pub fn client_input(&self) -> String {
        parse_client_input(&self.attributes.first_input_content)
    }

    /// Last activity: `lastConversationAt`, falling back to `createdAt`.
    pub fn activity_at(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .attributes
            .last_conversation_at
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.attributes.created_at);
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// First inputs are stored either as plain text or as a JSON object carrying
/// the text under `input` or `content`.
pub fn parse_client_input(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            for key in ["input", "content"] {
                if let Some(Value::String(text)) = map.get(key) {
                    return text.clone();
                }
            }
        }
    }
    raw.to_string()
}

/// Short age label for listings: `Just now`, `5m ago`, `3h ago`, `2d ago`,
/// then the calendar date.
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        at.format("%b %-d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn item(first_input: &str, created_at: &str, last: Option<&str>) -> HistoryItem {
        HistoryItem {
            id: "chat-1".to_string(),
            attributes: HistoryAttributes {
                first_input_content: first_input.to_string(),
                created_at: created_at.to_string(),
                last_conversation_at: last.map(str::to_string),
            },
        }
    }

    #[test]
    fn parses_wrapped_and_plain_inputs() {
        assert_eq!(parse_client_input(r#"{"input":"Show sales"}"#), "Show sales");
        assert_eq!(parse_client_input(r#"{"content":"Hi there"}"#), "Hi there");
        assert_eq!(parse_client_input("plain question"), "plain question");
        assert_eq!(parse_client_input("{not json"), "{not json");
        assert_eq!(parse_client_input(r#"{"other":1}"#), r#"{"other":1}"#);
    }

    #[test]
    fn activity_prefers_last_conversation() {
        let with_last = item("q", "2024-01-01T00:00:00Z", Some("2024-02-01T00:00:00Z"));
        assert_eq!(
            with_last.activity_at(),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );

        let empty_last = item("q", "2024-01-01T00:00:00Z", Some(""));
        assert_eq!(
            empty_last.activity_at(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );

        assert_eq!(item("q", "yesterday", None).activity_at(), None);
    }

    #[test]
    fn deserializes_json_api_item() {
        let value = serde_json::json!({
            "id": "c-9",
            "type": "chats",
            "attributes": {
                "firstInputContent": "hello",
                "createdAt": "2024-03-01T12:00:00Z",
                "lastConversationAt": "2024-03-02T12:00:00Z",
                "agentId": "a-1"
            }
        });
        let parsed: HistoryItem = serde_json::from_value(value).expect("history item");
        assert_eq!(parsed.id, "c-9");
        assert_eq!(parsed.client_input(), "hello");
        assert_eq!(
            parsed.attributes.last_conversation_at.as_deref(),
            Some("2024-03-02T12:00:00Z")
        );
    }

    #[test]
    fn relative_labels() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(format_relative(now - Duration::seconds(30), now), "Just now");
        assert_eq!(format_relative(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "2d ago");
        assert_eq!(format_relative(now - Duration::days(40), now), "May 6, 2024");
        assert_eq!(format_relative(now + Duration::minutes(10), now), "Just now");
    }
}
