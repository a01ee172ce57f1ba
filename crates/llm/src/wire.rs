//! Messages API request and response bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub(crate) system: &'a str,
    pub(crate) messages: [Message<'a>; 1],
    pub(crate) temperature: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct Message<'a> {
    pub(crate) role: &'static str,
    pub(crate) content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    pub(crate) content: Vec<ResponseBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

impl MessagesResponse {
    /// Concatenated text blocks, or `None` if there were none.
    pub(crate) fn text(&self) -> Option<String> {
        let text = self
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub(crate) fn tokens_used(&self) -> u64 {
        self.usage
            .as_ref()
            .map_or(0, |u| u.input_tokens.saturating_add(u.output_tokens))
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_empty_system() {
        let req = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "",
            messages: [Message {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn response_joins_text_and_skips_other_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "EMAIL 1"},
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Body: hi"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 30}
        }"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.text().as_deref(), Some("EMAIL 1\nBody: hi"));
        assert_eq!(resp.tokens_used(), 42);
    }

    #[test]
    fn missing_usage_counts_zero() {
        let resp: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"x"}]}"#).unwrap();
        assert_eq!(resp.tokens_used(), 0);
    }
}
