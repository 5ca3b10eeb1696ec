//! OpenAI-compatible chat completion envelope.
//!
//! The gateway only needs the fields that drive cache keying; everything
//! else in the request body is opaque and forwarded verbatim from the
//! buffered bytes.

use serde::{Deserialize, Serialize};

/// A single message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The subset of a chat completion request the gateway inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Concatenate the content of every `user` message, in order, joined
    /// by a single ASCII space. Returns the empty string when the request
    /// carries no user messages.
    pub fn user_query(&self) -> String {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .collect();
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn msg(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn user_query_joins_user_messages_in_order() {
        let req = ChatCompletionRequest {
            model: Some("gpt-3.5-turbo".to_string()),
            messages: vec![
                msg("system", "You are helpful."),
                msg("user", "What is"),
                msg("assistant", "Hmm?"),
                msg("user", "the capital of France?"),
            ],
            stream: false,
        };

        assert_eq!(req.user_query(), "What is the capital of France?");
    }

    #[test]
    fn user_query_excludes_non_user_roles() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![
                msg("system", "sys"),
                msg("assistant", "asst"),
                msg("tool", "tool"),
            ],
            stream: false,
        };

        assert_eq!(req.user_query(), "");
    }

    #[test]
    fn user_query_empty_for_no_messages() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![],
            stream: false,
        };

        assert_eq!(req.user_query(), "");
    }

    #[test]
    fn deserializes_minimal_request() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();

        assert_eq!(req.model.as_deref(), Some("gpt-4"));
        assert!(!req.stream);
        assert_eq!(req.user_query(), "hi");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"temperature":0.7,"max_tokens":100}"#,
        )
        .unwrap();

        assert_eq!(req.user_query(), "hi");
    }

    proptest! {
        /// For any mix of messages, the extracted query is exactly the
        /// user contents joined by single spaces, in order. Matching the
        /// join exactly also proves every other role is excluded.
        #[test]
        fn user_query_is_user_contents_joined_in_order(
            user_contents in prop::collection::vec("[a-zA-Z0-9 ]{1,50}", 1..=5),
            others in prop::collection::vec(
                ("system|assistant|tool", "[a-zA-Z0-9 ]{0,30}", any::<prop::sample::Index>()),
                0..=4,
            ),
        ) {
            let mut messages: Vec<Message> = user_contents
                .iter()
                .map(|content| msg("user", content))
                .collect();
            // Scatter non-user messages at arbitrary positions.
            for (role, content, position) in others {
                let at = position.index(messages.len() + 1);
                messages.insert(at, Message { role, content });
            }

            let req = ChatCompletionRequest {
                model: None,
                messages,
                stream: false,
            };
            prop_assert_eq!(req.user_query(), user_contents.join(" "));
        }

        /// Without user messages the extracted query is always empty.
        #[test]
        fn user_query_empty_without_user_messages(
            others in prop::collection::vec(
                ("system|assistant|tool", "[a-zA-Z0-9 ]{0,30}"),
                0..=5,
            ),
        ) {
            let messages = others
                .into_iter()
                .map(|(role, content)| Message { role, content })
                .collect();

            let req = ChatCompletionRequest {
                model: None,
                messages,
                stream: false,
            };
            prop_assert_eq!(req.user_query(), "");
        }
    }
}
