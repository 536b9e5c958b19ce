//! System prompt defaults and deterministic message-builders for the adapter,
//! critic, and advisor stages.
//!
//! Grounded on `examples/original_source/src/adapter_critic/prompts.py`, with the
//! plain-text draft rendering there replaced by the JSON-Patch envelope
//! `crate::edits::render_draft_payload` produces (see `SPEC_FULL.md` §4.3).

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::edits::render_draft_payload;
use crate::messages::{ChatMessage, ToolCall};

/// Built-in adapter system prompt, used when a served model has no `adapter_system_prompt` override.
pub const ADAPTER_SYSTEM_PROMPT: &str = "You are a response editor running in JSON mode. Respond with valid JSON only. \
Return {\"decision\":\"lgtm\"} if the draft is good, or return \
{\"decision\":\"patch\",\"patches\":[{\"op\":\"replace\",\"path\":\"/content\",\"value\":\"...\"}]} \
to apply constrained JSON-Patch replace operations against the draft's `content` and `tool_calls`. \
Never emit tool calls in your own output.";

/// Built-in critic system prompt.
pub const CRITIC_SYSTEM_PROMPT: &str =
    "You are a critique generator. Explain what is correct, what is wrong/missing, and exact fix instructions.";

/// Built-in advisor system prompt.
pub const ADVISOR_SYSTEM_PROMPT: &str = "You are an expert advisor for another language model. \
Provide concise, actionable guidance on how to solve the user's request: where to look, \
what steps/tools to use, what pitfalls to avoid, and what the final answer must include. \
Do not answer the user directly. Do not emit tool calls. Return guidance only.";

/// The `response_format` forced on every adapter-stage call, enforcing the adapter's JSON
/// decision schema server-side via the upstream's structured-output support.
pub fn adapter_response_format() -> Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "adapter_patch_response",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "decision": {"type": "string", "enum": ["lgtm", "patch"]},
                    "patches": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "op": {"type": "string", "enum": ["replace"]},
                                "path": {"type": "string"},
                                "value": {},
                            },
                            "required": ["op", "path", "value"],
                        },
                    },
                },
                "required": ["decision"],
            },
        },
    })
}

const ADVISOR_GUIDANCE_OPEN_TAG: &str = "[ADVISOR_GUIDANCE]";
const ADVISOR_GUIDANCE_CLOSE_TAG: &str = "[/ADVISOR_GUIDANCE]";

fn render_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("[{}] {}", role_label(message), message.content_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_label(message: &ChatMessage) -> &'static str {
    match message.role {
        crate::messages::Role::System => "system",
        crate::messages::Role::User => "user",
        crate::messages::Role::Assistant => "assistant",
        crate::messages::Role::Tool => "tool",
    }
}

/// Render the `{tools?, tool_choice?}` authoritative tool contract, `None` when the request
/// carries neither field (or an empty `tools` array).
fn render_tool_contract(request_options: &IndexMap<String, Value>) -> Option<String> {
    let mut contract = Map::new();

    if let Some(tools) = request_options.get("tools").and_then(Value::as_array) {
        if !tools.is_empty() {
            contract.insert("tools".to_string(), Value::Array(tools.clone()));
        }
    }
    if let Some(tool_choice) = request_options.get("tool_choice") {
        contract.insert("tool_choice".to_string(), tool_choice.clone());
    }

    if contract.is_empty() {
        return None;
    }
    Some(serde_json::to_string_pretty(&Value::Object(contract)).expect("tool contract always serializes"))
}

fn with_tool_contract(system_prompt: &str, request_options: &IndexMap<String, Value>, closing_instruction: &str) -> String {
    match render_tool_contract(request_options) {
        Some(contract) => {
            format!("{system_prompt}\n\nAuthoritative tool contract for this request:\n{contract}\n\n{closing_instruction}")
        }
        None => system_prompt.to_string(),
    }
}

/// Build the adapter stage's `[system, user]` messages. `request_options` is consulted only to
/// render the tool contract — it is never forwarded to the adapter call itself.
pub fn build_adapter_messages(
    messages: &[ChatMessage],
    draft_content: &str,
    draft_tool_calls: Option<&[ToolCall]>,
    adapter_system_prompt: &str,
    request_options: &IndexMap<String, Value>,
) -> Vec<ChatMessage> {
    let system_content = with_tool_contract(
        adapter_system_prompt,
        request_options,
        "Never emit tool calls directly. Return only the structured JSON adapter response.",
    );
    let draft = render_draft_payload(draft_content, draft_tool_calls);

    vec![
        ChatMessage::system(system_content),
        ChatMessage::user(format!("Conversation history:\n{}\n\nLatest API draft:\n{draft}", render_history(messages))),
    ]
}

/// Build the critic stage's `[system, user]` messages. `leading_system_prompt` is the content of
/// the first system message in the original conversation, if any.
pub fn build_critic_messages(
    messages: &[ChatMessage],
    leading_system_prompt: &str,
    draft_content: &str,
    draft_tool_calls: Option<&[ToolCall]>,
    critic_system_prompt: &str,
    request_options: &IndexMap<String, Value>,
) -> Vec<ChatMessage> {
    let system_content = with_tool_contract(
        critic_system_prompt,
        request_options,
        "Evaluate tool usage against this contract. Never emit tool calls yourself.",
    );
    let draft = render_draft_payload(draft_content, draft_tool_calls);

    vec![
        ChatMessage::system(system_content),
        ChatMessage::user(format!(
            "System instructions:\n{leading_system_prompt}\n\nConversation history:\n{}\n\nLatest API draft:\n{draft}",
            render_history(messages)
        )),
    ]
}

/// Append the critic's feedback and the prior draft to the original conversation, for the final
/// api pass.
pub fn build_critic_second_pass_messages(
    messages: &[ChatMessage],
    draft_content: &str,
    draft_tool_calls: Option<&[ToolCall]>,
    critique: &str,
) -> Vec<ChatMessage> {
    let draft = render_draft_payload(draft_content, draft_tool_calls);
    let mut updated = messages.to_vec();
    updated.push(ChatMessage::user(format!(
        "Below is your prior draft and feedback from a small critic model.\n\
The critic is less capable than you — use your own judgment about whether to act on its feedback.\n\n\
Critic feedback:\n{critique}\n\nPrior draft:\n{draft}"
    )));
    updated
}

/// Build the advisor stage's messages: its system prompt followed by the original conversation
/// verbatim. `request_options` is consulted only for the tool contract.
pub fn build_advisor_messages(
    messages: &[ChatMessage],
    advisor_system_prompt: &str,
    request_options: &IndexMap<String, Value>,
) -> Vec<ChatMessage> {
    let system_content = with_tool_contract(
        advisor_system_prompt,
        request_options,
        "Use this contract only as planning context. Never emit tool calls directly.",
    );

    let mut built = Vec::with_capacity(messages.len() + 1);
    built.push(ChatMessage::system(system_content));
    built.extend_from_slice(messages);
    built
}

/// Append `[ADVISOR_GUIDANCE]...[/ADVISOR_GUIDANCE]` to the last user message, or append a new
/// user message carrying only that block when none exists.
pub fn append_advisor_guidance_to_last_user_message(messages: &[ChatMessage], advisor_guidance: &str) -> Vec<ChatMessage> {
    let guidance_block = format!("{ADVISOR_GUIDANCE_OPEN_TAG}\n{advisor_guidance}\n{ADVISOR_GUIDANCE_CLOSE_TAG}");
    let mut updated = messages.to_vec();

    for message in updated.iter_mut().rev() {
        if message.role != crate::messages::Role::User {
            continue;
        }
        let current = message.content_str();
        message.content = Some(if current.is_empty() {
            guidance_block.clone()
        } else {
            format!("{current}\n\n{guidance_block}")
        });
        return updated;
    }

    updated.push(ChatMessage::user(guidance_block));
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_contract_included_when_tools_present() {
        let mut request_options = IndexMap::new();
        request_options.insert("tools".to_string(), json!([{"type": "function", "function": {"name": "f"}}]));
        let messages = build_adapter_messages(&[], "draft", None, ADAPTER_SYSTEM_PROMPT, &request_options);
        assert!(messages[0].content_str().contains("Authoritative tool contract"));
    }

    #[test]
    fn tool_contract_omitted_when_absent() {
        let messages = build_adapter_messages(&[], "draft", None, ADAPTER_SYSTEM_PROMPT, &IndexMap::new());
        assert!(!messages[0].content_str().contains("Authoritative tool contract"));
    }

    #[test]
    fn advisor_guidance_appends_to_last_user_message() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("cancel reservation EHGLP3")];
        let updated = append_advisor_guidance_to_last_user_message(&messages, "check the reservation id format");
        assert!(updated[1].content_str().contains("[ADVISOR_GUIDANCE]"));
        assert!(updated[1].content_str().contains("cancel reservation EHGLP3"));
    }

    #[test]
    fn advisor_guidance_appends_new_message_when_no_user_message() {
        let messages = vec![ChatMessage::system("sys")];
        let updated = append_advisor_guidance_to_last_user_message(&messages, "guidance");
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].role, crate::messages::Role::User);
    }

    #[test]
    fn adapter_messages_embed_draft_envelope() {
        let messages = build_adapter_messages(&[], "Hello world", None, ADAPTER_SYSTEM_PROMPT, &IndexMap::new());
        assert!(messages[1].content_str().contains("<ADAPTER_DRAFT_CONTENT>"));
    }
}
