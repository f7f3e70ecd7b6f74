use siumai::types::{ChatMessage, ContentPart, MessageContent};

/// Rough token estimate used to decide when to compact history. Good enough
/// for a threshold check; exact counts are the provider's business.
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    let mut total = 0usize;
    for m in messages {
        match &m.content {
            MessageContent::Text(t) => {
                total += estimate_text(t);
            }
            MessageContent::MultiModal(parts) => {
                for p in parts {
                    match p {
                        ContentPart::Text { text } => total += estimate_text(text),
                        ContentPart::ToolCall { arguments, .. } => {
                            let s = serde_json::to_string(arguments).unwrap_or_default();
                            total += estimate_text(&s);
                        }
                        ContentPart::ToolResult { output, .. } => {
                            total += estimate_text(&output.to_string_lossy());
                        }
                        _ => {}
                    }
                }
            }
        }
        total += 4; // overhead per message
    }
    total
}

fn estimate_text(s: &str) -> usize {
    (s.chars().count() as f64 / 2.5) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_grow_with_history() {
        let short = vec![ChatMessage::user("hi").build()];
        let long = vec![
            ChatMessage::user("hi").build(),
            ChatMessage::assistant("a much longer answer about exchange rates".to_string()).build(),
        ];
        assert!(estimate_messages(&long) > estimate_messages(&short));
    }
}
