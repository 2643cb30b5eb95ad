use super::types::{ChatMessage, ChatTurn};

pub const SYSTEM_PROMPT: &str = "You are an expert in plant diseases and treatments. \
Answer questions based on agricultural knowledge.";

/// Completed turns replayed to the model with each question.
pub const HISTORY_WINDOW: usize = 6;

pub const EMPTY_QUESTION_REPLY: &str = "Please ask a question about plant diseases or treatments.";

pub const EMPTY_ANSWER_REPLY: &str =
    "I couldn't generate an answer. Please try rephrasing your question or ask a different one.";

/// System prompt, the last [`HISTORY_WINDOW`] turns, then the question.
pub fn build_messages(history: &[ChatTurn], question: &str) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let recent = &history[start..];

    let mut messages = Vec::with_capacity(recent.len() * 2 + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    for turn in recent {
        messages.push(ChatMessage::user(&turn.user_message));
        messages.push(ChatMessage::assistant(&turn.bot_reply));
    }
    messages.push(ChatMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chat::types::ChatRole;

    fn turn(n: usize) -> ChatTurn {
        ChatTurn {
            user_message: format!("q{n}"),
            bot_reply: format!("a{n}"),
        }
    }

    #[test]
    fn first_question_has_system_and_user() {
        let messages = build_messages(&[], "What is leaf rust?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1], ChatMessage::user("What is leaf rust?"));
    }

    #[test]
    fn history_is_interleaved_in_order() {
        let messages = build_messages(&[turn(1), turn(2)], "q3");
        let contents: Vec<&str> = messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2", "q3"]);
    }

    #[test]
    fn only_recent_turns_are_replayed() {
        let history: Vec<ChatTurn> = (0..10).map(turn).collect();
        let messages = build_messages(&history, "next");
        assert_eq!(messages.len(), 1 + HISTORY_WINDOW * 2 + 1);
        assert_eq!(messages[1].content, "q4");
    }
}
