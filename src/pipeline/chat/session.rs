use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::prompt::{build_messages, EMPTY_ANSWER_REPLY, EMPTY_QUESTION_REPLY};
use super::types::{CancelToken, ChatTurn};
use super::{ChatError, ChatModel};

pub const CANCELLED_REPLY: &str = "The conversation was cleared before the answer finished.";

struct SessionState {
    history: Vec<ChatTurn>,
    /// Token handed to replies started since the last `clear()`.
    cancel: CancelToken,
}

/// One conversation with the assistant. History lives only in memory.
pub struct ChatSession {
    model: Arc<dyn ChatModel>,
    state: Mutex<SessionState>,
}

impl ChatSession {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            state: Mutex::new(SessionState {
                history: Vec::new(),
                cancel: CancelToken::new(),
            }),
        }
    }

    /// Ask and wait for the full reply. Always returns text.
    pub fn ask(&self, question: &str) -> String {
        let (tx, _rx) = std::sync::mpsc::channel();
        self.ask_streaming(question, tx)
    }

    /// Ask, forwarding reply chunks to `token_tx` as they arrive.
    ///
    /// The turn is appended once the reply completes, unless `clear()` ran
    /// in the meantime. Empty questions are answered without calling the
    /// model and are not recorded.
    pub fn ask_streaming(&self, question: &str, token_tx: Sender<String>) -> String {
        let question = question.trim();
        if question.is_empty() {
            return EMPTY_QUESTION_REPLY.to_string();
        }

        let (messages, cancel) = match self.state.lock() {
            Ok(state) => (build_messages(&state.history, question), state.cancel.clone()),
            Err(_) => return assistant_error(&ChatError::LockPoisoned),
        };

        let reply = match self.model.complete_streaming(&messages, token_tx, &cancel) {
            Ok(text) if text.trim().is_empty() => EMPTY_ANSWER_REPLY.to_string(),
            Ok(text) => text.trim().to_string(),
            Err(ChatError::Cancelled) => {
                debug!("Chat reply cancelled");
                return CANCELLED_REPLY.to_string();
            }
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "Chat model call failed");
                assistant_error(&e)
            }
        };

        match self.state.lock() {
            Ok(mut state) if !cancel.is_cancelled() => {
                state.history.push(ChatTurn {
                    user_message: question.to_string(),
                    bot_reply: reply.clone(),
                });
                reply
            }
            Ok(_) => CANCELLED_REPLY.to_string(),
            Err(_) => assistant_error(&ChatError::LockPoisoned),
        }
    }

    /// Empty the history and cancel replies still in flight.
    pub fn clear(&self) -> Result<(), ChatError> {
        let mut state = self.state.lock().map_err(|_| ChatError::LockPoisoned)?;
        state.cancel.cancel();
        state.cancel = CancelToken::new();
        state.history.clear();
        Ok(())
    }

    pub fn history(&self) -> Vec<ChatTurn> {
        self.state
            .lock()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }
}

fn assistant_error(error: &ChatError) -> String {
    format!("Error communicating with the assistant: {error}")
}

// ═══════════════════════════════════════════════════════════
// ChatRegistry
// ═══════════════════════════════════════════════════════════

/// Upper bound on concurrently open sessions.
pub const MAX_SESSIONS: usize = 1024;

/// Live sessions keyed by id. Sessions share one model.
pub struct ChatRegistry {
    model: Arc<dyn ChatModel>,
    sessions: RwLock<HashMap<Uuid, Arc<ChatSession>>>,
    max_sessions: usize,
}

impl ChatRegistry {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::with_limit(model, MAX_SESSIONS)
    }

    pub fn with_limit(model: Arc<dyn ChatModel>, max_sessions: usize) -> Self {
        Self {
            model,
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn create(&self) -> Result<Uuid, ChatError> {
        let id = Uuid::new_v4();
        let session = Arc::new(ChatSession::new(Arc::clone(&self.model)));
        let mut sessions = self.sessions.write().map_err(|_| ChatError::LockPoisoned)?;
        if sessions.len() >= self.max_sessions {
            warn!(open = sessions.len(), "Chat session limit reached");
            return Err(ChatError::TooManySessions(self.max_sessions));
        }
        sessions.insert(id, session);
        info!(session_id = %id, open = sessions.len(), "Chat session created");
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<ChatSession>, ChatError> {
        self.sessions
            .read()
            .map_err(|_| ChatError::LockPoisoned)?
            .get(&id)
            .cloned()
            .ok_or(ChatError::SessionNotFound(id))
    }

    /// Drop a session. Replies still in flight are cancelled and never recorded.
    pub fn remove(&self, id: Uuid) -> Result<(), ChatError> {
        let session = self
            .sessions
            .write()
            .map_err(|_| ChatError::LockPoisoned)?
            .remove(&id)
            .ok_or(ChatError::SessionNotFound(id))?;
        session.clear()?;
        info!(session_id = %id, "Chat session closed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chat::client::MockChatModel;
    use crate::pipeline::chat::types::ChatMessage;
    use std::sync::mpsc;

    fn session(mock: Arc<MockChatModel>) -> ChatSession {
        ChatSession::new(mock)
    }

    #[test]
    fn answered_question_is_recorded() {
        let mock = Arc::new(MockChatModel::new("Remove infected leaves."));
        let chat = session(mock.clone());
        let reply = chat.ask("My tomato leaves have brown spots");
        assert_eq!(reply, "Remove infected leaves.");
        assert_eq!(
            chat.history(),
            vec![ChatTurn {
                user_message: "My tomato leaves have brown spots".into(),
                bot_reply: "Remove infected leaves.".into(),
            }]
        );
    }

    #[test]
    fn empty_question_skips_model() {
        let mock = Arc::new(MockChatModel::new("unused"));
        let chat = session(mock.clone());
        assert_eq!(chat.ask("   "), EMPTY_QUESTION_REPLY);
        assert_eq!(mock.calls(), 0);
        assert!(chat.history().is_empty());
    }

    #[test]
    fn blank_reply_gets_rephrase_prompt() {
        let chat = session(Arc::new(MockChatModel::new("  ")));
        assert_eq!(chat.ask("anything?"), EMPTY_ANSWER_REPLY);
        assert_eq!(chat.history()[0].bot_reply, EMPTY_ANSWER_REPLY);
    }

    #[test]
    fn model_error_becomes_text_and_is_recorded() {
        let chat = session(Arc::new(MockChatModel::failing("rate limited")));
        let reply = chat.ask("Why are my leaves yellow?");
        assert_eq!(
            reply,
            "Error communicating with the assistant: HTTP client error: rate limited"
        );
        assert_eq!(chat.history().len(), 1);
    }

    #[test]
    fn prior_turns_are_sent_to_model() {
        let mock = Arc::new(MockChatModel::new("ok"));
        let chat = session(mock.clone());
        chat.ask("first");
        chat.ask("second");
        let sent = mock.last_messages();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1], ChatMessage::user("first"));
        assert_eq!(sent[3], ChatMessage::user("second"));
    }

    #[test]
    fn streaming_forwards_chunks() {
        let chat = session(Arc::new(MockChatModel::new("Spray copper.")));
        let (tx, rx) = mpsc::channel();
        let reply = chat.ask_streaming("blight?", tx);
        assert_eq!(reply, "Spray copper.");
        assert_eq!(rx.try_iter().collect::<String>(), "Spray copper.");
    }

    #[test]
    fn clear_empties_history() {
        let chat = session(Arc::new(MockChatModel::new("ok")));
        chat.ask("one");
        chat.clear().unwrap();
        assert!(chat.history().is_empty());
        chat.ask("two");
        assert_eq!(chat.history().len(), 1);
    }

    /// Streams chunks until cancelled.
    struct EndlessModel;

    impl ChatModel for EndlessModel {
        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ChatError> {
            Ok(String::new())
        }

        fn complete_streaming(
            &self,
            _messages: &[ChatMessage],
            token_tx: Sender<String>,
            cancel: &CancelToken,
        ) -> Result<String, ChatError> {
            loop {
                if cancel.is_cancelled() {
                    return Err(ChatError::Cancelled);
                }
                let _ = token_tx.send("tok ".into());
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }

        fn name(&self) -> &str {
            "endless"
        }
    }

    #[test]
    fn clear_cancels_in_flight_reply() {
        let chat = Arc::new(ChatSession::new(Arc::new(EndlessModel)));
        let (tx, rx) = mpsc::channel();
        let worker = {
            let chat = Arc::clone(&chat);
            std::thread::spawn(move || chat.ask_streaming("long answer please", tx))
        };

        // Wait for the stream to start.
        rx.recv().unwrap();
        chat.clear().unwrap();

        assert_eq!(worker.join().unwrap(), CANCELLED_REPLY);
        assert!(chat.history().is_empty());
    }

    #[test]
    fn registry_creates_and_finds_sessions() {
        let registry = ChatRegistry::new(Arc::new(MockChatModel::new("hi")));
        let id = registry.create().unwrap();
        assert_eq!(registry.len(), 1);

        let session = registry.get(id).unwrap();
        session.ask("hello");
        registry.remove(id).unwrap();
        assert!(session.history().is_empty());
        assert!(matches!(registry.get(id), Err(ChatError::SessionNotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn removed_sessions_do_not_accumulate() {
        let registry = ChatRegistry::new(Arc::new(MockChatModel::new("hi")));
        for _ in 0..1000 {
            let id = registry.create().unwrap();
            registry.remove(id).unwrap();
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registry_refuses_sessions_past_limit() {
        let registry = ChatRegistry::with_limit(Arc::new(MockChatModel::new("hi")), 2);
        let first = registry.create().unwrap();
        registry.create().unwrap();
        assert!(matches!(
            registry.create(),
            Err(ChatError::TooManySessions(2))
        ));

        registry.remove(first).unwrap();
        assert!(registry.create().is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removing_unknown_session_is_not_found() {
        let registry = ChatRegistry::new(Arc::new(MockChatModel::new("hi")));
        assert!(matches!(
            registry.remove(Uuid::new_v4()),
            Err(ChatError::SessionNotFound(_))
        ));
    }

    #[test]
    fn registry_unknown_session() {
        let registry = ChatRegistry::new(Arc::new(MockChatModel::new("hi")));
        let id = Uuid::new_v4();
        assert!(matches!(
            registry.get(id),
            Err(ChatError::SessionNotFound(missing)) if missing == id
        ));
    }
}
