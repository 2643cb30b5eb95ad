use std::sync::Arc;

use super::types::{ChatMessage, ChatRole};
use super::{ChatError, ChatModel};
use crate::pipeline::diagnosis::TreatmentTable;

pub const OFFLINE_REPLY: &str = "I'm running without an online assistant, so I can only answer \
questions about diseases in my treatment table. Try naming the plant and the disease, \
for example \"How do I treat tomato late blight?\"";

/// Offline assistant that answers from the treatment table.
///
/// A table entry matches when the question mentions both its plant and
/// every word of its disease. The most specific match (most words) wins.
pub struct KeywordAssistant {
    treatments: Arc<TreatmentTable>,
}

impl KeywordAssistant {
    pub fn new(treatments: Arc<TreatmentTable>) -> Self {
        Self { treatments }
    }

    pub fn answer(&self, question: &str) -> String {
        let words = tokenize(question);

        let best = self
            .treatments
            .iter()
            .filter_map(|(label, advice)| {
                let (plant, disease) = label.split_once(" - ").unwrap_or((label, ""));
                let plant_words = tokenize(plant);
                let disease_words = tokenize(disease);
                let mentions = |w: &String| words.contains(w);
                (plant_words.iter().all(mentions) && disease_words.iter().all(mentions))
                    .then_some((plant_words.len() + disease_words.len(), label, advice))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));

        match best {
            Some((_, _, advice)) => advice.to_string(),
            None => OFFLINE_REPLY.to_string(),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl ChatModel for KeywordAssistant {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(self.answer(question))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
