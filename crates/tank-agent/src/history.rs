//! Bounded conversation history.
//!
//! The system prompt is injected into each LLM request by the caller and is
//! never stored here. Eviction never leaves a `ToolCall` without its paired
//! `ToolResult`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tank_core::Language;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryItem {
    User { text: String, language: Language },
    Assistant { text: String },
    ToolCall { id: String, name: String, arguments: String },
    ToolResult { id: String, content: String },
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    items: VecDeque<HistoryItem>,
    max_items: usize,
}

impl ConversationHistory {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn push(&mut self, item: HistoryItem) {
        self.items.push_back(item);
        while self.items.len() > self.max_items {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        match self.items.pop_front() {
            Some(HistoryItem::ToolCall { id, .. }) => {
                // Take the paired result with it so the remaining prefix
                // never starts on an orphaned side of a pair.
                if let Some(pos) = self.items.iter().position(
                    |item| matches!(item, HistoryItem::ToolResult { id: rid, .. } if *rid == id),
                ) {
                    self.items.remove(pos);
                }
            }
            Some(_) | None => {}
        }
    }

    /// Drop any `ToolCall`s left behind by a cancelled turn that never got
    /// their `ToolResult`, so the history always ends on a `User` item or a
    /// completed sub-sequence.
    pub fn truncate_dangling_tool_calls(&mut self) {
        let result_ids: std::collections::HashSet<String> = self
            .items
            .iter()
            .filter_map(|item| match item {
                HistoryItem::ToolResult { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        self.items.retain(|item| match item {
            HistoryItem::ToolCall { id, .. } => result_ids.contains(id),
            _ => true,
        });
    }

    pub fn items(&self) -> impl Iterator<Item = &HistoryItem> {
        self.items.iter()
    }

    pub fn snapshot(&self) -> Vec<HistoryItem> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Language attached to the most recent user turn, if any.
    pub fn last_user_language(&self) -> Option<Language> {
        self.items.iter().rev().find_map(|item| match item {
            HistoryItem::User { language, .. } => Some(*language),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> HistoryItem {
        HistoryItem::User {
            text: text.to_string(),
            language: Language::En,
        }
    }

    fn assistant(text: &str) -> HistoryItem {
        HistoryItem::Assistant {
            text: text.to_string(),
        }
    }

    #[test]
    fn length_never_exceeds_cap() {
        let mut history = ConversationHistory::new(4);
        for i in 0..20 {
            history.push(user(&format!("u{i}")));
            history.push(assistant(&format!("a{i}")));
            assert!(history.len() <= 4);
        }
        assert_eq!(
            history.snapshot().last(),
            Some(&assistant("a19"))
        );
    }

    #[test]
    fn eviction_removes_tool_pairs_together() {
        let mut history = ConversationHistory::new(4);
        history.push(HistoryItem::ToolCall {
            id: "c1".to_string(),
            name: "get_time".to_string(),
            arguments: "{}".to_string(),
        });
        history.push(HistoryItem::ToolResult {
            id: "c1".to_string(),
            content: "12:00".to_string(),
        });
        history.push(user("next"));
        history.push(assistant("reply"));
        // pushes the history over the cap; the ToolCall and its result
        // must leave together
        history.push(user("again"));

        let items = history.snapshot();
        assert!(items
            .iter()
            .all(|item| !matches!(item, HistoryItem::ToolCall { .. } | HistoryItem::ToolResult { .. })));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn dangling_tool_calls_are_truncated() {
        let mut history = ConversationHistory::new(8);
        history.push(user("q"));
        history.push(assistant(""));
        history.push(HistoryItem::ToolCall {
            id: "c1".to_string(),
            name: "get_time".to_string(),
            arguments: "{}".to_string(),
        });
        history.push(HistoryItem::ToolResult {
            id: "c1".to_string(),
            content: "12:00".to_string(),
        });
        history.push(HistoryItem::ToolCall {
            id: "c2".to_string(),
            name: "get_time".to_string(),
            arguments: "{}".to_string(),
        });

        history.truncate_dangling_tool_calls();
        let items = history.snapshot();
        assert_eq!(items.len(), 4);
        assert!(matches!(items.last(), Some(HistoryItem::ToolResult { .. })));
    }

    #[test]
    fn last_user_language_skips_other_items() {
        let mut history = ConversationHistory::new(8);
        assert_eq!(history.last_user_language(), None);
        history.push(HistoryItem::User {
            text: "你好".to_string(),
            language: Language::Zh,
        });
        history.push(assistant("hi"));
        assert_eq!(history.last_user_language(), Some(Language::Zh));
    }
}
