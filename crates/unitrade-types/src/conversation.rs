//! Display helpers for conversation timelines.

use std::collections::HashSet;

use chrono::Duration;

use crate::events::ConversationMessage;

/// Consecutive messages from one sender closer together than this share a
/// header.
pub const GROUP_WINDOW_SECS: i64 = 5 * 60;

/// Whether the message at `index` starts a new visual group.
pub fn shows_header(messages: &[ConversationMessage], index: usize) -> bool {
    let Some(current) = messages.get(index) else {
        return false;
    };
    let Some(previous) = index.checked_sub(1).and_then(|i| messages.get(i)) else {
        return true;
    };
    previous.user.name != current.user.name
        || current.created_at - previous.created_at > Duration::seconds(GROUP_WINDOW_SECS)
}

/// A run of messages rendered under one sender header.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup<'a> {
    pub sender: &'a str,
    pub messages: Vec<&'a ConversationMessage>,
}

pub fn group_messages(messages: &[ConversationMessage]) -> Vec<MessageGroup<'_>> {
    let mut groups: Vec<MessageGroup<'_>> = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        if shows_header(messages, i) {
            groups.push(MessageGroup {
                sender: &message.user.name,
                messages: vec![message],
            });
        } else if let Some(group) = groups.last_mut() {
            group.messages.push(message);
        }
    }
    groups
}

/// Merge history handed to a view with live messages: first occurrence of
/// each id wins, result ordered by `created_at`.
pub fn merge_messages(
    initial: &[ConversationMessage],
    live: &[ConversationMessage],
) -> Vec<ConversationMessage> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ConversationMessage> = initial
        .iter()
        .chain(live)
        .filter(|m| seen.insert(m.id))
        .cloned()
        .collect();
    merged.sort_by_key(|m| m.created_at);
    merged
}
