//! Rewrites a canonical message list from an ordered preset item list.
//!
//! Operates against an immutable snapshot of the incoming messages; presets
//! never mutate the caller's original message objects.

use crate::converter::{CanonicalMessage, Role};
use crate::db::PresetItemRecord;

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

/// Returns the rewritten message list, or `None` if the preset produced
/// nothing and the original list should be kept as-is.
pub fn apply(items: &[PresetItemRecord], original: &[CanonicalMessage]) -> Option<Vec<CanonicalMessage>> {
    let last_user_index = original.iter().rposition(|m| m.role == Role::User);
    let mut rewritten = Vec::new();

    for item in items.iter().filter(|i| i.enabled) {
        match item.item_type.as_str() {
            "normal" => {
                let role = match role_from_str(&item.role) {
                    Some(r) => r,
                    None => {
                        crate::logger::warn(
                            "preset_engine",
                            &format!("unrecognized role {:?} on normal item, skipping", item.role),
                        );
                        continue;
                    }
                };
                rewritten.push(CanonicalMessage { role, content: item.content.clone().into(), name: None });
            }
            "user_input" => match last_user_index {
                Some(idx) => rewritten.push(original[idx].clone()),
                None => crate::logger::warn(
                    "preset_engine",
                    "preset references user_input but no user message exists, skipping item",
                ),
            },
            "history" => {
                if let Some(idx) = last_user_index {
                    rewritten.extend(original[..idx].iter().cloned());
                }
            }
            other => {
                crate::logger::warn("preset_engine", &format!("unrecognized preset item type {other:?}, skipping"));
            }
        }
    }

    if rewritten.is_empty() {
        None
    } else {
        Some(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Content;

    fn msg(role: Role, text: &str) -> CanonicalMessage {
        CanonicalMessage { role, content: Content::Text(text.to_string()), name: None }
    }

    fn item(role: &str, item_type: &str, content: &str, enabled: bool, sort_order: i64) -> PresetItemRecord {
        PresetItemRecord {
            role: role.to_string(),
            item_type: item_type.to_string(),
            content: content.to_string(),
            enabled,
            sort_order,
        }
    }

    #[test]
    fn normal_items_append_fixed_content() {
        let original = vec![msg(Role::User, "hi")];
        let items = vec![item("system", "normal", "be terse", true, 0)];
        let out = apply(&items, &original).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::System);
    }

    #[test]
    fn user_input_picks_last_user_message() {
        let original = vec![msg(Role::User, "first"), msg(Role::Assistant, "reply"), msg(Role::User, "second")];
        let items = vec![item("user", "user_input", "", true, 0)];
        let out = apply(&items, &original).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0].content {
            Content::Text(t) => assert_eq!(t, "second"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn history_includes_everything_before_last_user_message() {
        let original = vec![msg(Role::System, "sys"), msg(Role::User, "first"), msg(Role::User, "second")];
        let items = vec![item("", "history", "", true, 0)];
        let out = apply(&items, &original).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn disabled_items_are_skipped() {
        let original = vec![msg(Role::User, "hi")];
        let items = vec![item("system", "normal", "skip me", false, 0)];
        assert!(apply(&items, &original).is_none());
    }

    #[test]
    fn empty_result_preserves_original_per_caller_contract() {
        let original = vec![msg(Role::User, "hi")];
        let items: Vec<PresetItemRecord> = vec![];
        assert!(apply(&items, &original).is_none());
    }

    #[test]
    fn user_input_without_any_user_message_is_skipped_not_fatal() {
        let original = vec![msg(Role::System, "sys")];
        let items = vec![item("user", "user_input", "", true, 0), item("system", "normal", "x", true, 1)];
        let out = apply(&items, &original).unwrap();
        assert_eq!(out.len(), 1);
    }
}
