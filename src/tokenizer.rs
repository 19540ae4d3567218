//! Token counting for accounting, ported from the reference implementation's
//! `tiktoken`-based message framing formula.

use std::collections::HashMap;
use std::sync::Mutex;
use tiktoken_rs::CoreBPE;

static CACHE: Mutex<Option<HashMap<String, &'static CoreBPE>>> = Mutex::new(None);

fn encoding_for_model(model: &str) -> &'static CoreBPE {
    let mut guard = CACHE.lock().unwrap();
    let map = guard.get_or_insert_with(HashMap::new);
    if let Some(bpe) = map.get(model) {
        return bpe;
    }
    let bpe = tiktoken_rs::get_bpe_from_model(model)
        .or_else(|_| tiktoken_rs::cl100k_base())
        .expect("cl100k_base encoding must always be constructible");
    let leaked: &'static CoreBPE = Box::leak(Box::new(bpe));
    map.insert(model.to_string(), leaked);
    leaked
}

pub fn count_tokens(text: &str, model: &str) -> i64 {
    encoding_for_model(model).encode_with_special_tokens(text).len() as i64
}

/// A single chat message's fields, as seen by the framing formula below.
pub struct MessageForCounting<'a> {
    pub role: &'a str,
    pub name: Option<&'a str>,
    pub content: &'a str,
}

/// Implements the reference per-message overhead: 4 tokens of framing plus
/// the token count of every present field, minus 1 if a `name` field is set,
/// plus a flat 2-token reply primer after all messages.
pub fn count_tokens_for_messages(messages: &[MessageForCounting], model: &str) -> i64 {
    let bpe = encoding_for_model(model);
    let mut total = 0i64;
    for msg in messages {
        total += 4;
        if !msg.role.is_empty() {
            total += bpe.encode_with_special_tokens(msg.role).len() as i64;
        }
        if !msg.content.is_empty() {
            total += bpe.encode_with_special_tokens(msg.content).len() as i64;
        }
        if let Some(name) = msg.name {
            if !name.is_empty() {
                total += bpe.encode_with_special_tokens(name).len() as i64;
                total -= 1;
            }
        }
    }
    total += 2;
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_scale_with_content_length() {
        let short = count_tokens("hi", "gpt-3.5-turbo");
        let long = count_tokens("hi there, this is a much longer message", "gpt-3.5-turbo");
        assert!(long > short);
    }

    #[test]
    fn message_framing_adds_overhead_per_message() {
        let messages = vec![
            MessageForCounting { role: "system", name: None, content: "be terse" },
            MessageForCounting { role: "user", name: None, content: "hello" },
        ];
        let total = count_tokens_for_messages(&messages, "gpt-3.5-turbo");
        let raw: i64 = messages
            .iter()
            .map(|m| count_tokens(m.content, "gpt-3.5-turbo") + count_tokens(m.role, "gpt-3.5-turbo"))
            .sum();
        assert_eq!(total, raw + 4 * messages.len() as i64 + 2);
    }

    #[test]
    fn name_field_subtracts_one_token() {
        let with_name = vec![MessageForCounting { role: "user", name: Some("alice"), content: "hi" }];
        let without_name = vec![MessageForCounting { role: "user", name: None, content: "hi" }];
        let a = count_tokens_for_messages(&with_name, "gpt-3.5-turbo");
        let b = count_tokens_for_messages(&without_name, "gpt-3.5-turbo");
        let name_tokens = count_tokens("alice", "gpt-3.5-turbo");
        assert_eq!(a, b + name_tokens - 1);
    }
}
