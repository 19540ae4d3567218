//! Template directive expansion, run after preset expansion and before the
//! request is re-encoded for the target provider.
//!
//! Directives are processed in a fixed order, one full pass each, against a
//! per-request scratch map — never a shared or process-global instance, which
//! is an anti-pattern the reference implementation fell into.

use rand::Rng;
use regex::Regex;
use std::collections::HashMap;

pub struct VariableEngine {
    local_vars: HashMap<String, String>,
}

impl VariableEngine {
    pub fn new() -> Self {
        Self { local_vars: HashMap::new() }
    }

    pub fn expand(&mut self, text: &str) -> String {
        let text = strip_comments(text);
        let text = self.expand_roll(&text);
        let text = self.expand_random(&text);
        let text = self.expand_setvar(&text);
        self.expand_getvar(&text)
    }

    fn expand_roll(&self, text: &str) -> String {
        let re = Regex::new(r"(?i)\{\{roll\s+(\d+)d(\d+)\}\}").unwrap();
        replace_all_checked(&re, text, |caps| {
            let n: u32 = caps[1].parse().ok()?;
            let m: u32 = caps[2].parse().ok()?;
            if m == 0 {
                return None;
            }
            let mut rng = rand::thread_rng();
            let sum: u32 = (0..n).map(|_| rng.gen_range(1..=m)).sum();
            Some(sum.to_string())
        })
    }

    fn expand_random(&self, text: &str) -> String {
        let re = Regex::new(r"\{\{random::(.*?)\}\}").unwrap();
        replace_all_checked(&re, text, |caps| {
            let alternatives: Vec<&str> = caps[1].split("::").collect();
            if alternatives.is_empty() {
                return None;
            }
            let idx = rand::thread_rng().gen_range(0..alternatives.len());
            Some(alternatives[idx].to_string())
        })
    }

    fn expand_setvar(&mut self, text: &str) -> String {
        let re = Regex::new(r"\{\{setvar::([^:]+)::(.*?)\}\}").unwrap();
        let mut out = String::new();
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let m = caps.get(0).unwrap();
            out.push_str(&text[last..m.start()]);
            self.local_vars.insert(caps[1].to_string(), caps[2].to_string());
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }

    fn expand_getvar(&self, text: &str) -> String {
        let re = Regex::new(r"\{\{getvar::([^:}]+)\}\}").unwrap();
        let mut out = String::new();
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let m = caps.get(0).unwrap();
            out.push_str(&text[last..m.start()]);
            out.push_str(self.local_vars.get(&caps[1]).map(String::as_str).unwrap_or(""));
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }
}

impl Default for VariableEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comments(text: &str) -> String {
    let re = Regex::new(r"\{\{#.*?\}\}").unwrap();
    re.replace_all(text, "").into_owned()
}

/// Replaces every match of `re` with the result of `f`, leaving a match
/// untouched (per its original text) if `f` returns `None`.
fn replace_all_checked(
    re: &Regex,
    text: &str,
    f: impl Fn(&regex::Captures) -> Option<String>,
) -> String {
    let mut out = String::new();
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let m = caps.get(0).unwrap();
        out.push_str(&text[last..m.start()]);
        match f(&caps) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comment_directives() {
        let mut engine = VariableEngine::new();
        assert_eq!(engine.expand("hello {{# a note}} world"), "hello  world");
    }

    #[test]
    fn roll_produces_a_number_in_range() {
        let mut engine = VariableEngine::new();
        let out = engine.expand("{{roll 2d6}}");
        let n: u32 = out.parse().expect("roll output should be numeric");
        assert!((2..=12).contains(&n));
    }

    #[test]
    fn roll_leaves_unparseable_dice_untouched() {
        let mut engine = VariableEngine::new();
        assert_eq!(engine.expand("{{roll xdy}}"), "{{roll xdy}}");
    }

    #[test]
    fn random_picks_one_of_the_alternatives() {
        let mut engine = VariableEngine::new();
        let out = engine.expand("{{random::a::b::c}}");
        assert!(["a", "b", "c"].contains(&out.as_str()));
    }

    #[test]
    fn setvar_then_getvar_round_trips_within_a_request() {
        let mut engine = VariableEngine::new();
        let out = engine.expand("{{setvar::name::Ada}}hi {{getvar::name}}");
        assert_eq!(out, "hi Ada");
    }

    #[test]
    fn getvar_miss_is_empty_string() {
        let mut engine = VariableEngine::new();
        assert_eq!(engine.expand("{{getvar::missing}}"), "");
    }

    #[test]
    fn scratch_map_does_not_survive_a_new_engine_instance() {
        let mut first = VariableEngine::new();
        first.expand("{{setvar::x::1}}");
        let mut second = VariableEngine::new();
        assert_eq!(second.expand("{{getvar::x}}"), "");
    }
}
