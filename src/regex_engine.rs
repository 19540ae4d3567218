//! Sequential regex substitution over rule sets, applied to message content
//! before a request is forwarded ("pre" rules) and to upstream output before
//! it is returned to the caller ("post" rules).
//!
//! A rule with an invalid pattern is skipped rather than failing the whole
//! pipeline, mirroring the reference service's `try/except`-wrapped `re.sub`.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub replacement: String,
}

impl From<&crate::db::RegexRuleRecord> for Rule {
    fn from(r: &crate::db::RegexRuleRecord) -> Self {
        Rule { pattern: r.pattern.clone(), replacement: r.replacement.clone() }
    }
}

/// Applies every rule in `rules`, in order, to `text`. `$1`..`$9`-style
/// backreferences in `replacement` are handled natively by the `regex` crate.
pub fn apply(text: &str, rules: &[Rule]) -> String {
    let mut current = text.to_string();
    for rule in rules {
        let re = match Regex::new(&rule.pattern) {
            Ok(re) => re,
            Err(e) => {
                crate::logger::warn(
                    "regex_engine",
                    &format!("skipping invalid pattern {:?}: {e}", rule.pattern),
                );
                continue;
            }
        };
        current = re.replace_all(&current, rule.replacement.as_str()).into_owned();
    }
    current
}

/// Assembles the pre-dispatch rule set: user-scoped rules first, then
/// preset-scoped rules, so a preset's substitutions see the user's output.
pub fn pre_rules(user: Vec<Rule>, preset: Vec<Rule>) -> Vec<Rule> {
    let mut rules = user;
    rules.extend(preset);
    rules
}

/// Assembles the post-response rule set: the reverse order of `pre_rules`,
/// so the preset's own framing is unwound before the user's rules run.
pub fn post_rules(user: Vec<Rule>, preset: Vec<Rule>) -> Vec<Rule> {
    let mut rules = preset;
    rules.extend(user);
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_rules_in_order() {
        let rules = vec![
            Rule { pattern: "foo".into(), replacement: "bar".into() },
            Rule { pattern: "bar".into(), replacement: "baz".into() },
        ];
        assert_eq!(apply("foo", &rules), "baz");
    }

    #[test]
    fn skips_invalid_pattern_without_panicking() {
        let rules = vec![
            Rule { pattern: "(unclosed".into(), replacement: "x".into() },
            Rule { pattern: "foo".into(), replacement: "bar".into() },
        ];
        assert_eq!(apply("foo", &rules), "bar");
    }

    #[test]
    fn post_rules_reverse_pre_rules_order() {
        let user = vec![Rule { pattern: "u".into(), replacement: "U".into() }];
        let preset = vec![Rule { pattern: "p".into(), replacement: "P".into() }];
        let pre = pre_rules(user.clone(), preset.clone());
        let post = post_rules(user, preset);
        assert_eq!(pre[0].pattern, "u");
        assert_eq!(post[0].pattern, "p");
    }
}
