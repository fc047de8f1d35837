//! `{{placeholder}}` message templates rendered against pattern context.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Placeholders the engine knows how to fill.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "organization",
    "action.name",
    "pattern.type",
    "pattern.severity",
    "pattern.confidence",
    "pattern.occurrences",
    "pattern.description",
    "recipient.name",
    "recipient.id",
    "execution.id",
];

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"))
}

/// All placeholder names referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Placeholders not in [`KNOWN_PLACEHOLDERS`].
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|p| !KNOWN_PLACEHOLDERS.contains(&p.as_str()))
        .collect()
}

/// Substitute every `{{key}}` with `vars[key]`. Missing keys render as empty.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_keys() {
        let mut vars = BTreeMap::new();
        vars.insert("recipient.name".to_string(), "Ada".to_string());
        vars.insert("pattern.occurrences".to_string(), "4".to_string());
        let out = render(
            "Hi {{ recipient.name }}, {{pattern.occurrences}} tasks are overdue",
            &vars,
        );
        assert_eq!(out, "Hi Ada, 4 tasks are overdue");
    }

    #[test]
    fn missing_vars_render_empty() {
        let out = render("[{{pattern.type}}]", &BTreeMap::new());
        assert_eq!(out, "[]");
    }

    #[test]
    fn unknown_placeholders_are_reported() {
        let unknown = unknown_placeholders("{{pattern.type}} {{user.password}}");
        assert_eq!(unknown, vec!["user.password".to_string()]);
    }
}
