/// Rules: a list of conditions combined by a match mode, plus the actions to
/// run when they match.
use crate::actions::Action;
use crate::conditions::{Condition, EvalContext};
use crate::file_info::FileInfo;
use serde::{Deserialize, Serialize};

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    /// Every condition must hold.
    #[default]
    #[serde(alias = "all")]
    All,
    /// At least one condition must hold.
    #[serde(alias = "any")]
    Any,
}

fn default_true() -> bool {
    true
}

/// A user-defined rule.
///
/// A rule without conditions never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub stop_on_match: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Creates an enabled rule with no conditions or actions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            conditions: Vec::new(),
            match_mode: MatchMode::All,
            stop_on_match: false,
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }

    pub fn with_stop_on_match(mut self, stop_on_match: bool) -> Self {
        self.stop_on_match = stop_on_match;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// True if the rule matches `file`.
    pub fn matches(&self, file: &FileInfo, ctx: &EvalContext<'_>) -> bool {
        self.evaluate(file, ctx).0
    }

    /// Evaluates the conditions, short-circuiting, and returns the verdict
    /// together with one log line per condition that was evaluated.
    pub fn evaluate(&self, file: &FileInfo, ctx: &EvalContext<'_>) -> (bool, Vec<String>) {
        if self.conditions.is_empty() {
            return (false, vec![format!("Rule '{}' has no conditions", self.name)]);
        }

        let mut log = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let result = condition.evaluate(file, ctx);
            log.push(format!(
                "  {}: {}",
                condition.describe(),
                if result { "True" } else { "False" }
            ));

            match (self.match_mode, result) {
                (MatchMode::All, false) => return (false, log),
                (MatchMode::Any, true) => return (true, log),
                _ => {}
            }
        }

        (self.match_mode == MatchMode::All, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;

    fn png() -> FileInfo {
        FileInfo::unresolved("/src/shot.png")
    }

    #[test]
    fn test_zero_conditions_never_match() {
        let store = MetadataStore::new();
        let rule = Rule::new("empty").with_action(Action::Delete {});
        assert!(!rule.matches(&png(), &EvalContext::new(&store)));
    }

    #[test]
    fn test_all_mode() {
        let store = MetadataStore::new();
        let ctx = EvalContext::new(&store);
        let rule = Rule::new("pngs named shot")
            .with_condition(Condition::ExtensionIs { ext: ".png".into() })
            .with_condition(Condition::NameStartsWith {
                prefix: "shot".into(),
            });
        assert!(rule.matches(&png(), &ctx));

        let rule = rule.with_condition(Condition::NameContains { text: "zzz".into() });
        let (matched, log) = rule.evaluate(&png(), &ctx);
        assert!(!matched);
        assert_eq!(log.len(), 3);
        assert!(log[2].ends_with("False"));
    }

    #[test]
    fn test_any_mode_short_circuits() {
        let store = MetadataStore::new();
        let ctx = EvalContext::new(&store);
        let rule = Rule::new("images")
            .with_match_mode(MatchMode::Any)
            .with_condition(Condition::ExtensionIs { ext: ".jpg".into() })
            .with_condition(Condition::ExtensionIs { ext: ".png".into() })
            .with_condition(Condition::ExtensionIs { ext: ".gif".into() });

        let (matched, log) = rule.evaluate(&png(), &ctx);
        assert!(matched);
        assert_eq!(log.len(), 2);
        assert!(log[1].ends_with("True"));
    }

    #[test]
    fn test_match_mode_serde() {
        let any: MatchMode = serde_json::from_str("\"any\"").expect("Deserialize failed");
        assert_eq!(any, MatchMode::Any);
        let all: MatchMode = serde_json::from_str("\"ALL\"").expect("Deserialize failed");
        assert_eq!(all, MatchMode::All);
        assert_eq!(
            serde_json::to_string(&MatchMode::Any).expect("Serialize failed"),
            "\"ANY\""
        );
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let rule: Rule = serde_json::from_str(r#"{"name": "bare"}"#).expect("Deserialize failed");
        assert!(rule.enabled);
        assert!(!rule.stop_on_match);
        assert_eq!(rule.match_mode, MatchMode::All);
        assert!(rule.conditions.is_empty());
    }
}
