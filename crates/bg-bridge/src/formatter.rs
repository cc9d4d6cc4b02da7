//! Rule-driven message formatter
//!
//! The rule set lives under the `message` config key and maps every output
//! field to a rule string `"<kind>:<template>"`:
//!
//! | kind | template | output |
//! |------|----------|--------|
//! | `as_is` | field name | input field verbatim |
//! | `literal` | any text | the text itself |
//! | `format_string` | text with `{field}` placeholders | placeholders substituted |
//! | `bool` | text | `true` iff the text is `true` (any case) |
//! | `or` | `cond\|when_false\|when_true` | alternative picked by boolean `cond`, then formatted |
//!
//! Any failed lookup aborts the whole message; no partial output is returned.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use bg_common::{render_value, Message};
use bg_config::{ConfigError, ConfigStore};

/// Config key holding the rule set
pub const RULES_KEY: &str = "message";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Message field not found: {0}")]
    MissingField(String),

    #[error("Unknown rule kind: {0}")]
    UnknownRule(String),

    #[error("Malformed rule {0:?}: expected <kind>:<template>")]
    MalformedRule(String),

    #[error("Rule {rule:?} must have a condition and exactly two alternatives, got {parts} parts")]
    InvalidAlternatives { rule: String, parts: usize },

    #[error("Condition field {0} is not a boolean")]
    NonBooleanCondition(String),

    #[error("Malformed template {0:?}: unbalanced braces")]
    MalformedTemplate(String),

    #[error("Rule set is invalid: {0}")]
    InvalidRuleSet(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A parsed field rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    AsIs(String),
    Literal(String),
    FormatString(String),
    Bool(bool),
    Or {
        condition: String,
        when_false: String,
        when_true: String,
    },
}

impl Rule {
    pub fn parse(spec: &str) -> Result<Self, FormatError> {
        let (kind, template) = spec
            .split_once(':')
            .ok_or_else(|| FormatError::MalformedRule(spec.to_string()))?;

        match kind {
            "as_is" => Ok(Rule::AsIs(template.to_string())),
            "literal" => Ok(Rule::Literal(template.to_string())),
            "format_string" => Ok(Rule::FormatString(template.to_string())),
            "bool" => Ok(Rule::Bool(template.eq_ignore_ascii_case("true"))),
            "or" => {
                let parts: Vec<&str> = template.split('|').collect();
                match parts.as_slice() {
                    [condition, when_false, when_true] => Ok(Rule::Or {
                        condition: condition.to_string(),
                        when_false: when_false.to_string(),
                        when_true: when_true.to_string(),
                    }),
                    _ => Err(FormatError::InvalidAlternatives {
                        rule: spec.to_string(),
                        parts: parts.len(),
                    }),
                }
            }
            other => Err(FormatError::UnknownRule(other.to_string())),
        }
    }

    pub fn apply(&self, msg: &Message) -> Result<Value, FormatError> {
        match self {
            Rule::AsIs(field) => msg
                .get(field)
                .cloned()
                .ok_or_else(|| FormatError::MissingField(field.clone())),
            Rule::Literal(text) => Ok(Value::String(text.clone())),
            Rule::FormatString(template) => format_template(template, msg).map(Value::String),
            Rule::Bool(flag) => Ok(Value::Bool(*flag)),
            Rule::Or {
                condition,
                when_false,
                when_true,
            } => {
                let selected = match msg.get(condition) {
                    Some(Value::Bool(false)) => when_false,
                    Some(Value::Bool(true)) => when_true,
                    Some(_) => return Err(FormatError::NonBooleanCondition(condition.clone())),
                    None => return Err(FormatError::MissingField(condition.clone())),
                };
                format_template(selected, msg).map(Value::String)
            }
        }
    }
}

/// Substitute `{field}` placeholders from `msg`; `{{` and `}}` are literal braces.
///
/// Placeholders must name a present, non-null field.
pub fn format_template(template: &str, msg: &Message) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(FormatError::MalformedTemplate(template.to_string()))
                        }
                        Some(ch) => field.push(ch),
                    }
                }
                // A null field (unset env var, absent header) counts as missing
                match msg.get(&field) {
                    Some(Value::Null) | None => return Err(FormatError::MissingField(field)),
                    Some(value) => out.push_str(&render_value(value)),
                }
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(FormatError::MalformedTemplate(template.to_string())),
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Applies the configured rule set to build the generator message
pub struct RuleFormatter {
    config: Arc<ConfigStore>,
}

impl RuleFormatter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Build a new message from `msg`, reading the rule set on every call
    pub fn format(&self, msg: &Message) -> Result<Message, FormatError> {
        let rules = self.config.get(RULES_KEY)?;
        let rules = rules
            .as_object()
            .ok_or_else(|| FormatError::InvalidRuleSet(format!("{} is not a map", RULES_KEY)))?;

        let mut out = Message::new();
        for (field, spec) in rules {
            let spec = spec.as_str().ok_or_else(|| {
                FormatError::InvalidRuleSet(format!("rule for {} is not a string", field))
            })?;
            let rule = Rule::parse(spec)?;
            out.insert(field.clone(), rule.apply(msg)?);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> Message {
        match value {
            Value::Object(map) => map,
            _ => panic!("test message must be an object"),
        }
    }

    fn rules() -> Value {
        json!({
            "uuid": "as_is:id",
            "platform": "as_is:platformName",
            "image_url": "as_is:ociImageUrl",
            "app_metadata": "literal:",
            "lib_match_mode": "literal:normal",
            "output_filename": "format_string:{appId}_{appVersion}_{platformName}_{firmwareVersion}",
            "searchpath": "format_string:{bundle_store_dir}/{id}",
            "outputdir": "or:encrypt|{nginx_store_dir}/{appId}/{appVersion}/{platformName}/{firmwareVersion}|{bundle_store_dir}/{appId}/{appVersion}/{platformName}/{firmwareVersion}",
            "createmountpoints": "bool:true",
        })
    }

    fn input(encrypt: bool) -> Message {
        message(json!({
            "x-request-id": "x-request-id",
            "id": "x-request-id",
            "bundle_store_dir": "bundle_store_dir",
            "nginx_store_dir": "nginx_store_dir",
            "platformName": "apollo",
            "firmwareVersion": "502.54.1",
            "ociImageUrl": "https://some.repo.url/dacs/com.test.app.awesome:1.3.4",
            "appId": "com.test.app.awesome",
            "appVersion": "1.2.3",
            "encrypt": encrypt,
        }))
    }

    #[test]
    fn test_format_full_rule_set() {
        let formatter = RuleFormatter::new(Arc::new(ConfigStore::from_value(json!({ "message": rules() }))));

        let out = formatter.format(&input(false)).unwrap();

        let expected = message(json!({
            "uuid": "x-request-id",
            "platform": "apollo",
            "image_url": "https://some.repo.url/dacs/com.test.app.awesome:1.3.4",
            "app_metadata": "",
            "lib_match_mode": "normal",
            "output_filename": "com.test.app.awesome_1.2.3_apollo_502.54.1",
            "searchpath": "bundle_store_dir/x-request-id",
            "outputdir": "nginx_store_dir/com.test.app.awesome/1.2.3/apollo/502.54.1",
            "createmountpoints": true,
        }));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_or_selects_second_alternative_when_true() {
        let formatter = RuleFormatter::new(Arc::new(ConfigStore::from_value(json!({ "message": rules() }))));

        let out = formatter.format(&input(true)).unwrap();
        assert_eq!(out["outputdir"], "bundle_store_dir/com.test.app.awesome/1.2.3/apollo/502.54.1");
    }

    #[test]
    fn test_as_is_keeps_value_type() {
        let msg = message(json!({"encrypt": true, "count": 3}));

        assert_eq!(Rule::parse("as_is:encrypt").unwrap().apply(&msg).unwrap(), json!(true));
        assert_eq!(Rule::parse("as_is:count").unwrap().apply(&msg).unwrap(), json!(3));
    }

    #[test]
    fn test_as_is_missing_field() {
        let err = Rule::parse("as_is:platformName").unwrap().apply(&Message::new()).unwrap_err();
        assert!(matches!(err, FormatError::MissingField(f) if f == "platformName"));
    }

    #[test]
    fn test_template_keeps_colons_after_the_first() {
        // Only the first colon separates kind and template
        let rule = Rule::parse("as_is:key:value").unwrap();
        assert_eq!(rule, Rule::AsIs("key:value".to_string()));
        let err = rule.apply(&message(json!({"key": "v"}))).unwrap_err();
        assert!(matches!(err, FormatError::MissingField(f) if f == "key:value"));

        let rule = Rule::parse("literal:docker://registry/app:1.0").unwrap();
        assert_eq!(rule.apply(&Message::new()).unwrap(), json!("docker://registry/app:1.0"));
    }

    #[test]
    fn test_literal_ignores_message() {
        let msg = message(json!({"normal": "not this"}));

        assert_eq!(Rule::parse("literal:normal").unwrap().apply(&msg).unwrap(), json!("normal"));
        assert_eq!(Rule::parse("literal:").unwrap().apply(&msg).unwrap(), json!(""));
    }

    #[test]
    fn test_bool_rule() {
        let cases = [
            ("bool:true", true),
            ("bool:TRUE", true),
            ("bool:True", true),
            ("bool:false", false),
            ("bool:yes", false),
            ("bool:", false),
        ];

        for (spec, expected) in cases {
            let value = Rule::parse(spec).unwrap().apply(&Message::new()).unwrap();
            assert_eq!(value, json!(expected), "rule {}", spec);
        }
    }

    #[test]
    fn test_or_rule_alternatives() {
        let rule = Rule::parse("or:encrypt|{a}/{appId}|{b}/{appId}").unwrap();

        let plain = message(json!({"encrypt": false, "a": "nginx", "b": "store", "appId": "app"}));
        assert_eq!(rule.apply(&plain).unwrap(), json!("nginx/app"));

        let encrypted = message(json!({"encrypt": true, "a": "nginx", "b": "store", "appId": "app"}));
        assert_eq!(rule.apply(&encrypted).unwrap(), json!("store/app"));
    }

    #[test]
    fn test_or_rule_requires_three_parts() {
        for spec in ["or:encrypt|only_one", "or:encrypt|a|b|c", "or:encrypt"] {
            assert!(
                matches!(Rule::parse(spec), Err(FormatError::InvalidAlternatives { .. })),
                "rule {}",
                spec
            );
        }
    }

    #[test]
    fn test_or_rule_condition_errors() {
        let rule = Rule::parse("or:encrypt|a|b").unwrap();

        let missing = rule.apply(&Message::new()).unwrap_err();
        assert!(matches!(missing, FormatError::MissingField(f) if f == "encrypt"));

        let not_bool = rule.apply(&message(json!({"encrypt": "false"}))).unwrap_err();
        assert!(matches!(not_bool, FormatError::NonBooleanCondition(f) if f == "encrypt"));
    }

    #[test]
    fn test_unknown_and_malformed_rules() {
        assert!(matches!(Rule::parse("upper:appId"), Err(FormatError::UnknownRule(k)) if k == "upper"));
        assert!(matches!(Rule::parse("as_is"), Err(FormatError::MalformedRule(_))));
    }

    #[test]
    fn test_format_template() {
        let msg = message(json!({"appId": "app", "n": 7, "flag": false, "gone": null}));

        assert_eq!(format_template("{appId}-{n}-{flag}", &msg).unwrap(), "app-7-false");
        assert_eq!(format_template("{{literal}}/{appId}", &msg).unwrap(), "{literal}/app");
        assert!(matches!(format_template("[{gone}]", &msg), Err(FormatError::MissingField(f)) if f == "gone"));
        assert_eq!(format_template("no placeholders", &msg).unwrap(), "no placeholders");

        assert!(matches!(format_template("{missing}", &msg), Err(FormatError::MissingField(f)) if f == "missing"));
        assert!(matches!(format_template("{appId", &msg), Err(FormatError::MalformedTemplate(_))));
        assert!(matches!(format_template("appId}", &msg), Err(FormatError::MalformedTemplate(_))));
    }

    #[test]
    fn test_failure_discards_partial_output() {
        let config = ConfigStore::from_value(json!({
            "message": {
                "platform": "as_is:platformName",
                "uuid": "as_is:id",
            }
        }));
        let formatter = RuleFormatter::new(Arc::new(config));

        let result = formatter.format(&message(json!({"platformName": "apollo"})));
        assert!(matches!(result, Err(FormatError::MissingField(f)) if f == "id"));
    }

    #[test]
    fn test_missing_rule_set_is_config_error() {
        let formatter = RuleFormatter::new(Arc::new(ConfigStore::from_value(json!({}))));

        let err = formatter.format(&Message::new()).unwrap_err();
        assert!(matches!(err, FormatError::Config(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_non_string_rule_is_rejected() {
        let config = ConfigStore::from_value(json!({"message": {"uuid": 42}}));
        let formatter = RuleFormatter::new(Arc::new(config));

        assert!(matches!(formatter.format(&Message::new()), Err(FormatError::InvalidRuleSet(_))));
    }
}
