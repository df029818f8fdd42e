//! Command-line override grammar.
//!
//! ```text
//! override := ["~" | "+" | "++"] key ["=" value]
//! value    := element ("," element)* | "range(" args ")" | "choice(" args ")"
//! ```
//!
//! Commas only split at the top level: `[1,5,50]`, `{a: 1, b: 2}`, quoted
//! strings and `${...}` interpolations are single elements.

use crate::error::{ConfigError, ConfigResult};
use crate::node::{scalar_to_string, ConfigNode};
use serde_yaml::{Number, Value};
use std::fmt;

const MAX_RANGE_VALUES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// `key=value`: the key must already exist.
    Change,
    /// `+key=value`: the key must not exist yet.
    Add,
    /// `++key=value`: create or replace.
    Force,
    /// `~key[=value]`: delete.
    Delete,
}

impl OverrideKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Change => "",
            Self::Add => "+",
            Self::Force => "++",
            Self::Delete => "~",
        }
    }
}

/// Right-hand side of a parsed override.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    /// No `=value` (only valid for deletions).
    Absent,
    Single(Value),
    /// A sweep axis: one run per element.
    Sweep(Vec<Value>),
}

/// An override as written on the command line, possibly a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub kind: OverrideKind,
    pub key: String,
    pub value: OverrideValue,
    pub text: String,
}

impl Override {
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let invalid = |message: &str| ConfigError::InvalidOverride { text: text.to_string(), message: message.to_string() };
        let trimmed = text.trim();
        let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("++") {
            (OverrideKind::Force, rest)
        } else if let Some(rest) = trimmed.strip_prefix('+') {
            (OverrideKind::Add, rest)
        } else if let Some(rest) = trimmed.strip_prefix('~') {
            (OverrideKind::Delete, rest)
        } else {
            (OverrideKind::Change, trimmed)
        };

        let (key, raw) = match rest.split_once('=') {
            Some((key, raw)) => (key.trim(), Some(raw)),
            None if kind == OverrideKind::Delete => (rest.trim(), None),
            None => return Err(invalid("expected 'key=value'")),
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.chars().any(|c| c.is_whitespace() || matches!(c, '=' | ',' | '[' | ']' | '{' | '}')) {
            return Err(invalid("key contains an invalid character"));
        }

        let value = match raw {
            None => OverrideValue::Absent,
            Some(raw) => parse_value(raw).map_err(|message| invalid(&message))?,
        };
        if kind == OverrideKind::Delete && matches!(value, OverrideValue::Sweep(_)) {
            return Err(invalid("a deletion cannot sweep"));
        }

        Ok(Self { kind, key: key.to_string(), value, text: trimmed.to_string() })
    }

    #[must_use]
    pub fn is_sweep(&self) -> bool {
        matches!(self.value, OverrideValue::Sweep(_))
    }

    /// The concrete assignments this override stands for, one per sweep value.
    #[must_use]
    pub fn assignments(&self) -> Vec<OverrideAssignment> {
        let make = |value: Option<Value>| OverrideAssignment { kind: self.kind, key: self.key.clone(), value };
        match &self.value {
            OverrideValue::Absent => vec![make(None)],
            OverrideValue::Single(v) => vec![make(Some(v.clone()))],
            OverrideValue::Sweep(values) => values.iter().cloned().map(|v| make(Some(v))).collect(),
        }
    }
}

/// One concrete dotted-path assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideAssignment {
    pub kind: OverrideKind,
    pub key: String,
    pub value: Option<Value>,
}

impl OverrideAssignment {
    /// Apply this assignment as a value override.
    pub fn apply(&self, config: &mut ConfigNode) -> ConfigResult<()> {
        let value = self.value.clone().unwrap_or(Value::Null);
        match self.kind {
            OverrideKind::Change => {
                config.set_path(&self.key, value, false)?;
            }
            OverrideKind::Add => {
                if config.contains_path(&self.key) {
                    return Err(ConfigError::KeyExists { path: self.key.clone() });
                }
                config.set_path(&self.key, value, true)?;
            }
            OverrideKind::Force => {
                config.set_path(&self.key, value, true)?;
            }
            OverrideKind::Delete => {
                if let (Some(expected), Some(current)) = (&self.value, config.get_path(&self.key)) {
                    if expected != current {
                        return Err(ConfigError::InvalidOverride {
                            text: self.to_string(),
                            message: format!("current value is {}", format_value(current)),
                        });
                    }
                }
                config.remove_path(&self.key)?;
            }
        }
        Ok(())
    }

    /// The option named by a group-choice override; `None` disables the group.
    #[must_use]
    pub fn group_option(&self) -> Option<String> {
        match (&self.kind, &self.value) {
            (OverrideKind::Delete, _) | (_, None | Some(Value::Null)) => None,
            (_, Some(value)) => Some(scalar_to_string(value)),
        }
    }
}

impl fmt::Display for OverrideAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.key)?;
        if let Some(value) = &self.value {
            write!(f, "={}", format_value(value))?;
        }
        Ok(())
    }
}

/// Render a value in override syntax, quoting strings that would otherwise
/// re-parse differently.
#[must_use]
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let reparsed = parse_element(s);
            let plain = !s.is_empty()
                && reparsed == Value::String(s.clone())
                && !s.chars().any(|c| matches!(c, ',' | ' ' | '\'' | '"'));
            if plain {
                s.clone()
            } else {
                format!("'{}'", s.replace('\'', "\\'"))
            }
        }
        Value::Sequence(items) => {
            format!("[{}]", items.iter().map(format_value).collect::<Vec<_>>().join(","))
        }
        Value::Mapping(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}:{}", scalar_to_string(k), format_value(v)))
                .collect::<Vec<_>>()
                .join(",")
        ),
        other => scalar_to_string(other),
    }
}

fn parse_value(raw: &str) -> Result<OverrideValue, String> {
    let raw = raw.trim();
    if let Some(args) = function_args(raw, "range") {
        return parse_range(&split_top_level(args)?).map(OverrideValue::Sweep);
    }
    if let Some(args) = function_args(raw, "choice") {
        let parts = split_top_level(args)?;
        if parts.iter().all(|p| p.trim().is_empty()) {
            return Err("choice() needs at least one value".to_string());
        }
        return Ok(OverrideValue::Sweep(parts.iter().map(|p| parse_element(p)).collect()));
    }
    let parts = split_top_level(raw)?;
    if parts.len() > 1 {
        Ok(OverrideValue::Sweep(parts.iter().map(|p| parse_element(p)).collect()))
    } else {
        Ok(OverrideValue::Single(parse_element(raw)))
    }
}

fn function_args<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.strip_prefix(name)?.trim_start().strip_prefix('(')?.strip_suffix(')')
}

/// Parse one element: quoted text stays a string, everything else is read as
/// YAML and falls back to a plain string.
fn parse_element(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::String(String::new());
    }
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            let inner = &text[1..text.len() - 1];
            return Value::String(inner.replace(&format!("\\{quote}"), &quote.to_string()));
        }
    }
    // YAML comments would silently drop the rest of the text.
    if text.starts_with('#') || text.contains(" #") {
        return Value::String(text.to_string());
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Null) if !matches!(text, "null" | "Null" | "NULL" | "~") => Value::String(text.to_string()),
        Ok(Value::Tagged(_)) | Err(_) => Value::String(text.to_string()),
        Ok(value) => value,
    }
}

/// Split on commas outside brackets, braces, parentheses and quotes.
fn split_top_level(text: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth.push(c);
                current.push(c);
            }
            ']' | '}' | ')' => {
                let open = match c {
                    ']' => '[',
                    '}' => '{',
                    _ => '(',
                };
                if depth.pop() != Some(open) {
                    return Err(format!("unbalanced '{c}'"));
                }
                current.push(c);
            }
            ',' if depth.is_empty() => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if let Some(open) = depth.last() {
        return Err(format!("unclosed '{open}'"));
    }
    parts.push(current);
    Ok(parts)
}

fn parse_range(args: &[String]) -> Result<Vec<Value>, String> {
    let numbers = args
        .iter()
        .map(|a| match parse_element(a) {
            Value::Number(n) => Ok(n),
            _ => Err(format!("range() argument '{}' is not a number", a.trim())),
        })
        .collect::<Result<Vec<Number>, String>>()?;
    let (start, stop, step) = match numbers.as_slice() {
        [stop] => (Number::from(0), stop.clone(), Number::from(1)),
        [start, stop] => (start.clone(), stop.clone(), Number::from(1)),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        _ => return Err("range() takes 1 to 3 arguments".to_string()),
    };

    if let (Some(start), Some(stop), Some(step)) = (start.as_i64(), stop.as_i64(), step.as_i64()) {
        if step == 0 {
            return Err("range() step must not be zero".to_string());
        }
        // i128 holds every difference and product of two i64 values.
        let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
        let count = if (step > 0 && stop > start) || (step < 0 && stop < start) {
            ((stop - start).abs() + step.abs() - 1) / step.abs()
        } else {
            0
        };
        if count > MAX_RANGE_VALUES as i128 {
            return Err(format!("range() would produce {count} values"));
        }
        return (0..count)
            .map(|i| {
                i64::try_from(start + i * step)
                    .map(|n| Value::Number(Number::from(n)))
                    .map_err(|_| "range() bounds overflow".to_string())
            })
            .collect();
    }

    let (start, stop, step) = (
        start.as_f64().unwrap_or_default(),
        stop.as_f64().unwrap_or_default(),
        step.as_f64().unwrap_or_default(),
    );
    if step == 0.0 || !step.is_finite() {
        return Err("range() step must be a non-zero finite number".to_string());
    }
    let mut out = Vec::new();
    let mut i = 0_u32;
    loop {
        let value = start + f64::from(i) * step;
        if (step > 0.0 && value >= stop) || (step < 0.0 && value <= stop) {
            break;
        }
        if out.len() >= MAX_RANGE_VALUES {
            return Err("range() produces too many values".to_string());
        }
        out.push(Value::Number(Number::from(value)));
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<Value> {
        values.iter().map(|s| Value::String((*s).to_string())).collect()
    }

    #[test]
    fn test_parse_prefixes() {
        assert_eq!(Override::parse("seed=1").unwrap().kind, OverrideKind::Change);
        assert_eq!(Override::parse("+seed=1").unwrap().kind, OverrideKind::Add);
        assert_eq!(Override::parse("++seed=1").unwrap().kind, OverrideKind::Force);
        let delete = Override::parse("~callbacks").unwrap();
        assert_eq!(delete.kind, OverrideKind::Delete);
        assert_eq!(delete.value, OverrideValue::Absent);
    }

    #[test]
    fn test_comma_list_is_sweep() {
        let o = Override::parse("dataset=regression/linear,regression/sinusoid").unwrap();
        assert_eq!(o.value, OverrideValue::Sweep(strings(&["regression/linear", "regression/sinusoid"])));
    }

    #[test]
    fn test_bracket_list_is_single_sequence() {
        let o = Override::parse("++logger.tags=[x,y]").unwrap();
        assert_eq!(o.value, OverrideValue::Single(Value::Sequence(strings(&["x", "y"]))));

        let o = Override::parse("task.probe_n_context_points=[1,5,50]").unwrap();
        let OverrideValue::Single(Value::Sequence(items)) = o.value else {
            panic!("expected a sequence");
        };
        assert_eq!(items.iter().filter_map(Value::as_u64).collect::<Vec<_>>(), vec![1, 5, 50]);
    }

    #[test]
    fn test_quoted_comma_is_single_string() {
        let o = Override::parse("logger.name='a,b'").unwrap();
        assert_eq!(o.value, OverrideValue::Single(Value::String("a,b".to_string())));
    }

    #[test]
    fn test_scalar_types() {
        let single = |text: &str| match Override::parse(text).unwrap().value {
            OverrideValue::Single(v) => v,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(single("a=1"), Value::Number(1.into()));
        assert_eq!(single("a=true"), Value::Bool(true));
        assert_eq!(single("a=null"), Value::Null);
        assert_eq!(single("a="), Value::String(String::new()));
        assert_eq!(single("a=1e-4").as_f64(), Some(1e-4));
        assert_eq!(single("a=${save_dir}/logs"), Value::String("${save_dir}/logs".to_string()));
        assert_eq!(single("a=~"), Value::Null);
        assert_eq!(single("++logger.name=#run1"), Value::String("#run1".to_string()));
        assert_eq!(single("a=foo #bar"), Value::String("foo #bar".to_string()));
        assert_eq!(single("a=---"), Value::String("---".to_string()));
        assert_eq!(single("a=!tag x"), Value::String("!tag x".to_string()));
    }

    #[test]
    fn test_range_and_choice() {
        let o = Override::parse("seed=range(0,3)").unwrap();
        assert_eq!(o.value, OverrideValue::Sweep(vec![0.into(), 1.into(), 2.into()]));
        let o = Override::parse("seed=range(3)").unwrap();
        assert_eq!(o.assignments().len(), 3);
        let o = Override::parse("seed=range(10,0,-5)").unwrap();
        assert_eq!(o.value, OverrideValue::Sweep(vec![10.into(), 5.into()]));
        let o = Override::parse("task.lr=choice(0.1,0.01)").unwrap();
        assert_eq!(o.assignments().len(), 2);
        assert!(Override::parse("seed=range(0,3,0)").is_err());
    }

    #[test]
    fn test_range_at_integer_limits() {
        let o = Override::parse("a=range(-9223372036854775808,9223372036854775807,4611686018427387904)").unwrap();
        assert_eq!(
            o.value,
            OverrideValue::Sweep(vec![
                i64::MIN.into(),
                (i64::MIN + (1 << 62)).into(),
                0.into(),
                (1_i64 << 62).into(),
            ])
        );
        let err = Override::parse("a=range(-9223372036854775808,9223372036854775807)").unwrap_err();
        assert!(err.to_string().contains("range() would produce"));
    }

    #[test]
    fn test_invalid_overrides() {
        assert!(Override::parse("seed").is_err());
        assert!(Override::parse("=1").is_err());
        assert!(Override::parse("a=[1,2").is_err());
        assert!(Override::parse("a='open").is_err());
        assert!(Override::parse("~a=1,2").is_err());
    }

    #[test]
    fn test_apply_change_add_force_delete() {
        let mut cfg = ConfigNode::parse_yaml("task:\n  lr: 0.1\n").unwrap();

        let change = Override::parse("task.lr=0.5").unwrap().assignments().remove(0);
        change.apply(&mut cfg).unwrap();
        assert_eq!(cfg.get_path("task.lr").and_then(Value::as_f64), Some(0.5));

        let unknown = Override::parse("task.momentum=0.9").unwrap().assignments().remove(0);
        assert!(matches!(unknown.apply(&mut cfg), Err(ConfigError::UnknownKey { .. })));

        let force = Override::parse("++task.momentum=0.9").unwrap().assignments().remove(0);
        force.apply(&mut cfg).unwrap();
        assert_eq!(cfg.get_path("task.momentum").and_then(Value::as_f64), Some(0.9));

        let add = Override::parse("+task.lr=1").unwrap().assignments().remove(0);
        assert!(matches!(add.apply(&mut cfg), Err(ConfigError::KeyExists { .. })));

        let delete = Override::parse("~task.momentum").unwrap().assignments().remove(0);
        delete.apply(&mut cfg).unwrap();
        assert!(!cfg.contains_path("task.momentum"));
    }

    #[test]
    fn test_target_override_keeps_siblings() {
        let mut cfg =
            ConfigNode::parse_yaml("task:\n  loss_fn:\n    _target_: torch.nn.MSELoss\n    reduction: none\n").unwrap();
        let o = Override::parse("task.loss_fn._target_=torch.nn.L1Loss").unwrap().assignments().remove(0);
        o.apply(&mut cfg).unwrap();
        assert_eq!(cfg.get_path("task.loss_fn._target_").and_then(Value::as_str), Some("torch.nn.L1Loss"));
        assert_eq!(cfg.get_path("task.loss_fn.reduction").and_then(Value::as_str), Some("none"));
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["seed=3", "++logger.tags=[x,y]", "~callbacks", "name='a,b'", "name=#run1", "name='foo #bar'"] {
            let o = Override::parse(text).unwrap().assignments().remove(0);
            assert_eq!(o.to_string(), text);
        }
    }
}
