//! Plain-text rule definitions, one rule per line:
//!
//! ```text
//! # comment
//! %s STRING            (inclusive start conditions)
//! %x COMMENT           (exclusive start conditions)
//! Name: <COND,...>pattern
//! <*>pattern
//! <COMMENT><<EOF>>
//! ```
//!
//! The name and the condition prefix are optional.

use thiserror::Error;

use crate::ast::{LexSpec, Pattern, Rule, RuleConditions, SourcePos};
use crate::regex::RegexError;

const EOF_PATTERN: &str = "<<EOF>>";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexemeDefError {
    #[error("{position}: {source}")]
    Pattern { position: SourcePos, source: RegexError },
    #[error("{position}: `{directive}` needs at least one condition name")]
    EmptyDeclaration { position: SourcePos, directive: String },
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// `Name: rest` -> (Some(Name), rest)
fn split_name(line: &str) -> (Option<&str>, &str) {
    match line.split_once(':') {
        Some((name, rest)) if is_identifier(name.trim()) && rest.starts_with(' ') => (Some(name.trim()), rest.trim_start()),
        _ => (None, line),
    }
}

// `<A,B>rest` or `<*>rest`; `<` not followed by a condition list is part of the pattern
fn split_conditions(pattern: &str) -> (RuleConditions, &str) {
    let Some(inner_and_rest) = pattern.strip_prefix('<') else {
        return (RuleConditions::Default, pattern);
    };
    let Some((inner, rest)) = inner_and_rest.split_once('>') else {
        return (RuleConditions::Default, pattern);
    };
    if rest.is_empty() {
        return (RuleConditions::Default, pattern);
    }
    if inner == "*" {
        return (RuleConditions::All, rest);
    }
    let names: Vec<&str> = inner.split(',').map(str::trim).collect();
    if names.iter().all(|name| is_identifier(name)) {
        (RuleConditions::Named(names.into_iter().map(String::from).collect()), rest)
    } else {
        (RuleConditions::Default, pattern)
    }
}

pub fn parse_lexeme_def(def_string: &str) -> Result<LexSpec, LexemeDefError> {
    let mut spec = LexSpec::new();
    for (i, raw) in def_string.lines().enumerate() {
        let line = raw.trim();
        let indent = raw.len() - raw.trim_start().len();
        let line_no = i as u32 + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let declaration = ["%s", "%x"].into_iter().find_map(|d| {
            let rest = line.strip_prefix(d)?;
            (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some((d, rest))
        });
        if let Some((directive, rest)) = declaration {
            let names: Vec<&str> = rest.split_whitespace().collect();
            if names.is_empty() {
                return Err(LexemeDefError::EmptyDeclaration {
                    position: SourcePos::new(line_no, indent as u32 + 1),
                    directive: directive.to_string(),
                });
            }
            for name in names {
                spec.declare_condition(name, directive == "%x");
            }
            continue;
        }

        let (name, rest) = split_name(line);
        let (conditions, pattern) = split_conditions(rest);
        let column = (indent + line.len() - pattern.len()) as u32 + 1;
        let position = SourcePos::new(line_no, column);

        let rule = if pattern == EOF_PATTERN {
            Rule::end_of_file()
        } else {
            let pattern = Pattern::parse(pattern).map_err(|source| LexemeDefError::Pattern { position, source })?;
            Rule::new(pattern)
        };
        let rule = rule.in_conditions(conditions).at(position);
        spec.add_rule(match name {
            Some(name) => rule.named(name),
            None => rule,
        });
    }
    Ok(spec)
}
