// compact pattern syntax, used by tests and the driver (EBNF)
// <rule>  ::= [ '^' ] <regex> [ '/' <regex> ] [ '$' ]
// <regex> ::= <term> { '|' <term> }
// <term> ::= <factor> { <factor> }
// <factor> ::= <base> { '*' | '+' | '?' | <count> }
// <count> ::= '{' <int> [ ',' [ <int> ] ] '}'
// <base> ::= <char>
// |  '[' [ '^' ] <class-item>+ ']'   (character classes)
// |  '.'                             (anything but newline)
// |  '\' <escape>
// |  '"' <char>* '"'                 (quoted literal)
// |  '(' <regex> ')'

use std::collections::VecDeque;

use lexa_util::RangeUInt;
use thiserror::Error;

use crate::alphabet::{CharRange, CodePoint, RangeSet};
use crate::ast::{Pattern, Regex, RegexClass};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegexError {
    #[error("unexpected end of pattern")]
    UnexpectedEnd,
    #[error("unexpected `{0}` in pattern")]
    Unexpected(char),
    #[error("unbalanced parenthesis")]
    Unbalanced,
    #[error("malformed repetition count `{0}`")]
    BadCount(String),
    #[error("malformed escape sequence `\\{0}`")]
    BadEscape(String),
    #[error("empty character class")]
    EmptyClass,
    #[error("inverted range in character class")]
    InvertedRange,
    #[error("empty pattern")]
    Empty,
}

struct Tokens {
    chars: VecDeque<char>,
    // a rule-level parse stops at `/` and a final `$`
    rule_level: bool,
}

impl Tokens {
    fn new(s: &str, rule_level: bool) -> Tokens {
        Tokens { chars: s.chars().collect(), rule_level }
    }

    fn front(&self) -> Option<char> {
        self.chars.front().copied()
    }

    fn pop(&mut self) -> Result<char, RegexError> {
        self.chars.pop_front().ok_or(RegexError::UnexpectedEnd)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.front() == Some(c) {
            self.chars.pop_front();
            true
        } else {
            false
        }
    }

    fn at_term_end(&self) -> bool {
        match self.front() {
            None | Some('|') | Some(')') => true,
            Some('/') => self.rule_level,
            Some('$') => self.rule_level && self.chars.len() == 1,
            Some(_) => false,
        }
    }
}

// basic recursive descent parsing
impl Regex {
    fn parse_regex(tokens: &mut Tokens) -> Result<Regex, RegexError> {
        let term = Self::parse_term(tokens)?;
        let mut alternates: Vec<Regex> = vec![term];
        while tokens.eat('|') {
            alternates.push(Self::parse_term(tokens)?);
        }

        if alternates.len() == 1 {
            Ok(alternates.remove(0))
        } else {
            Ok(Regex::Alternation(alternates))
        }
    }

    fn parse_term(tokens: &mut Tokens) -> Result<Regex, RegexError> {
        let mut factors: Vec<Regex> = Vec::new();
        while !tokens.at_term_end() {
            let factor = Self::parse_factor(tokens)?;
            factors.push(factor);
        }

        match factors.len() {
            0 => Err(RegexError::Empty),
            1 => Ok(factors.remove(0)),
            _ => Ok(Regex::Concatenation(factors)),
        }
    }

    fn parse_count(tokens: &mut Tokens) -> Result<(u32, RangeUInt), RegexError> {
        let mut count_string = String::new();
        loop {
            let c = tokens.pop()?;
            if c == '}' {
                break;
            }
            count_string.push(c);
        }

        let parse_str = |x: &str| x.trim().parse::<u32>().map_err(|_| RegexError::BadCount(count_string.clone()));

        let (low, high) = match count_string.split_once(',') {
            Some((first, second)) => {
                let low = parse_str(first)?;
                if second.trim().is_empty() {
                    (low, RangeUInt::Infinite)
                } else {
                    (low, RangeUInt::Finite(parse_str(second)?))
                }
            }
            None => {
                let count = parse_str(&count_string)?;
                (count, RangeUInt::Finite(count))
            }
        };

        match high {
            RangeUInt::Finite(high) if high < low => Err(RegexError::BadCount(count_string)),
            _ => Ok((low, high)),
        }
    }

    fn parse_factor(tokens: &mut Tokens) -> Result<Regex, RegexError> {
        let mut factor = Self::parse_base(tokens)?;
        while let Some(x) = tokens.front() {
            factor = match x {
                '*' => {
                    tokens.pop()?;
                    Regex::Kleene(Box::new(factor))
                }
                '+' => {
                    tokens.pop()?;
                    Regex::Plus(Box::new(factor))
                }
                '?' => {
                    tokens.pop()?;
                    Regex::Optional(Box::new(factor))
                }
                '{' => {
                    tokens.pop()?;
                    let (min, max) = Self::parse_count(tokens)?;
                    Regex::Repeat { inner: Box::new(factor), min, max }
                }
                _ => break,
            };
        }

        Ok(factor)
    }

    fn escape_code(tokens: &mut Tokens) -> Result<CodePoint, RegexError> {
        let code = tokens.pop()?;
        let escaped = match code {
            'n' => '\n' as CodePoint,
            'a' => 0x07,
            'f' => 0x0C,
            't' => '\t' as CodePoint,
            'r' => '\r' as CodePoint,
            'v' => 0x0B,
            '0' => 0,
            'x' => {
                let hex: String = [tokens.pop()?, tokens.pop()?].iter().collect();
                u32::from_str_radix(&hex, 16).map_err(|_| RegexError::BadEscape(format!("x{}", hex)))?
            }
            'u' => {
                let mut hex = String::new();
                if tokens.eat('{') {
                    loop {
                        let c = tokens.pop()?;
                        if c == '}' {
                            break;
                        }
                        hex.push(c);
                    }
                } else {
                    for _ in 0..4 {
                        hex.push(tokens.pop()?);
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| RegexError::BadEscape(format!("u{}", hex)))? as CodePoint
            }
            x => x as CodePoint,
        };
        Ok(escaped)
    }

    fn parse_class_char(tokens: &mut Tokens) -> Result<CodePoint, RegexError> {
        match tokens.pop()? {
            '\\' => Self::escape_code(tokens),
            x => Ok(x as CodePoint),
        }
    }

    fn parse_class(tokens: &mut Tokens) -> Result<RegexClass, RegexError> {
        let negated = tokens.eat('^');

        let mut ranges: Vec<CharRange> = Vec::new();
        while let Some(x) = tokens.front() {
            if x == ']' {
                break;
            }

            let low = Self::parse_class_char(tokens)?;
            // `-` directly before `]` is a literal
            let is_range = tokens.front() == Some('-') && tokens.chars.get(1).is_some_and(|c| *c != ']');
            if is_range {
                tokens.pop()?;
                let high = Self::parse_class_char(tokens)?;
                if high < low {
                    return Err(RegexError::InvertedRange);
                }
                ranges.push(CharRange::new(low, high));
            } else {
                ranges.push(CharRange::single(low));
            }
        }

        if ranges.is_empty() {
            return Err(RegexError::EmptyClass);
        }

        Ok(RegexClass::new(RangeSet::from_ranges(ranges), negated))
    }

    fn parse_base(tokens: &mut Tokens) -> Result<Regex, RegexError> {
        let front = tokens.pop()?;
        match front {
            '\\' => Ok(Regex::Char(Self::escape_code(tokens)?)),
            '(' => {
                let parenthesized_regex = Self::parse_regex(tokens)?;
                if tokens.eat(')') {
                    Ok(parenthesized_regex)
                } else {
                    Err(RegexError::Unbalanced)
                }
            }
            '[' => {
                let class = Self::parse_class(tokens)?;
                if tokens.eat(']') {
                    Ok(Regex::Class(class))
                } else {
                    Err(RegexError::UnexpectedEnd)
                }
            }
            '"' => {
                let mut text = Vec::new();
                loop {
                    match tokens.pop()? {
                        '"' => break,
                        '\\' => text.push(Regex::Char(Self::escape_code(tokens)?)),
                        c => text.push(Regex::Char(c as CodePoint)),
                    }
                }
                Ok(match text.len() {
                    0 => Regex::Empty,
                    1 => text.remove(0),
                    _ => Regex::Concatenation(text),
                })
            }
            '.' => Ok(Regex::Class(RegexClass::any_but_newline())),
            '*' | '+' | '?' | '{' | ')' => Err(RegexError::Unexpected(front)),
            c => Ok(Regex::Char(c as CodePoint)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(re_str: &str) -> Result<Regex, RegexError> {
        let mut tokens = Tokens::new(re_str, false);
        let re = Self::parse_regex(&mut tokens)?;
        match tokens.front() {
            None => Ok(re),
            Some(')') => Err(RegexError::Unbalanced),
            Some(c) => Err(RegexError::Unexpected(c)),
        }
    }
}

impl Pattern {
    /// Parses `[^]body[/context][$]`.
    pub fn parse(pattern: &str) -> Result<Pattern, RegexError> {
        let mut tokens = Tokens::new(pattern, true);
        let bol = tokens.eat('^');
        let body = Regex::parse_regex(&mut tokens)?;
        let context = if tokens.eat('/') {
            Some(Regex::parse_regex(&mut tokens)?)
        } else {
            None
        };
        let eol = tokens.eat('$');
        match tokens.front() {
            None => Ok(Pattern { bol, body, context, eol }),
            Some(')') => Err(RegexError::Unbalanced),
            Some(c) => Err(RegexError::Unexpected(c)),
        }
    }
}
