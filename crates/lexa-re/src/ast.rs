// AST: the rule set handed to the automaton pipeline.
//
// Producing this tree from `.lex` text is the grammar parser's job; `Regex::from_str`
// and `Pattern::parse` in `regex.rs` only cover a compact pattern syntax.

use std::fmt;

use lexa_util::{make_type_idx, RangeUInt};

use crate::alphabet::{Alphabet, CodePoint, RangeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Regex {
    Alternation(Vec<Regex>),
    Concatenation(Vec<Regex>),
    Kleene(Box<Regex>),
    Plus(Box<Regex>),
    Optional(Box<Regex>),
    Repeat {
        inner: Box<Regex>,
        min: u32,
        max: RangeUInt,
    },
    Char(CodePoint),
    Class(RegexClass),
    // matches the empty string
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegexClass {
    pub ranges: RangeSet,
    pub negated: bool,
}

impl RegexClass {
    pub fn new(ranges: RangeSet, negated: bool) -> RegexClass {
        RegexClass { ranges, negated }
    }

    /// `.`: anything but a line feed.
    pub fn any_but_newline() -> RegexClass {
        RegexClass { ranges: RangeSet::single('\n' as CodePoint), negated: true }
    }

    /// The symbols this class matches over `alphabet`. Case folding happens
    /// before negation, so `[^a]` under folding excludes both `a` and `A`.
    pub fn resolve(&self, alphabet: Alphabet, case_agnostic: bool) -> RangeSet {
        let mut set = self.ranges.clamp(alphabet);
        if case_agnostic {
            set = set.case_fold(alphabet);
        }
        if self.negated {
            set = set.negate(alphabet);
        }
        set
    }
}

impl Regex {
    pub fn literal(text: &str) -> Regex {
        let mut chars: Vec<Regex> = text.chars().map(|c| Regex::Char(c as CodePoint)).collect();
        match chars.len() {
            0 => Regex::Empty,
            1 => chars.remove(0),
            _ => Regex::Concatenation(chars),
        }
    }

    /// Number of symbols every match consumes, if that number is fixed.
    pub fn fixed_length(&self) -> Option<u32> {
        match self {
            Regex::Char(_) | Regex::Class(_) => Some(1),
            Regex::Empty => Some(0),
            Regex::Concatenation(factors) => factors
                .iter()
                .try_fold(0u32, |acc, f| f.fixed_length().map(|len| acc + len)),
            Regex::Alternation(alternates) => {
                let mut lengths = alternates.iter().map(Regex::fixed_length);
                let first = lengths.next()??;
                lengths.all(|len| len == Some(first)).then_some(first)
            }
            Regex::Kleene(inner) | Regex::Plus(inner) | Regex::Optional(inner) => {
                // only a zero-width body repeats to a fixed length
                match inner.fixed_length() {
                    Some(0) => Some(0),
                    _ => None,
                }
            }
            Regex::Repeat { inner, min, max } => {
                let len = inner.fixed_length()?;
                match max {
                    _ if len == 0 => Some(0),
                    RangeUInt::Finite(max) if max == min => Some(len * min),
                    _ => None,
                }
            }
        }
    }

    /// Calls `visit` with the resolved symbol set of every literal and class.
    pub fn visit_sets(&self, alphabet: Alphabet, case_agnostic: bool, visit: &mut impl FnMut(RangeSet)) {
        match self {
            Regex::Alternation(children) | Regex::Concatenation(children) => {
                for child in children {
                    child.visit_sets(alphabet, case_agnostic, visit);
                }
            }
            Regex::Kleene(inner) | Regex::Plus(inner) | Regex::Optional(inner) => {
                inner.visit_sets(alphabet, case_agnostic, visit)
            }
            Regex::Repeat { inner, .. } => inner.visit_sets(alphabet, case_agnostic, visit),
            Regex::Char(c) => visit(char_set(*c, alphabet, case_agnostic)),
            Regex::Class(class) => visit(class.resolve(alphabet, case_agnostic)),
            Regex::Empty => {}
        }
    }
}

pub(crate) fn char_set(c: CodePoint, alphabet: Alphabet, case_agnostic: bool) -> RangeSet {
    let set = RangeSet::single(c).clamp(alphabet);
    if case_agnostic {
        set.case_fold(alphabet)
    } else {
        set
    }
}

/// Line/column of a rule in the `.lex` source, 1-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(line: u32, column: u32) -> SourcePos {
        SourcePos { line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// `^`: only matches at the start of a line
    pub bol: bool,
    pub body: Regex,
    /// `body/context`
    pub context: Option<Regex>,
    /// `$`: only matches right before a line end
    pub eol: bool,
}

impl Pattern {
    pub fn new(body: Regex) -> Pattern {
        Pattern { bol: false, body, context: None, eol: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RulePattern {
    Match(Pattern),
    /// `<<EOF>>`
    EndOfFile,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleConditions {
    /// no `<...>` prefix: INITIAL and every inclusive condition
    Default,
    /// `<*>`
    All,
    Named(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub name: Option<String>,
    pub pattern: RulePattern,
    pub conditions: RuleConditions,
    pub position: SourcePos,
}

impl Rule {
    pub fn new(pattern: Pattern) -> Rule {
        Rule {
            name: None,
            pattern: RulePattern::Match(pattern),
            conditions: RuleConditions::Default,
            position: SourcePos::default(),
        }
    }

    pub fn end_of_file() -> Rule {
        Rule {
            name: None,
            pattern: RulePattern::EndOfFile,
            conditions: RuleConditions::Default,
            position: SourcePos::default(),
        }
    }

    pub fn named(mut self, name: &str) -> Rule {
        self.name = Some(name.to_string());
        self
    }

    pub fn in_conditions(mut self, conditions: RuleConditions) -> Rule {
        self.conditions = conditions;
        self
    }

    pub fn at(mut self, position: SourcePos) -> Rule {
        self.position = position;
        self
    }

    pub fn display_name(&self, id: RuleId) -> String {
        match &self.name {
            Some(name) => format!("rule {} ({})", id, name),
            None => format!("rule {}", id),
        }
    }
}

make_type_idx!(pub RuleId, Rule);
make_type_idx!(pub ConditionId, StartCondition);

pub const INITIAL: &str = "INITIAL";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartCondition {
    pub name: String,
    /// `%x`: rules without an explicit condition list are not active here
    pub exclusive: bool,
}

/// A complete lexical specification: start conditions plus rules in
/// declaration order (earlier rules win ties).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexSpec {
    conditions: Vec<StartCondition>,
    pub rules: Vec<Rule>,
}

impl Default for LexSpec {
    fn default() -> Self {
        LexSpec::new()
    }
}

impl LexSpec {
    pub fn new() -> LexSpec {
        LexSpec {
            conditions: vec![StartCondition { name: INITIAL.to_string(), exclusive: false }],
            rules: Vec::new(),
        }
    }

    /// Declares a start condition; redeclaring an existing name returns its id.
    pub fn declare_condition(&mut self, name: &str, exclusive: bool) -> ConditionId {
        if let Some(id) = self.condition_id(name) {
            return id;
        }
        ConditionId::from_push(
            &mut self.conditions,
            StartCondition { name: name.to_string(), exclusive },
        )
    }

    pub fn add_rule(&mut self, rule: Rule) -> RuleId {
        RuleId::from_push(&mut self.rules, rule)
    }

    pub fn conditions(&self) -> &[StartCondition] {
        &self.conditions
    }

    pub fn condition_id(&self, name: &str) -> Option<ConditionId> {
        self.conditions
            .iter()
            .position(|c| c.name == name)
            .map(ConditionId::new)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.rules.len()).map(RuleId::new)
    }

    /// Conditions `rule` is active in. Names that were never declared are
    /// returned in the error vector.
    pub fn active_conditions(&self, rule: &Rule) -> (Vec<ConditionId>, Vec<String>) {
        match &rule.conditions {
            RuleConditions::Default => {
                let ids = self
                    .conditions
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.exclusive)
                    .map(|(i, _)| ConditionId::new(i))
                    .collect();
                (ids, Vec::new())
            }
            RuleConditions::All => ((0..self.conditions.len()).map(ConditionId::new).collect(), Vec::new()),
            RuleConditions::Named(names) => {
                let mut ids = Vec::new();
                let mut unknown = Vec::new();
                for name in names {
                    match self.condition_id(name) {
                        Some(id) if !ids.contains(&id) => ids.push(id),
                        Some(_) => {}
                        None => unknown.push(name.clone()),
                    }
                }
                (ids, unknown)
            }
        }
    }

    /// Whether any rule uses `^` / `$`.
    pub fn uses_anchors(&self) -> (bool, bool) {
        self.rules.iter().fold((false, false), |(bol, eol), rule| match &rule.pattern {
            RulePattern::Match(p) => (bol || p.bol, eol || p.eol),
            RulePattern::EndOfFile => (bol, eol),
        })
    }
}
