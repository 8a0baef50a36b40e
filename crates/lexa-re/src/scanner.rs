use bit_set::BitSet;
use thiserror::Error;

use crate::alphabet::CodePoint;
use crate::ast::{ConditionId, RuleId};
use crate::dfa::{Dfa, DfaStateId};
use crate::nfa::{AcceptTag, Nfa};
use crate::partition::{ClassId, Partition};
use crate::table::Tables;

/// Anything longest-match scanning can run on: the NFA (as state sets), the
/// DFA, and the compressed tables all implement it, so every stage of the
/// pipeline is checked with the same driver.
pub trait Recognizer {
    type State;

    fn start(&self, condition: ConditionId) -> Self::State;
    /// `None` is the dead state.
    fn step(&self, state: &Self::State, class: ClassId) -> Option<Self::State>;
    fn accept(&self, state: &Self::State) -> Option<AcceptTag>;
    fn class_of(&self, c: CodePoint) -> Option<ClassId>;
    fn bol_class(&self) -> Option<ClassId>;
    fn eol_class(&self) -> Option<ClassId>;
}

/// A longest match at some input position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub rule: RuleId,
    /// token length after trailing context is cut off
    pub length: usize,
    /// symbols consumed including trailing context
    pub matched: usize,
}

/// Longest match of `input` (a prefix is matched, the rest is ignored).
///
/// Candidates are ranked by consumed length first and rule priority second.
/// `at_bol` feeds the BOL pseudo-symbol first; the EOL pseudo-symbol is
/// peeked before a line feed and at the end of `input`. Matches that would
/// yield an empty token are ignored.
pub fn longest_match<R: Recognizer>(
    recognizer: &R,
    condition: ConditionId,
    input: &[CodePoint],
    at_bol: bool,
) -> Option<Match> {
    let mut state = recognizer.start(condition);
    if at_bol {
        if let Some(bol) = recognizer.bol_class() {
            state = recognizer.step(&state, bol)?;
        }
    }

    let mut best: Option<(usize, AcceptTag)> = None;
    let mut consider = |matched: usize, tag: AcceptTag| {
        if tag.trailing.token_length(matched) == 0 {
            return;
        }
        if best.map_or(true, |(len, current)| matched > len || (matched == len && tag < current)) {
            best = Some((matched, tag));
        }
    };

    let mut cursor = 0;
    loop {
        if let Some(tag) = recognizer.accept(&state) {
            consider(cursor, tag);
        }
        if cursor == input.len() || input[cursor] == '\n' as CodePoint {
            if let Some(eol) = recognizer.eol_class() {
                if let Some(tag) = recognizer.step(&state, eol).and_then(|s| recognizer.accept(&s)) {
                    consider(cursor, tag);
                }
            }
        }
        if cursor == input.len() {
            break;
        }
        let Some(class) = recognizer.class_of(input[cursor]) else {
            break;
        };
        match recognizer.step(&state, class) {
            Some(next) => state = next,
            None => break,
        }
        cursor += 1;
    }

    best.map(|(matched, tag)| Match { rule: tag.rule, length: tag.trailing.token_length(matched), matched })
}

/// The NFA together with the partition it was built over.
pub struct NfaRecognizer<'a> {
    pub nfa: &'a Nfa,
    pub partition: &'a Partition,
}

impl Recognizer for NfaRecognizer<'_> {
    type State = BitSet;

    fn start(&self, condition: ConditionId) -> BitSet {
        let mut set = BitSet::with_capacity(self.nfa.num_states());
        set.insert(self.nfa.start(condition).index());
        self.nfa.epsilon_closure(&mut set);
        set
    }

    fn step(&self, state: &BitSet, class: ClassId) -> Option<BitSet> {
        let mut next = self.nfa.delta(state, class);
        if next.is_empty() {
            return None;
        }
        self.nfa.epsilon_closure(&mut next);
        Some(next)
    }

    fn accept(&self, state: &BitSet) -> Option<AcceptTag> {
        self.nfa.resolve_accept(state)
    }

    fn class_of(&self, c: CodePoint) -> Option<ClassId> {
        self.partition.class_of(c)
    }

    fn bol_class(&self) -> Option<ClassId> {
        self.partition.bol_class()
    }

    fn eol_class(&self) -> Option<ClassId> {
        self.partition.eol_class()
    }
}

/// A DFA together with the partition it was built over.
pub struct DfaRecognizer<'a> {
    pub dfa: &'a Dfa,
    pub partition: &'a Partition,
}

impl Recognizer for DfaRecognizer<'_> {
    type State = DfaStateId;

    fn start(&self, condition: ConditionId) -> DfaStateId {
        self.dfa.start(condition)
    }

    fn step(&self, state: &DfaStateId, class: ClassId) -> Option<DfaStateId> {
        self.dfa.next(*state, class)
    }

    fn accept(&self, state: &DfaStateId) -> Option<AcceptTag> {
        self.dfa.accept(*state)
    }

    fn class_of(&self, c: CodePoint) -> Option<ClassId> {
        self.partition.class_of(c)
    }

    fn bol_class(&self) -> Option<ClassId> {
        self.dfa.bol_class()
    }

    fn eol_class(&self) -> Option<ClassId> {
        self.dfa.eol_class()
    }
}

impl Recognizer for Tables {
    type State = u32;

    fn start(&self, condition: ConditionId) -> u32 {
        Tables::start(self, condition)
    }

    fn step(&self, state: &u32, class: ClassId) -> Option<u32> {
        self.next_state(*state, class)
    }

    fn accept(&self, state: &u32) -> Option<AcceptTag> {
        Tables::accept(self, *state)
    }

    fn class_of(&self, c: CodePoint) -> Option<ClassId> {
        Tables::class_of(self, c)
    }

    fn bol_class(&self) -> Option<ClassId> {
        self.bol_class
    }

    fn eol_class(&self) -> Option<ClassId> {
        self.eol_class
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub rule: RuleId,
    pub start: usize,
    pub end: usize,
}

pub enum ScannerResult {
    /// carries the `<<EOF>>` rule of the current start condition, if any
    EndOfInput(Option<RuleId>),
    Failed,
    Ok(Token),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("no rule matches at offset {offset}")]
    NoMatch { offset: usize },
}

/// Longest-match scanner over compressed tables.
pub struct TableScanner<'t> {
    tables: &'t Tables,
    condition: ConditionId,
}

impl<'t> TableScanner<'t> {
    pub fn new(tables: &'t Tables) -> TableScanner<'t> {
        TableScanner { tables, condition: ConditionId::new(0) }
    }

    pub fn condition(&self) -> ConditionId {
        self.condition
    }

    pub fn set_condition(&mut self, condition: ConditionId) {
        assert!(condition.index() < self.tables.starts.len(), "unknown start condition {}", condition);
        self.condition = condition;
    }

    // implements "maximal munch" lexing - always try to "eat" as many characters as possible to form next token
    pub fn next_word(&self, input: &[CodePoint], start_cursor: usize) -> ScannerResult {
        if start_cursor >= input.len() {
            return ScannerResult::EndOfInput(self.tables.eof_action(self.condition));
        }

        let at_bol = start_cursor == 0 || input[start_cursor - 1] == '\n' as CodePoint;
        match longest_match(self.tables, self.condition, &input[start_cursor..], at_bol) {
            Some(m) => ScannerResult::Ok(Token { rule: m.rule, start: start_cursor, end: start_cursor + m.length }),
            None => ScannerResult::Failed,
        }
    }

    /// Tokenizes all of `text` in the current start condition.
    pub fn scan_str(&self, text: &str) -> Result<Vec<(RuleId, String)>, ScanError> {
        let input: Vec<CodePoint> = text.chars().map(|c| c as CodePoint).collect();
        let mut tokens = Vec::new();
        let mut cursor = 0;
        loop {
            match self.next_word(&input, cursor) {
                ScannerResult::EndOfInput(_) => return Ok(tokens),
                ScannerResult::Failed => return Err(ScanError::NoMatch { offset: cursor }),
                ScannerResult::Ok(token) => {
                    let lexeme: String = input[token.start..token.end].iter().filter_map(|c| char::from_u32(*c)).collect();
                    tokens.push((token.rule, lexeme));
                    cursor = token.end;
                }
            }
        }
    }
}
