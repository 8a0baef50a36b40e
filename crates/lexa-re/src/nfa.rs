use std::cmp::Ordering;
use std::collections::VecDeque;

use bit_set::BitSet;
use lexa_util::{make_type_idx, RangeUInt};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::ast::{char_set, ConditionId, LexSpec, Pattern, Regex, Rule, RuleId, RulePattern};
use crate::diagnostics::{Diagnostic, DiagnosticKind, ErrorReporter, Severity};
use crate::options::NfaConfig;
use crate::partition::{ClassId, Partition};

/// How much of a trailing-context match belongs to the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrailingContext {
    None,
    /// the token is the first `n` symbols of the match
    FixedHead(u32),
    /// the last `n` symbols of the match are context
    FixedTail(u32),
}

impl TrailingContext {
    /// Token length for a match that consumed `matched` symbols.
    pub fn token_length(self, matched: usize) -> usize {
        match self {
            TrailingContext::None => matched,
            TrailingContext::FixedHead(n) => n as usize,
            TrailingContext::FixedTail(n) => matched - n as usize,
        }
    }
}

/// Marks an accepting state: which rule fires and how it ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcceptTag {
    pub rule: RuleId,
    /// declaration order; lower wins
    pub priority: u32,
    pub trailing: TrailingContext,
}

impl Ord for AcceptTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.rule.cmp(&other.rule))
            .then(self.trailing.cmp(&other.trailing))
    }
}

impl PartialOrd for AcceptTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NfaState {
    /// labelled transitions: (classes, target)
    pub(crate) transitions: Vec<(BitSet, NfaStateId)>,
    pub(crate) epsilon: Vec<NfaStateId>,
    pub(crate) accept: Option<AcceptTag>,
}

make_type_idx!(pub NfaStateId, NfaState);

// pointer-based graphs in safe rust are somewhat tricky, so states live in an
// arena and refer to each other by index
#[derive(Debug, Clone)]
pub struct Nfa {
    pub(crate) states: Vec<NfaState>,
    // one start per start condition, indexed by ConditionId
    pub(crate) starts: Vec<NfaStateId>,
    pub(crate) num_classes: usize,
    pub(crate) bol: Option<ClassId>,
    pub(crate) eol: Option<ClassId>,
}

struct Builder<'a> {
    states: Vec<NfaState>,
    partition: &'a Partition,
    config: &'a NfaConfig,
}

impl Builder<'_> {
    fn new_state(&mut self) -> NfaStateId {
        NfaStateId::from_push(&mut self.states, NfaState::default())
    }

    fn epsilon(&mut self, from: NfaStateId, to: NfaStateId) {
        self.states[from].epsilon.push(to);
    }

    fn edge(&mut self, from: NfaStateId, classes: BitSet, to: NfaStateId) {
        // an empty label can never fire; leaving it out keeps dead ends visible
        if !classes.is_empty() {
            self.states[from].transitions.push((classes, to));
        }
    }

    fn class_edge(&mut self, class: ClassId) -> BitSet {
        let mut classes = BitSet::with_capacity(self.partition.num_classes());
        classes.insert(class as usize);
        classes
    }

    // re -> (initial, accept) of a fresh fragment
    fn recursive_helper(&mut self, re: &Regex) -> (NfaStateId, NfaStateId) {
        match re {
            Regex::Alternation(alternates) => {
                let start = self.new_state();
                let end = self.new_state();
                for alternate in alternates {
                    let (alternate_start, alternate_end) = self.recursive_helper(alternate);
                    self.epsilon(start, alternate_start);
                    self.epsilon(alternate_end, end);
                }
                (start, end)
            }
            Regex::Concatenation(factors) => {
                let heads_tails: Vec<(NfaStateId, NfaStateId)> =
                    factors.iter().map(|x| self.recursive_helper(x)).collect();
                let (Some(first), Some(last)) = (heads_tails.first(), heads_tails.last()) else {
                    return self.recursive_helper(&Regex::Empty);
                };
                let (start, end) = (first.0, last.1);
                for pair in heads_tails.windows(2) {
                    self.epsilon(pair[0].1, pair[1].0);
                }
                (start, end)
            }
            Regex::Kleene(inner) => {
                let (inner_start, inner_end) = self.recursive_helper(inner);
                let start = self.new_state();
                let end = self.new_state();
                self.epsilon(inner_end, inner_start);
                self.epsilon(inner_end, end);
                self.epsilon(start, inner_start);
                self.epsilon(start, end);
                (start, end)
            }
            Regex::Plus(inner) => {
                let (inner_start, inner_end) = self.recursive_helper(inner);
                let start = self.new_state();
                let end = self.new_state();
                self.epsilon(start, inner_start);
                self.epsilon(inner_end, inner_start);
                self.epsilon(inner_end, end);
                (start, end)
            }
            Regex::Optional(inner) => {
                let (inner_start, inner_end) = self.recursive_helper(inner);
                let start = self.new_state();
                let end = self.new_state();
                self.epsilon(start, inner_start);
                self.epsilon(start, end);
                self.epsilon(inner_end, end);
                (start, end)
            }
            Regex::Repeat { inner, min, max } => self.repeat(inner, *min, *max),
            Regex::Char(c) => {
                let set = char_set(*c, self.config.alphabet, self.config.case_agnostic);
                let classes = self.partition.classes_of(&set);
                let start = self.new_state();
                let end = self.new_state();
                self.edge(start, classes, end);
                (start, end)
            }
            Regex::Class(class) => {
                let set = class.resolve(self.config.alphabet, self.config.case_agnostic);
                let classes = self.partition.classes_of(&set);
                let start = self.new_state();
                let end = self.new_state();
                self.edge(start, classes, end);
                (start, end)
            }
            Regex::Empty => {
                let start = self.new_state();
                let end = self.new_state();
                self.epsilon(start, end);
                (start, end)
            }
        }
    }

    // inner{min,max}: `min` mandatory copies followed by either a starred copy
    // or `max - min` optional copies, each of which may exit early
    fn repeat(&mut self, inner: &Regex, min: u32, max: RangeUInt) -> (NfaStateId, NfaStateId) {
        let start = self.new_state();
        let mut cursor = start;
        for _ in 0..min {
            let (s, e) = self.recursive_helper(inner);
            self.epsilon(cursor, s);
            cursor = e;
        }

        let end = self.new_state();
        match max {
            RangeUInt::Infinite => {
                let (s, e) = self.recursive_helper(&Regex::Kleene(Box::new(inner.clone())));
                self.epsilon(cursor, s);
                self.epsilon(e, end);
            }
            RangeUInt::Finite(max) => {
                for _ in min..max {
                    let (s, e) = self.recursive_helper(inner);
                    self.epsilon(cursor, s);
                    self.epsilon(cursor, end);
                    cursor = e;
                }
                self.epsilon(cursor, end);
            }
        }
        (start, end)
    }

    fn reaches(&self, from: NfaStateId, to: NfaStateId, epsilon_only: bool) -> bool {
        let mut visited = BitSet::with_capacity(self.states.len());
        let mut queue: VecDeque<NfaStateId> = VecDeque::from([from]);
        while let Some(i) = queue.pop_front() {
            if i == to {
                return true;
            }
            if !visited.insert(i.index()) {
                continue;
            }
            let state = &self.states[i];
            queue.extend(state.epsilon.iter().copied());
            if !epsilon_only {
                queue.extend(state.transitions.iter().map(|(_, next)| *next));
            }
        }
        false
    }
}

fn report(reporter: &mut dyn ErrorReporter, severity: Severity, kind: DiagnosticKind, id: RuleId, rule: &Rule, message: String) {
    reporter.report(Diagnostic {
        severity,
        kind,
        rule: Some(id),
        position: rule.position,
        message,
    });
}

fn trailing_context(pattern: &Pattern) -> Result<TrailingContext, DiagnosticKind> {
    match &pattern.context {
        None => Ok(TrailingContext::None),
        Some(_) if pattern.eol => Err(DiagnosticKind::AnchorWithContext),
        Some(context) => match (pattern.body.fixed_length(), context.fixed_length()) {
            (Some(head), _) => Ok(TrailingContext::FixedHead(head)),
            (None, Some(tail)) => Ok(TrailingContext::FixedTail(tail)),
            (None, None) => Err(DiagnosticKind::VariableTrailingContext),
        },
    }
}

impl Nfa {
    /// Thompson construction over every rule of `spec`, one start state per
    /// start condition.
    ///
    /// Specification problems are reported and the offending rule is still
    /// built as well as possible, so a single run reports every problem.
    pub fn build(
        spec: &LexSpec,
        partition: &Partition,
        config: &NfaConfig,
        reporter: &mut dyn ErrorReporter,
    ) -> Nfa {
        let mut builder = Builder { states: Vec::new(), partition, config };
        let starts: Vec<NfaStateId> = spec.conditions().iter().map(|_| builder.new_state()).collect();
        let bol = partition.bol_class();

        for id in spec.rule_ids() {
            let rule = &spec.rules[id];
            let (conditions, unknown) = spec.active_conditions(rule);
            for name in unknown {
                let message = format!("{} uses undeclared start condition `{}`", rule.display_name(id), name);
                report(reporter, Severity::Error, DiagnosticKind::UnknownStartCondition(name), id, rule, message);
            }

            // end-of-file actions live in the tables, not in the automaton
            let RulePattern::Match(pattern) = &rule.pattern else {
                continue;
            };

            let trailing = trailing_context(pattern).unwrap_or_else(|kind| {
                let message = match kind {
                    DiagnosticKind::AnchorWithContext => {
                        format!("{} combines `$` with a trailing context", rule.display_name(id))
                    }
                    _ => format!(
                        "{} needs a fixed-length pattern or fixed-length trailing context",
                        rule.display_name(id)
                    ),
                };
                report(reporter, Severity::Error, kind, id, rule, message);
                TrailingContext::None
            });

            let (start, mut end) = builder.recursive_helper(&pattern.body);
            if builder.reaches(start, end, true) {
                let message = format!("{} matches the empty string", rule.display_name(id));
                report(reporter, Severity::Warning, DiagnosticKind::MatchesEmpty, id, rule, message);
            }

            if let Some(context) = &pattern.context {
                let (context_start, context_end) = builder.recursive_helper(context);
                builder.epsilon(end, context_start);
                end = context_end;
            }

            if pattern.eol {
                let eol = partition.eol_class().expect("partition has an EOL class when a rule uses `$`");
                let anchored = builder.new_state();
                let classes = builder.class_edge(eol);
                builder.edge(end, classes, anchored);
                end = anchored;
            }

            if !builder.reaches(start, end, false) {
                let message = format!("{} can never match", rule.display_name(id));
                report(reporter, Severity::Error, DiagnosticKind::EmptyLanguage, id, rule, message);
            }

            builder.states[end].accept = Some(AcceptTag { rule: id, priority: id.raw(), trailing });

            for condition in conditions {
                let condition_start = starts[condition.index()];
                if !pattern.bol {
                    builder.epsilon(condition_start, start);
                }
                // at a line start the scanner feeds BOL first, which every
                // rule of the condition has to accept
                if let Some(bol) = bol {
                    let classes = builder.class_edge(bol);
                    builder.edge(condition_start, classes, start);
                }
            }
        }

        debug!("nfa: {} states for {} rules", builder.states.len(), spec.rules.len());
        Nfa {
            states: builder.states,
            starts,
            num_classes: partition.num_classes(),
            bol,
            eol: partition.eol_class(),
        }
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn start(&self, condition: ConditionId) -> NfaStateId {
        self.starts[condition.index()]
    }

    pub fn num_conditions(&self) -> usize {
        self.starts.len()
    }

    /// Extends `set` with everything reachable through epsilon edges.
    // basic BFS, as in the textbook construction
    pub fn epsilon_closure(&self, set: &mut BitSet) {
        let mut queue: VecDeque<usize> = set.iter().collect();
        while let Some(i) = queue.pop_front() {
            for next in &self.states[i].epsilon {
                if set.insert(next.index()) {
                    queue.push_back(next.index());
                }
            }
        }
    }

    /// States reachable from `set` on `class`, without closure.
    pub fn delta(&self, set: &BitSet, class: ClassId) -> BitSet {
        let mut result = BitSet::with_capacity(self.states.len());
        for i in set.iter() {
            for (label, next) in &self.states[i].transitions {
                if label.contains(class as usize) {
                    result.insert(next.index());
                }
            }
        }
        result
    }

    /// Highest-priority accept tag among `set`.
    pub fn resolve_accept(&self, set: &BitSet) -> Option<AcceptTag> {
        set.iter().filter_map(|i| self.states[i].accept).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::ast::SourcePos;
    use crate::diagnostics::Diagnostics;
    use crate::options::PartitionConfig;

    fn build(patterns: &[&str]) -> (Nfa, Partition, Diagnostics) {
        let mut spec = LexSpec::new();
        for (i, p) in patterns.iter().enumerate() {
            spec.add_rule(Rule::new(Pattern::parse(p).unwrap()).at(SourcePos::new(i as u32 + 1, 1)));
        }
        let partition = Partition::build(
            &spec,
            &PartitionConfig { alphabet: Alphabet::Byte, classes: true, case_agnostic: false },
        );
        let mut diagnostics = Diagnostics::new();
        let config = NfaConfig { alphabet: Alphabet::Byte, case_agnostic: false };
        let nfa = Nfa::build(&spec, &partition, &config, &mut diagnostics);
        (nfa, partition, diagnostics)
    }

    fn kinds(diagnostics: &Diagnostics) -> Vec<DiagnosticKind> {
        diagnostics.items().iter().map(|d| d.kind.clone()).collect()
    }

    #[test]
    fn accept_tags_carry_declaration_order() {
        let (nfa, _, diagnostics) = build(&["a", "b"]);
        assert!(diagnostics.items().is_empty());
        let tags: Vec<AcceptTag> = nfa.states.iter().filter_map(|s| s.accept).collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].rule, RuleId::new(0));
        assert_eq!(tags[1].priority, 1);
        assert!(tags[0] < tags[1]);
    }

    #[test]
    fn start_closure_reaches_every_rule() {
        let (nfa, partition, _) = build(&["ab", "a*"]);
        let mut set = BitSet::new();
        set.insert(nfa.start(ConditionId::new(0)).index());
        nfa.epsilon_closure(&mut set);
        // `a*` accepts the empty string
        assert_eq!(nfa.resolve_accept(&set).map(|t| t.rule), Some(RuleId::new(1)));

        let a = partition.class_of('a' as u32).unwrap();
        let mut next = nfa.delta(&set, a);
        nfa.epsilon_closure(&mut next);
        assert_eq!(nfa.resolve_accept(&next).map(|t| t.rule), Some(RuleId::new(1)));
    }

    #[test]
    fn reports_empty_string_and_empty_language() {
        let (_, _, diagnostics) = build(&["a*", r"[^\x00-\xff]"]);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MatchesEmpty, DiagnosticKind::EmptyLanguage]);
        assert_eq!(diagnostics.items()[1].position, SourcePos::new(2, 1));
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn trailing_context_lengths() {
        let p = Pattern::parse("ab/c+").unwrap();
        assert_eq!(trailing_context(&p), Ok(TrailingContext::FixedHead(2)));
        let p = Pattern::parse("a+/cd").unwrap();
        assert_eq!(trailing_context(&p), Ok(TrailingContext::FixedTail(2)));
        let p = Pattern::parse("a+/c+").unwrap();
        assert_eq!(trailing_context(&p), Err(DiagnosticKind::VariableTrailingContext));
        let p = Pattern::parse("a/b$").unwrap();
        assert_eq!(trailing_context(&p), Err(DiagnosticKind::AnchorWithContext));

        assert_eq!(TrailingContext::FixedTail(2).token_length(5), 3);
        assert_eq!(TrailingContext::FixedHead(2).token_length(5), 2);
    }

    #[test]
    fn reports_bad_trailing_context() {
        let (_, _, diagnostics) = build(&["a+/b+", "x/y$"]);
        assert_eq!(
            kinds(&diagnostics),
            vec![DiagnosticKind::VariableTrailingContext, DiagnosticKind::AnchorWithContext]
        );
    }

    #[test]
    fn reports_unknown_condition() {
        let mut spec = LexSpec::new();
        spec.add_rule(
            Rule::new(Pattern::parse("a").unwrap())
                .in_conditions(crate::ast::RuleConditions::Named(vec!["STR".into()])),
        );
        let partition = Partition::identity(Alphabet::Byte, (false, false));
        let mut diagnostics = Diagnostics::new();
        let config = NfaConfig { alphabet: Alphabet::Byte, case_agnostic: false };
        Nfa::build(&spec, &partition, &config, &mut diagnostics);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnknownStartCondition("STR".into())]);
    }

    #[test]
    fn bounded_repeat_shape() {
        let (nfa, partition, _) = build(&["a{2,3}"]);
        let a = partition.class_of('a' as u32).unwrap();
        let mut set = BitSet::new();
        set.insert(nfa.start(ConditionId::new(0)).index());
        nfa.epsilon_closure(&mut set);
        let mut accepted = Vec::new();
        for len in 1..=4 {
            set = nfa.delta(&set, a);
            nfa.epsilon_closure(&mut set);
            accepted.push((len, nfa.resolve_accept(&set).is_some()));
        }
        assert_eq!(accepted, vec![(1, false), (2, true), (3, true), (4, false)]);
    }
}
