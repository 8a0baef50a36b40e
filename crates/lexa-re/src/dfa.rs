use std::collections::{HashMap, VecDeque};

use bit_set::BitSet;
use lexa_util::make_type_idx;
use log::debug;

use crate::ast::{ConditionId, LexSpec, RuleId, RulePattern};
use crate::diagnostics::{Diagnostic, DiagnosticKind, ErrorReporter, Severity};
use crate::nfa::{AcceptTag, Nfa};
use crate::partition::ClassId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfaState {
    /// successor per class; `None` is the implicit dead state
    pub(crate) next: Vec<Option<DfaStateId>>,
    pub(crate) accept: Option<AcceptTag>,
}

make_type_idx!(pub DfaStateId, DfaState);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dfa {
    pub(crate) states: Vec<DfaState>,
    // indexed by ConditionId; conditions with identical rule sets share a state
    pub(crate) starts: Vec<DfaStateId>,
    pub(crate) num_classes: usize,
    pub(crate) bol: Option<ClassId>,
    pub(crate) eol: Option<ClassId>,
}

struct SubsetBuilder<'a> {
    nfa: &'a Nfa,
    // configuration -> id
    subsets: HashMap<BitSet, DfaStateId>,
    configurations: Vec<BitSet>,
    states: Vec<DfaState>,
    work_queue: VecDeque<DfaStateId>,
}

impl SubsetBuilder<'_> {
    fn intern(&mut self, configuration: BitSet) -> DfaStateId {
        if let Some(id) = self.subsets.get(&configuration) {
            return *id;
        }
        let id = DfaStateId::from_push(
            &mut self.states,
            DfaState {
                next: vec![None; self.nfa.num_classes()],
                accept: self.nfa.resolve_accept(&configuration),
            },
        );
        self.subsets.insert(configuration.clone(), id);
        self.configurations.push(configuration);
        self.work_queue.push_back(id);
        id
    }
}

impl Dfa {
    /// Subset construction. States are numbered in discovery order: starts
    /// first (by condition), then breadth-first over classes in ascending
    /// order, so the numbering only depends on the NFA.
    pub fn from_nfa(nfa: &Nfa) -> Dfa {
        let num_classes = nfa.num_classes();
        let mut builder = SubsetBuilder {
            nfa,
            subsets: HashMap::new(),
            configurations: Vec::new(),
            states: Vec::new(),
            work_queue: VecDeque::new(),
        };

        let starts: Vec<DfaStateId> = (0..nfa.num_conditions())
            .map(|c| {
                let mut initial_configuration = BitSet::with_capacity(nfa.num_states());
                initial_configuration.insert(nfa.start(ConditionId::new(c)).index());
                nfa.epsilon_closure(&mut initial_configuration);
                builder.intern(initial_configuration)
            })
            .collect();

        while let Some(q) = builder.work_queue.pop_front() {
            // gather every class move of the configuration in one pass
            let mut moves: Vec<BitSet> = vec![BitSet::new(); num_classes];
            for i in builder.configurations[q.index()].iter() {
                for (label, next) in &nfa.states[i].transitions {
                    for class in label.iter() {
                        moves[class].insert(next.index());
                    }
                }
            }

            for (class, mut t) in moves.into_iter().enumerate() {
                if t.is_empty() {
                    continue;
                }
                nfa.epsilon_closure(&mut t);
                let target = builder.intern(t);
                builder.states[q].next[class] = Some(target);
            }
        }

        let states = builder.states;
        let dfa = Dfa { states, starts, num_classes, bol: nfa.bol, eol: nfa.eol };
        assert_eq!(dfa.reachable().len(), dfa.states.len(), "subset construction produced an unreachable state");
        debug!("dfa: {} states over {} classes", dfa.states.len(), num_classes);
        dfa
    }

    /// Reports every match rule that never wins in any state.
    pub fn report_unreachable(&self, spec: &LexSpec, reporter: &mut dyn ErrorReporter) {
        let winners = self.accepted_rules();
        for id in spec.rule_ids() {
            let rule = &spec.rules[id];
            if matches!(rule.pattern, RulePattern::EndOfFile) || winners.binary_search(&id).is_ok() {
                continue;
            }
            reporter.report(Diagnostic {
                severity: Severity::Error,
                kind: DiagnosticKind::UnreachableRule,
                rule: Some(id),
                position: rule.position,
                message: format!("{} is never matched: earlier rules match everything it does", rule.display_name(id)),
            });
        }
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_conditions(&self) -> usize {
        self.starts.len()
    }

    pub fn start(&self, condition: ConditionId) -> DfaStateId {
        self.starts[condition.index()]
    }

    pub fn starts(&self) -> &[DfaStateId] {
        &self.starts
    }

    pub fn next(&self, state: DfaStateId, class: ClassId) -> Option<DfaStateId> {
        self.states[state].next[class as usize]
    }

    pub fn accept(&self, state: DfaStateId) -> Option<AcceptTag> {
        self.states[state].accept
    }

    pub fn bol_class(&self) -> Option<ClassId> {
        self.bol
    }

    pub fn eol_class(&self) -> Option<ClassId> {
        self.eol
    }

    pub fn state_ids(&self) -> impl Iterator<Item = DfaStateId> {
        (0..self.states.len()).map(DfaStateId::new)
    }

    /// Rules that win in at least one state.
    pub fn accepted_rules(&self) -> Vec<RuleId> {
        let mut rules: Vec<RuleId> = self.states.iter().filter_map(|s| s.accept.map(|t| t.rule)).collect();
        rules.sort();
        rules.dedup();
        rules
    }

    pub(crate) fn reachable(&self) -> BitSet {
        let mut visited = BitSet::with_capacity(self.states.len());
        let mut queue: VecDeque<DfaStateId> = self.starts.iter().copied().collect();
        while let Some(q) = queue.pop_front() {
            if !visited.insert(q.index()) {
                continue;
            }
            queue.extend(self.states[q].next.iter().flatten().copied());
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::ast::{Pattern, Rule, RuleConditions};
    use crate::diagnostics::Diagnostics;
    use crate::options::{NfaConfig, PartitionConfig};
    use crate::partition::Partition;

    fn build(spec: &LexSpec) -> (Dfa, Partition) {
        let partition = Partition::build(
            spec,
            &PartitionConfig { alphabet: Alphabet::Byte, classes: true, case_agnostic: false },
        );
        let config = NfaConfig { alphabet: Alphabet::Byte, case_agnostic: false };
        let nfa = Nfa::build(spec, &partition, &config, &mut Diagnostics::new());
        (Dfa::from_nfa(&nfa), partition)
    }

    fn spec(patterns: &[&str]) -> LexSpec {
        let mut spec = LexSpec::new();
        for p in patterns {
            spec.add_rule(Rule::new(Pattern::parse(p).unwrap()));
        }
        spec
    }

    fn run(dfa: &Dfa, partition: &Partition, input: &str) -> Option<AcceptTag> {
        let mut state = dfa.start(ConditionId::new(0));
        for c in input.chars() {
            state = dfa.next(state, partition.class_of(c as u32)?)?;
        }
        dfa.accept(state)
    }

    #[test]
    fn earliest_rule_wins_on_equal_length() {
        let (dfa, partition) = build(&spec(&["if", "[a-z]+"]));
        assert_eq!(run(&dfa, &partition, "if").map(|t| t.rule), Some(RuleId::new(0)));
        assert_eq!(run(&dfa, &partition, "iff").map(|t| t.rule), Some(RuleId::new(1)));
        assert_eq!(run(&dfa, &partition, "i").map(|t| t.rule), Some(RuleId::new(1)));
        assert_eq!(run(&dfa, &partition, "i1"), None);
    }

    #[test]
    fn numbering_is_stable() {
        let s = spec(&["[a-z]+", "[0-9]+", "=="]);
        assert_eq!(build(&s).0, build(&s).0);
    }

    #[test]
    fn one_start_per_condition() {
        let mut s = LexSpec::new();
        let comment = s.declare_condition("COMMENT", true);
        s.add_rule(Rule::new(Pattern::parse("a").unwrap()));
        s.add_rule(Rule::new(Pattern::parse("b").unwrap()).in_conditions(RuleConditions::Named(vec!["COMMENT".into()])));
        let (dfa, partition) = build(&s);
        assert_eq!(dfa.num_conditions(), 2);
        assert_ne!(dfa.start(ConditionId::new(0)), dfa.start(comment));

        let b = partition.class_of('b' as u32).unwrap();
        assert_eq!(dfa.next(dfa.start(ConditionId::new(0)), b), None);
        let after = dfa.next(dfa.start(comment), b).unwrap();
        assert_eq!(dfa.accept(after).map(|t| t.rule), Some(RuleId::new(1)));
    }

    #[test]
    fn reports_shadowed_rule() {
        let s = spec(&["[a-z]+", "abc", "[0-9]"]);
        let (dfa, _) = build(&s);
        let mut diagnostics = Diagnostics::new();
        dfa.report_unreachable(&s, &mut diagnostics);
        assert_eq!(diagnostics.items().len(), 1);
        assert_eq!(diagnostics.items()[0].kind, DiagnosticKind::UnreachableRule);
        assert_eq!(diagnostics.items()[0].rule, Some(RuleId::new(1)));
        assert_eq!(dfa.accepted_rules(), vec![RuleId::new(0), RuleId::new(2)]);
    }
}
