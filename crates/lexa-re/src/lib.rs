pub mod alphabet;
pub mod ast;
pub mod diagnostics;
pub mod dfa;
pub mod emit;
pub mod lexeme_def;
pub mod minimize;
pub mod nfa;
pub mod options;
pub mod partition;
mod regex;
pub mod scanner;
pub mod table;


use log::warn;

pub use ast::{ConditionId, LexSpec, Pattern, Regex, Rule, RuleConditions, RuleId, RulePattern};
pub use diagnostics::{BuildError, Diagnostic, DiagnosticKind, Diagnostics, ErrorReporter, Severity};
pub use dfa::Dfa;
pub use nfa::{AcceptTag, Nfa, TrailingContext};
pub use options::{Compression, Config, ConfigError, Options};
pub use partition::Partition;
pub use regex::RegexError;
pub use scanner::{longest_match, Match, TableScanner};
pub use table::{TableError, Tables};

use crate::alphabet::CodePoint;
use crate::options::TableConfig;
use crate::scanner::DfaRecognizer;

/// Output of the automaton pipeline: the alphabet partition and the
/// (possibly minimized) DFA, plus the `<<EOF>>` rule per start condition.
#[derive(Debug, Clone)]
pub struct Automaton {
    pub partition: Partition,
    pub dfa: Dfa,
    pub eof_actions: Vec<Option<RuleId>>,
}

impl Automaton {
    pub fn tables(&self, config: &TableConfig) -> Tables {
        Tables::build(&self.partition, &self.dfa, &self.eof_actions, config)
    }

    pub fn longest_match(&self, condition: ConditionId, input: &str, at_bol: bool) -> Option<Match> {
        let input: Vec<CodePoint> = input.chars().map(|c| c as CodePoint).collect();
        let recognizer = DfaRecognizer { dfa: &self.dfa, partition: &self.partition };
        longest_match(&recognizer, condition, &input, at_bol)
    }
}

fn halt_on_errors(reporter: &dyn ErrorReporter, stage: &'static str) -> Result<(), BuildError> {
    if reporter.has_errors() {
        warn!("specification has errors, not running {}", stage);
        return Err(BuildError::Specification { stage });
    }
    Ok(())
}

// first declared `<<EOF>>` rule active in each condition
fn eof_actions(spec: &LexSpec) -> Vec<Option<RuleId>> {
    let mut actions = vec![None; spec.conditions().len()];
    for id in spec.rule_ids() {
        let rule = &spec.rules[id];
        if rule.pattern != RulePattern::EndOfFile {
            continue;
        }
        for condition in spec.active_conditions(rule).0 {
            actions[condition.index()].get_or_insert(id);
        }
    }
    actions
}

/// Runs partitioning, NFA construction, subset construction and (if enabled)
/// minimization.
///
/// Specification problems go to `reporter`; a stage only runs if no error has
/// been recorded so far.
pub fn build(spec: &LexSpec, config: &Config, reporter: &mut dyn ErrorReporter) -> Result<Automaton, BuildError> {
    let partition = Partition::build(spec, &config.partition);

    let nfa = Nfa::build(spec, &partition, &config.nfa, reporter);
    halt_on_errors(reporter, "subset construction")?;

    let dfa = Dfa::from_nfa(&nfa);
    drop(nfa);
    dfa.report_unreachable(spec, reporter);
    halt_on_errors(reporter, "minimization")?;

    let dfa = if config.minimize { minimize::minimize(&dfa) } else { dfa };
    Ok(Automaton { partition, dfa, eof_actions: eof_actions(spec) })
}
