//! Alphabet equivalence classes.
//!
//! Every range boundary of every rule becomes a cut in the code space; the
//! maximal intervals between cuts that no rule tells apart (they belong to
//! exactly the same rule sets) are merged into one class. Automata downstream
//! only ever see class ids, so a Unicode alphabet costs as many columns as the
//! rules actually distinguish.

use std::collections::{BTreeSet, HashMap, HashSet};

use bit_set::BitSet;
use log::debug;

use crate::alphabet::{Alphabet, CharRange, CodePoint, RangeSet};
use crate::ast::{LexSpec, RulePattern};
use crate::options::PartitionConfig;

pub type ClassId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    alphabet: Alphabet,
    // sorted, disjoint, covering 0..=alphabet.max_symbol()
    intervals: Vec<(CharRange, ClassId)>,
    class_sets: Vec<RangeSet>,
    bol: Option<ClassId>,
    eol: Option<ClassId>,
}

impl Partition {
    /// One class per symbol. Only sensible for the byte alphabet.
    pub fn identity(alphabet: Alphabet, anchors: (bool, bool)) -> Partition {
        let intervals: Vec<(CharRange, ClassId)> = (0..=alphabet.max_symbol())
            .map(|c| (CharRange::single(c), c))
            .collect();
        let class_sets = (0..=alphabet.max_symbol()).map(RangeSet::single).collect();
        Self::with_anchors(alphabet, intervals, class_sets, anchors)
    }

    pub fn build(spec: &LexSpec, config: &PartitionConfig) -> Partition {
        let anchors = spec.uses_anchors();
        if !config.classes {
            let partition = Self::identity(config.alphabet, anchors);
            debug!("identity alphabet: {} classes", partition.num_classes());
            return partition;
        }

        let mut sets: Vec<RangeSet> = Vec::new();
        let mut seen: HashSet<RangeSet> = HashSet::new();
        let mut collect = |set: RangeSet| {
            if !set.is_empty() && seen.insert(set.clone()) {
                sets.push(set);
            }
        };
        for rule in &spec.rules {
            if let RulePattern::Match(pattern) = &rule.pattern {
                pattern.body.visit_sets(config.alphabet, config.case_agnostic, &mut collect);
                if let Some(context) = &pattern.context {
                    context.visit_sets(config.alphabet, config.case_agnostic, &mut collect);
                }
            }
        }

        let partition = Self::from_sets(config.alphabet, &sets, anchors);
        debug!(
            "partitioned {} symbols into {} classes from {} distinct sets",
            config.alphabet.cardinality(),
            partition.num_symbol_classes(),
            sets.len()
        );
        partition
    }

    /// Coarsest partition in which every set in `sets` is a union of classes.
    pub fn from_sets(alphabet: Alphabet, sets: &[RangeSet], anchors: (bool, bool)) -> Partition {
        let max = alphabet.max_symbol();

        let mut cuts: BTreeSet<CodePoint> = BTreeSet::new();
        cuts.insert(0);
        for set in sets {
            for range in set.ranges() {
                cuts.insert(range.low);
                if range.high < max {
                    cuts.insert(range.high + 1);
                }
            }
        }

        let cuts: Vec<CodePoint> = cuts.into_iter().filter(|c| *c <= max).collect();
        let elementary: Vec<CharRange> = cuts
            .iter()
            .enumerate()
            .map(|(i, &low)| {
                let high = cuts.get(i + 1).map_or(max, |next| next - 1);
                CharRange::new(low, high)
            })
            .collect();

        // signature[i] = which sets contain elementary interval i
        let mut signatures: Vec<BitSet> = vec![BitSet::with_capacity(sets.len()); elementary.len()];
        for (set_idx, set) in sets.iter().enumerate() {
            for range in set.ranges() {
                let first = elementary.partition_point(|iv| iv.high < range.low);
                for (i, iv) in elementary.iter().enumerate().skip(first) {
                    if iv.low > range.high {
                        break;
                    }
                    signatures[i].insert(set_idx);
                }
            }
        }

        // class ids follow the order of first appearance in the code space
        let mut class_of_signature: HashMap<&BitSet, ClassId> = HashMap::new();
        let mut class_ranges: Vec<Vec<CharRange>> = Vec::new();
        let mut intervals: Vec<(CharRange, ClassId)> = Vec::with_capacity(elementary.len());
        for (iv, signature) in elementary.iter().zip(signatures.iter()) {
            let next_id = class_ranges.len() as ClassId;
            let class = *class_of_signature.entry(signature).or_insert(next_id);
            if class == next_id {
                class_ranges.push(Vec::new());
            }
            class_ranges[class as usize].push(*iv);
            intervals.push((*iv, class));
        }

        let class_sets = class_ranges.into_iter().map(RangeSet::from_ranges).collect();
        Self::with_anchors(alphabet, intervals, class_sets, anchors)
    }

    fn with_anchors(
        alphabet: Alphabet,
        intervals: Vec<(CharRange, ClassId)>,
        class_sets: Vec<RangeSet>,
        (bol, eol): (bool, bool),
    ) -> Partition {
        let mut next = class_sets.len() as ClassId;
        let mut pseudo = |used: bool| {
            used.then(|| {
                next += 1;
                next - 1
            })
        };
        let bol = pseudo(bol);
        let eol = pseudo(eol);
        Partition { alphabet, intervals, class_sets, bol, eol }
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Class count including the anchor pseudo-classes.
    pub fn num_classes(&self) -> usize {
        self.class_sets.len() + self.bol.is_some() as usize + self.eol.is_some() as usize
    }

    /// Class count over real input symbols.
    pub fn num_symbol_classes(&self) -> usize {
        self.class_sets.len()
    }

    pub fn bol_class(&self) -> Option<ClassId> {
        self.bol
    }

    pub fn eol_class(&self) -> Option<ClassId> {
        self.eol
    }

    pub fn intervals(&self) -> &[(CharRange, ClassId)] {
        &self.intervals
    }

    /// Symbols of a real class.
    pub fn class_set(&self, class: ClassId) -> &RangeSet {
        &self.class_sets[class as usize]
    }

    pub fn class_of(&self, c: CodePoint) -> Option<ClassId> {
        if c > self.alphabet.max_symbol() {
            return None;
        }
        let idx = self.intervals.partition_point(|(iv, _)| iv.high < c);
        Some(self.intervals[idx].1)
    }

    /// Classes making up `set`. `set` must be a union of classes, which holds
    /// for every set the partition was built from.
    pub fn classes_of(&self, set: &RangeSet) -> BitSet {
        let mut classes = BitSet::with_capacity(self.num_classes());
        for range in set.ranges() {
            let first = self.intervals.partition_point(|(iv, _)| iv.high < range.low);
            for (iv, class) in &self.intervals[first..] {
                if iv.low > range.high {
                    break;
                }
                assert!(
                    iv.low >= range.low && iv.high <= range.high,
                    "{:?} splits class {} ({:?})",
                    range,
                    class,
                    iv
                );
                classes.insert(*class as usize);
            }
        }
        classes
    }
}
