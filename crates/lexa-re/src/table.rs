//! Compressed transition tables.
//!
//! The automaton is flattened into plain integer arrays so a scanner needs
//! nothing but these tables. Three transition encodings trade size against
//! lookup cost; the class map is either dense or a two-level page table.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alphabet::{Alphabet, CodePoint};
use crate::ast::{ConditionId, RuleId};
use crate::dfa::Dfa;
use crate::nfa::{AcceptTag, TrailingContext};
use crate::options::{Compression, TableConfig};
use crate::partition::Partition;

/// Successor value meaning "no transition".
pub const DEAD: u32 = u32::MAX;

const MAGIC: &[u8; 8] = b"LEXATBL1";
const PAGE_BITS: u32 = 8;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const NONE: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("not a table file (bad magic)")]
    BadMagic,
    #[error("table data ends early")]
    Truncated,
    #[error("malformed table: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassMap {
    /// class per code point
    Dense(Vec<u32>),
    /// `index[c >> 8]` picks a 256-entry page in `pages`
    Paged { index: Vec<u32>, pages: Vec<u32> },
}

impl ClassMap {
    fn build(partition: &Partition, compress: bool) -> ClassMap {
        let mut dense: Vec<u32> = Vec::with_capacity(partition.alphabet().cardinality() as usize);
        for (range, class) in partition.intervals() {
            dense.extend(std::iter::repeat(*class).take(range.len() as usize));
        }
        if !compress {
            return ClassMap::Dense(dense);
        }

        let mut index = Vec::new();
        let mut pages: Vec<u32> = Vec::new();
        let mut seen: HashMap<&[u32], u32> = HashMap::new();
        for page in dense.chunks(PAGE_SIZE) {
            let next_id = seen.len() as u32;
            let id = *seen.entry(page).or_insert(next_id);
            if id == next_id {
                pages.extend_from_slice(page);
                // the byte alphabet's single page is always full; pad anything shorter
                pages.resize((id as usize + 1) * PAGE_SIZE, page[page.len() - 1]);
            }
            index.push(id);
        }
        ClassMap::Paged { index, pages }
    }

    pub fn get(&self, c: CodePoint) -> Option<u32> {
        match self {
            ClassMap::Dense(map) => map.get(c as usize).copied(),
            ClassMap::Paged { index, pages } => {
                let page = *index.get((c >> PAGE_BITS) as usize)? as usize;
                pages.get(page * PAGE_SIZE + (c as usize & (PAGE_SIZE - 1))).copied()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClassMap::Dense(map) => map.len(),
            ClassMap::Paged { index, pages } => index.len() + pages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A row stored as its most common successor plus the classes that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub default: u32,
    /// (class, next), sorted by class
    pub exceptions: Vec<(u32, u32)>,
}

impl Row {
    fn compress(row: &[u32]) -> Row {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for next in row {
            *counts.entry(*next).or_default() += 1;
        }
        // most frequent; on a tie DEAD, then the smaller state
        let default = counts
            .iter()
            .max_by(|(a, x), (b, y)| x.cmp(y).then((**a == DEAD).cmp(&(**b == DEAD))).then(b.cmp(a)))
            .map_or(DEAD, |(next, _)| *next);
        let exceptions = row
            .iter()
            .enumerate()
            .filter(|(_, next)| **next != default)
            .map(|(class, next)| (class as u32, *next))
            .collect();
        Row { default, exceptions }
    }

    pub fn get(&self, class: u32) -> u32 {
        match self.exceptions.binary_search_by_key(&class, |(c, _)| *c) {
            Ok(i) => self.exceptions[i].1,
            Err(_) => self.default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transitions {
    /// `next[state * num_classes + class]`
    Dense(Vec<u32>),
    RowCompressed(Vec<Row>),
    /// `meta[class]` selects the column; rows are over meta-classes
    Squeeze { meta: Vec<u32>, rows: Vec<Row> },
}

impl Transitions {
    fn build(dense: &[u32], num_states: usize, num_classes: usize, compression: Compression) -> Transitions {
        let rows = || dense.chunks(num_classes.max(1)).take(num_states);
        match compression {
            Compression::Uncompressed => Transitions::Dense(dense.to_vec()),
            Compression::RowCompressed => Transitions::RowCompressed(rows().map(Row::compress).collect()),
            Compression::Squeeze => {
                // identical columns collapse into one meta-class
                let mut columns: HashMap<Vec<u32>, u32> = HashMap::new();
                let mut representatives: Vec<usize> = Vec::new();
                let meta: Vec<u32> = (0..num_classes)
                    .map(|class| {
                        let column: Vec<u32> = rows().map(|row| row[class]).collect();
                        let next_id = columns.len() as u32;
                        let id = *columns.entry(column).or_insert(next_id);
                        if id == next_id {
                            representatives.push(class);
                        }
                        id
                    })
                    .collect();
                let rows = rows()
                    .map(|row| {
                        let squeezed: Vec<u32> = representatives.iter().map(|&class| row[class]).collect();
                        Row::compress(&squeezed)
                    })
                    .collect();
                Transitions::Squeeze { meta, rows }
            }
        }
    }

    /// Number of stored successor entries, a rough size measure.
    pub fn entries(&self) -> usize {
        let row_entries = |rows: &[Row]| rows.iter().map(|r| 1 + r.exceptions.len()).sum::<usize>();
        match self {
            Transitions::Dense(next) => next.len(),
            Transitions::RowCompressed(rows) => row_entries(rows),
            Transitions::Squeeze { meta, rows } => meta.len() + row_entries(rows),
        }
    }
}

/// Accept entry of one state, as stored in the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptEntry {
    pub rule: u32,
    pub priority: u32,
    pub trailing: TrailingContext,
}

impl From<AcceptTag> for AcceptEntry {
    fn from(tag: AcceptTag) -> Self {
        AcceptEntry { rule: tag.rule.raw(), priority: tag.priority, trailing: tag.trailing }
    }
}

impl AcceptEntry {
    pub fn tag(&self) -> AcceptTag {
        AcceptTag { rule: RuleId::new(self.rule as usize), priority: self.priority, trailing: self.trailing }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    pub alphabet: Alphabet,
    pub num_states: u32,
    /// including the anchor pseudo-classes
    pub num_classes: u32,
    pub class_map: ClassMap,
    pub transitions: Transitions,
    pub accept: Vec<Option<AcceptEntry>>,
    /// start state per start condition
    pub starts: Vec<u32>,
    /// `<<EOF>>` rule per start condition
    pub eof_actions: Vec<Option<u32>>,
    pub bol_class: Option<u32>,
    pub eol_class: Option<u32>,
}

impl Tables {
    pub fn build(partition: &Partition, dfa: &Dfa, eof_actions: &[Option<RuleId>], config: &TableConfig) -> Tables {
        let num_states = dfa.num_states();
        let num_classes = dfa.num_classes();
        let mut dense: Vec<u32> = Vec::with_capacity(num_states * num_classes);
        for state in dfa.state_ids() {
            for class in 0..num_classes {
                dense.push(dfa.next(state, class as u32).map_or(DEAD, |s| s.raw()));
            }
        }

        let tables = Tables {
            alphabet: partition.alphabet(),
            num_states: num_states as u32,
            num_classes: num_classes as u32,
            class_map: ClassMap::build(partition, config.compress_map),
            transitions: Transitions::build(&dense, num_states, num_classes, config.compression),
            accept: dfa.state_ids().map(|s| dfa.accept(s).map(AcceptEntry::from)).collect(),
            starts: dfa.starts().iter().map(|s| s.raw()).collect(),
            eof_actions: eof_actions.iter().map(|r| r.map(|r| r.raw())).collect(),
            bol_class: partition.bol_class(),
            eol_class: partition.eol_class(),
        };
        debug!(
            "tables: {:?}, {} transition entries (dense {}), class map {} entries",
            config.compression,
            tables.transitions.entries(),
            dense.len(),
            tables.class_map.len()
        );
        tables
    }

    pub fn class_of(&self, c: CodePoint) -> Option<u32> {
        self.class_map.get(c)
    }

    /// Successor of `state` on `class`; `None` for the dead state.
    pub fn next_state(&self, state: u32, class: u32) -> Option<u32> {
        let next = match &self.transitions {
            Transitions::Dense(next) => next[(state * self.num_classes + class) as usize],
            Transitions::RowCompressed(rows) => rows[state as usize].get(class),
            Transitions::Squeeze { meta, rows } => rows[state as usize].get(meta[class as usize]),
        };
        (next != DEAD).then_some(next)
    }

    pub fn accept(&self, state: u32) -> Option<AcceptTag> {
        self.accept[state as usize].map(|entry| entry.tag())
    }

    pub fn start(&self, condition: ConditionId) -> u32 {
        self.starts[condition.index()]
    }

    pub fn eof_action(&self, condition: ConditionId) -> Option<RuleId> {
        self.eof_actions[condition.index()].map(|r| RuleId::new(r as usize))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes).expect("writing to a Vec cannot fail");
        bytes
    }

    /// Little-endian binary layout, starting with the `LEXATBL1` magic.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_u8(match self.alphabet {
            Alphabet::Byte => 0,
            Alphabet::Unicode => 1,
        })?;
        w.write_u32::<LittleEndian>(self.num_states)?;
        w.write_u32::<LittleEndian>(self.num_classes)?;
        w.write_u32::<LittleEndian>(self.bol_class.unwrap_or(NONE))?;
        w.write_u32::<LittleEndian>(self.eol_class.unwrap_or(NONE))?;

        write_vec(w, &self.starts)?;
        let eof: Vec<u32> = self.eof_actions.iter().map(|r| r.unwrap_or(NONE)).collect();
        write_vec(w, &eof)?;

        w.write_u32::<LittleEndian>(self.accept.len() as u32)?;
        for entry in &self.accept {
            match entry {
                None => w.write_u8(0)?,
                Some(entry) => {
                    let (kind, n) = match entry.trailing {
                        TrailingContext::None => (1, 0),
                        TrailingContext::FixedHead(n) => (2, n),
                        TrailingContext::FixedTail(n) => (3, n),
                    };
                    w.write_u8(kind)?;
                    w.write_u32::<LittleEndian>(entry.rule)?;
                    w.write_u32::<LittleEndian>(entry.priority)?;
                    w.write_u32::<LittleEndian>(n)?;
                }
            }
        }

        match &self.class_map {
            ClassMap::Dense(map) => {
                w.write_u8(0)?;
                write_vec(w, map)?;
            }
            ClassMap::Paged { index, pages } => {
                w.write_u8(1)?;
                write_vec(w, index)?;
                write_vec(w, pages)?;
            }
        }

        match &self.transitions {
            Transitions::Dense(next) => {
                w.write_u8(0)?;
                write_vec(w, next)?;
            }
            Transitions::RowCompressed(rows) => {
                w.write_u8(1)?;
                write_rows(w, rows)?;
            }
            Transitions::Squeeze { meta, rows } => {
                w.write_u8(2)?;
                write_vec(w, meta)?;
                write_rows(w, rows)?;
            }
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Tables, TableError> {
        let mut r = Cursor::new(bytes);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(truncated)?;
        if &magic != MAGIC {
            return Err(TableError::BadMagic);
        }

        let alphabet = match r.read_u8().map_err(truncated)? {
            0 => Alphabet::Byte,
            1 => Alphabet::Unicode,
            _ => return Err(TableError::Invalid("unknown alphabet")),
        };
        let num_states = read_u32(&mut r)?;
        let num_classes = read_u32(&mut r)?;
        let optional = |v: u32| (v != NONE).then_some(v);
        let bol_class = optional(read_u32(&mut r)?);
        let eol_class = optional(read_u32(&mut r)?);

        let starts = read_vec(&mut r)?;
        let eof_actions = read_vec(&mut r)?.into_iter().map(optional).collect();

        let num_accept = read_u32(&mut r)?;
        let mut accept = Vec::new();
        for _ in 0..num_accept {
            let kind = r.read_u8().map_err(truncated)?;
            if kind == 0 {
                accept.push(None);
                continue;
            }
            let rule = read_u32(&mut r)?;
            let priority = read_u32(&mut r)?;
            let n = read_u32(&mut r)?;
            let trailing = match kind {
                1 => TrailingContext::None,
                2 => TrailingContext::FixedHead(n),
                3 => TrailingContext::FixedTail(n),
                _ => return Err(TableError::Invalid("unknown accept kind")),
            };
            accept.push(Some(AcceptEntry { rule, priority, trailing }));
        }

        let class_map = match r.read_u8().map_err(truncated)? {
            0 => ClassMap::Dense(read_vec(&mut r)?),
            1 => ClassMap::Paged { index: read_vec(&mut r)?, pages: read_vec(&mut r)? },
            _ => return Err(TableError::Invalid("unknown class map kind")),
        };

        let transitions = match r.read_u8().map_err(truncated)? {
            0 => Transitions::Dense(read_vec(&mut r)?),
            1 => Transitions::RowCompressed(read_rows(&mut r)?),
            2 => Transitions::Squeeze { meta: read_vec(&mut r)?, rows: read_rows(&mut r)? },
            _ => return Err(TableError::Invalid("unknown transition kind")),
        };

        let tables = Tables {
            alphabet,
            num_states,
            num_classes,
            class_map,
            transitions,
            accept,
            starts,
            eof_actions,
            bol_class,
            eol_class,
        };
        tables.validate()?;
        Ok(tables)
    }

    // every index the scanner may follow has to be in range
    fn validate(&self) -> Result<(), TableError> {
        let state_ok = |s: &u32| *s == DEAD || *s < self.num_states;
        let class_ok = |c: &u32| *c < self.num_classes;
        let rows_ok = |rows: &[Row], width: u32| {
            rows.len() == self.num_states as usize
                && rows.iter().all(|row| {
                    state_ok(&row.default) && row.exceptions.iter().all(|(c, s)| *c < width && state_ok(s))
                })
        };

        if self.accept.len() != self.num_states as usize {
            return Err(TableError::Invalid("accept table size"));
        }
        if !self.starts.iter().all(|s| *s < self.num_states) || self.starts.len() != self.eof_actions.len() {
            return Err(TableError::Invalid("start states"));
        }
        if ![self.bol_class, self.eol_class].iter().flatten().all(class_ok) {
            return Err(TableError::Invalid("anchor class"));
        }
        let map_ok = match &self.class_map {
            ClassMap::Dense(map) => map.iter().all(class_ok),
            ClassMap::Paged { index, pages } => {
                pages.len() % PAGE_SIZE == 0
                    && index.iter().all(|p| ((*p as usize) + 1) * PAGE_SIZE <= pages.len())
                    && pages.iter().all(class_ok)
            }
        };
        if !map_ok {
            return Err(TableError::Invalid("class map"));
        }
        let ok = match &self.transitions {
            Transitions::Dense(next) => {
                let size = (self.num_states as usize).checked_mul(self.num_classes as usize);
                size == Some(next.len()) && next.iter().all(state_ok)
            }
            Transitions::RowCompressed(rows) => rows_ok(rows, self.num_classes),
            Transitions::Squeeze { meta, rows } => {
                let width = meta.iter().max().map_or(0, |m| m + 1);
                meta.len() == self.num_classes as usize && rows_ok(rows, width)
            }
        };
        if !ok {
            return Err(TableError::Invalid("transition table"));
        }
        Ok(())
    }
}

fn truncated(e: io::Error) -> TableError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => TableError::Truncated,
        _ => TableError::Io(e),
    }
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32, TableError> {
    r.read_u32::<LittleEndian>().map_err(truncated)
}

fn read_vec(r: &mut Cursor<&[u8]>) -> Result<Vec<u32>, TableError> {
    let len = read_u32(r)? as usize;
    // a corrupt length must not trigger a huge allocation
    let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
    if len > remaining / 4 {
        return Err(TableError::Truncated);
    }
    let mut values = vec![0u32; len];
    r.read_u32_into::<LittleEndian>(&mut values).map_err(truncated)?;
    Ok(values)
}

fn read_rows(r: &mut Cursor<&[u8]>) -> Result<Vec<Row>, TableError> {
    let num_rows = read_u32(r)?;
    let mut rows = Vec::new();
    for _ in 0..num_rows {
        let default = read_u32(r)?;
        let flat = read_vec(r)?;
        if flat.len() % 2 != 0 {
            return Err(TableError::Invalid("odd exception list"));
        }
        let exceptions = flat.chunks(2).map(|pair| (pair[0], pair[1])).collect();
        rows.push(Row { default, exceptions });
    }
    Ok(rows)
}

fn write_vec<W: Write>(w: &mut W, values: &[u32]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(values.len() as u32)?;
    for v in values {
        w.write_u32::<LittleEndian>(*v)?;
    }
    Ok(())
}

fn write_rows<W: Write>(w: &mut W, rows: &[Row]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(rows.len() as u32)?;
    for row in rows {
        w.write_u32::<LittleEndian>(row.default)?;
        let flat: Vec<u32> = row.exceptions.iter().flat_map(|(c, s)| [*c, *s]).collect();
        write_vec(w, &flat)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::{CharRange, RangeSet};

    #[test]
    fn row_default_is_most_frequent() {
        let row = Row::compress(&[3, DEAD, 3, 1, 3]);
        assert_eq!(row.default, 3);
        assert_eq!(row.exceptions, vec![(1, DEAD), (3, 1)]);
        assert_eq!(row.get(0), 3);
        assert_eq!(row.get(1), DEAD);
        assert_eq!(row.get(3), 1);
    }

    #[test]
    fn row_ties_prefer_dead() {
        let row = Row::compress(&[2, DEAD, 1, DEAD, 1, 2]);
        assert_eq!(row.default, DEAD);
        let row = Row::compress(&[2, 1, 1, 2]);
        assert_eq!(row.default, 1);
    }

    #[test]
    fn squeeze_merges_identical_columns() {
        // 2 states x 4 classes; columns 0/2 and 1/3 are identical
        let dense = [1, DEAD, 1, DEAD, 0, 1, 0, 1];
        let Transitions::Squeeze { meta, rows } = Transitions::build(&dense, 2, 4, Compression::Squeeze) else {
            panic!("expected squeeze");
        };
        assert_eq!(meta, vec![0, 1, 0, 1]);
        for state in 0..2 {
            for class in 0..4 {
                assert_eq!(rows[state].get(meta[class]), dense[state * 4 + class]);
            }
        }
    }

    #[test]
    fn paged_class_map_shares_pages() {
        let partition = Partition::from_sets(
            Alphabet::Unicode,
            &[RangeSet::from_range(CharRange::new('a' as u32, 'z' as u32))],
            (false, false),
        );
        let map = ClassMap::build(&partition, true);
        let ClassMap::Paged { index, pages } = &map else {
            panic!("expected a paged map");
        };
        assert_eq!(index.len(), 0x110000 / PAGE_SIZE);
        // the ascii page plus one page shared by everything else
        assert_eq!(pages.len(), 2 * PAGE_SIZE);
        assert_eq!(map.get('q' as u32), partition.class_of('q' as u32));
        assert_eq!(map.get(0x10FFFF), partition.class_of(0x10FFFF));
        assert_eq!(map.get(0x110000), None);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(Tables::from_bytes(b"NOTATABLE"), Err(TableError::BadMagic)));
        assert!(matches!(Tables::from_bytes(b"LEXATBL1\x00\x01"), Err(TableError::Truncated)));
    }

    fn dense_bytes() -> Vec<u8> {
        let mut spec = crate::LexSpec::new();
        spec.add_rule(crate::Rule::new(crate::Pattern::parse("^a+").unwrap()));
        let config = crate::Options::empty().resolve().unwrap();
        let automaton = crate::build(&spec, &config, &mut crate::Diagnostics::new()).unwrap();
        let bytes = automaton.tables(&config.table).to_bytes();
        assert!(Tables::from_bytes(&bytes).is_ok());
        bytes
    }

    // header: magic (8), alphabet (1), states, classes, bol, eol
    fn patch_u32(bytes: &mut [u8], at: usize, value: u32) {
        bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn rejects_oversized_class_count() {
        let mut bytes = dense_bytes();
        patch_u32(&mut bytes, 13, 0x8000_0000);
        assert!(matches!(Tables::from_bytes(&bytes), Err(TableError::Invalid("transition table"))));
        patch_u32(&mut bytes, 9, u32::MAX - 1);
        assert!(matches!(Tables::from_bytes(&bytes), Err(TableError::Invalid(_))));
    }

    #[test]
    fn rejects_anchor_class_out_of_range() {
        let mut bytes = dense_bytes();
        patch_u32(&mut bytes, 17, 1000);
        assert!(matches!(Tables::from_bytes(&bytes), Err(TableError::Invalid("anchor class"))));

        let mut bytes = dense_bytes();
        patch_u32(&mut bytes, 21, 257);
        assert!(matches!(Tables::from_bytes(&bytes), Err(TableError::Invalid("anchor class"))));
    }
}
