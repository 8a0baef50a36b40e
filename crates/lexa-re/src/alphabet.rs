use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

pub type CodePoint = u32;

pub const MAX_BYTE: CodePoint = 0xFF;
pub const MAX_CODE_POINT: CodePoint = 0x10FFFF;

// the highest code point with a simple case mapping (U+1E943 ADLAM SMALL LETTER SHA)
const MAX_CASED: CodePoint = 0x1E943;

/// Cardinality of the input symbol space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alphabet {
    /// 0..=0xFF, one symbol per input byte
    Byte,
    /// 0..=0x10FFFF, one symbol per code point
    Unicode,
}

impl Alphabet {
    pub fn max_symbol(self) -> CodePoint {
        match self {
            Alphabet::Byte => MAX_BYTE,
            Alphabet::Unicode => MAX_CODE_POINT,
        }
    }

    pub fn cardinality(self) -> u32 {
        self.max_symbol() + 1
    }

    pub fn full_range(self) -> CharRange {
        CharRange::new(0, self.max_symbol())
    }
}

/// Inclusive range of code points.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharRange {
    pub low: CodePoint,
    pub high: CodePoint,
}

impl CharRange {
    pub fn new(low: CodePoint, high: CodePoint) -> CharRange {
        assert!(low <= high, "inverted range {:#x}..{:#x}", low, high);
        CharRange { low, high }
    }

    pub fn single(c: CodePoint) -> CharRange {
        CharRange { low: c, high: c }
    }

    pub fn contains(&self, c: CodePoint) -> bool {
        self.low <= c && c <= self.high
    }

    pub fn len(&self) -> u32 {
        self.high - self.low + 1
    }
}

impl Debug for CharRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |f: &mut fmt::Formatter<'_>, c: CodePoint| match char::from_u32(c) {
            Some(ch) if ch.is_ascii_graphic() => write!(f, "'{}'", ch),
            _ => write!(f, "{:#x}", c),
        };
        show(f, self.low)?;
        if self.high != self.low {
            write!(f, "-")?;
            show(f, self.high)?;
        }
        Ok(())
    }
}

/// Sorted sequence of disjoint, non-adjacent ranges.
///
/// Every constructor normalizes its input, so two sets containing the same code
/// points always compare equal.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<CharRange>,
}

impl RangeSet {
    pub fn new() -> RangeSet {
        RangeSet { ranges: Vec::new() }
    }

    pub fn single(c: CodePoint) -> RangeSet {
        RangeSet { ranges: vec![CharRange::single(c)] }
    }

    pub fn from_range(range: CharRange) -> RangeSet {
        RangeSet { ranges: vec![range] }
    }

    pub fn full(alphabet: Alphabet) -> RangeSet {
        RangeSet::from_range(alphabet.full_range())
    }

    pub fn from_ranges<I: IntoIterator<Item = CharRange>>(ranges: I) -> RangeSet {
        let mut ranges: Vec<CharRange> = ranges.into_iter().collect();
        ranges.sort_unstable();

        let mut merged: Vec<CharRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                // overlapping or touching ranges coalesce
                Some(last) if range.low <= last.high.saturating_add(1) => {
                    last.high = last.high.max(range.high);
                }
                _ => merged.push(range),
            }
        }

        RangeSet { ranges: merged }
    }

    pub fn ranges(&self) -> &[CharRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of code points in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|r| r.len() as u64).sum()
    }

    pub fn contains(&self, c: CodePoint) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if r.high < c {
                    std::cmp::Ordering::Less
                } else if r.low > c {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn union(&self, other: &RangeSet) -> RangeSet {
        RangeSet::from_ranges(self.ranges.iter().chain(other.ranges.iter()).copied())
    }

    /// Complement relative to `alphabet`.
    pub fn negate(&self, alphabet: Alphabet) -> RangeSet {
        let max = alphabet.max_symbol();
        let mut result = Vec::new();
        let mut next: CodePoint = 0;
        for range in &self.ranges {
            if range.low > max {
                break;
            }
            if range.low > next {
                result.push(CharRange::new(next, range.low - 1));
            }
            next = range.high.saturating_add(1);
        }
        if next <= max {
            result.push(CharRange::new(next, max));
        }
        RangeSet { ranges: result }
    }

    /// Drops everything above the alphabet's largest symbol.
    pub fn clamp(&self, alphabet: Alphabet) -> RangeSet {
        let max = alphabet.max_symbol();
        let ranges = self
            .ranges
            .iter()
            .filter(|r| r.low <= max)
            .map(|r| CharRange::new(r.low, r.high.min(max)));
        RangeSet { ranges: ranges.collect() }
    }

    /// Adds the simple upper/lower case counterpart of every member, keeping
    /// only counterparts that fall inside `alphabet`.
    pub fn case_fold(&self, alphabet: Alphabet) -> RangeSet {
        let max = alphabet.max_symbol().min(MAX_CASED);
        let mut extra: Vec<CharRange> = Vec::new();
        for range in &self.ranges {
            if range.low > max {
                break;
            }
            for c in range.low..=range.high.min(max) {
                let Some(ch) = char::from_u32(c) else {
                    continue;
                };
                for other in simple_case_variants(ch) {
                    let other = other as CodePoint;
                    if other != c && other <= alphabet.max_symbol() && !range.contains(other) {
                        extra.push(CharRange::single(other));
                    }
                }
            }
        }

        if extra.is_empty() {
            self.clone()
        } else {
            RangeSet::from_ranges(self.ranges.iter().copied().chain(extra))
        }
    }
}

impl Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ranges.iter()).finish()
    }
}

// one-to-one case mappings only; expansions like 'ß' -> "SS" have no single
// symbol counterpart and are skipped
fn simple_case_variants(ch: char) -> impl Iterator<Item = char> {
    let lower = single_char(ch.to_lowercase());
    let upper = single_char(ch.to_uppercase());
    lower.into_iter().chain(upper)
}

fn single_char(mut it: impl Iterator<Item = char>) -> Option<char> {
    let first = it.next()?;
    it.next().is_none().then_some(first)
}
