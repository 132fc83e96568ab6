//! Episode range expressions.
//!
//! Expressions are comma-separated clauses: single numbers (`4`), `~`
//! intervals with omissible bounds (`5~20`, `7~`, `~31`), and `!`-negated
//! clauses (`!2~6`). Later clauses override earlier ones, so
//! `"!2~6,4"` layers "exclude 2 through 6" then "but include 4".

use crate::errors::RangeError;
use std::collections::BTreeSet;

/// What one clause selects.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    /// A finite set of episode numbers.
    Set(BTreeSet<u32>),
    /// An interval. `end` is exclusive; the inclusive-upper-bound adjustment
    /// happens at parse time. An omitted `start` means "from 1".
    Span { start: Option<u32>, end: Option<u32> },
    /// Everything.
    All,
}

impl Selector {
    fn contains(&self, index: u32) -> bool {
        match self {
            Self::Set(set) => set.contains(&index),
            Self::Span { start, end } => {
                let start = start.unwrap_or(1);
                start <= index && end.is_none_or(|end| index < end)
            }
            Self::All => true,
        }
    }
}

/// A parsed episode range expression, usable as a membership predicate over
/// 1-based episode numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRange {
    /// `(include, selector)` clauses in insertion order. Membership is
    /// resolved last-write-wins, so lookups walk this in reverse.
    clauses: Vec<(bool, Selector)>,
}

impl EpisodeRange {
    /// Parses an expression like `"1,4,10~18,!12"`.
    ///
    /// With `inclusive`, interval upper bounds include their endpoint
    /// (`5~10` covers episode 10). A negated first clause implicitly
    /// prepends an include-all clause, so `"!5"` means "everything except
    /// episode 5". A non-numeric bound fails here, not at lookup time.
    pub fn from_string(expression: &str, inclusive: bool) -> Result<Self, RangeError> {
        let mut range = Self {
            clauses: Vec::new(),
        };

        let mut first = true;
        for clause in expression.split(',') {
            let (include, clause) = match clause.strip_prefix('!') {
                Some(rest) => {
                    if first {
                        range.push(true, Selector::All);
                    }
                    (false, rest)
                }
                None => (true, clause),
            };
            first = false;

            let parse = |bound: &str| -> Result<Option<u32>, RangeError> {
                let bound: String = bound.chars().filter(|char| *char != ' ').collect();
                if bound.is_empty() {
                    return Ok(None);
                }
                bound
                    .parse::<u32>()
                    .map(Some)
                    .map_err(|_| RangeError::InvalidBound {
                        bound,
                        expression: expression.to_owned(),
                    })
            };

            match clause.split_once('~') {
                Some((start, end)) => {
                    let start = parse(start)?;
                    let end = parse(end)?.map(|end| end.saturating_add(u32::from(inclusive)));
                    let selector = match (start, end) {
                        (None, None) => Selector::All,
                        (start, end) => Selector::Span { start, end },
                    };
                    range.push(include, selector);
                }
                None => {
                    // A bare `0` is silently dropped; episode numbers are
                    // 1-based in expressions.
                    if let Some(value) = parse(clause)?.filter(|value| *value != 0) {
                        range.push_single(include, value);
                    }
                }
            }
        }

        Ok(range)
    }

    /// Whether `index` is selected.
    ///
    /// Clauses are consulted most-recently-added first; the first whose
    /// selector covers `index` decides. No match means excluded.
    pub fn contains(&self, index: u32) -> bool {
        for (include, selector) in self.clauses.iter().rev() {
            if selector.contains(index) {
                return *include;
            }
        }

        false
    }

    fn push(&mut self, include: bool, selector: Selector) {
        self.clauses.push((include, selector));
    }

    /// Consecutive same-polarity single values coalesce into one set. This
    /// changes nothing observable; a run of singles just stays one clause.
    fn push_single(&mut self, include: bool, value: u32) {
        match self.clauses.last_mut() {
            Some((last_include, Selector::Set(set))) if *last_include == include => {
                set.insert(value);
            }
            _ => self.push(include, Selector::Set(BTreeSet::from([value]))),
        }
    }
}
