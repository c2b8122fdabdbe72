use std::cmp::Reverse;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{BitOr, BitOrAssign};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Bitmask describing what kind of result a match is (`SEARCHSDK_MATCHFLAG_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct MatchFlags(u32);

impl MatchFlags {
    pub const SPECTRAL: MatchFlags = MatchFlags(0x01);
    pub const PEAK: MatchFlags = MatchFlags(0x02);
    pub const COMPOSITE: MatchFlags = MatchFlags(0x04);
    pub const RESIDUAL: MatchFlags = MatchFlags(0x08);
    pub const COMPONENT: MatchFlags = MatchFlags(0x10);
    pub const LOCKED: MatchFlags = MatchFlags(0x20);

    const NAMED: [(MatchFlags, &'static str); 6] = [
        (MatchFlags::SPECTRAL, "SPECTRAL"),
        (MatchFlags::PEAK, "PEAK"),
        (MatchFlags::COMPOSITE, "COMPOSITE"),
        (MatchFlags::RESIDUAL, "RESIDUAL"),
        (MatchFlags::COMPONENT, "COMPONENT"),
        (MatchFlags::LOCKED, "LOCKED"),
    ];

    pub const fn empty() -> Self {
        MatchFlags(0)
    }

    /// Keeps unknown bits so that decoding and re-encoding is lossless.
    pub const fn from_bits_retain(bits: u32) -> Self {
        MatchFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: MatchFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MatchFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for MatchFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        MatchFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for MatchFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for MatchFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = MatchFlags::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A scored comparison between a query and one record, or a mixture entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub name: String,
    /// Similarity from 0 to 1.
    pub score: f64,
    /// Share of the mixture from 0 to 1, meaningful for components and composites.
    pub mixture_weight: f64,
    pub flags: MatchFlags,
}

impl Match {
    pub fn new(name: impl Into<String>, score: f64, flags: MatchFlags) -> Self {
        Match { name: name.into(), score, mixture_weight: 0.0, flags }
    }

    pub fn with_weight(mut self, mixture_weight: f64) -> Self {
        self.mixture_weight = mixture_weight;
        self
    }

    /// Score as a percentage from 0 to 100.
    pub fn percentage(&self) -> f64 {
        self.score * 100.0
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(MatchFlags::LOCKED)
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Match({}, {:.2}%, weight: {:.3}, {})", self.name, self.percentage(), self.mixture_weight, self.flags)
    }
}

/// Ordering class used to break score ties between entries of different kind.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum MatchTier {
    Composite,
    Component,
    Record,
    Residual,
}

/// A match together with the keys it is ranked by.
#[derive(Clone, Debug)]
pub struct RankedMatch {
    pub tier: MatchTier,
    /// Scan position of the record within its technique; 0 for synthetic entries.
    pub ordinal: usize,
    pub matched: Match,
}

impl RankedMatch {
    pub fn new(tier: MatchTier, ordinal: usize, matched: Match) -> Self {
        RankedMatch { tier, ordinal, matched }
    }

    fn sort_key(&self) -> (Reverse<OrderedFloat<f64>>, MatchTier, usize) {
        (Reverse(OrderedFloat(self.matched.score)), self.tier, self.ordinal)
    }
}

/// Matches ordered by descending score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    matches: Vec<Match>,
}

impl ResultSet {
    /// Wraps matches that are already in result order.
    pub fn new(matches: Vec<Match>) -> Self {
        ResultSet { matches }
    }

    pub fn empty() -> Self {
        ResultSet { matches: Vec::new() }
    }

    /// Sorts by descending score (ties by tier, then ordinal) and keeps at most `capacity` entries.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use speccore::data::matches::{Match, MatchFlags, MatchTier, RankedMatch, ResultSet};
    /// let ranked = vec![
    ///     RankedMatch::new(MatchTier::Record, 0, Match::new("a", 0.5, MatchFlags::SPECTRAL)),
    ///     RankedMatch::new(MatchTier::Record, 1, Match::new("b", 0.9, MatchFlags::SPECTRAL)),
    ///     RankedMatch::new(MatchTier::Record, 2, Match::new("c", 0.7, MatchFlags::SPECTRAL)),
    /// ];
    /// let results = ResultSet::from_ranked(ranked, 2);
    /// let names: Vec<&str> = results.iter().map(|m| m.name.as_str()).collect();
    /// assert_eq!(names, vec!["b", "c"]);
    /// ```
    pub fn from_ranked(mut ranked: Vec<RankedMatch>, capacity: usize) -> Self {
        ranked.sort_by_key(|r| r.sort_key());
        ranked.truncate(capacity);
        ResultSet { matches: ranked.into_iter().map(|r| r.matched).collect() }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Match> {
        self.matches.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    pub fn into_vec(self) -> Vec<Match> {
        self.matches
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.iter()
    }
}

impl Display for ResultSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.matches.first() {
            Some(best) => write!(f, "ResultSet(matches: {}, best: {})", self.len(), best),
            None => write!(f, "ResultSet(matches: 0)"),
        }
    }
}
