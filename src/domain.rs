// SPDX-License-Identifier: Apache-2.0

//! Abstract domains over fixed-width integers.
//!
//! Both domains represent an abstract value as [`NUM_FIELDS`] raw integers:
//!
//! * `KnownBits`: `[zero, one]`, the bits known to be 0 and known to be 1.
//!   Conflicting masks (a bit in both) denote bottom.
//! * `ConstantRange`: `[lo, hi]`, an unsigned inclusive interval. `lo > hi`
//!   denotes bottom.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interp::mask;

/// Fields per abstract value.
pub const NUM_FIELDS: usize = 2;

pub type AbstractValue = [u64; NUM_FIELDS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    KnownBits,
    ConstantRange,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Domain {
    pub fn name(self) -> &'static str {
        match self {
            Domain::KnownBits => "KnownBits",
            Domain::ConstantRange => "ConstantRange",
        }
    }

    pub fn top(self, width: u32) -> AbstractValue {
        match self {
            Domain::KnownBits => [0, 0],
            Domain::ConstantRange => [0, mask(width)],
        }
    }

    pub fn bottom(self, width: u32) -> AbstractValue {
        match self {
            Domain::KnownBits => [mask(width), mask(width)],
            Domain::ConstantRange => [mask(width), 0],
        }
    }

    pub fn is_bottom(self, v: &AbstractValue) -> bool {
        match self {
            Domain::KnownBits => v[0] & v[1] != 0,
            Domain::ConstantRange => v[0] > v[1],
        }
    }

    /// Greatest lower bound.
    pub fn meet(self, a: &AbstractValue, b: &AbstractValue, width: u32) -> AbstractValue {
        match self {
            Domain::KnownBits => [a[0] | b[0], a[1] | b[1]],
            Domain::ConstantRange => {
                if self.is_bottom(a) || self.is_bottom(b) {
                    return self.bottom(width);
                }
                let (lo, hi) = (a[0].max(b[0]), a[1].min(b[1]));
                if lo > hi { self.bottom(width) } else { [lo, hi] }
            }
        }
    }

    /// Least upper bound.
    pub fn join(self, a: &AbstractValue, b: &AbstractValue) -> AbstractValue {
        if self.is_bottom(a) {
            return *b;
        }
        if self.is_bottom(b) {
            return *a;
        }
        match self {
            Domain::KnownBits => [a[0] & b[0], a[1] & b[1]],
            Domain::ConstantRange => [a[0].min(b[0]), a[1].max(b[1])],
        }
    }

    /// The most precise abstraction of a single concrete value.
    pub fn from_concrete(self, x: u64, width: u32) -> AbstractValue {
        let x = x & mask(width);
        match self {
            Domain::KnownBits => [!x & mask(width), x],
            Domain::ConstantRange => [x, x],
        }
    }

    pub fn contains(self, v: &AbstractValue, x: u64) -> bool {
        match self {
            Domain::KnownBits => x & v[0] == 0 && x & v[1] == v[1] && !self.is_bottom(v),
            Domain::ConstantRange => v[0] <= x && x <= v[1],
        }
    }

    /// `a` over-approximates `b`.
    pub fn is_superset(self, a: &AbstractValue, b: &AbstractValue, width: u32) -> bool {
        self.meet(a, b, width) == *b
    }

    /// Imprecision of `a` relative to `b`; 0 iff equal.
    pub fn distance(self, a: &AbstractValue, b: &AbstractValue) -> u64 {
        match self {
            Domain::KnownBits => ((a[0] ^ b[0]).count_ones() + (a[1] ^ b[1]).count_ones()) as u64,
            Domain::ConstantRange => a[0].abs_diff(b[0]) + a[1].abs_diff(b[1]),
        }
    }

    /// Every non-bottom abstract value at `width`.
    pub fn enumerate(self, width: u32) -> Vec<AbstractValue> {
        let m = mask(width);
        match self {
            Domain::KnownBits => {
                let mut out = Vec::new();
                for zero in 0..=m {
                    // Submasks of the complement of `zero`.
                    let free = !zero & m;
                    let mut one = free;
                    loop {
                        out.push([zero, one]);
                        if one == 0 {
                            break;
                        }
                        one = (one - 1) & free;
                    }
                }
                out
            }
            Domain::ConstantRange => {
                let mut out = Vec::new();
                for lo in 0..=m {
                    for hi in lo..=m {
                        out.push([lo, hi]);
                    }
                }
                out
            }
        }
    }

    /// The concrete values `v` stands for, in increasing order.
    pub fn concretize(self, v: &AbstractValue, width: u32) -> Vec<u64> {
        if self.is_bottom(v) {
            return vec![];
        }
        match self {
            Domain::KnownBits => (0..=mask(width)).filter(|x| self.contains(v, *x)).collect(),
            Domain::ConstantRange => (v[0]..=v[1].min(mask(width))).collect(),
        }
    }

    /// Text of a constant abstract value, for dumps.
    pub fn format_value(self, v: &AbstractValue, width: u32) -> String {
        match self {
            Domain::KnownBits => (0..width)
                .rev()
                .map(|i| {
                    let bit = 1u64 << i;
                    match (v[0] & bit != 0, v[1] & bit != 0) {
                        (true, true) => '!',
                        (true, false) => '0',
                        (false, true) => '1',
                        (false, false) => '?',
                    }
                })
                .collect(),
            Domain::ConstantRange => format!("[{}, {}]", v[0], v[1]),
        }
    }

    /// C++-like helpers the lowered programs and the combined solution rely
    /// on: `getTop`, `meet` and the field constructor.
    pub fn helper_source(self) -> &'static str {
        match self {
            Domain::KnownBits => KNOWN_BITS_HELPERS,
            Domain::ConstantRange => CONSTANT_RANGE_HELPERS,
        }
    }
}

const KNOWN_BITS_HELPERS: &str = "\
Vec<2> getTop(const Vec<2> &arg) {
  unsigned w = arg[0].getBitWidth();
  return Vec<2>{APInt(w, 0), APInt(w, 0)};
}

Vec<2> meet(const Vec<2> &lhs, const Vec<2> &rhs) {
  return Vec<2>{lhs[0] | rhs[0], lhs[1] | rhs[1]};
}
";

const CONSTANT_RANGE_HELPERS: &str = "\
Vec<2> getTop(const Vec<2> &arg) {
  unsigned w = arg[0].getBitWidth();
  return Vec<2>{APInt::getMinValue(w), APInt::getMaxValue(w)};
}

Vec<2> meet(const Vec<2> &lhs, const Vec<2> &rhs) {
  APInt lo = A::APIntOps::umax(lhs[0], rhs[0]);
  APInt hi = A::APIntOps::umin(lhs[1], rhs[1]);
  if (lo.ugt(hi)) {
    unsigned w = lo.getBitWidth();
    return Vec<2>{APInt::getMaxValue(w), APInt::getMinValue(w)};
  }
  return Vec<2>{lo, hi};
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Domain::KnownBits, 3, 27; "known bits is three to the width")]
    #[test_case(Domain::ConstantRange, 3, 36; "ranges are pairs lo le hi")]
    fn enumerate_counts(domain: Domain, width: u32, want: usize) {
        let all = domain.enumerate(width);
        assert_eq!(all.len(), want);
        assert!(all.iter().all(|v| !domain.is_bottom(v)));
        assert!(all.contains(&domain.top(width)));
    }

    #[test_case(Domain::KnownBits; "known bits")]
    #[test_case(Domain::ConstantRange; "constant range")]
    fn lattice_laws(domain: Domain) {
        let w = 3;
        let all = domain.enumerate(w);
        let top = domain.top(w);
        for a in &all {
            assert!(domain.is_superset(&top, a, w));
            assert_eq!(domain.meet(&top, a, w), *a);
            assert_eq!(domain.join(a, &domain.bottom(w)), *a);
            assert_eq!(domain.distance(a, a), 0);
            for x in domain.concretize(a, w) {
                assert!(domain.is_superset(a, &domain.from_concrete(x, w), w));
            }
        }
        for a in all.iter().step_by(5) {
            for b in all.iter().step_by(3) {
                let j = domain.join(a, b);
                assert!(domain.is_superset(&j, a, w));
                assert!(domain.is_superset(&j, b, w));
                let m = domain.meet(a, b, w);
                if !domain.is_bottom(&m) {
                    assert!(domain.is_superset(a, &m, w));
                    assert!(domain.is_superset(b, &m, w));
                }
            }
        }
    }

    #[test]
    fn known_bits_concretization() {
        let d = Domain::KnownBits;
        // 1?0
        let v = [0b001, 0b100];
        assert_eq!(d.concretize(&v, 3), vec![0b100, 0b110]);
        assert_eq!(d.format_value(&v, 3), "1?0");
        assert_eq!(d.from_concrete(0b101, 3), [0b010, 0b101]);
    }

    #[test]
    fn range_meet_of_disjoint_is_bottom() {
        let d = Domain::ConstantRange;
        let m = d.meet(&[0, 2], &[5, 7], 3);
        assert!(d.is_bottom(&m));
        assert_eq!(d.concretize(&[2, 4], 3), vec![2, 3, 4]);
        assert_eq!(d.distance(&[0, 7], &[2, 4]), 5);
    }
}
