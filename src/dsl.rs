// SPDX-License-Identifier: Apache-2.0

//! The closed operator catalog of the synthesis DSL.
//!
//! Every operator the synthesizer can place in a program body is a variant of
//! [`Operator`]. Its static properties (signature, which operand values are
//! considered trivial, whether both operands may be the same value) live in
//! an [`OperatorDescriptor`], which also knows how to build a fresh operation
//! or re-pick a single operand from the pools of values available at a given
//! program point.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::program::{Op, OpKind, Operand, OperandPools, ValueRef};

/// Value kinds flowing through a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    /// A bit-vector of the evaluation bit-width.
    Int,
    /// A single bit.
    Bool,
    /// A count or shift amount, conventionally in `0..=bitwidth`.
    BoundedInt,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Int, Kind::Bool, Kind::BoundedInt];

    pub fn index(self) -> usize {
        match self {
            Kind::Int => 0,
            Kind::Bool => 1,
            Kind::BoundedInt => 2,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Int => "int",
            Kind::Bool => "bool",
            Kind::BoundedInt => "bint",
        };
        write!(f, "{}", s)
    }
}

/// Comparison predicates, numbered the way the compare flags are numbered on
/// the command line (`0 = eq` ... `9 = uge`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// eq, ult, ule.
pub const DEFAULT_CMP_PREDICATES: [CmpPredicate; 3] =
    [CmpPredicate::Eq, CmpPredicate::Ult, CmpPredicate::Ule];

impl CmpPredicate {
    pub const ALL: [CmpPredicate; 10] = [
        CmpPredicate::Eq,
        CmpPredicate::Ne,
        CmpPredicate::Slt,
        CmpPredicate::Sle,
        CmpPredicate::Sgt,
        CmpPredicate::Sge,
        CmpPredicate::Ult,
        CmpPredicate::Ule,
        CmpPredicate::Ugt,
        CmpPredicate::Uge,
    ];

    pub fn from_flag(flag: u8) -> Option<CmpPredicate> {
        Self::ALL.get(flag as usize).copied()
    }

    pub fn flag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CmpPredicate::Eq => "eq",
            CmpPredicate::Ne => "ne",
            CmpPredicate::Slt => "slt",
            CmpPredicate::Sle => "sle",
            CmpPredicate::Sgt => "sgt",
            CmpPredicate::Sge => "sge",
            CmpPredicate::Ult => "ult",
            CmpPredicate::Ule => "ule",
            CmpPredicate::Ugt => "ugt",
            CmpPredicate::Uge => "uge",
        }
    }
}

/// The fixed constants every program carries in its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstantKind {
    True,
    False,
    Zero,
    One,
    AllOnes,
    BZero,
    BOne,
    BitWidth,
}

impl ConstantKind {
    /// Prefix order.
    pub const ALL: [ConstantKind; 8] = [
        ConstantKind::True,
        ConstantKind::False,
        ConstantKind::Zero,
        ConstantKind::One,
        ConstantKind::AllOnes,
        ConstantKind::BZero,
        ConstantKind::BOne,
        ConstantKind::BitWidth,
    ];

    pub fn kind(self) -> Kind {
        match self {
            ConstantKind::True | ConstantKind::False => Kind::Bool,
            ConstantKind::Zero | ConstantKind::One | ConstantKind::AllOnes => Kind::Int,
            ConstantKind::BZero | ConstantKind::BOne | ConstantKind::BitWidth => Kind::BoundedInt,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConstantKind::True => "true",
            ConstantKind::False => "false",
            ConstantKind::Zero => "zero",
            ConstantKind::One => "one",
            ConstantKind::AllOnes => "all_ones",
            ConstantKind::BZero => "bzero",
            ConstantKind::BOne => "bone",
            ConstantKind::BitWidth => "bitwidth",
        }
    }

    fn is_zero(self) -> bool {
        matches!(self, ConstantKind::Zero | ConstantKind::BZero)
    }

    fn is_one(self) -> bool {
        matches!(self, ConstantKind::One | ConstantKind::BOne)
    }

    fn is_all_ones(self) -> bool {
        self == ConstantKind::AllOnes
    }
}

/// Operand values that would make an operator application a no-op or a
/// constant, and are therefore never selected for that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrivialFilter {
    Nothing,
    Zero,
    ZeroOrOne,
    ZeroOrAllOnes,
    OneOrAllOnes,
    AllOnes,
    ZeroOrOneOrAllOnes,
    BoolConstant,
}

impl TrivialFilter {
    /// Returns true if a value defined by `constant` must not fill this slot.
    pub fn rejects(self, constant: Option<ConstantKind>) -> bool {
        let Some(c) = constant else {
            return false;
        };
        match self {
            TrivialFilter::Nothing => false,
            TrivialFilter::Zero => c.is_zero(),
            TrivialFilter::ZeroOrOne => c.is_zero() || c.is_one(),
            TrivialFilter::ZeroOrAllOnes => c.is_zero() || c.is_all_ones(),
            TrivialFilter::OneOrAllOnes => c.is_one() || c.is_all_ones(),
            TrivialFilter::AllOnes => c.is_all_ones(),
            TrivialFilter::ZeroOrOneOrAllOnes => c.is_zero() || c.is_one() || c.is_all_ones(),
            TrivialFilter::BoolConstant => c.kind() == Kind::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    // Int results.
    /// Bitwise not.
    Neg,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Select,
    LShr,
    AShr,
    Shl,
    UMin,
    UMax,
    SMin,
    SMax,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    SetHighBits,
    SetLowBits,
    ClearHighBits,
    ClearLowBits,
    SetSignBit,
    ClearSignBit,
    // BoundedInt results.
    BAdd,
    BSub,
    BSelect,
    BUMin,
    BUMax,
    CountLOne,
    CountLZero,
    CountROne,
    CountRZero,
    // Bool results.
    /// Compares two ints under a predicate chosen at build time.
    Cmp,
    /// Compares two bounded ints.
    BCmp,
    AndI,
    OrI,
    XorI,
}

pub const BASIC_INT_OPS: &[Operator] = &[
    Operator::Neg,
    Operator::And,
    Operator::Or,
    Operator::Xor,
    Operator::Add,
];

pub const FULL_INT_OPS: &[Operator] = &[
    Operator::Neg,
    Operator::And,
    Operator::Or,
    Operator::Xor,
    Operator::Add,
    Operator::Sub,
    Operator::Select,
    Operator::LShr,
    Operator::AShr,
    Operator::Shl,
    Operator::UMin,
    Operator::UMax,
    Operator::SMin,
    Operator::SMax,
    Operator::Mul,
    Operator::UDiv,
    Operator::SDiv,
    Operator::URem,
    Operator::SRem,
    Operator::SetHighBits,
    Operator::SetLowBits,
    Operator::ClearHighBits,
    Operator::ClearLowBits,
    Operator::SetSignBit,
    Operator::ClearSignBit,
];

pub const BINT_OPS: &[Operator] = &[
    Operator::BAdd,
    Operator::BSub,
    Operator::BSelect,
    Operator::BUMin,
    Operator::BUMax,
    Operator::CountLOne,
    Operator::CountLZero,
    Operator::CountROne,
    Operator::CountRZero,
];

pub const BASIC_BOOL_OPS: &[Operator] = &[Operator::Cmp, Operator::BCmp];

pub const FULL_BOOL_OPS: &[Operator] = &[
    Operator::AndI,
    Operator::OrI,
    Operator::XorI,
    Operator::Cmp,
    Operator::BCmp,
];

const INT: &[Kind] = &[Kind::Int];
const INT_INT: &[Kind] = &[Kind::Int, Kind::Int];
const INT_BINT: &[Kind] = &[Kind::Int, Kind::BoundedInt];
const BINT_BINT: &[Kind] = &[Kind::BoundedInt, Kind::BoundedInt];
const BOOL_BOOL: &[Kind] = &[Kind::Bool, Kind::Bool];
const SELECT_INT: &[Kind] = &[Kind::Bool, Kind::Int, Kind::Int];
const SELECT_BINT: &[Kind] = &[Kind::Bool, Kind::BoundedInt, Kind::BoundedInt];

use TrivialFilter as F;

const NO_FILTER_1: &[TrivialFilter] = &[F::Nothing];
const NO_FILTER_2: &[TrivialFilter] = &[F::Nothing, F::Nothing];
const SELECT_FILTERS: &[TrivialFilter] = &[F::BoolConstant, F::Nothing, F::Nothing];

/// Static properties of one operator.
#[derive(Debug, Clone, Copy)]
pub struct OperatorDescriptor {
    pub operator: Operator,
    pub name: &'static str,
    pub result_kind: Kind,
    pub operand_kinds: &'static [Kind],
    /// Both (non-condition) operands must be distinct values.
    pub is_idempotent: bool,
    /// One filter per operand slot.
    pub filters: &'static [TrivialFilter],
}

/// Toggles that relax operand selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRules {
    pub skip_trivial: bool,
    pub respect_idempotence: bool,
}

impl Default for SelectionRules {
    fn default() -> Self {
        SelectionRules {
            skip_trivial: true,
            respect_idempotence: true,
        }
    }
}

impl Operator {
    pub fn descriptor(self) -> OperatorDescriptor {
        use Operator::*;
        let (name, result_kind, operand_kinds, is_idempotent, filters): (
            &'static str,
            Kind,
            &'static [Kind],
            bool,
            &'static [TrivialFilter],
        ) = match self {
            Neg => ("neg", Kind::Int, INT, false, &[F::ZeroOrAllOnes]),
            And => ("and", Kind::Int, INT_INT, true, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            Or => ("or", Kind::Int, INT_INT, true, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            Xor => ("xor", Kind::Int, INT_INT, true, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            Add => ("add", Kind::Int, INT_INT, false, &[F::Zero, F::Zero]),
            Sub => ("sub", Kind::Int, INT_INT, true, &[F::Zero, F::Zero]),
            Select => ("select", Kind::Int, SELECT_INT, true, SELECT_FILTERS),
            LShr => ("lshr", Kind::Int, INT_BINT, false, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            AShr => ("ashr", Kind::Int, INT_BINT, false, NO_FILTER_2),
            Shl => ("shl", Kind::Int, INT_BINT, false, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            UMin => ("umin", Kind::Int, INT_INT, true, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            UMax => ("umax", Kind::Int, INT_INT, true, &[F::ZeroOrAllOnes, F::ZeroOrAllOnes]),
            SMin => ("smin", Kind::Int, INT_INT, true, NO_FILTER_2),
            SMax => ("smax", Kind::Int, INT_INT, true, NO_FILTER_2),
            Mul => ("mul", Kind::Int, INT_INT, false, &[F::ZeroOrOne, F::ZeroOrOne]),
            UDiv => ("udiv", Kind::Int, INT_INT, false, NO_FILTER_2),
            SDiv => ("sdiv", Kind::Int, INT_INT, false, NO_FILTER_2),
            URem => ("urem", Kind::Int, INT_INT, false, NO_FILTER_2),
            SRem => ("srem", Kind::Int, INT_INT, false, NO_FILTER_2),
            SetHighBits => (
                "set_high_bits",
                Kind::Int,
                INT_BINT,
                false,
                &[F::AllOnes, F::ZeroOrAllOnes],
            ),
            SetLowBits => (
                "set_low_bits",
                Kind::Int,
                INT_BINT,
                false,
                &[F::OneOrAllOnes, F::ZeroOrAllOnes],
            ),
            ClearHighBits => (
                "clear_high_bits",
                Kind::Int,
                INT_BINT,
                false,
                &[F::Zero, F::ZeroOrAllOnes],
            ),
            ClearLowBits => (
                "clear_low_bits",
                Kind::Int,
                INT_BINT,
                false,
                &[F::Zero, F::ZeroOrAllOnes],
            ),
            SetSignBit => ("set_sign_bit", Kind::Int, INT, false, &[F::OneOrAllOnes]),
            ClearSignBit => ("clear_sign_bit", Kind::Int, INT, false, &[F::Zero]),
            BAdd => ("add", Kind::BoundedInt, BINT_BINT, false, &[F::Zero, F::Zero]),
            BSub => ("sub", Kind::BoundedInt, BINT_BINT, true, &[F::Zero, F::Zero]),
            BSelect => ("select", Kind::BoundedInt, SELECT_BINT, true, SELECT_FILTERS),
            BUMin => (
                "umin",
                Kind::BoundedInt,
                BINT_BINT,
                true,
                &[F::ZeroOrAllOnes, F::ZeroOrAllOnes],
            ),
            BUMax => (
                "umax",
                Kind::BoundedInt,
                BINT_BINT,
                true,
                &[F::ZeroOrAllOnes, F::ZeroOrAllOnes],
            ),
            CountLOne => ("countl_one", Kind::BoundedInt, INT, false, &[F::ZeroOrOneOrAllOnes]),
            CountLZero => ("countl_zero", Kind::BoundedInt, INT, false, &[F::ZeroOrOneOrAllOnes]),
            CountROne => ("countr_one", Kind::BoundedInt, INT, false, &[F::ZeroOrOneOrAllOnes]),
            CountRZero => ("countr_zero", Kind::BoundedInt, INT, false, &[F::ZeroOrOneOrAllOnes]),
            Cmp => ("cmp", Kind::Bool, INT_INT, true, NO_FILTER_2),
            BCmp => ("cmp", Kind::Bool, BINT_BINT, true, NO_FILTER_2),
            AndI => ("andi", Kind::Bool, BOOL_BOOL, true, &[F::BoolConstant, F::BoolConstant]),
            OrI => ("ori", Kind::Bool, BOOL_BOOL, true, &[F::BoolConstant, F::BoolConstant]),
            XorI => ("xori", Kind::Bool, BOOL_BOOL, true, &[F::BoolConstant, F::BoolConstant]),
        };
        debug_assert_eq!(operand_kinds.len(), filters.len());
        OperatorDescriptor {
            operator: self,
            name,
            result_kind,
            operand_kinds,
            is_idempotent,
            filters,
        }
    }

    pub fn result_kind(self) -> Kind {
        self.descriptor().result_kind
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn is_compare(self) -> bool {
        matches!(self, Operator::Cmp | Operator::BCmp)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.descriptor();
        write!(f, "{}(", d.name)?;
        for (i, k) in d.operand_kinds.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", k)?;
        }
        write!(f, ") -> {}", d.result_kind)
    }
}

/// Picks a value from `pool`, scanning from a random start position and
/// wrapping around, skipping values the filter rejects and `exclude`.
///
/// Returns `None` when no value in the pool qualifies.
pub fn select_operand<R: Rng + ?Sized>(
    rng: &mut R,
    pool: &[Operand],
    filter: TrivialFilter,
    exclude: Option<ValueRef>,
) -> Option<Operand> {
    if pool.is_empty() {
        return None;
    }
    let start = rng.gen_range(0..pool.len());
    (0..pool.len())
        .map(|i| pool[(start + i) % pool.len()])
        .find(|cand| !filter.rejects(cand.constant) && Some(cand.value) != exclude)
}

impl OperatorDescriptor {
    /// The slot whose value this slot must differ from, if any.
    pub fn partner_slot(&self, slot: usize) -> Option<usize> {
        if !self.is_idempotent {
            return None;
        }
        match (self.operand_kinds.len(), slot) {
            (2, 0) => Some(1),
            (2, 1) => Some(0),
            // Select: the two branches must differ, the condition is free.
            (3, 1) => Some(2),
            (3, 2) => Some(1),
            _ => None,
        }
    }

    fn filter_for(&self, slot: usize, rules: SelectionRules) -> TrivialFilter {
        if rules.skip_trivial {
            self.filters[slot]
        } else {
            TrivialFilter::Nothing
        }
    }

    /// Builds a fresh application of this operator with operands drawn from
    /// `pools`. Compare operators get a predicate drawn from `predicates`.
    ///
    /// Returns `None` when the pools cannot satisfy the filters.
    pub fn build<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pools: &OperandPools,
        predicates: &[CmpPredicate],
        rules: SelectionRules,
    ) -> Option<Op> {
        let mut operands: Vec<ValueRef> = Vec::with_capacity(self.operand_kinds.len());
        for (slot, kind) in self.operand_kinds.iter().enumerate() {
            let exclude = if rules.respect_idempotence {
                self.partner_slot(slot)
                    .filter(|p| *p < slot)
                    .map(|p| operands[p])
            } else {
                None
            };
            let chosen = select_operand(rng, pools.get(*kind), self.filter_for(slot, rules), exclude)?;
            operands.push(chosen.value);
        }
        let predicate = if self.operator.is_compare() {
            if predicates.is_empty() {
                return None;
            }
            Some(predicates[rng.gen_range(0..predicates.len())])
        } else {
            None
        };
        Some(Op {
            kind: OpKind::Apply {
                operator: self.operator,
                predicate,
            },
            operands,
            result: Some(self.result_kind),
        })
    }

    /// Re-picks operand `slot` of `op` from `pool`, honoring the slot's
    /// filter and the idempotence constraint against the partner slot.
    ///
    /// Returns false (leaving `op` untouched) when nothing in the pool
    /// qualifies.
    pub fn mutate_operand<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        op: &mut Op,
        slot: usize,
        pool: &[Operand],
        rules: SelectionRules,
    ) -> bool {
        let exclude = if rules.respect_idempotence {
            self.partner_slot(slot).map(|p| op.operands[p])
        } else {
            None
        };
        match select_operand(rng, pool, self.filter_for(slot, rules), exclude) {
            Some(chosen) => {
                op.operands[slot] = chosen.value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn catalogs_have_consistent_result_kinds() {
        for op in FULL_INT_OPS.iter().chain(BASIC_INT_OPS) {
            assert_eq!(op.result_kind(), Kind::Int, "{op}");
        }
        for op in BINT_OPS {
            assert_eq!(op.result_kind(), Kind::BoundedInt, "{op}");
        }
        for op in FULL_BOOL_OPS.iter().chain(BASIC_BOOL_OPS) {
            assert_eq!(op.result_kind(), Kind::Bool, "{op}");
        }
        for op in BASIC_INT_OPS {
            assert!(FULL_INT_OPS.contains(op));
        }
    }

    #[test]
    fn cmp_flags_round_trip_through_names() {
        assert_eq!(CmpPredicate::from_flag(0), Some(CmpPredicate::Eq));
        assert_eq!(CmpPredicate::from_flag(6), Some(CmpPredicate::Ult));
        assert_eq!(CmpPredicate::from_flag(7), Some(CmpPredicate::Ule));
        assert_eq!(CmpPredicate::from_flag(10), None);
        assert_eq!(CmpPredicate::Uge.flag(), 9);
    }

    #[test]
    fn filters_match_int_and_bint_constants() {
        assert!(TrivialFilter::Zero.rejects(Some(ConstantKind::BZero)));
        assert!(TrivialFilter::ZeroOrOne.rejects(Some(ConstantKind::BOne)));
        assert!(!TrivialFilter::ZeroOrAllOnes.rejects(Some(ConstantKind::BitWidth)));
        assert!(TrivialFilter::BoolConstant.rejects(Some(ConstantKind::False)));
        assert!(!TrivialFilter::BoolConstant.rejects(None));
        assert!(!TrivialFilter::Nothing.rejects(Some(ConstantKind::Zero)));
    }

    #[test]
    fn select_operand_honors_exclusion_and_filter() {
        let pool = vec![
            Operand {
                value: ValueRef(0),
                constant: None,
            },
            Operand {
                value: ValueRef(1),
                constant: Some(ConstantKind::Zero),
            },
            Operand {
                value: ValueRef(2),
                constant: Some(ConstantKind::AllOnes),
            },
        ];
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        for _ in 0..32 {
            let picked = select_operand(&mut rng, &pool, TrivialFilter::ZeroOrAllOnes, None);
            assert_eq!(picked.map(|o| o.value), Some(ValueRef(0)));
        }
        let none = select_operand(&mut rng, &pool, TrivialFilter::ZeroOrAllOnes, Some(ValueRef(0)));
        assert!(none.is_none());
    }

    #[test]
    fn select_partner_slots_cover_branches_only() {
        let d = Operator::Select.descriptor();
        assert_eq!(d.partner_slot(0), None);
        assert_eq!(d.partner_slot(1), Some(2));
        assert_eq!(d.partner_slot(2), Some(1));
        assert_eq!(Operator::Add.descriptor().partner_slot(0), None);
        assert_eq!(Operator::Xor.descriptor().partner_slot(1), Some(0));
    }
}
