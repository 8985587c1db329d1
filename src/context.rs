// SPDX-License-Identifier: Apache-2.0

//! Operator catalogs and random op construction.

use std::collections::HashMap;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::dsl::{
    BASIC_BOOL_OPS, BASIC_INT_OPS, BINT_OPS, CmpPredicate, DEFAULT_CMP_PREDICATES, FULL_BOOL_OPS,
    FULL_INT_OPS, Kind, Operator, SelectionRules,
};
use crate::program::{Op, OpFrequency, Operand, OperandPools};

/// Which operators may be drawn for each result kind, with optional
/// per-operator weights.
///
/// A context is shared read-only by all chains of a round; randomness comes
/// from the caller's rng.
#[derive(Debug, Clone)]
pub struct SynthesizerContext {
    collections: [Vec<Operator>; 3],
    weights: HashMap<Operator, u64>,
    weighted: bool,
    cmp_predicates: Vec<CmpPredicate>,
    rules: SelectionRules,
}

impl SynthesizerContext {
    /// Basic int ops, basic bool ops, all bounded-int ops, default compare
    /// predicates, every weight 1.
    pub fn new(weighted: bool) -> Self {
        let mut ctx = SynthesizerContext {
            collections: [vec![], vec![], vec![]],
            weights: HashMap::new(),
            weighted,
            cmp_predicates: DEFAULT_CMP_PREDICATES.to_vec(),
            rules: SelectionRules::default(),
        };
        ctx.set_collection(Kind::Int, BASIC_INT_OPS);
        ctx.set_collection(Kind::Bool, BASIC_BOOL_OPS);
        ctx.set_collection(Kind::BoundedInt, BINT_OPS);
        ctx
    }

    fn set_collection(&mut self, kind: Kind, ops: &[Operator]) {
        for op in ops {
            self.weights.entry(*op).or_insert(1);
        }
        self.collections[kind.index()] = ops.to_vec();
    }

    pub fn use_basic_int_ops(&mut self) {
        self.set_collection(Kind::Int, BASIC_INT_OPS);
    }

    pub fn use_full_int_ops(&mut self) {
        self.set_collection(Kind::Int, FULL_INT_OPS);
    }

    pub fn use_basic_bool_ops(&mut self) {
        self.set_collection(Kind::Bool, BASIC_BOOL_OPS);
    }

    pub fn use_full_bool_ops(&mut self) {
        self.set_collection(Kind::Bool, FULL_BOOL_OPS);
    }

    #[cfg(test)]
    pub(crate) fn clear_operators(&mut self, kind: Kind) {
        self.collections[kind.index()].clear();
    }

    pub fn set_cmp_predicates(&mut self, predicates: &[CmpPredicate]) {
        self.cmp_predicates = predicates.to_vec();
    }

    pub fn cmp_predicates(&self) -> &[CmpPredicate] {
        &self.cmp_predicates
    }

    pub fn operators(&self, kind: Kind) -> &[Operator] {
        &self.collections[kind.index()]
    }

    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    pub fn weight(&self, op: Operator) -> u64 {
        self.weights.get(&op).copied().unwrap_or(0)
    }

    fn choose_operator<R: Rng + ?Sized>(&self, kind: Kind, rng: &mut R) -> Option<Operator> {
        let ops = self.operators(kind);
        if ops.is_empty() {
            return None;
        }
        if self.weighted {
            let weights: Vec<u64> = ops.iter().map(|op| self.weight(*op)).collect();
            if let Ok(dist) = WeightedIndex::new(&weights) {
                return Some(ops[dist.sample(rng)]);
            }
        }
        Some(ops[rng.gen_range(0..ops.len())])
    }

    /// Draws an operator producing `kind` and builds an op from `pools`.
    ///
    /// Returns `None` if the drawn operator's operands cannot be satisfied;
    /// callers retry.
    pub fn get_random_op<R: Rng + ?Sized>(&self, kind: Kind, pools: &OperandPools, rng: &mut R) -> Option<Op> {
        let operator = self.choose_operator(kind, rng)?;
        operator
            .descriptor()
            .build(rng, pools, &self.cmp_predicates, self.rules)
    }

    /// Re-picks operand `slot` of `op` from `pool`.
    pub fn replace_operand<R: Rng + ?Sized>(
        &self,
        op: &mut Op,
        slot: usize,
        pool: &[Operand],
        rng: &mut R,
    ) -> bool {
        match op.operator() {
            Some(operator) => operator
                .descriptor()
                .mutate_operand(rng, op, slot, pool, self.rules),
            None => false,
        }
    }

    /// Resets every active operator's weight to 1, then sets those counted
    /// in `freq` to `1 + count`. Counts for operators outside the active
    /// catalog are ignored.
    pub fn update_weights(&mut self, freq: &OpFrequency) {
        for kind in Kind::ALL {
            for op in self.collections[kind.index()].iter() {
                self.weights.insert(*op, 1);
            }
        }
        for (kind, counts) in freq {
            for (op, count) in counts {
                if !self.collections[kind.index()].contains(op) {
                    log::warn!("ignoring weight for inactive operator {}", op);
                    continue;
                }
                self.weights.insert(*op, 1 + *count as u64);
            }
        }
    }

    /// Active operators and their weights, for logging.
    pub fn weight_summary(&self) -> String {
        let mut parts = Vec::new();
        for kind in Kind::ALL {
            for op in self.operators(kind) {
                parts.push(format!("{}:{}={}", kind, op.name(), self.weight(*op)));
            }
        }
        parts.join(" ")
    }
}
