// SPDX-License-Identifier: Apache-2.0

//! Arena representation of candidate programs and their in-place mutation.
//!
//! A [`Program`] is a flat list of [`Op`]s. Operands are [`ValueRef`]s, i.e.
//! indices of earlier ops in the same list, so a program is a DAG in
//! topological order by construction and cloning it is a plain `Vec` copy.
//!
//! Layout of every program:
//!
//! ```text
//!   prefix : get lhs[0], get lhs[1], get rhs[0], get rhs[1],
//!            true, false, zero, one, all_ones, bzero, bone, bitwidth
//!   body   : operator applications (the only mutable region)
//!   suffix : make(..) + return      (abstract-valued programs)
//!            return                 (guard programs returning bool)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow, ensure};
use rand::Rng;
use xfer_mcmc::RoundTag;

use crate::context::SynthesizerContext;
use crate::domain::NUM_FIELDS;
use crate::dsl::{CmpPredicate, ConstantKind, Kind, Operator};

/// Number of abstract arguments of a transfer function (lhs, rhs).
pub const NUM_ARGS: usize = 2;

/// Number of ops in the fixed prefix.
pub const PREFIX_LEN: usize = NUM_ARGS * NUM_FIELDS + ConstantKind::ALL.len();

/// Upper bound on rebuild attempts before a kind is declared unbuildable.
const MAX_BUILD_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(pub usize);

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A value that may fill an operand slot, with the constant that defines it
/// (if any) so triviality filters can be applied without the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub value: ValueRef,
    pub constant: Option<ConstantKind>,
}

/// Values available at one program point, split by kind.
#[derive(Debug, Clone, Default)]
pub struct OperandPools {
    pools: [Vec<Operand>; 3],
}

impl OperandPools {
    pub fn get(&self, kind: Kind) -> &[Operand] {
        &self.pools[kind.index()]
    }

    fn push(&mut self, kind: Kind, operand: Operand) {
        self.pools[kind.index()].push(operand);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Extracts field `field` of abstract argument `arg`.
    GetField { arg: usize, field: usize },
    Constant(ConstantKind),
    Apply {
        operator: Operator,
        predicate: Option<CmpPredicate>,
    },
    /// Packs its operands into the abstract return value.
    Make,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Op {
    pub kind: OpKind,
    pub operands: Vec<ValueRef>,
    /// `None` for `Make` and `Return`.
    pub result: Option<Kind>,
}

impl Op {
    pub fn get_field(arg: usize, field: usize) -> Op {
        Op {
            kind: OpKind::GetField { arg, field },
            operands: vec![],
            result: Some(Kind::Int),
        }
    }

    pub fn constant(c: ConstantKind) -> Op {
        Op {
            kind: OpKind::Constant(c),
            operands: vec![],
            result: Some(c.kind()),
        }
    }

    pub fn apply(operator: Operator, operands: Vec<ValueRef>, predicate: Option<CmpPredicate>) -> Op {
        Op {
            kind: OpKind::Apply {
                operator,
                predicate,
            },
            operands,
            result: Some(operator.result_kind()),
        }
    }

    pub fn operator(&self) -> Option<Operator> {
        match self.kind {
            OpKind::Apply { operator, .. } => Some(operator),
            _ => None,
        }
    }

    pub fn constant_kind(&self) -> Option<ConstantKind> {
        match self.kind {
            OpKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Body ops are the only ones the sampler may touch.
    pub fn is_body(&self) -> bool {
        matches!(self.kind, OpKind::Apply { .. })
    }
}

/// What a program returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// A transfer function body: an abstract value built by `make`.
    Abstract,
    /// A guard condition.
    Bool,
}

/// Per-kind operator usage counts.
pub type OpFrequency = BTreeMap<Kind, BTreeMap<Operator, usize>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    /// Where in the search this program was recorded.
    pub tag: Option<RoundTag>,
    /// Built by a context using learned operator weights.
    pub from_weighted: bool,
    returns: ReturnKind,
    ops: Vec<Op>,
}

impl Program {
    /// A program containing only the fixed prefix.
    pub fn with_prefix(name: &str, returns: ReturnKind) -> Program {
        let mut ops = Vec::with_capacity(PREFIX_LEN + 16);
        for arg in 0..NUM_ARGS {
            for field in 0..NUM_FIELDS {
                ops.push(Op::get_field(arg, field));
            }
        }
        for c in ConstantKind::ALL {
            ops.push(Op::constant(c));
        }
        Program {
            name: name.to_string(),
            tag: None,
            from_weighted: false,
            returns,
            ops,
        }
    }

    pub fn field_ref(arg: usize, field: usize) -> ValueRef {
        ValueRef(arg * NUM_FIELDS + field)
    }

    pub fn constant_ref(c: ConstantKind) -> ValueRef {
        let pos = ConstantKind::ALL
            .iter()
            .position(|k| *k == c)
            .unwrap_or_default();
        ValueRef(NUM_ARGS * NUM_FIELDS + pos)
    }

    /// Appends `op`; its operands must already be defined.
    pub fn push(&mut self, op: Op) -> ValueRef {
        debug_assert!(
            op.operands.iter().all(|r| r.0 < self.ops.len()),
            "forward reference in {:?}",
            op
        );
        self.ops.push(op);
        ValueRef(self.ops.len() - 1)
    }

    /// Appends `make(fields..)` and `return`.
    pub fn finish_abstract(&mut self, fields: &[ValueRef]) {
        debug_assert_eq!(self.returns, ReturnKind::Abstract);
        let make = self.push(Op {
            kind: OpKind::Make,
            operands: fields.to_vec(),
            result: None,
        });
        self.push(Op {
            kind: OpKind::Return,
            operands: vec![make],
            result: None,
        });
    }

    /// Appends `return cond`.
    pub fn finish_bool(&mut self, cond: ValueRef) {
        debug_assert_eq!(self.returns, ReturnKind::Bool);
        self.push(Op {
            kind: OpKind::Return,
            operands: vec![cond],
            result: None,
        });
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn op(&self, idx: usize) -> &Op {
        &self.ops[idx]
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn returns(&self) -> ReturnKind {
        self.returns
    }

    /// Marks every op transitively used by the return.
    pub fn live_mask(&self) -> Vec<bool> {
        let mut live = vec![false; self.ops.len()];
        if let Some(last) = live.last_mut() {
            *last = true;
        }
        for idx in (0..self.ops.len()).rev() {
            if !live[idx] {
                continue;
            }
            for operand in &self.ops[idx].operands {
                live[operand.0] = true;
            }
        }
        live
    }

    /// Indices of body ops eligible for mutation, in reverse topological
    /// order. With `only_live`, ops that cannot affect the return value are
    /// skipped.
    pub fn get_modifiable_operations(&self, only_live: bool) -> Vec<usize> {
        let live = self.live_mask();
        (0..self.ops.len())
            .rev()
            .filter(|&i| self.ops[i].is_body() && (live[i] || !only_live))
            .collect()
    }

    /// Values of `kind` defined strictly before `idx`.
    pub fn get_valid_operands(&self, idx: usize, kind: Kind) -> Vec<Operand> {
        self.ops[..idx]
            .iter()
            .enumerate()
            .filter(|(_, op)| op.result == Some(kind))
            .map(|(i, op)| Operand {
                value: ValueRef(i),
                constant: op.constant_kind(),
            })
            .collect()
    }

    /// All values defined strictly before `idx`, by kind.
    pub fn operand_pools(&self, idx: usize) -> OperandPools {
        let mut pools = OperandPools::default();
        for (i, op) in self.ops[..idx].iter().enumerate() {
            if let Some(kind) = op.result {
                pools.push(
                    kind,
                    Operand {
                        value: ValueRef(i),
                        constant: op.constant_kind(),
                    },
                );
            }
        }
        pools
    }

    /// A copy holding only the ops the return depends on. Indices are
    /// renumbered, so the result is meant for output, not further mutation.
    pub fn eliminate_dead_code(&self) -> Program {
        let live = self.live_mask();
        let mut remap: Vec<Option<usize>> = vec![None; self.ops.len()];
        let mut ops = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            if !live[i] {
                continue;
            }
            let mut op = op.clone();
            for operand in op.operands.iter_mut() {
                // Operands of a live op are live and therefore already mapped.
                *operand = ValueRef(remap[operand.0].unwrap_or(operand.0));
            }
            remap[i] = Some(ops.len());
            ops.push(op);
        }
        Program {
            name: self.name.clone(),
            tag: self.tag,
            from_weighted: self.from_weighted,
            returns: self.returns,
            ops,
        }
    }

    /// Checks the structural invariants: operands reference earlier ops of
    /// the right kind, exactly one return and it is last, and the return
    /// shape matches [`ReturnKind`].
    pub fn check_well_formed(&self) -> Result<(), String> {
        let Some(last) = self.ops.last() else {
            return Err("empty program".to_string());
        };
        if last.kind != OpKind::Return || last.operands.len() != 1 {
            return Err("last op must be a unary return".to_string());
        }
        for (i, op) in self.ops.iter().enumerate() {
            if op.kind == OpKind::Return && i + 1 != self.ops.len() {
                return Err(format!("return at {} is not last", i));
            }
            for (slot, operand) in op.operands.iter().enumerate() {
                if operand.0 >= i {
                    return Err(format!("op {} slot {} references {} (not earlier)", i, slot, operand));
                }
                if let OpKind::Apply { operator, .. } = op.kind {
                    let want = operator.descriptor().operand_kinds[slot];
                    if self.ops[operand.0].result != Some(want) {
                        return Err(format!(
                            "op {} ({}) slot {} expects {} but {} is {:?}",
                            i, operator, slot, want, operand, self.ops[operand.0].result
                        ));
                    }
                }
            }
            if let OpKind::Apply { operator, predicate } = op.kind {
                if op.operands.len() != operator.descriptor().operand_kinds.len() {
                    return Err(format!("op {} ({}) has wrong arity", i, operator));
                }
                if operator.is_compare() != predicate.is_some() {
                    return Err(format!("op {} ({}) predicate mismatch", i, operator));
                }
            }
        }
        let ret = last.operands[0];
        match self.returns {
            ReturnKind::Abstract => {
                let make = &self.ops[ret.0];
                if make.kind != OpKind::Make || make.operands.len() != NUM_FIELDS {
                    return Err("abstract program must return a make".to_string());
                }
                if make
                    .operands
                    .iter()
                    .any(|r| self.ops[r.0].result != Some(Kind::Int))
                {
                    return Err("make fields must be ints".to_string());
                }
            }
            ReturnKind::Bool => {
                if self.ops[ret.0].result != Some(Kind::Bool) {
                    return Err("guard program must return a bool".to_string());
                }
            }
        }
        Ok(())
    }

    /// Counts operator usage over the live body ops of `programs`. Every
    /// kind has an entry, empty when nothing of that kind was used.
    pub fn count_op_frequency<'a, I>(programs: I) -> OpFrequency
    where
        I: IntoIterator<Item = &'a Program>,
    {
        let mut freq: OpFrequency = Kind::ALL.iter().map(|k| (*k, BTreeMap::new())).collect();
        for program in programs {
            let live = program.live_mask();
            for (op, _) in program.ops.iter().zip(live).filter(|(_, l)| *l) {
                if let Some(operator) = op.operator() {
                    *freq
                        .entry(operator.result_kind())
                        .or_default()
                        .entry(operator)
                        .or_insert(0) += 1;
                }
            }
        }
        freq
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ret = match self.returns {
            ReturnKind::Abstract => "abstract",
            ReturnKind::Bool => "bool",
        };
        write!(f, "func @{}(%lhs, %rhs) -> {}", self.name, ret)?;
        if let Some(tag) = self.tag {
            write!(f, " #{}", tag)?;
        }
        writeln!(f, " {{")?;
        for (i, op) in self.ops.iter().enumerate() {
            let args = op
                .operands
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            match &op.kind {
                OpKind::GetField { arg, field } => {
                    let name = if *arg == 0 { "lhs" } else { "rhs" };
                    writeln!(f, "  %{} = get {}[{}] : int", i, name, field)?
                }
                OpKind::Constant(c) => writeln!(f, "  %{} = const {} : {}", i, c.name(), c.kind())?,
                OpKind::Apply {
                    operator,
                    predicate,
                } => {
                    let pred = predicate.map(|p| format!(".{}", p.name())).unwrap_or_default();
                    writeln!(
                        f,
                        "  %{} = {}{}({}) : {}",
                        i,
                        operator.name(),
                        pred,
                        args,
                        operator.result_kind()
                    )?
                }
                OpKind::Make => writeln!(f, "  %{} = make({})", i, args)?,
                OpKind::Return => writeln!(f, "  return {}", args)?,
            }
        }
        write!(f, "}}")
    }
}

/// The last edit applied to a [`MutationProgram`], enough to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Replaced { idx: usize, old: Op },
    Operand { idx: usize, slot: usize, old: ValueRef },
}

/// A program under mutation plus a one-slot undo log.
#[derive(Debug, Clone)]
pub struct MutationProgram {
    program: Program,
    history: Option<Edit>,
}

impl MutationProgram {
    pub fn new(program: Program) -> Self {
        MutationProgram {
            program,
            history: None,
        }
    }

    /// Builds a program with `length` body ops, all drawn from `ctx`.
    ///
    /// The body is first laid out as placeholder ops of a fixed kind pattern
    /// (so the return has something of the right kind to pack), then every
    /// body op is replaced by a random one.
    pub fn construct_random<R: Rng + ?Sized>(
        ctx: &SynthesizerContext,
        rng: &mut R,
        name: &str,
        length: usize,
        returns: ReturnKind,
    ) -> Result<Self> {
        let mut program = Program::with_prefix(name, returns);
        program.from_weighted = ctx.is_weighted();
        let tmp_int = Program::field_ref(NUM_ARGS - 1, NUM_FIELDS - 1);
        let bitwidth = Program::constant_ref(ConstantKind::BitWidth);
        let nop_bool = || Op::apply(Operator::Cmp, vec![tmp_int, tmp_int], Some(CmpPredicate::Eq));
        let nop_int = || Op::apply(Operator::And, vec![tmp_int, tmp_int], None);
        match returns {
            ReturnKind::Abstract => {
                for i in 0..length {
                    match i % 4 {
                        0 => program.push(nop_bool()),
                        1 => program.push(Op::apply(Operator::BAdd, vec![bitwidth, bitwidth], None)),
                        _ => program.push(nop_int()),
                    };
                }
                // Pack the last int values, most recent first.
                let fields: Vec<ValueRef> = (0..program.len())
                    .rev()
                    .filter(|&i| program.op(i).result == Some(Kind::Int))
                    .take(NUM_FIELDS)
                    .map(ValueRef)
                    .collect();
                program.finish_abstract(&fields);
            }
            ReturnKind::Bool => {
                let mut last_bool = Program::constant_ref(ConstantKind::True);
                for i in 0..length {
                    if i % 4 == 0 {
                        program.push(nop_int());
                    } else {
                        last_bool = program.push(nop_bool());
                    }
                }
                program.finish_bool(last_bool);
            }
        }
        let mut result = MutationProgram::new(program);
        result.reset_to_random(ctx, rng)?;
        Ok(result)
    }

    /// Replaces every body op (live or not) without recording history.
    pub fn reset_to_random<R: Rng + ?Sized>(&mut self, ctx: &SynthesizerContext, rng: &mut R) -> Result<()> {
        for idx in 0..self.program.len() {
            if self.program.op(idx).is_body() {
                self.replace_entire_operation(idx, ctx, rng, false)?;
            }
        }
        Ok(())
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn history(&self) -> Option<&Edit> {
        self.history.as_ref()
    }

    pub fn get_modifiable_operations(&self, only_live: bool) -> Vec<usize> {
        self.program.get_modifiable_operations(only_live)
    }

    /// Swaps `new_op` into slot `idx`. All uses of the old op now read the
    /// new one, since uses refer to the slot.
    pub fn replace_operation(&mut self, idx: usize, new_op: Op, record: bool) {
        debug_assert_eq!(self.program.ops[idx].result, new_op.result);
        debug_assert!(new_op.operands.iter().all(|r| r.0 < idx));
        let old = std::mem::replace(&mut self.program.ops[idx], new_op);
        if record {
            self.history = Some(Edit::Replaced { idx, old });
        }
    }

    /// Replaces op `idx` with a fresh random op of the same result kind whose
    /// operands are all defined before `idx`.
    pub fn replace_entire_operation<R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        ctx: &SynthesizerContext,
        rng: &mut R,
        record: bool,
    ) -> Result<()> {
        let old = self.program.op(idx);
        ensure!(old.is_body(), "op {} is not a body op", idx);
        let kind = old
            .result
            .ok_or_else(|| anyhow!("body op {} has no result kind", idx))?;
        let pools = self.program.operand_pools(idx);
        for _ in 0..MAX_BUILD_ATTEMPTS {
            if let Some(new_op) = ctx.get_random_op(kind, &pools, rng) {
                self.replace_operation(idx, new_op, record);
                return Ok(());
            }
        }
        Err(anyhow!(
            "no {} operator could be built at position {} in {} attempts",
            kind,
            idx,
            MAX_BUILD_ATTEMPTS
        ))
    }

    /// Re-picks one random operand of op `idx`.
    ///
    /// Returns false when no alternative value passes the operator's filters;
    /// the program is then unchanged and nothing is recorded.
    pub fn replace_operand<R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        ctx: &SynthesizerContext,
        rng: &mut R,
        record: bool,
    ) -> bool {
        let op = self.program.op(idx);
        let Some(operator) = op.operator() else {
            return false;
        };
        if op.operands.is_empty() {
            return false;
        }
        let slot = rng.gen_range(0..op.operands.len());
        let kind = operator.descriptor().operand_kinds[slot];
        let pool = self.program.get_valid_operands(idx, kind);
        let mut new_op = op.clone();
        if !ctx.replace_operand(&mut new_op, slot, &pool, rng) {
            return false;
        }
        let old = self.program.ops[idx].operands[slot];
        self.program.ops[idx] = new_op;
        if record {
            self.history = Some(Edit::Operand { idx, slot, old });
        }
        true
    }

    /// Undoes the last recorded edit. Returns false if there was none.
    pub fn revert_operation(&mut self) -> bool {
        match self.history.take() {
            Some(Edit::Replaced { idx, old }) => {
                self.program.ops[idx] = old;
                true
            }
            Some(Edit::Operand { idx, slot, old }) => {
                self.program.ops[idx].operands[slot] = old;
                true
            }
            None => false,
        }
    }

    /// Commits the last edit.
    pub fn remove_history(&mut self) {
        self.history = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{FULL_BOOL_OPS, TrivialFilter};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn full_context() -> SynthesizerContext {
        let mut ctx = SynthesizerContext::new(false);
        ctx.use_full_int_ops();
        ctx.use_full_bool_ops();
        ctx
    }

    /// `(lhs.zero | rhs.zero, lhs.one & rhs.one)`: the known-bits transfer
    /// function for bitwise and.
    fn known_bits_and() -> Program {
        let mut p = Program::with_prefix("kb_and", ReturnKind::Abstract);
        let zero = p.push(Op::apply(
            Operator::Or,
            vec![Program::field_ref(0, 0), Program::field_ref(1, 0)],
            None,
        ));
        let one = p.push(Op::apply(
            Operator::And,
            vec![Program::field_ref(0, 1), Program::field_ref(1, 1)],
            None,
        ));
        p.finish_abstract(&[zero, one]);
        p
    }

    #[test]
    fn prefix_layout_is_fixed() {
        let p = Program::with_prefix("f", ReturnKind::Abstract);
        assert_eq!(p.len(), PREFIX_LEN);
        assert_eq!(p.op(Program::field_ref(1, 0).0), &Op::get_field(1, 0));
        assert_eq!(
            p.op(Program::constant_ref(ConstantKind::BitWidth).0),
            &Op::constant(ConstantKind::BitWidth)
        );
        assert_eq!(p.get_modifiable_operations(true), Vec::<usize>::new());
    }

    #[test]
    fn hand_written_program_is_well_formed_and_fully_live() {
        let p = known_bits_and();
        assert_eq!(p.check_well_formed(), Ok(()));
        assert_eq!(p.get_modifiable_operations(true), vec![PREFIX_LEN + 1, PREFIX_LEN]);
    }

    #[test]
    fn dead_ops_are_not_modifiable_when_only_live() {
        let mut p = Program::with_prefix("f", ReturnKind::Abstract);
        let dead = p.push(Op::apply(Operator::Neg, vec![Program::field_ref(0, 0)], None));
        let a = p.push(Op::apply(Operator::Neg, vec![Program::field_ref(0, 1)], None));
        let b = p.push(Op::apply(Operator::Neg, vec![a], None));
        p.finish_abstract(&[b, a]);
        assert_eq!(p.get_modifiable_operations(true), vec![b.0, a.0]);
        assert_eq!(p.get_modifiable_operations(false), vec![b.0, a.0, dead.0]);

        let dce = p.eliminate_dead_code();
        assert_eq!(dce.check_well_formed(), Ok(()));
        // get lhs[1], two negs, make, return.
        assert_eq!(dce.len(), 5);
    }

    #[test]
    fn random_construction_respects_invariants() {
        let ctx = full_context();
        for seed in 0..50 {
            let mut rng = Pcg64Mcg::seed_from_u64(seed);
            for returns in [ReturnKind::Abstract, ReturnKind::Bool] {
                let mp = MutationProgram::construct_random(&ctx, &mut rng, "f", 12, returns).unwrap();
                let p = mp.program();
                assert_eq!(p.check_well_formed(), Ok(()), "seed {seed}\n{p}");
                assert_eq!(p.len(), PREFIX_LEN + 12 + if returns == ReturnKind::Abstract { 2 } else { 1 });
                assert!(mp.history().is_none());
            }
        }
    }

    #[test]
    fn random_construction_replaces_every_placeholder() {
        let ctx = full_context();
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let mp = MutationProgram::construct_random(&ctx, &mut rng, "f", 40, ReturnKind::Abstract).unwrap();
        // Placeholders use the same value for both operands, which idempotent
        // operators never do after a rebuild.
        for op in mp.program().ops().iter().filter(|op| op.is_body()) {
            let operator = op.operator().unwrap();
            if operator.descriptor().is_idempotent && op.operands.len() == 2 {
                assert_ne!(op.operands[0], op.operands[1], "{:?}", op);
            }
        }
    }

    #[test]
    fn mutations_preserve_acyclicity_and_kinds() {
        let ctx = full_context();
        let mut rng = Pcg64Mcg::seed_from_u64(11);
        let mut mp = MutationProgram::construct_random(&ctx, &mut rng, "f", 16, ReturnKind::Abstract).unwrap();
        for step in 0..2_000 {
            let live = mp.get_modifiable_operations(true);
            if live.is_empty() {
                continue;
            }
            let idx = live[rng.gen_range(0..live.len())];
            if step % 3 == 0 {
                mp.replace_entire_operation(idx, &ctx, &mut rng, true).unwrap();
            } else {
                mp.replace_operand(idx, &ctx, &mut rng, true);
            }
            mp.remove_history();
            assert_eq!(mp.program().check_well_formed(), Ok(()), "step {step}");
        }
    }

    #[test]
    fn revert_restores_exact_program() {
        let ctx = full_context();
        for seed in 0..100 {
            let mut rng = Pcg64Mcg::seed_from_u64(seed);
            let mut mp =
                MutationProgram::construct_random(&ctx, &mut rng, "f", 10, ReturnKind::Abstract).unwrap();
            let before = mp.program().clone();
            let live = mp.get_modifiable_operations(true);
            let idx = live[rng.gen_range(0..live.len())];
            let changed = if seed % 2 == 0 {
                mp.replace_entire_operation(idx, &ctx, &mut rng, true).unwrap();
                true
            } else {
                mp.replace_operand(idx, &ctx, &mut rng, true)
            };
            assert_eq!(mp.history().is_some(), changed);
            mp.revert_operation();
            assert_eq!(mp.program(), &before);
            assert!(!mp.revert_operation());
        }
    }

    #[test]
    fn remove_history_commits_the_edit() {
        let ctx = full_context();
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let mut mp = MutationProgram::new(known_bits_and());
        mp.replace_entire_operation(PREFIX_LEN, &ctx, &mut rng, true).unwrap();
        let after = mp.program().clone();
        mp.remove_history();
        assert!(!mp.revert_operation());
        assert_eq!(mp.program(), &after);
    }

    #[test]
    fn triviality_filters_hold_after_mutation() {
        let ctx = full_context();
        let mut rng = Pcg64Mcg::seed_from_u64(99);
        let mut mp = MutationProgram::construct_random(&ctx, &mut rng, "f", 24, ReturnKind::Abstract).unwrap();
        for _ in 0..3_000 {
            let live = mp.get_modifiable_operations(false);
            let idx = live[rng.gen_range(0..live.len())];
            if rng.gen_bool(0.3) {
                mp.replace_entire_operation(idx, &ctx, &mut rng, false).unwrap();
            } else {
                mp.replace_operand(idx, &ctx, &mut rng, false);
            }
        }
        let p = mp.program();
        for op in p.ops().iter().filter(|op| op.is_body()) {
            let d = op.operator().unwrap().descriptor();
            for (slot, operand) in op.operands.iter().enumerate() {
                let constant = p.op(operand.0).constant_kind();
                assert!(
                    !d.filters[slot].rejects(constant),
                    "{} slot {} uses trivial {:?}",
                    d.operator,
                    slot,
                    constant
                );
            }
        }
        // And-with-all-ones never appears.
        let all_ones = Program::constant_ref(ConstantKind::AllOnes);
        assert!(
            !p.ops()
                .iter()
                .any(|op| op.operator() == Some(Operator::And) && op.operands.contains(&all_ones))
        );
        assert!(TrivialFilter::ZeroOrAllOnes.rejects(Some(ConstantKind::AllOnes)));
    }

    #[test]
    fn guard_programs_with_full_bool_ops_are_well_formed() {
        let mut ctx = SynthesizerContext::new(false);
        ctx.use_full_bool_ops();
        assert_eq!(ctx.operators(Kind::Bool), FULL_BOOL_OPS);
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let mp = MutationProgram::construct_random(&ctx, &mut rng, "cond", 9, ReturnKind::Bool).unwrap();
        assert_eq!(mp.program().check_well_formed(), Ok(()));
    }

    #[test]
    fn op_frequency_counts_live_ops_only() {
        let mut p = known_bits_and();
        // A dead op that must not be counted.
        let ret = p.ops.pop().unwrap();
        let make = p.ops.pop().unwrap();
        p.push(Op::apply(Operator::Xor, vec![Program::field_ref(0, 0), Program::field_ref(0, 1)], None));
        p.ops.push(make);
        p.ops.push(ret);
        let freq = Program::count_op_frequency([&p]);
        let ints = &freq[&Kind::Int];
        assert_eq!(ints.get(&Operator::Or), Some(&1));
        assert_eq!(ints.get(&Operator::And), Some(&1));
        assert_eq!(ints.get(&Operator::Xor), None);
        assert_eq!(freq.len(), 3);
        assert!(freq[&Kind::BoundedInt].is_empty());
    }

    #[test]
    fn display_dumps_ops() {
        let text = known_bits_and().to_string();
        assert!(text.starts_with("func @kb_and(%lhs, %rhs) -> abstract {"));
        assert!(text.contains("%12 = or(%0, %2) : int"));
        assert!(text.contains("%13 = and(%1, %3) : int"));
        assert!(text.contains("%14 = make(%12, %13)"));
        assert!(text.trim_end().ends_with("}"));
    }
}
