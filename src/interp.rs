// SPDX-License-Identifier: Apache-2.0

//! Concrete fixed-width semantics: the DSL operators, the concrete binary
//! operations being abstracted, and a program interpreter.
//!
//! Values are `u64`s holding the low `width` bits (`1 <= width <= 64`).
//! Bounded ints are plain unmasked `u64` counts; bools are 0 or 1.

use serde::{Deserialize, Serialize};

use crate::domain::NUM_FIELDS;
use crate::dsl::{CmpPredicate, ConstantKind, Operator};
use crate::program::{NUM_ARGS, OpKind, Program, ReturnKind};

pub const MAX_WIDTH: u32 = 64;

pub fn mask(width: u32) -> u64 {
    debug_assert!((1..=MAX_WIDTH).contains(&width));
    low_bits(width)
}

/// The low `n` bits set.
fn low_bits(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

/// Interprets the low `width` bits of `x` as two's complement.
pub fn sext(x: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((x << shift) as i64) >> shift
}

fn clamp_count(n: u64, width: u32) -> u32 {
    n.min(width as u64) as u32
}

fn shl(a: u64, n: u64, width: u32) -> u64 {
    if n >= width as u64 { 0 } else { (a << n) & mask(width) }
}

fn lshr(a: u64, n: u64, width: u32) -> u64 {
    if n >= width as u64 { 0 } else { (a & mask(width)) >> n }
}

fn ashr(a: u64, n: u64, width: u32) -> u64 {
    let n = n.min(width as u64 - 1);
    ((sext(a, width) >> n) as u64) & mask(width)
}

fn count_leading_zeros(a: u64, width: u32) -> u64 {
    let a = a & mask(width);
    if a == 0 {
        width as u64
    } else {
        (a << (64 - width)).leading_zeros() as u64
    }
}

fn count_trailing_zeros(a: u64, width: u32) -> u64 {
    (a & mask(width)).trailing_zeros().min(width) as u64
}

fn udiv(a: u64, b: u64, width: u32) -> u64 {
    if b == 0 { mask(width) } else { a / b }
}

fn urem(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { a % b }
}

fn sdiv(a: u64, b: u64, width: u32) -> u64 {
    let (sa, sb) = (sext(a, width) as i128, sext(b, width) as i128);
    if sb == 0 {
        return if sa < 0 { 1 } else { mask(width) };
    }
    ((sa / sb) as u64) & mask(width)
}

fn srem(a: u64, b: u64, width: u32) -> u64 {
    let (sa, sb) = (sext(a, width) as i128, sext(b, width) as i128);
    if sb == 0 {
        return a;
    }
    ((sa % sb) as u64) & mask(width)
}

/// Evaluates `pred` on two values; `signed_width` is the width used for
/// signed predicates.
pub fn compare(pred: CmpPredicate, a: u64, b: u64, signed_width: u32) -> bool {
    let (sa, sb) = (sext(a, signed_width), sext(b, signed_width));
    match pred {
        CmpPredicate::Eq => a == b,
        CmpPredicate::Ne => a != b,
        CmpPredicate::Slt => sa < sb,
        CmpPredicate::Sle => sa <= sb,
        CmpPredicate::Sgt => sa > sb,
        CmpPredicate::Sge => sa >= sb,
        CmpPredicate::Ult => a < b,
        CmpPredicate::Ule => a <= b,
        CmpPredicate::Ugt => a > b,
        CmpPredicate::Uge => a >= b,
    }
}

/// Applies a DSL operator to already-evaluated operands.
pub fn apply_operator(operator: Operator, predicate: Option<CmpPredicate>, args: &[u64], width: u32) -> u64 {
    let m = mask(width);
    let a = args.first().copied().unwrap_or(0);
    let b = args.get(1).copied().unwrap_or(0);
    use Operator::*;
    match operator {
        Neg => !a & m,
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Add => a.wrapping_add(b) & m,
        Sub => a.wrapping_sub(b) & m,
        Select | BSelect => {
            if a != 0 {
                b
            } else {
                args.get(2).copied().unwrap_or(0)
            }
        }
        LShr => lshr(a, b, width),
        AShr => ashr(a, b, width),
        Shl => shl(a, b, width),
        UMin => a.min(b),
        UMax => a.max(b),
        SMin => {
            if sext(a, width) <= sext(b, width) {
                a
            } else {
                b
            }
        }
        SMax => {
            if sext(a, width) >= sext(b, width) {
                a
            } else {
                b
            }
        }
        Mul => a.wrapping_mul(b) & m,
        UDiv => udiv(a, b, width),
        SDiv => sdiv(a, b, width),
        URem => urem(a, b),
        SRem => srem(a, b, width),
        SetHighBits => {
            let n = clamp_count(b, width);
            a | (m & !low_bits(width - n))
        }
        SetLowBits => a | low_bits(clamp_count(b, width)),
        ClearHighBits => a & low_bits(width - clamp_count(b, width)),
        ClearLowBits => a & m & !low_bits(clamp_count(b, width)),
        SetSignBit => a | (1u64 << (width - 1)),
        ClearSignBit => a & !(1u64 << (width - 1)),
        BAdd => a.wrapping_add(b),
        BSub => a.wrapping_sub(b),
        BUMin => a.min(b),
        BUMax => a.max(b),
        CountLOne => count_leading_zeros(!a, width),
        CountLZero => count_leading_zeros(a, width),
        CountROne => count_trailing_zeros(!a, width),
        CountRZero => count_trailing_zeros(a, width),
        Cmp => compare(predicate.unwrap_or(CmpPredicate::Eq), a, b, width) as u64,
        BCmp => compare(predicate.unwrap_or(CmpPredicate::Eq), a, b, MAX_WIDTH) as u64,
        AndI => a & b,
        OrI => a | b,
        XorI => a ^ b,
    }
}

fn constant_value(c: ConstantKind, width: u32) -> u64 {
    match c {
        ConstantKind::True | ConstantKind::One | ConstantKind::BOne => 1,
        ConstantKind::False | ConstantKind::Zero | ConstantKind::BZero => 0,
        ConstantKind::AllOnes => mask(width),
        ConstantKind::BitWidth => width as u64,
    }
}

/// The two abstract arguments of a transfer function as raw fields.
pub type Args = [[u64; NUM_FIELDS]; NUM_ARGS];

/// What a program produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Abstract([u64; NUM_FIELDS]),
    Bool(bool),
}

/// Evaluates programs at one width, reusing its value buffer across calls.
#[derive(Debug)]
pub struct Interpreter {
    width: u32,
    values: Vec<u64>,
}

impl Interpreter {
    pub fn new(width: u32) -> Self {
        Interpreter {
            width,
            values: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn run(&mut self, program: &Program, args: &Args) -> Output {
        self.values.clear();
        let mut fields = [0u64; NUM_FIELDS];
        let mut ret = 0u64;
        for op in program.ops() {
            let v = match &op.kind {
                OpKind::GetField { arg, field } => args[*arg][*field] & mask(self.width),
                OpKind::Constant(c) => constant_value(*c, self.width),
                OpKind::Apply { operator, predicate } => {
                    let mut operands = [0u64; 3];
                    for (slot, r) in op.operands.iter().enumerate() {
                        operands[slot] = self.values[r.0];
                    }
                    apply_operator(*operator, *predicate, &operands[..op.operands.len()], self.width)
                }
                OpKind::Make => {
                    for (slot, r) in op.operands.iter().enumerate().take(NUM_FIELDS) {
                        fields[slot] = self.values[r.0];
                    }
                    0
                }
                OpKind::Return => {
                    ret = op.operands.first().map(|r| self.values[r.0]).unwrap_or(0);
                    0
                }
            };
            self.values.push(v);
        }
        match program.returns() {
            ReturnKind::Abstract => Output::Abstract(fields),
            ReturnKind::Bool => Output::Bool(ret != 0),
        }
    }

    /// Runs an abstract-valued program and returns its fields.
    pub fn run_abstract(&mut self, program: &Program, args: &Args) -> [u64; NUM_FIELDS] {
        match self.run(program, args) {
            Output::Abstract(fields) => fields,
            Output::Bool(_) => [0; NUM_FIELDS],
        }
    }

    pub fn run_bool(&mut self, program: &Program, args: &Args) -> bool {
        matches!(self.run(program, args), Output::Bool(true))
    }
}

/// The concrete binary operation a transfer function abstracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcreteOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Shl,
    Lshr,
    Ashr,
    Umin,
    Umax,
    Smin,
    Smax,
    Udiv,
    Sdiv,
    Urem,
    Srem,
}

impl ConcreteOp {
    pub fn name(self) -> &'static str {
        match self {
            ConcreteOp::And => "and",
            ConcreteOp::Or => "or",
            ConcreteOp::Xor => "xor",
            ConcreteOp::Add => "add",
            ConcreteOp::Sub => "sub",
            ConcreteOp::Mul => "mul",
            ConcreteOp::Shl => "shl",
            ConcreteOp::Lshr => "lshr",
            ConcreteOp::Ashr => "ashr",
            ConcreteOp::Umin => "umin",
            ConcreteOp::Umax => "umax",
            ConcreteOp::Smin => "smin",
            ConcreteOp::Smax => "smax",
            ConcreteOp::Udiv => "udiv",
            ConcreteOp::Sdiv => "sdiv",
            ConcreteOp::Urem => "urem",
            ConcreteOp::Srem => "srem",
        }
    }

    /// Result of `a op b` at `width`, or `None` when the pair violates the
    /// operation's precondition (shift amount out of range, zero divisor,
    /// signed overflow in division).
    pub fn apply(self, a: u64, b: u64, width: u32) -> Option<u64> {
        let m = mask(width);
        let v = match self {
            ConcreteOp::And => a & b,
            ConcreteOp::Or => a | b,
            ConcreteOp::Xor => a ^ b,
            ConcreteOp::Add => a.wrapping_add(b) & m,
            ConcreteOp::Sub => a.wrapping_sub(b) & m,
            ConcreteOp::Mul => a.wrapping_mul(b) & m,
            ConcreteOp::Shl | ConcreteOp::Lshr | ConcreteOp::Ashr if b >= width as u64 => return None,
            ConcreteOp::Shl => shl(a, b, width),
            ConcreteOp::Lshr => lshr(a, b, width),
            ConcreteOp::Ashr => ashr(a, b, width),
            ConcreteOp::Umin => a.min(b),
            ConcreteOp::Umax => a.max(b),
            ConcreteOp::Smin => apply_operator(Operator::SMin, None, &[a, b], width),
            ConcreteOp::Smax => apply_operator(Operator::SMax, None, &[a, b], width),
            ConcreteOp::Udiv | ConcreteOp::Urem | ConcreteOp::Sdiv | ConcreteOp::Srem if b == 0 => {
                return None;
            }
            ConcreteOp::Sdiv | ConcreteOp::Srem
                if sext(a, width) == i64::MIN >> (64 - width) && sext(b, width) == -1 =>
            {
                return None;
            }
            ConcreteOp::Udiv => udiv(a, b, width),
            ConcreteOp::Urem => urem(a, b),
            ConcreteOp::Sdiv => sdiv(a, b, width),
            ConcreteOp::Srem => srem(a, b, width),
        };
        Some(v)
    }

    /// C++-like source of the concrete function handed to the external
    /// evaluation engine.
    pub fn source(self) -> String {
        let (body, guard) = match self {
            ConcreteOp::And => ("a & b", None),
            ConcreteOp::Or => ("a | b", None),
            ConcreteOp::Xor => ("a ^ b", None),
            ConcreteOp::Add => ("a + b", None),
            ConcreteOp::Sub => ("a - b", None),
            ConcreteOp::Mul => ("a * b", None),
            ConcreteOp::Shl => ("a.shl(b)", Some("b.uge(a.getBitWidth())")),
            ConcreteOp::Lshr => ("a.lshr(b)", Some("b.uge(a.getBitWidth())")),
            ConcreteOp::Ashr => ("a.ashr(b)", Some("b.uge(a.getBitWidth())")),
            ConcreteOp::Umin => ("A::APIntOps::umin(a, b)", None),
            ConcreteOp::Umax => ("A::APIntOps::umax(a, b)", None),
            ConcreteOp::Smin => ("A::APIntOps::smin(a, b)", None),
            ConcreteOp::Smax => ("A::APIntOps::smax(a, b)", None),
            ConcreteOp::Udiv => ("a.udiv(b)", Some("b == 0")),
            ConcreteOp::Sdiv => ("a.sdiv(b)", Some("b == 0 || (a.isMinSignedValue() && b.isAllOnes())")),
            ConcreteOp::Urem => ("a.urem(b)", Some("b == 0")),
            ConcreteOp::Srem => ("a.srem(b)", Some("b == 0 || (a.isMinSignedValue() && b.isAllOnes())")),
        };
        let mut s = String::from("std::optional<APInt> concrete_op(const APInt &a, const APInt &b) {\n");
        if let Some(guard) = guard {
            s.push_str(&format!("  if ({}) return std::nullopt;\n", guard));
        }
        s.push_str(&format!("  return {};\n}}\n", body));
        s
    }
}
