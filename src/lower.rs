// SPDX-License-Identifier: Apache-2.0

//! Lowering of programs to C++-like APInt source for the external
//! evaluation engine and for solution artifacts.
//!
//! Abstract values lower to `Vec<N>`, ints to `APInt`, bounded ints to
//! `unsigned`, bools to `bool`. Every lowered function takes
//! `(const Vec<N> &lhs, const Vec<N> &rhs)`.

use crate::domain::NUM_FIELDS;
use crate::dsl::{CmpPredicate, ConstantKind, Kind, Operator};
use crate::program::{Op, OpKind, Program, ReturnKind, ValueRef};

/// Turns programs into the source text the oracle and artifacts use.
pub trait SourceLowering: Sync {
    /// A standalone function named after the program.
    fn lower(&self, program: &Program) -> String;

    /// `name(args)` returning `body(args)` when `guard(args)` holds and top
    /// otherwise.
    fn lower_guarded(&self, name: &str, body: &str, guard: &str) -> String;

    /// `name(args)` returning the left-folded meet of `parts(args)`.
    fn lower_meet_fold(&self, name: &str, parts: &[String]) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CppLowering;

fn abstract_type() -> String {
    format!("Vec<{}>", NUM_FIELDS)
}

fn signature(ret: &str, name: &str) -> String {
    let ty = abstract_type();
    format!("{} {}(const {} &lhs, const {} &rhs)", ret, name, ty, ty)
}

fn value_type(kind: Kind) -> &'static str {
    match kind {
        Kind::Int => "APInt",
        Kind::Bool => "bool",
        Kind::BoundedInt => "unsigned",
    }
}

fn v(r: &ValueRef) -> String {
    format!("v{}", r.0)
}

const WIDTH: &str = "lhs[0].getBitWidth()";

fn constant_expr(c: ConstantKind) -> String {
    match c {
        ConstantKind::True => "true".to_string(),
        ConstantKind::False => "false".to_string(),
        ConstantKind::Zero => format!("APInt({}, 0)", WIDTH),
        ConstantKind::One => format!("APInt({}, 1)", WIDTH),
        ConstantKind::AllOnes => format!("APInt::getAllOnes({})", WIDTH),
        ConstantKind::BZero => "0".to_string(),
        ConstantKind::BOne => "1".to_string(),
        ConstantKind::BitWidth => WIDTH.to_string(),
    }
}

fn apint_compare(pred: CmpPredicate) -> &'static str {
    // APInt spells its comparisons the same way as the predicate names.
    pred.name()
}

fn unsigned_compare(pred: CmpPredicate, a: &str, b: &str) -> String {
    let (op, signed) = match pred {
        CmpPredicate::Eq => ("==", false),
        CmpPredicate::Ne => ("!=", false),
        CmpPredicate::Slt => ("<", true),
        CmpPredicate::Sle => ("<=", true),
        CmpPredicate::Sgt => (">", true),
        CmpPredicate::Sge => (">=", true),
        CmpPredicate::Ult => ("<", false),
        CmpPredicate::Ule => ("<=", false),
        CmpPredicate::Ugt => (">", false),
        CmpPredicate::Uge => (">=", false),
    };
    if signed {
        format!("(int){} {} (int){}", a, op, b)
    } else {
        format!("{} {} {}", a, op, b)
    }
}

fn apply_expr(operator: Operator, predicate: Option<CmpPredicate>, args: &[String]) -> String {
    let a = args.first().map(String::as_str).unwrap_or("");
    let b = args.get(1).map(String::as_str).unwrap_or("");
    let c = args.get(2).map(String::as_str).unwrap_or("");
    let w = format!("{}.getBitWidth()", a);
    let n = format!("std::min({}, {})", b, w);
    use Operator::*;
    match operator {
        Neg => format!("~{}", a),
        And => format!("{} & {}", a, b),
        Or => format!("{} | {}", a, b),
        Xor => format!("{} ^ {}", a, b),
        Add | BAdd => format!("{} + {}", a, b),
        Sub | BSub => format!("{} - {}", a, b),
        Select | BSelect => format!("{} ? {} : {}", a, b, c),
        LShr => format!("{} >= {} ? APInt({}, 0) : {}.lshr({})", b, w, w, a, b),
        Shl => format!("{} >= {} ? APInt({}, 0) : {}.shl({})", b, w, w, a, b),
        AShr => format!("{}.ashr(std::min({}, {} - 1))", a, b, w),
        UMin => format!("A::APIntOps::umin({}, {})", a, b),
        UMax => format!("A::APIntOps::umax({}, {})", a, b),
        SMin => format!("A::APIntOps::smin({}, {})", a, b),
        SMax => format!("A::APIntOps::smax({}, {})", a, b),
        Mul => format!("{} * {}", a, b),
        UDiv => format!("{} == 0 ? APInt::getAllOnes({}) : {}.udiv({})", b, w, a, b),
        SDiv => format!(
            "{} == 0 ? ({}.isNegative() ? APInt({}, 1) : APInt::getAllOnes({})) : {}.sdiv({})",
            b, a, w, w, a, b
        ),
        URem => format!("{} == 0 ? {} : {}.urem({})", b, a, a, b),
        SRem => format!("{} == 0 ? {} : {}.srem({})", b, a, a, b),
        SetHighBits => format!("{} | APInt::getHighBitsSet({}, {})", a, w, n),
        SetLowBits => format!("{} | APInt::getLowBitsSet({}, {})", a, w, n),
        ClearHighBits => format!("{} & APInt::getLowBitsSet({}, {} - {})", a, w, w, n),
        ClearLowBits => format!("{} & APInt::getHighBitsSet({}, {} - {})", a, w, w, n),
        SetSignBit => format!("{} | APInt::getSignMask({})", a, w),
        ClearSignBit => format!("{} & ~APInt::getSignMask({})", a, w),
        BUMin => format!("std::min({}, {})", a, b),
        BUMax => format!("std::max({}, {})", a, b),
        CountLOne => format!("{}.countl_one()", a),
        CountLZero => format!("{}.countl_zero()", a),
        CountROne => format!("{}.countr_one()", a),
        CountRZero => format!("{}.countr_zero()", a),
        Cmp => format!(
            "{}.{}({})",
            a,
            apint_compare(predicate.unwrap_or(CmpPredicate::Eq)),
            b
        ),
        BCmp => unsigned_compare(predicate.unwrap_or(CmpPredicate::Eq), a, b),
        AndI => format!("{} && {}", a, b),
        OrI => format!("{} || {}", a, b),
        XorI => format!("{} != {}", a, b),
    }
}

fn lower_op(out: &mut String, idx: usize, op: &Op) {
    let args: Vec<String> = op.operands.iter().map(v).collect();
    let line = match &op.kind {
        OpKind::GetField { arg, field } => {
            let name = if *arg == 0 { "lhs" } else { "rhs" };
            format!("APInt v{} = {}[{}];", idx, name, field)
        }
        OpKind::Constant(c) => format!("{} v{} = {};", value_type(c.kind()), idx, constant_expr(*c)),
        OpKind::Apply {
            operator,
            predicate,
        } => format!(
            "{} v{} = {};",
            value_type(operator.result_kind()),
            idx,
            apply_expr(*operator, *predicate, &args)
        ),
        OpKind::Make => format!("{} v{} = {}{{{}}};", abstract_type(), idx, abstract_type(), args.join(", ")),
        OpKind::Return => format!("return {};", args.join(", ")),
    };
    out.push_str(&format!("  {}\n", line));
}

impl SourceLowering for CppLowering {
    fn lower(&self, program: &Program) -> String {
        let ret = match program.returns() {
            ReturnKind::Abstract => abstract_type(),
            ReturnKind::Bool => "bool".to_string(),
        };
        let mut out = String::new();
        out.push_str(&format!("{} {{\n", signature(&ret, &program.name)));
        for (idx, op) in program.ops().iter().enumerate() {
            lower_op(&mut out, idx, op);
        }
        out.push_str("}\n");
        out
    }

    fn lower_guarded(&self, name: &str, body: &str, guard: &str) -> String {
        format!(
            "{} {{\n  if (!{}(lhs, rhs)) return getTop(lhs);\n  return {}(lhs, rhs);\n}}\n",
            signature(&abstract_type(), name),
            guard,
            body
        )
    }

    fn lower_meet_fold(&self, name: &str, parts: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} {{\n", signature(&abstract_type(), name)));
        match parts.split_first() {
            None => out.push_str("  return getTop(lhs);\n"),
            Some((first, rest)) => {
                out.push_str(&format!("  {} result = {}(lhs, rhs);\n", abstract_type(), first));
                for part in rest {
                    out.push_str(&format!("  result = meet(result, {}(lhs, rhs));\n", part));
                }
                out.push_str("  return result;\n");
            }
        }
        out.push_str("}\n");
        out
    }
}
