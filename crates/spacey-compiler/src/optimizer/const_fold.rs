// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Constant folding.
//!
//! Operators over constant operands are evaluated at compile time, as are
//! `typeof` and `!` whenever the operand's type decides the answer. Folded
//! instructions are replaced by the constant in every use and unplaced.

use num_traits::ToPrimitive;
use rustc_hash::FxHashSet;

use crate::ast::BinaryOperator;
use crate::ir::{number_to_string, Constant, Function, InstKind, IrModule, Operand, UnaryOp, ValueType};

/// Folds constant expressions in every function.
pub fn fold_constants(module: &mut IrModule) -> bool {
    let mut changed = false;
    for id in module.function_ids() {
        if let Some(function) = module.function_mut(id) {
            changed |= fold_function(function);
        }
    }
    changed
}

fn fold_function(function: &mut Function) -> bool {
    let mut folded = FxHashSet::default();
    let placed: Vec<_> = function.placed_insts().collect();
    for id in placed {
        let Some(constant) = fold(function, &function.inst(id).kind) else {
            continue;
        };
        tracing::trace!(inst = id.0, %constant, "folded");
        function.replace_all_uses(id, &Operand::Const(constant));
        folded.insert(id);
    }
    function.remove_insts(&folded);
    !folded.is_empty()
}

fn fold(function: &Function, kind: &InstKind) -> Option<Constant> {
    match kind {
        InstKind::UnaryOp { op, operand } => match operand {
            Operand::Const(c) => fold_unary(*op, c),
            Operand::Value(_) => fold_unary_typed(*op, function.operand_type(operand)),
        },
        InstKind::BinaryOp { op, left, right } => {
            fold_binary(*op, left.as_const()?, right.as_const()?)
        }
        _ => None,
    }
}

fn fold_unary_typed(op: UnaryOp, ty: ValueType) -> Option<Constant> {
    match op {
        UnaryOp::TypeOf => ty.typeof_name().map(|name| Constant::String(name.to_string())),
        UnaryOp::Void => Some(Constant::Undefined),
        UnaryOp::Not => match ty {
            ValueType::Undefined | ValueType::Null => Some(Constant::Bool(true)),
            ValueType::Object | ValueType::Closure => Some(Constant::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, c: &Constant) -> Option<Constant> {
    Some(match op {
        UnaryOp::Not => Constant::Bool(!c.truthiness()?),
        UnaryOp::Void => Constant::Undefined,
        UnaryOp::TypeOf => {
            let name = match c {
                Constant::GlobalObject => "object",
                other => other.value_type().typeof_name()?,
            };
            Constant::String(name.to_string())
        }
        UnaryOp::Plus | UnaryOp::ToNumeric => Constant::Number(to_number(c)?),
        UnaryOp::Minus => Constant::Number(-to_number(c)?),
        UnaryOp::BitNot => Constant::Number(f64::from(!to_int32(to_number(c)?))),
        UnaryOp::Inc => Constant::Number(to_number(c)? + 1.0),
        UnaryOp::Dec => Constant::Number(to_number(c)? - 1.0),
    })
}

/// ToNumber for constants whose conversion needs no string parsing.
fn to_number(c: &Constant) -> Option<f64> {
    match c {
        Constant::Number(n) => Some(*n),
        Constant::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Constant::Null => Some(0.0),
        Constant::Undefined => Some(f64::NAN),
        Constant::String(_) | Constant::BigInt(_) | Constant::GlobalObject => None,
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    wrapped.to_u32().map_or(0, |u| u as i32)
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

/// ToString for primitive constants.
fn to_display_string(c: &Constant) -> Option<String> {
    Some(match c {
        Constant::String(s) => s.clone(),
        Constant::Number(n) => number_to_string(*n),
        Constant::Bool(b) => b.to_string(),
        Constant::Null => "null".to_string(),
        Constant::Undefined => "undefined".to_string(),
        Constant::BigInt(digits) => digits.clone(),
        Constant::GlobalObject => return None,
    })
}

fn strict_equals(left: &Constant, right: &Constant) -> Option<bool> {
    Some(match (left, right) {
        (Constant::Number(a), Constant::Number(b)) => a == b,
        (Constant::BigInt(_), _) | (_, Constant::BigInt(_)) => return None,
        (a, b) if a.value_type() != b.value_type() => false,
        (a, b) => a == b,
    })
}

/// Abstract equality, for the cases without object or string conversion.
fn loose_equals(left: &Constant, right: &Constant) -> Option<bool> {
    let nullish = |c: &Constant| matches!(c, Constant::Null | Constant::Undefined);
    if nullish(left) || nullish(right) {
        if matches!(left, Constant::GlobalObject) || matches!(right, Constant::GlobalObject) {
            return Some(false);
        }
        return Some(nullish(left) && nullish(right));
    }
    if left.value_type() == right.value_type() {
        return strict_equals(left, right);
    }
    match (left, right) {
        (Constant::Number(_) | Constant::Bool(_), Constant::Number(_) | Constant::Bool(_)) => {
            Some(to_number(left)? == to_number(right)?)
        }
        _ => None,
    }
}

fn fold_binary(op: BinaryOperator, left: &Constant, right: &Constant) -> Option<Constant> {
    use BinaryOperator::*;

    match op {
        StrictEqual => return strict_equals(left, right).map(Constant::Bool),
        StrictNotEqual => return strict_equals(left, right).map(|b| Constant::Bool(!b)),
        Equal => return loose_equals(left, right).map(Constant::Bool),
        NotEqual => return loose_equals(left, right).map(|b| Constant::Bool(!b)),
        _ => {}
    }

    if let (Constant::String(a), Constant::String(b)) = (left, right) {
        // Strings order by UTF-16 code units, not by code points.
        let order = || a.encode_utf16().cmp(b.encode_utf16());
        return Some(match op {
            Add => Constant::String(format!("{a}{b}")),
            LessThan => Constant::Bool(order().is_lt()),
            LessThanEqual => Constant::Bool(order().is_le()),
            GreaterThan => Constant::Bool(order().is_gt()),
            GreaterThanEqual => Constant::Bool(order().is_ge()),
            _ => return None,
        });
    }
    if op == Add && (matches!(left, Constant::String(_)) || matches!(right, Constant::String(_))) {
        if matches!(left, Constant::BigInt(_)) || matches!(right, Constant::BigInt(_)) {
            return None;
        }
        let joined = format!("{}{}", to_display_string(left)?, to_display_string(right)?);
        return Some(Constant::String(joined));
    }

    let a = to_number(left)?;
    let b = to_number(right)?;
    Some(match op {
        Add => Constant::Number(a + b),
        Subtract => Constant::Number(a - b),
        Multiply => Constant::Number(a * b),
        Divide => Constant::Number(a / b),
        Modulo => Constant::Number(a % b),
        Exponent => Constant::Number(power(a, b)),
        LessThan => Constant::Bool(a < b),
        LessThanEqual => Constant::Bool(a <= b),
        GreaterThan => Constant::Bool(a > b),
        GreaterThanEqual => Constant::Bool(a >= b),
        BitwiseAnd => Constant::Number(f64::from(to_int32(a) & to_int32(b))),
        BitwiseOr => Constant::Number(f64::from(to_int32(a) | to_int32(b))),
        BitwiseXor => Constant::Number(f64::from(to_int32(a) ^ to_int32(b))),
        LeftShift => Constant::Number(f64::from(to_int32(a).wrapping_shl(to_uint32(b) & 31))),
        RightShift => Constant::Number(f64::from(to_int32(a) >> (to_uint32(b) & 31))),
        UnsignedRightShift => Constant::Number(f64::from(to_uint32(a) >> (to_uint32(b) & 31))),
        _ => return None,
    })
}

/// `**`, which differs from `powf` on NaN exponents and unit bases.
fn power(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}
