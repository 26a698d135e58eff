// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Expression lowering.

use num_bigint::BigInt;
use rustc_hash::FxHashSet;

use super::IrGen;
use crate::ast::{
    ArrayExpression, AssignmentExpression, BinaryOperator, CallExpression,
    ConditionalExpression, Expression, Identifier, Literal, LiteralExpression, MemberExpression,
    MemberProperty, ObjectExpression, PropertyKey, UnaryExpression, UnaryOperator,
    UpdateExpression, UpdateOperator,
};
use crate::binder::Resolution;
use crate::diagnostics::Span;
use crate::ir::{BlockId, Constant, InstKind, Operand, Terminator, UnaryOp};

/// An assignable location, with its object and key already evaluated.
pub(super) enum Reference<'a> {
    Identifier(&'a Identifier),
    Property { object: Operand, key: Operand },
    /// Not assignable; the binder reported it
    Invalid,
}

/// The constant an expression denotes, if it can live in a literal buffer.
pub(super) fn buffer_constant(expr: &Expression) -> Option<Constant> {
    match expr {
        Expression::Literal(lit) => match &lit.value {
            Literal::Number(n) => Some(Constant::Number(*n)),
            Literal::String(s) => Some(Constant::String(s.clone())),
            Literal::Boolean(b) => Some(Constant::Bool(*b)),
            Literal::Null => Some(Constant::Null),
            Literal::BigInt(_) | Literal::RegExp { .. } => None,
        },
        Expression::Unary(UnaryExpression {
            operator: UnaryOperator::Minus,
            argument,
            ..
        }) => match &**argument {
            Expression::Literal(LiteralExpression {
                value: Literal::Number(n),
                ..
            }) => Some(Constant::Number(-n)),
            _ => None,
        },
        _ => None,
    }
}

/// Decimal digits of a BigInt literal written in any radix.
pub(super) fn bigint_digits(text: &str) -> String {
    let (radix, body) = match text.get(..2) {
        Some("0x" | "0X") => (16, &text[2..]),
        Some("0o" | "0O") => (8, &text[2..]),
        Some("0b" | "0B") => (2, &text[2..]),
        _ => (10, text),
    };
    let body: String = body.chars().filter(|c| *c != '_').collect();
    BigInt::parse_bytes(body.as_bytes(), radix)
        .map(|n| n.to_string())
        .unwrap_or_else(|| text.to_string())
}

impl<'a> IrGen<'a> {
    /// Lowers an expression and returns its value.
    pub(super) fn expression(&mut self, expr: &'a Expression) -> Operand {
        match expr {
            Expression::Literal(lit) => self.literal(lit),
            Expression::Identifier(id) => self.load_identifier(id),
            Expression::This(span) => self.load_this(*span),
            Expression::Array(a) => self.array_literal(a),
            Expression::Object(o) => self.object_literal(o),
            Expression::Binary(b) if b.operator.is_logical() => {
                let left = self.expression(&b.left);
                self.short_circuit(b.operator, left, b.span, |this| {
                    this.expression(&b.right)
                })
            }
            Expression::Binary(b) => {
                let left = self.expression(&b.left);
                let right = self.expression(&b.right);
                self.value(
                    InstKind::BinaryOp {
                        op: b.operator,
                        left,
                        right,
                    },
                    b.span,
                )
            }
            Expression::Unary(u) => self.unary(u),
            Expression::Assignment(a) => self.assignment(a),
            Expression::Call(c) => self.call(c),
            Expression::New(c) => {
                let callee = self.expression(&c.callee);
                let args = self.arguments(&c.arguments);
                self.value(InstKind::Construct { callee, args }, c.span)
            }
            Expression::Member(m) => self.member(m),
            Expression::Conditional(c) => self.conditional(c),
            Expression::Function(f) => self.closure(f),
            Expression::Update(u) => self.update(u),
            Expression::Sequence(s) => {
                let mut last = Operand::undefined();
                for e in &s.expressions {
                    last = self.expression(e);
                }
                last
            }
        }
    }

    fn literal(&mut self, lit: &LiteralExpression) -> Operand {
        let constant = match &lit.value {
            Literal::Number(n) => Constant::Number(*n),
            Literal::String(s) => Constant::String(s.clone()),
            Literal::Boolean(b) => Constant::Bool(*b),
            Literal::Null => Constant::Null,
            Literal::BigInt(digits) => Constant::BigInt(bigint_digits(digits)),
            Literal::RegExp { pattern, flags } => {
                return self.value(
                    InstKind::CreateRegExp {
                        pattern: pattern.clone(),
                        flags: flags.clone(),
                    },
                    lit.span,
                );
            }
        };
        Operand::Const(constant)
    }

    fn member_key(&mut self, property: &'a MemberProperty) -> Operand {
        match property {
            MemberProperty::Identifier(name) => Operand::string(name.name.as_str()),
            MemberProperty::Expression(e) => self.expression(e),
        }
    }

    fn member(&mut self, m: &'a MemberExpression) -> Operand {
        let object = self.expression(&m.object);
        let key = self.member_key(&m.property);
        self.value(InstKind::LoadProperty { object, key }, m.span)
    }

    fn arguments(&mut self, args: &'a [Expression]) -> Vec<Operand> {
        args.iter().map(|a| self.expression(a)).collect()
    }

    // ========================================================================
    // Control flow inside expressions
    // ========================================================================

    /// Evaluates `right` only when `op` does not short-circuit on `left`.
    /// The result goes through a stack slot read back in the join block.
    fn short_circuit(
        &mut self,
        op: BinaryOperator,
        left: Operand,
        span: Span,
        right: impl FnOnce(&mut Self) -> Operand,
    ) -> Operand {
        let slot = self.alloc_stack("logical", span);
        self.emit(
            InstKind::StoreStack {
                value: left.clone(),
                slot,
            },
            span,
        );
        let rhs = self.new_block();
        let join = self.new_block();
        self.branch_on_logical(op, left, rhs, join, span);

        self.switch_to(rhs);
        let value = right(self);
        self.emit(InstKind::StoreStack { value, slot }, span);
        self.continue_in(join, span);
        self.value(InstKind::LoadStack { slot }, span)
    }

    /// Jumps to `rhs` when the right operand of `op` must be evaluated.
    fn branch_on_logical(
        &mut self,
        op: BinaryOperator,
        left: Operand,
        rhs: BlockId,
        join: BlockId,
        span: Span,
    ) {
        let terminator = match op {
            BinaryOperator::LogicalAnd => Terminator::CondBranch {
                cond: left,
                then_block: rhs,
                else_block: join,
            },
            BinaryOperator::LogicalOr => Terminator::CondBranch {
                cond: left,
                then_block: join,
                else_block: rhs,
            },
            _ => {
                let cond = self.value(
                    InstKind::BinaryOp {
                        op: BinaryOperator::Equal,
                        left,
                        right: Operand::Const(Constant::Null),
                    },
                    span,
                );
                Terminator::CondBranch {
                    cond,
                    then_block: rhs,
                    else_block: join,
                }
            }
        };
        self.terminate(terminator, span);
    }

    fn conditional(&mut self, c: &'a ConditionalExpression) -> Operand {
        let slot = self.alloc_stack("cond", c.span);
        let test = self.expression(&c.test);
        let consequent = self.new_block();
        let alternate = self.new_block();
        let join = self.new_block();
        self.terminate(
            Terminator::CondBranch {
                cond: test,
                then_block: consequent,
                else_block: alternate,
            },
            c.span,
        );

        self.switch_to(consequent);
        let value = self.expression(&c.consequent);
        self.emit(InstKind::StoreStack { value, slot }, c.span);
        self.terminate(Terminator::Branch(join), c.span);

        self.switch_to(alternate);
        let value = self.expression(&c.alternate);
        self.emit(InstKind::StoreStack { value, slot }, c.span);
        self.continue_in(join, c.span);
        self.value(InstKind::LoadStack { slot }, c.span)
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn unary(&mut self, u: &'a UnaryExpression) -> Operand {
        let op = match u.operator {
            UnaryOperator::Delete => return self.delete(u),
            UnaryOperator::Minus => UnaryOp::Minus,
            UnaryOperator::Plus => UnaryOp::Plus,
            UnaryOperator::LogicalNot => UnaryOp::Not,
            UnaryOperator::BitwiseNot => UnaryOp::BitNot,
            UnaryOperator::Typeof => UnaryOp::TypeOf,
            UnaryOperator::Void => UnaryOp::Void,
        };
        let operand = match (&*u.argument, op) {
            (Expression::Identifier(id), UnaryOp::TypeOf) => self.load_identifier_quiet(id),
            (argument, _) => self.expression(argument),
        };
        self.value(InstKind::UnaryOp { op, operand }, u.span)
    }

    fn delete(&mut self, u: &'a UnaryExpression) -> Operand {
        match &*u.argument {
            Expression::Member(m) => {
                let object = self.expression(&m.object);
                let key = self.member_key(&m.property);
                self.value(InstKind::DeleteProperty { object, key }, u.span)
            }
            Expression::Identifier(id) => match self.tree.resolve(id) {
                Resolution::Global => self.value(
                    InstKind::DeleteProperty {
                        object: Operand::global_object(),
                        key: Operand::string(id.name.as_str()),
                    },
                    u.span,
                ),
                // declared bindings are not configurable
                Resolution::Binding(_) => Operand::Const(Constant::Bool(false)),
            },
            other => {
                self.expression(other);
                Operand::Const(Constant::Bool(true))
            }
        }
    }

    pub(super) fn reference(&mut self, target: &'a Expression) -> Reference<'a> {
        match target {
            Expression::Identifier(id) => Reference::Identifier(id),
            Expression::Member(m) => {
                let object = self.expression(&m.object);
                let key = self.member_key(&m.property);
                Reference::Property { object, key }
            }
            other => {
                self.expression(other);
                Reference::Invalid
            }
        }
    }

    fn load_reference(&mut self, reference: &Reference<'a>, span: Span) -> Operand {
        match reference {
            Reference::Identifier(id) => self.load_identifier(id),
            Reference::Property { object, key } => self.value(
                InstKind::LoadProperty {
                    object: object.clone(),
                    key: key.clone(),
                },
                span,
            ),
            Reference::Invalid => Operand::undefined(),
        }
    }

    pub(super) fn store_reference(&mut self, reference: &Reference<'a>, value: Operand, span: Span) {
        match reference {
            Reference::Identifier(id) => self.store_identifier(id, value, false, span),
            Reference::Property { object, key } => {
                self.emit(
                    InstKind::StoreProperty {
                        value,
                        object: object.clone(),
                        key: key.clone(),
                    },
                    span,
                );
            }
            Reference::Invalid => {}
        }
    }

    fn assignment(&mut self, a: &'a AssignmentExpression) -> Operand {
        let reference = self.reference(&a.left);
        match a.operator.binary_operator() {
            None => {
                let value = self.expression(&a.right);
                self.store_reference(&reference, value.clone(), a.span);
                value
            }
            Some(op) if op.is_logical() => {
                let current = self.load_reference(&reference, a.span);
                self.short_circuit(op, current, a.span, |this| {
                    let value = this.expression(&a.right);
                    this.store_reference(&reference, value.clone(), a.span);
                    value
                })
            }
            Some(op) => {
                let current = self.load_reference(&reference, a.span);
                let right = self.expression(&a.right);
                let value = self.value(
                    InstKind::BinaryOp {
                        op,
                        left: current,
                        right,
                    },
                    a.span,
                );
                self.store_reference(&reference, value.clone(), a.span);
                value
            }
        }
    }

    fn update(&mut self, u: &'a UpdateExpression) -> Operand {
        let reference = self.reference(&u.argument);
        let current = self.load_reference(&reference, u.span);
        let old = if u.prefix {
            current
        } else {
            self.value(
                InstKind::UnaryOp {
                    op: UnaryOp::ToNumeric,
                    operand: current,
                },
                u.span,
            )
        };
        let op = match u.operator {
            UpdateOperator::Increment => UnaryOp::Inc,
            UpdateOperator::Decrement => UnaryOp::Dec,
        };
        let new = self.value(
            InstKind::UnaryOp {
                op,
                operand: old.clone(),
            },
            u.span,
        );
        self.store_reference(&reference, new.clone(), u.span);
        if u.prefix { new } else { old }
    }

    fn call(&mut self, c: &'a CallExpression) -> Operand {
        if self.flags.allow_eval && self.tree.is_direct_eval(c) {
            let args = self.arguments(&c.arguments);
            let argument = args.into_iter().next().unwrap_or_else(Operand::undefined);
            let strict = self.strict();
            return self.value(InstKind::DirectEval { argument, strict }, c.span);
        }
        let (callee, this) = match &*c.callee {
            Expression::Member(m) => {
                let object = self.expression(&m.object);
                let key = self.member_key(&m.property);
                let callee = self.value(
                    InstKind::LoadProperty {
                        object: object.clone(),
                        key,
                    },
                    m.span,
                );
                (callee, object)
            }
            other => (self.expression(other), Operand::undefined()),
        };
        let args = self.arguments(&c.arguments);
        self.value(InstKind::Call { callee, this, args }, c.span)
    }

    // ========================================================================
    // Literals
    // ========================================================================

    fn array_literal(&mut self, a: &'a ArrayExpression) -> Operand {
        let elements: Vec<Constant> = a
            .elements
            .iter()
            .map_while(|e| e.as_ref().and_then(buffer_constant))
            .collect();
        let buffered = elements.len();
        let array = self.value(
            InstKind::AllocArray {
                elements,
                size_hint: a.elements.len() as u32,
            },
            a.span,
        );
        for (index, element) in a.elements.iter().enumerate().skip(buffered) {
            let Some(element) = element else { continue };
            let value = self.expression(element);
            self.emit(
                InstKind::StoreOwnProperty {
                    value,
                    object: array.clone(),
                    key: Operand::number(index as f64),
                },
                element.span(),
            );
        }
        if matches!(a.elements.last(), Some(None)) {
            self.emit(
                InstKind::StoreProperty {
                    value: Operand::number(a.elements.len() as f64),
                    object: array.clone(),
                    key: Operand::string("length"),
                },
                a.span,
            );
        }
        array
    }

    fn object_literal(&mut self, o: &'a ObjectExpression) -> Operand {
        let mut seen = FxHashSet::default();
        let duplicates = o
            .properties
            .iter()
            .filter_map(|p| p.key.static_name())
            .any(|name| !seen.insert(name));

        let mut keys = Vec::new();
        let mut values = Vec::new();
        if !duplicates {
            for property in &o.properties {
                let (Some(key), Some(value)) =
                    (property.key.static_name(), buffer_constant(&property.value))
                else {
                    break;
                };
                keys.push(Constant::String(key));
                values.push(value);
            }
        }
        let buffered = keys.len();
        let object = if buffered > 0 {
            self.value(InstKind::AllocObjectLiteral { keys, values }, o.span)
        } else {
            self.value(
                InstKind::AllocObject {
                    size_hint: o.properties.len() as u32,
                },
                o.span,
            )
        };

        for property in o.properties.iter().skip(buffered) {
            let key = match &property.key {
                PropertyKey::Computed(e) => self.expression(e),
                static_key => Operand::string(static_key.static_name().unwrap_or_default()),
            };
            let value = self.expression(&property.value);
            self.emit(
                InstKind::StoreOwnProperty {
                    value,
                    object: object.clone(),
                    key,
                },
                property.span,
            );
        }
        object
    }
}

