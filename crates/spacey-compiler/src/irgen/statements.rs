// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Statement lowering.
//!
//! Structured control flow becomes explicit blocks. Jump targets and
//! enclosing `finally` blocks are tracked on one stack so that `break`,
//! `continue` and `return` can run every finalizer they leave, innermost
//! first, before jumping.

use super::IrGen;
use crate::ast::{
    BinaryOperator, BlockStatement, DoWhileStatement, ForInLeft, ForInStatement, ForInit,
    ForOfStatement, ForStatement, IfStatement, JumpStatement, LabeledStatement, Statement,
    SwitchStatement, TryStatement, VariableDeclaration, VariableKind, WhileStatement,
};
use crate::binder::FunctionIndex;
use crate::diagnostics::Span;
use crate::ir::{BlockId, InstKind, Operand, Terminator};

/// An entry of the jump stack.
pub(super) enum JumpScope<'a> {
    /// A statement `break` or `continue` can target
    Target {
        labels: Vec<String>,
        break_block: BlockId,
        continue_block: Option<BlockId>,
        /// Unlabeled `break` stops here (loops and switches)
        unlabeled: bool,
    },
    /// A `finally` block run by jumps that leave its `try`
    Finally {
        finalizer: &'a BlockStatement,
        /// Handler outside the `try` statement
        handler: Option<BlockId>,
    },
}

impl<'a> IrGen<'a> {
    pub(super) fn statements(&mut self, body: &'a [Statement]) {
        for stmt in body {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &'a Statement) {
        self.state.statement += 1;
        match stmt {
            Statement::VariableDeclaration(decl) => self.variable_declaration(decl),
            // hoisted to the top of the function
            Statement::FunctionDeclaration(_) => {}
            Statement::Expression(s) => {
                let value = self.expression(&s.expression);
                if self.state.index == FunctionIndex::GLOBAL {
                    if let Some(slot) = self.state.return_slot {
                        self.emit(InstKind::StoreStack { value, slot }, s.span);
                    }
                }
            }
            Statement::Block(block) => self.block_statement(block),
            Statement::If(s) => self.if_statement(s),
            Statement::Switch(s) => self.switch_statement(s),
            Statement::While(s) => self.while_statement(s),
            Statement::DoWhile(s) => self.do_while_statement(s),
            Statement::For(s) => self.for_statement(s),
            Statement::ForIn(s) => self.for_in_statement(s),
            Statement::ForOf(s) => self.for_of_statement(s),
            Statement::Return(s) => {
                let value = match &s.argument {
                    Some(argument) => self.expression(argument),
                    None => Operand::undefined(),
                };
                self.run_finalizers(0, s.span);
                self.terminate(Terminator::Return(value), s.span);
            }
            Statement::Break(s) => self.jump(s, false),
            Statement::Continue(s) => self.jump(s, true),
            Statement::Throw(s) => {
                let value = self.expression(&s.argument);
                self.terminate(Terminator::Throw(value), s.span);
            }
            Statement::Try(s) => self.try_statement(s),
            Statement::With(s) => {
                self.expression(&s.object);
                self.statement(&s.body);
            }
            Statement::Labeled(s) => self.labeled_statement(s),
            Statement::Debugger(span) => {
                self.emit(InstKind::Debugger, *span);
            }
            Statement::Empty(_) => {}
        }
    }

    fn variable_declaration(&mut self, decl: &'a VariableDeclaration) {
        for d in &decl.declarations {
            let value = match &d.init {
                Some(init) => self.expression(init),
                None if decl.kind == VariableKind::Var => continue,
                None => Operand::undefined(),
            };
            self.store_identifier(&d.id, value, true, d.span);
        }
    }

    fn if_statement(&mut self, s: &'a IfStatement) {
        let cond = self.expression(&s.test);
        let consequent = self.new_block();
        let alternate = s.alternate.as_ref().map(|_| self.new_block());
        let exit = self.new_block();
        self.terminate(
            Terminator::CondBranch {
                cond,
                then_block: consequent,
                else_block: alternate.unwrap_or(exit),
            },
            s.span,
        );

        self.switch_to(consequent);
        self.statement(&s.consequent);
        self.terminate(Terminator::Branch(exit), s.span);

        if let (Some(block), Some(body)) = (alternate, &s.alternate) {
            self.switch_to(block);
            self.statement(body);
            self.terminate(Terminator::Branch(exit), s.span);
        }
        self.switch_to(exit);
    }

    // ========================================================================
    // Loops
    // ========================================================================

    /// Pushes the jump target of a loop, claiming labels attached to it.
    fn enter_loop(&mut self, break_block: BlockId, continue_block: BlockId) {
        let labels = std::mem::take(&mut self.state.pending_labels);
        self.state.jumps.push(JumpScope::Target {
            labels,
            break_block,
            continue_block: Some(continue_block),
            unlabeled: true,
        });
    }

    fn loop_body(&mut self, body: &'a Statement, exit: BlockId, next: BlockId) {
        self.enter_loop(exit, next);
        self.statement(body);
        self.state.jumps.pop();
    }

    fn while_statement(&mut self, s: &'a WhileStatement) {
        let test = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        self.continue_in(test, s.span);
        let cond = self.expression(&s.test);
        self.terminate(
            Terminator::CondBranch {
                cond,
                then_block: body,
                else_block: exit,
            },
            s.span,
        );

        self.switch_to(body);
        self.loop_body(&s.body, exit, test);
        self.terminate(Terminator::Branch(test), s.span);
        self.switch_to(exit);
    }

    fn do_while_statement(&mut self, s: &'a DoWhileStatement) {
        let body = self.new_block();
        let test = self.new_block();
        let exit = self.new_block();
        self.continue_in(body, s.span);
        self.loop_body(&s.body, exit, test);

        self.continue_in(test, s.span);
        let cond = self.expression(&s.test);
        self.terminate(
            Terminator::CondBranch {
                cond,
                then_block: body,
                else_block: exit,
            },
            s.span,
        );
        self.switch_to(exit);
    }

    fn for_statement(&mut self, s: &'a ForStatement) {
        let labels = std::mem::take(&mut self.state.pending_labels);
        match &s.init {
            Some(ForInit::Declaration(decl)) => self.variable_declaration(decl),
            Some(ForInit::Expression(e)) => {
                self.expression(e);
            }
            None => {}
        }
        self.state.pending_labels = labels;

        let test = self.new_block();
        let body = self.new_block();
        let update = self.new_block();
        let exit = self.new_block();
        self.continue_in(test, s.span);
        let terminator = match &s.test {
            Some(test) => Terminator::CondBranch {
                cond: self.expression(test),
                then_block: body,
                else_block: exit,
            },
            None => Terminator::Branch(body),
        };
        self.terminate(terminator, s.span);

        self.switch_to(body);
        self.loop_body(&s.body, exit, update);

        self.continue_in(update, s.span);
        if let Some(e) = &s.update {
            self.expression(e);
        }
        self.terminate(Terminator::Branch(test), s.span);
        self.switch_to(exit);
    }

    /// Assigns the per-iteration value of a for-in or for-of loop.
    fn assign_loop_variable(&mut self, left: &'a ForInLeft, value: Operand, span: Span) {
        match left {
            ForInLeft::Declaration(decl) => {
                if let Some(d) = decl.declarations.first() {
                    self.store_identifier(&d.id, value, true, span);
                }
            }
            ForInLeft::Expression(target) => {
                let reference = self.reference(target);
                self.store_reference(&reference, value, span);
            }
        }
    }

    fn for_in_statement(&mut self, s: &'a ForInStatement) {
        let labels = std::mem::take(&mut self.state.pending_labels);
        let object = self.expression(&s.right);
        let iterator = self.value(InstKind::GetPNameList { object }, s.span);
        self.state.pending_labels = labels;

        let head = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        self.continue_in(head, s.span);
        let name = self.value(
            InstKind::GetNextPName {
                iterator: iterator.clone(),
            },
            s.span,
        );
        let done = self.value(
            InstKind::BinaryOp {
                op: BinaryOperator::StrictEqual,
                left: name.clone(),
                right: Operand::undefined(),
            },
            s.span,
        );
        self.terminate(
            Terminator::CondBranch {
                cond: done,
                then_block: exit,
                else_block: body,
            },
            s.span,
        );

        self.switch_to(body);
        self.assign_loop_variable(&s.left, name, s.span);
        self.loop_body(&s.body, exit, head);
        self.terminate(Terminator::Branch(head), s.span);
        self.switch_to(exit);
    }

    fn for_of_statement(&mut self, s: &'a ForOfStatement) {
        let labels = std::mem::take(&mut self.state.pending_labels);
        let iterable = self.expression(&s.right);
        let iterator = self.value(InstKind::IteratorBegin { iterable }, s.span);
        self.state.pending_labels = labels;

        let head = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        self.continue_in(head, s.span);
        let result = self.value(
            InstKind::IteratorNext {
                iterator: iterator.clone(),
            },
            s.span,
        );
        let done = self.value(
            InstKind::LoadProperty {
                object: result.clone(),
                key: Operand::string("done"),
            },
            s.span,
        );
        self.terminate(
            Terminator::CondBranch {
                cond: done,
                then_block: exit,
                else_block: body,
            },
            s.span,
        );

        self.switch_to(body);
        let value = self.value(
            InstKind::LoadProperty {
                object: result,
                key: Operand::string("value"),
            },
            s.span,
        );
        self.assign_loop_variable(&s.left, value, s.span);
        self.loop_body(&s.body, exit, head);
        self.terminate(Terminator::Branch(head), s.span);
        self.switch_to(exit);
    }

    fn switch_statement(&mut self, s: &'a SwitchStatement) {
        let discriminant = self.expression(&s.discriminant);
        let exit = self.new_block();
        let bodies: Vec<BlockId> = s.cases.iter().map(|_| self.new_block()).collect();

        for (case, body) in s.cases.iter().zip(&bodies) {
            let Some(test) = &case.test else { continue };
            let value = self.expression(test);
            let cond = self.value(
                InstKind::BinaryOp {
                    op: BinaryOperator::StrictEqual,
                    left: discriminant.clone(),
                    right: value,
                },
                case.span,
            );
            let next = self.new_block();
            self.terminate(
                Terminator::CondBranch {
                    cond,
                    then_block: *body,
                    else_block: next,
                },
                case.span,
            );
            self.switch_to(next);
        }
        let fallback = s
            .cases
            .iter()
            .position(|c| c.test.is_none())
            .map_or(exit, |i| bodies[i]);
        self.terminate(Terminator::Branch(fallback), s.span);

        self.state.jumps.push(JumpScope::Target {
            labels: Vec::new(),
            break_block: exit,
            continue_block: None,
            unlabeled: true,
        });
        for (i, case) in s.cases.iter().enumerate() {
            self.switch_to(bodies[i]);
            self.statements(&case.consequent);
            let next = bodies.get(i + 1).copied().unwrap_or(exit);
            self.terminate(Terminator::Branch(next), case.span);
        }
        self.state.jumps.pop();
        self.switch_to(exit);
    }

    fn labeled_statement(&mut self, s: &'a LabeledStatement) {
        self.state.pending_labels.push(s.label.name.clone());
        if s.body.is_loop() || matches!(*s.body, Statement::Labeled(_)) {
            self.statement(&s.body);
            return;
        }
        let labels = std::mem::take(&mut self.state.pending_labels);
        let exit = self.new_block();
        self.state.jumps.push(JumpScope::Target {
            labels,
            break_block: exit,
            continue_block: None,
            unlabeled: false,
        });
        self.statement(&s.body);
        self.state.jumps.pop();
        self.continue_in(exit, s.span);
    }

    // ========================================================================
    // Jumps and exceptions
    // ========================================================================

    fn jump(&mut self, s: &JumpStatement, is_continue: bool) {
        let label = s.label.as_ref().map(|l| l.name.as_str());
        let found = self
            .state
            .jumps
            .iter()
            .enumerate()
            .rev()
            .find_map(|(depth, scope)| match scope {
                JumpScope::Target {
                    labels,
                    break_block,
                    continue_block,
                    unlabeled,
                } => {
                    let matches = match label {
                        Some(name) => labels.iter().any(|l| l == name),
                        None => *unlabeled && (!is_continue || continue_block.is_some()),
                    };
                    if !matches {
                        return None;
                    }
                    let target = if is_continue {
                        (*continue_block)?
                    } else {
                        *break_block
                    };
                    Some((depth, target))
                }
                JumpScope::Finally { .. } => None,
            });
        // an unresolved jump was reported by the binder
        let Some((depth, target)) = found else {
            return;
        };
        self.run_finalizers(depth + 1, s.span);
        self.terminate(Terminator::Branch(target), s.span);
    }

    /// Inlines every finalizer above `depth` on the jump stack, innermost
    /// first.
    fn run_finalizers(&mut self, depth: usize, span: Span) {
        let mut index = self.state.jumps.len();
        while index > depth {
            index -= 1;
            if let JumpScope::Finally { finalizer, handler } = &self.state.jumps[index] {
                let (finalizer, handler) = (*finalizer, *handler);
                self.inline_finalizer(finalizer, handler, index, span);
            }
        }
    }

    /// Emits a copy of `finalizer`. Jumps inside it only see the scopes
    /// below `depth`, and it runs under the handler outside its `try`.
    fn inline_finalizer(
        &mut self,
        finalizer: &'a BlockStatement,
        handler: Option<BlockId>,
        depth: usize,
        span: Span,
    ) {
        let inner = self.state.jumps.split_off(depth);
        let saved = std::mem::replace(&mut self.state.handler, handler);
        let block = self.new_block();
        self.continue_in(block, span);
        self.block_statement(finalizer);
        self.state.handler = saved;
        self.state.jumps.extend(inner);
    }

    /// Normal completion of a try or catch body.
    fn leave_protected(&mut self, s: &'a TryStatement, done: BlockId) {
        if let Some(finalizer) = &s.finalizer {
            let depth = self.state.jumps.len() - 1;
            let handler = match self.state.jumps.last() {
                Some(JumpScope::Finally { handler, .. }) => *handler,
                _ => None,
            };
            self.inline_finalizer(finalizer, handler, depth, s.span);
        }
        self.terminate(Terminator::Branch(done), s.span);
    }

    fn try_statement(&mut self, s: &'a TryStatement) {
        let outer = self.state.handler;
        let done = self.new_block();
        let finally_handler = match &s.finalizer {
            Some(_) => Some(self.new_block()),
            None => None,
        };
        let catch_block = match &s.handler {
            Some(_) => {
                let block = self.new_block();
                self.state.function.block_mut(block).handler = finally_handler.or(outer);
                Some(block)
            }
            None => None,
        };
        if let Some(finalizer) = &s.finalizer {
            self.state.jumps.push(JumpScope::Finally {
                finalizer,
                handler: outer,
            });
        }

        self.state.handler = catch_block.or(finally_handler);
        let body = self.new_block();
        self.continue_in(body, s.block.span);
        self.block_statement(&s.block);
        self.state.handler = finally_handler.or(outer);
        self.leave_protected(s, done);

        if let (Some(clause), Some(block)) = (&s.handler, catch_block) {
            self.switch_to(block);
            let exception = self.value(InstKind::Catch, clause.span);
            if let Some(param) = &clause.param {
                self.store_identifier(param, exception, true, param.span);
            }
            self.block_statement(&clause.body);
            self.leave_protected(s, done);
        }

        if let (Some(finalizer), Some(block)) = (&s.finalizer, finally_handler) {
            self.state.jumps.pop();
            self.state.handler = outer;
            self.switch_to(block);
            let exception = self.value(InstKind::Catch, finalizer.span);
            self.block_statement(finalizer);
            self.terminate(Terminator::Throw(exception), finalizer.span);
        }
        self.state.handler = outer;
        self.switch_to(done);
    }
}

