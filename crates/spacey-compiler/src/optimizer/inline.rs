// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Inlining of immediately invoked function expressions.
//!
//! `(function () { ... })()` creates a closure whose only use is the call
//! right after it. When the callee cannot tell it was inlined (it never
//! looks at `this`, `arguments`, itself or a direct `eval`, and nested
//! closures do not capture its variables) its blocks are copied into the
//! caller and the function goes away.

use rustc_hash::FxHashMap;

use crate::ir::{
    BasicBlock, BlockId, Constant, Function, FunctionId, FunctionKind, InstId, InstKind,
    Instruction, IrModule, Operand, Terminator,
};

/// A call site selected for inlining.
struct Site {
    caller: FunctionId,
    callee: FunctionId,
    closure: InstId,
    call: InstId,
    block: BlockId,
}

/// Inlines at most one immediately invoked closure per function.
pub fn inline_iifes(module: &mut IrModule) -> bool {
    let mut changed = false;
    for caller in module.function_ids() {
        if let Some(site) = find_site(module, caller) {
            tracing::debug!(caller = caller.0, callee = site.callee.0, "inlining closure");
            inline(module, site);
            changed = true;
        }
    }
    changed
}

fn find_site(module: &IrModule, caller: FunctionId) -> Option<Site> {
    let function = module.function(caller)?;
    let uses = function.use_counts();
    for block in &function.layout {
        for inst in &function.block(*block).insts {
            let InstKind::Call { callee, this, args } = &function.inst(*inst).kind else {
                continue;
            };
            let Some(closure) = callee.as_value() else {
                continue;
            };
            let InstKind::CreateClosure { function: target } = function.inst(closure).kind else {
                continue;
            };
            let captured_elsewhere = this.as_value() == Some(closure)
                || args.iter().any(|a| a.as_value() == Some(closure));
            if captured_elsewhere || uses.get(&closure).copied() != Some(1) {
                continue;
            }
            if can_inline(module, caller, target) {
                return Some(Site {
                    caller,
                    callee: target,
                    closure,
                    call: *inst,
                    block: *block,
                });
            }
        }
    }
    None
}

fn can_inline(module: &IrModule, caller: FunctionId, callee: FunctionId) -> bool {
    let (Some(outer), Some(inner)) = (module.function(caller), module.function(callee)) else {
        return false;
    };
    if callee == caller
        || inner.kind == FunctionKind::Global
        || inner.parent != Some(caller)
        || inner.strict != outer.strict
        || inner.uses_this
        || inner.uses_arguments
        || inner.has_direct_eval
        || inner.error_count > 0
    {
        return false;
    }
    if inner.frame.iter().any(|v| module.variable(*v).captured) {
        return false;
    }
    !inner.placed_insts().any(|i| {
        matches!(
            inner.inst(i).kind,
            InstKind::LoadCallee
                | InstKind::CreateArguments
                | InstKind::LoadThisNS
                | InstKind::LoadParam { index: 0 }
        )
    })
}

fn remap_operand(operand: &mut Operand, values: &FxHashMap<InstId, InstId>) {
    if let Operand::Value(id) = operand {
        if let Some(new) = values.get(id) {
            *id = *new;
        }
    }
}

fn remap_kind(kind: &mut InstKind, values: &FxHashMap<InstId, InstId>) {
    for operand in kind.operands_mut() {
        remap_operand(operand, values);
    }
    if let InstKind::LoadStack { slot } | InstKind::StoreStack { slot, .. } = kind {
        if let Some(new) = values.get(slot) {
            *slot = *new;
        }
    }
}

fn inline(module: &mut IrModule, site: Site) {
    let Some(callee) = module.remove_function(site.callee) else {
        return;
    };
    for var in &callee.frame {
        let v = module.variable_mut(*var);
        v.function = site.caller;
        v.param = None;
    }
    let children: Vec<FunctionId> = module
        .functions()
        .filter(|(_, f)| f.parent == Some(site.callee))
        .map(|(id, _)| id)
        .collect();
    for child in children {
        if let Some(f) = module.function_mut(child) {
            f.parent = Some(site.caller);
        }
    }
    let Some(caller) = module.function_mut(site.caller) else {
        return;
    };
    splice(caller, &callee, &site);
    caller.frame.extend(callee.frame.iter().copied());
}

fn splice(caller: &mut Function, callee: &Function, site: &Site) {
    let (call_args, statement, call_span) = {
        let inst = caller.inst(site.call);
        let InstKind::Call { args, .. } = &inst.kind else {
            return;
        };
        (args.clone(), inst.statement, inst.span)
    };

    // Split the calling block after the call.
    let call_block = caller.block(site.block).clone();
    let Some(position) = call_block.insts.iter().position(|i| *i == site.call) else {
        return;
    };
    let tail: Vec<InstId> = call_block.insts[position + 1..].to_vec();
    let result = caller.add_inst(Instruction {
        kind: InstKind::AllocStack {
            name: format!("?inline_{}_ret", site.callee.0),
        },
        span: call_span,
        statement: 0,
    });
    let load = caller.add_inst(Instruction {
        kind: InstKind::LoadStack { slot: result },
        span: call_span,
        statement,
    });
    let continuation = push_block(
        caller,
        BasicBlock {
            insts: std::iter::once(load).chain(tail).collect(),
            terminator: call_block.terminator.clone(),
            handler: call_block.handler,
            span: call_block.span,
        },
    );

    // Copy the callee's instructions.
    let mut values: FxHashMap<InstId, InstId> = FxHashMap::default();
    for (index, inst) in callee.insts.iter().enumerate() {
        let id = caller.add_inst(Instruction {
            kind: inst.kind.clone(),
            span: inst.span,
            statement,
        });
        values.insert(InstId(index as u32), id);
    }
    let mut params: FxHashMap<InstId, Operand> = FxHashMap::default();
    let mut slots = Vec::new();
    for old in callee.placed_insts() {
        let new = values[&old];
        match callee.inst(old).kind {
            InstKind::LoadParam { index } => {
                let arg = call_args
                    .get(index as usize - 1)
                    .cloned()
                    .unwrap_or(Operand::Const(Constant::Undefined));
                params.insert(new, arg);
            }
            InstKind::AllocStack { .. } => slots.push(new),
            _ => {}
        }
    }
    for new in values.values() {
        remap_kind(&mut caller.inst_mut(*new).kind, &values);
    }

    // Copy the blocks.
    let mut blocks: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for old in &callee.layout {
        let id = push_block(
            caller,
            BasicBlock {
                insts: Vec::new(),
                terminator: Terminator::Branch(continuation),
                handler: None,
                span: callee.block(*old).span,
            },
        );
        blocks.insert(*old, id);
    }
    let entry_copy = blocks[&callee.entry()];
    for old in &callee.layout {
        let source = callee.block(*old);
        let mut insts: Vec<InstId> = source
            .insts
            .iter()
            .map(|i| values[i])
            .filter(|i| !params.contains_key(i) && !slots.contains(i))
            .collect();
        let terminator = match &source.terminator {
            Terminator::Branch(target) => Terminator::Branch(blocks[target]),
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => {
                let mut cond = cond.clone();
                remap_operand(&mut cond, &values);
                Terminator::CondBranch {
                    cond,
                    then_block: blocks[then_block],
                    else_block: blocks[else_block],
                }
            }
            Terminator::Throw(value) => {
                let mut value = value.clone();
                remap_operand(&mut value, &values);
                Terminator::Throw(value)
            }
            Terminator::Return(value) => {
                let mut value = value.clone();
                remap_operand(&mut value, &values);
                let store = caller.add_inst(Instruction {
                    kind: InstKind::StoreStack {
                        value,
                        slot: result,
                    },
                    span: source.span,
                    statement,
                });
                insts.push(store);
                Terminator::Branch(continuation)
            }
        };
        if *old == callee.entry() {
            // Variables start out undefined on every entry, also inside loops.
            let resets: Vec<InstId> = callee
                .frame
                .iter()
                .map(|var| {
                    caller.add_inst(Instruction {
                        kind: InstKind::StoreFrame {
                            value: Operand::Const(Constant::Undefined),
                            var: *var,
                        },
                        span: source.span,
                        statement,
                    })
                })
                .collect();
            insts.splice(0..0, resets);
        }
        let handler = source
            .handler
            .and_then(|h| blocks.get(&h).copied())
            .or(call_block.handler);
        let block = caller.block_mut(blocks[old]);
        block.insts = insts;
        block.terminator = terminator;
        block.handler = handler;
    }

    for (param, arg) in &params {
        caller.replace_all_uses(*param, arg);
    }
    caller.replace_all_uses(site.call, &Operand::Value(load));

    let head = caller.block_mut(site.block);
    head.insts.truncate(position);
    head.insts.retain(|i| *i != site.closure);
    head.terminator = Terminator::Branch(entry_copy);
    let closure = std::iter::once(site.closure).collect();
    caller.remove_insts(&closure);

    // Slots live at the top of the caller's entry block.
    let entry = caller.entry();
    let entry_block = caller.block_mut(entry);
    entry_block.insts.splice(0..0, std::iter::once(result).chain(slots));

    // Layout: head, copied blocks, continuation, rest.
    let copied: Vec<BlockId> = callee.layout.iter().map(|b| blocks[b]).collect();
    caller
        .layout
        .retain(|b| *b != continuation && !copied.contains(b));
    let at = caller
        .layout
        .iter()
        .position(|b| *b == site.block)
        .map_or(caller.layout.len(), |p| p + 1);
    let inserted: Vec<BlockId> = copied.into_iter().chain(std::iter::once(continuation)).collect();
    caller.layout.splice(at..at, inserted);
}

/// Adds a block to the arena; the caller places it in the layout.
fn push_block(function: &mut Function, block: BasicBlock) -> BlockId {
    let id = BlockId(function.blocks.len() as u32);
    function.blocks.push(block);
    function.layout.push(id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::config::CompileFlags;
    use crate::ir::dump_module;
    use crate::optimizer::test_support::{insts, lower};

    #[test]
    fn test_iife_is_inlined() {
        let b = AstBuilder::new("function f() { return (function (x) { var y = x; return y; })(1); }");
        let f = b.ident("f");
        let x = b.ident("x");
        let y = b.var(vec![b.declarator(b.ident("y"), Some(b.id("x")))]);
        let ret = b.ret(Some(b.id("y")));
        let iife = b.function_expr(None, vec![x], vec![y, ret]);
        let call = b.call(iife, vec![b.num("1")]);
        let outer_ret = b.ret(Some(call));
        let program = b.program(vec![b.function_decl(f, vec![], vec![outer_ret])]);

        let mut module = lower(&program, &CompileFlags::default());
        assert_eq!(module.function_count(), 3);
        assert!(inline_iifes(&mut module));
        assert_eq!(module.function_count(), 2);

        let body = insts(&module, "f");
        assert!(!body
            .iter()
            .any(|k| matches!(k, InstKind::Call { .. } | InstKind::CreateClosure { .. })));
        assert!(body
            .iter()
            .any(|k| matches!(k, InstKind::StoreFrame { value: Operand::Const(Constant::Number(n)), .. } if *n == 1.0)));
        let text = dump_module(&module);
        assert!(text.contains("frame = [x, y]"));
        assert!(text.contains("$?inline_"));
    }

    #[test]
    fn test_iife_using_this_is_kept() {
        let b = AstBuilder::new("(function () { return this; })();");
        let ret = b.ret(Some(b.this()));
        let iife = b.function_expr(None, vec![], vec![ret]);
        let program = b.program(vec![b.expr_stmt(b.call(iife, vec![]))]);

        let mut module = lower(&program, &CompileFlags::default());
        assert!(!inline_iifes(&mut module));
        assert_eq!(module.function_count(), 2);
    }

    #[test]
    fn test_escaping_closure_is_kept() {
        let b = AstBuilder::new("var g = function () {}; g();");
        let g = b.ident("g");
        let func = b.function_expr(None, vec![], vec![]);
        let decl = b.var(vec![b.declarator(g, Some(func))]);
        let call = b.expr_stmt(b.call(b.id("g"), vec![]));
        let program = b.program(vec![decl, call]);

        let mut module = lower(&program, &CompileFlags::default());
        assert!(!inline_iifes(&mut module));
    }
}
