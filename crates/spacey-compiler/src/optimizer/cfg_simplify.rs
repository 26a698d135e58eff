// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Control-flow cleanup: constant branches, empty forwarding blocks and
//! unreachable blocks.

use rustc_hash::FxHashMap;

use crate::ir::{BlockId, Function, IrModule, Terminator};

/// Simplifies the CFG of every function.
pub fn simplify_cfg(module: &mut IrModule) -> bool {
    let mut changed = false;
    for id in module.function_ids() {
        if let Some(function) = module.function_mut(id) {
            changed |= fold_branches(function);
            changed |= thread_jumps(function);
            changed |= function.remove_unreachable_blocks() > 0;
        }
    }
    changed
}

/// Turns branches on a known condition, or to a single target, into jumps.
fn fold_branches(function: &mut Function) -> bool {
    let mut changed = false;
    for block in function.layout.clone() {
        let block = function.block_mut(block);
        let Terminator::CondBranch {
            cond,
            then_block,
            else_block,
        } = &block.terminator
        else {
            continue;
        };
        let target = if then_block == else_block {
            Some(*then_block)
        } else {
            cond.as_const()
                .and_then(|c| c.truthiness())
                .map(|taken| if taken { *then_block } else { *else_block })
        };
        if let Some(target) = target {
            block.terminator = Terminator::Branch(target);
            changed = true;
        }
    }
    changed
}

/// Redirects jumps through blocks that contain nothing but a jump.
fn thread_jumps(function: &mut Function) -> bool {
    let entry = function.entry();
    let mut forward: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for block in &function.layout {
        let b = function.block(*block);
        if *block == entry || !b.insts.is_empty() {
            continue;
        }
        if let Terminator::Branch(target) = b.terminator {
            if target != *block {
                forward.insert(*block, target);
            }
        }
    }
    if forward.is_empty() {
        return false;
    }

    // Follow chains, stopping at cycles of empty blocks.
    let resolve = |mut block: BlockId| {
        let mut hops = 0;
        while let Some(next) = forward.get(&block) {
            block = *next;
            hops += 1;
            if hops > forward.len() {
                break;
            }
        }
        block
    };

    let mut changed = false;
    for block in function.layout.clone() {
        let b = function.block_mut(block);
        match &mut b.terminator {
            Terminator::Branch(target) => {
                let to = resolve(*target);
                if to != *target && to != block {
                    *target = to;
                    changed = true;
                }
            }
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => {
                for target in [then_block, else_block] {
                    let to = resolve(*target);
                    if to != *target {
                        *target = to;
                        changed = true;
                    }
                }
            }
            Terminator::Return(_) | Terminator::Throw(_) => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::config::CompileFlags;
    use crate::ir::{FunctionId, InstKind};
    use crate::optimizer::test_support::lower;

    #[test]
    fn test_constant_condition_drops_dead_arm() {
        let b = AstBuilder::new("if (false) a(); else b();");
        let test = b.boolean(false);
        let then = b.expr_stmt(b.call(b.id("a"), vec![]));
        let otherwise = b.expr_stmt(b.call(b.id("b"), vec![]));
        let program = b.program(vec![b.if_(test, then, Some(otherwise))]);

        let mut module = lower(&program, &CompileFlags::non_strict());
        assert!(simplify_cfg(&mut module));
        let global = module.function(FunctionId::GLOBAL).unwrap();
        let names: Vec<&str> = global
            .placed_insts()
            .filter_map(|i| match &global.inst(i).kind {
                InstKind::TryLoadGlobalProperty { name } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["b"]);
        assert!(global
            .layout
            .iter()
            .all(|b| !matches!(global.block(*b).terminator, Terminator::CondBranch { .. })));
    }

    #[test]
    fn test_code_after_return_is_removed() {
        let b = AstBuilder::new("function f() { return 1; g(); }");
        let f = b.ident("f");
        let ret = b.ret(Some(b.num("1")));
        let call = b.expr_stmt(b.call(b.id("g"), vec![]));
        let program = b.program(vec![b.function_decl(f, vec![], vec![ret, call])]);

        let mut module = lower(&program, &CompileFlags::non_strict());
        simplify_cfg(&mut module);
        let id = module.function_named("f").unwrap();
        let f = module.function(id).unwrap();
        assert!(!f
            .placed_insts()
            .any(|i| matches!(f.inst(i).kind, InstKind::TryLoadGlobalProperty { .. })));
    }

    #[test]
    fn test_handlers_stay_reachable() {
        let b = AstBuilder::new("try { a(); } catch (e) { b(); }");
        let call = b.expr_stmt(b.call(b.id("a"), vec![]));
        let body = b.block_stmt(vec![call]);
        let e = b.ident("e");
        let handler = b.expr_stmt(b.call(b.id("b"), vec![]));
        let clause = b.catch(Some(e), b.block_stmt(vec![handler]));
        let program = b.program(vec![b.try_(body, Some(clause), None)]);

        let mut module = lower(&program, &CompileFlags::non_strict());
        simplify_cfg(&mut module);
        let global = module.function(FunctionId::GLOBAL).unwrap();
        assert!(global
            .placed_insts()
            .any(|i| global.inst(i).kind == InstKind::Catch));
    }
}
