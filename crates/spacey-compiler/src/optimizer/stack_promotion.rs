// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Stack slot promotion.
//!
//! Loads are replaced by the stored value when it is known: after a store in
//! the same block, or anywhere when the slot's only store is in the entry
//! block. Slots nobody reads disappear together with their stores.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Function, InstId, InstKind, IrModule, Operand};

/// Promotes stack slots in every function.
pub fn promote_stack_slots(module: &mut IrModule) -> bool {
    let mut changed = false;
    for id in module.function_ids() {
        if let Some(function) = module.function_mut(id) {
            changed |= forward_in_blocks(function);
            changed |= forward_entry_stores(function);
            changed |= remove_unread_slots(function);
        }
    }
    changed
}

fn resolve(replaced: &FxHashMap<InstId, Operand>, operand: &Operand) -> Operand {
    let mut current = operand.clone();
    while let Some(next) = current.as_value().and_then(|id| replaced.get(&id)) {
        current = next.clone();
    }
    current
}

fn forward_in_blocks(function: &mut Function) -> bool {
    let mut replaced: FxHashMap<InstId, Operand> = FxHashMap::default();
    for block in function.layout.clone() {
        let mut known: FxHashMap<InstId, Operand> = FxHashMap::default();
        for inst in function.block(block).insts.clone() {
            match &function.inst(inst).kind {
                InstKind::StoreStack { value, slot } => {
                    known.insert(*slot, resolve(&replaced, value));
                }
                InstKind::LoadStack { slot } => {
                    if let Some(value) = known.get(slot).cloned() {
                        function.replace_all_uses(inst, &value);
                        replaced.insert(inst, value);
                    }
                }
                _ => {}
            }
        }
    }
    let dead: FxHashSet<InstId> = replaced.keys().copied().collect();
    function.remove_insts(&dead);
    !dead.is_empty()
}

fn forward_entry_stores(function: &mut Function) -> bool {
    let entry = function.entry();
    if function.block(entry).handler.is_some() || function.predecessors().contains_key(&entry) {
        return false;
    }

    let mut stores: FxHashMap<InstId, Vec<InstId>> = FxHashMap::default();
    for inst in function.placed_insts() {
        if let InstKind::StoreStack { slot, .. } = function.inst(inst).kind {
            stores.entry(slot).or_default().push(inst);
        }
    }

    let entry_insts = function.block(entry).insts.clone();
    let position = |id: InstId| entry_insts.iter().position(|i| *i == id);
    let mut forwarded: FxHashMap<InstId, Operand> = FxHashMap::default();
    for (slot, slot_stores) in &stores {
        let [store] = slot_stores.as_slice() else {
            continue;
        };
        let Some(at) = position(*store) else {
            continue;
        };
        let InstKind::StoreStack { value, .. } = &function.inst(*store).kind else {
            continue;
        };
        let available = match value {
            Operand::Const(_) => true,
            Operand::Value(def) => position(*def).is_some_and(|p| p < at),
        };
        if available {
            forwarded.insert(*slot, value.clone());
        }
    }
    if forwarded.is_empty() {
        return false;
    }

    let mut dead = FxHashSet::default();
    let mut past_store: FxHashSet<InstId> = FxHashSet::default();
    for block in function.layout.clone() {
        for inst in function.block(block).insts.clone() {
            match &function.inst(inst).kind {
                InstKind::StoreStack { slot, .. } if block == entry => {
                    past_store.insert(*slot);
                }
                InstKind::LoadStack { slot } => {
                    let visible = block != entry || past_store.contains(slot);
                    if let Some(value) = forwarded.get(slot).filter(|_| visible).cloned() {
                        function.replace_all_uses(inst, &value);
                        dead.insert(inst);
                    }
                }
                _ => {}
            }
        }
    }
    function.remove_insts(&dead);
    !dead.is_empty()
}

fn remove_unread_slots(function: &mut Function) -> bool {
    let mut read = FxHashSet::default();
    let mut slots = Vec::new();
    for inst in function.placed_insts() {
        match function.inst(inst).kind {
            InstKind::AllocStack { .. } => slots.push(inst),
            InstKind::LoadStack { slot } => {
                read.insert(slot);
            }
            _ => {}
        }
    }
    let unread: FxHashSet<InstId> = slots.into_iter().filter(|s| !read.contains(s)).collect();
    if unread.is_empty() {
        return false;
    }
    let mut dead = unread.clone();
    for inst in function.placed_insts() {
        if let InstKind::StoreStack { slot, .. } = function.inst(inst).kind {
            if unread.contains(&slot) {
                dead.insert(inst);
            }
        }
    }
    function.remove_insts(&dead);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, BinaryOperator};
    use crate::config::CompileFlags;
    use crate::ir::{Constant, FunctionId, Terminator};
    use crate::optimizer::test_support::lower;

    #[test]
    fn test_return_slot_is_promoted() {
        let b = AstBuilder::new("function f() {}");
        let program = b.program(vec![b.function_decl(b.ident("f"), vec![], vec![])]);

        let mut module = lower(&program, &CompileFlags::default());
        assert!(promote_stack_slots(&mut module));
        let id = module.function_named("f").unwrap();
        let f = module.function(id).unwrap();
        assert!(!f.placed_insts().any(|i| matches!(
            f.inst(i).kind,
            InstKind::AllocStack { .. } | InstKind::StoreStack { .. } | InstKind::LoadStack { .. }
        )));
        assert_eq!(
            f.block(f.entry()).terminator,
            Terminator::Return(Operand::Const(Constant::Undefined))
        );
    }

    #[test]
    fn test_completion_value_forwarded_within_block() {
        let b = AstBuilder::new("a();");
        let program = b.program(vec![b.expr_stmt(b.call(b.id("a"), vec![]))]);

        let mut module = lower(&program, &CompileFlags::non_strict());
        promote_stack_slots(&mut module);
        let global = module.function(FunctionId::GLOBAL).unwrap();
        let Terminator::Return(Operand::Value(value)) = &global.block(global.entry()).terminator
        else {
            panic!("expected a returned value");
        };
        assert!(matches!(global.inst(*value).kind, InstKind::Call { .. }));
    }

    #[test]
    fn test_merged_slot_survives() {
        let b = AstBuilder::new("a || b;");
        let or = b.binary(BinaryOperator::LogicalOr, b.id("a"), b.id("b"));
        let program = b.program(vec![b.expr_stmt(or)]);

        let mut module = lower(&program, &CompileFlags::non_strict());
        promote_stack_slots(&mut module);
        let global = module.function(FunctionId::GLOBAL).unwrap();
        let loads = global
            .placed_insts()
            .filter(|i| matches!(global.inst(*i).kind, InstKind::LoadStack { .. }))
            .count();
        assert_eq!(loads, 1);
    }
}
