// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dead function and dead global elimination.
//!
//! Functions only come to life through `CreateClosure`, so the functions
//! reachable from the global function along closure creations are the only
//! ones that can ever run. Everything else is removed, which in turn can
//! leave frame variables and globals without readers or writers.

use rustc_hash::FxHashSet;

use crate::ir::{Constant, Function, FunctionId, InstId, InstKind, IrModule, Operand, VarId};

/// Ids of functions whose closures can be created starting from the global
/// function.
fn reachable_functions(module: &IrModule) -> FxHashSet<FunctionId> {
    let mut reached = FxHashSet::default();
    let mut work = vec![FunctionId::GLOBAL];
    while let Some(id) = work.pop() {
        if !reached.insert(id) {
            continue;
        }
        let Some(function) = module.function(id) else {
            continue;
        };
        for inst in function.placed_insts() {
            if let InstKind::CreateClosure { function: target } = function.inst(inst).kind {
                work.push(target);
            }
        }
    }
    reached
}

fn frame_accesses(function: &Function) -> impl Iterator<Item = (VarId, bool)> + '_ {
    function
        .placed_insts()
        .filter_map(|i| match function.inst(i).kind {
            InstKind::LoadFrame { var } => Some((var, false)),
            InstKind::StoreFrame { var, .. } => Some((var, true)),
            _ => None,
        })
}

/// Removes functions no live code can create.
pub fn eliminate_dead_functions(module: &mut IrModule) -> bool {
    let reached = reachable_functions(module);
    let candidates: Vec<FunctionId> = module
        .function_ids()
        .into_iter()
        .filter(|id| *id != FunctionId::GLOBAL && !reached.contains(id))
        .collect();
    if candidates.is_empty() {
        return false;
    }

    // Variables read and written by code that stays.
    let mut live_loads: FxHashSet<VarId> = FxHashSet::default();
    let mut live_stores: FxHashSet<VarId> = FxHashSet::default();
    for id in &reached {
        if let Some(function) = module.function(*id) {
            for (var, store) in frame_accesses(function) {
                if store {
                    live_stores.insert(var);
                } else {
                    live_loads.insert(var);
                }
            }
        }
    }

    let mut removed = 0;
    for id in candidates {
        let Some(function) = module.function(id) else {
            continue;
        };
        let holds_last_write = frame_accesses(function).any(|(var, store)| {
            store
                && reached.contains(&module.variable(var).function)
                && live_loads.contains(&var)
                && !live_stores.contains(&var)
        });
        if holds_last_write {
            tracing::trace!(function = id.0, "kept: last write to a live captured variable");
            continue;
        }
        if let Some(function) = module.remove_function(id) {
            tracing::trace!(function = id.0, name = %function.name, "dead function removed");
            removed += 1;
        }
    }
    removed > 0
}

enum GlobalAccess<'a> {
    Read(&'a str),
    Write(&'a str),
    /// The global object used in a way that may touch any property
    Escape,
}

fn global_name(key: &Operand) -> Option<&str> {
    match key {
        Operand::Const(Constant::String(name)) => Some(name),
        _ => None,
    }
}

fn is_global_object(operand: &Operand) -> bool {
    matches!(operand, Operand::Const(Constant::GlobalObject))
}

fn classify(kind: &InstKind) -> Option<GlobalAccess<'_>> {
    match kind {
        InstKind::TryLoadGlobalProperty { name } => Some(GlobalAccess::Read(name)),
        InstKind::TryStoreGlobalProperty { value, name } => Some(if is_global_object(value) {
            GlobalAccess::Escape
        } else {
            GlobalAccess::Write(name)
        }),
        InstKind::LoadProperty { object, key } | InstKind::DeleteProperty { object, key }
            if is_global_object(object) =>
        {
            Some(global_name(key).map_or(GlobalAccess::Escape, GlobalAccess::Read))
        }
        InstKind::StoreProperty { value, object, key } if is_global_object(object) => {
            Some(match global_name(key) {
                Some(name) if !is_global_object(value) => GlobalAccess::Write(name),
                _ => GlobalAccess::Escape,
            })
        }
        other if other.operands().into_iter().any(is_global_object) => Some(GlobalAccess::Escape),
        _ => None,
    }
}

/// Names of globals written by live code.
pub fn written_globals(module: &IrModule) -> FxHashSet<String> {
    let mut written = FxHashSet::default();
    for (_, function) in module.functions() {
        for inst in function.placed_insts() {
            if let Some(GlobalAccess::Write(name)) = classify(&function.inst(inst).kind) {
                written.insert(name.to_string());
            }
        }
    }
    written
}

/// Removes declared globals that were written, but only by code that has
/// since been eliminated, and are never read.
pub fn eliminate_dead_globals(module: &mut IrModule, originally_written: &FxHashSet<String>) -> bool {
    if module.has_direct_eval {
        return false;
    }
    let mut touched: FxHashSet<&str> = FxHashSet::default();
    for (_, function) in module.functions() {
        let returns_global = function.layout.iter().any(|b| {
            function
                .block(*b)
                .terminator
                .operands()
                .into_iter()
                .any(is_global_object)
        });
        if returns_global {
            return false;
        }
        for inst in function.placed_insts() {
            match classify(&function.inst(inst).kind) {
                Some(GlobalAccess::Read(name) | GlobalAccess::Write(name)) => {
                    touched.insert(name);
                }
                Some(GlobalAccess::Escape) => return false,
                None => {}
            }
        }
    }

    let dead: Vec<String> = module
        .globals
        .iter()
        .filter(|g| originally_written.contains(*g) && !touched.contains(g.as_str()))
        .cloned()
        .collect();
    if dead.is_empty() {
        return false;
    }

    module.globals.retain(|g| !dead.contains(g));
    if let Some(global) = module.function_mut(FunctionId::GLOBAL) {
        let declarations: FxHashSet<InstId> = global
            .placed_insts()
            .filter(|i| matches!(&global.inst(*i).kind, InstKind::DeclareGlobalVar { name } if dead.contains(name)))
            .collect();
        global.remove_insts(&declarations);
    }
    tracing::trace!(?dead, "dead globals removed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::config::CompileFlags;
    use crate::ir::dump_module;
    use crate::optimizer::test_support::lower;
    use crate::optimizer::{eliminate_dead_instructions, eliminate_dead_variables};

    #[test]
    fn test_uncreated_function_is_removed() {
        let b = AstBuilder::new("function f() { function g() {} }");
        let f = b.ident("f");
        let g = b.function_decl(b.ident("g"), vec![], vec![]);
        let program = b.program(vec![b.function_decl(f, vec![], vec![g])]);

        let mut module = lower(&program, &CompileFlags::default());
        assert!(!eliminate_dead_functions(&mut module));
        eliminate_dead_variables(&mut module, false);
        eliminate_dead_instructions(&mut module);
        assert!(eliminate_dead_functions(&mut module));
        assert!(module.function_named("g").is_none());
        assert!(module.function_named("f").is_some());
        assert!(module.function(FunctionId::GLOBAL).is_some());
    }

    #[test]
    fn test_global_is_never_removed() {
        let b = AstBuilder::new("");
        let program = b.program(vec![]);
        let mut module = lower(&program, &CompileFlags::default());
        assert!(!eliminate_dead_functions(&mut module));
        assert_eq!(module.function_ids(), vec![FunctionId::GLOBAL]);
    }

    #[test]
    fn test_dead_global_loses_declaration() {
        let b = AstBuilder::new("var x = 1;");
        let decl = b.var(vec![b.declarator(b.ident("x"), Some(b.num("1")))]);
        let program = b.program(vec![decl]);

        let mut module = lower(&program, &CompileFlags::default());
        let written = written_globals(&module);
        assert!(written.contains("x"));
        // Nothing was eliminated yet, so the write still counts.
        assert!(!eliminate_dead_globals(&mut module, &written));

        let global = module.function_mut(FunctionId::GLOBAL).unwrap();
        let stores: FxHashSet<InstId> = global
            .placed_insts()
            .filter(|i| matches!(global.inst(*i).kind, InstKind::StoreProperty { .. }))
            .collect();
        global.remove_insts(&stores);
        assert!(eliminate_dead_globals(&mut module, &written));
        assert!(module.globals.is_empty());
        assert!(!dump_module(&module).contains("DeclareGlobalVarInst"));
    }

    #[test]
    fn test_direct_eval_keeps_globals() {
        let mut module = IrModule::new();
        module.has_direct_eval = true;
        module.globals.push("x".into());
        let written = std::iter::once("x".to_string()).collect();
        assert!(!eliminate_dead_globals(&mut module, &written));
        assert_eq!(module.globals, vec!["x"]);
    }
}
