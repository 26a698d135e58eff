// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dead instruction and dead variable elimination.

use rustc_hash::FxHashSet;

use crate::ir::{Function, InstId, InstKind, IrModule, VarId};

/// Removes unused instructions without side effects, in every function.
pub fn eliminate_dead_instructions(module: &mut IrModule) -> bool {
    let mut changed = false;
    for id in module.function_ids() {
        if let Some(function) = module.function_mut(id) {
            changed |= dead_instructions(function);
        }
    }
    changed
}

fn dead_instructions(function: &mut Function) -> bool {
    let mut removed = 0;
    loop {
        let uses = function.use_counts();
        let dead: FxHashSet<InstId> = function
            .placed_insts()
            .filter(|id| {
                let kind = &function.inst(*id).kind;
                kind.has_result()
                    && !kind.has_side_effects()
                    && uses.get(id).copied().unwrap_or(0) == 0
            })
            .collect();
        if dead.is_empty() {
            break;
        }
        removed += dead.len();
        function.remove_insts(&dead);
    }
    if removed > 0 {
        tracing::trace!(function = %function.name, removed, "dead instructions removed");
    }
    removed > 0
}

/// Removes frame variables that are never read, with all stores to them.
///
/// Variables a direct `eval` can see are kept, and so are parameters when
/// they are pinned to registers: the function reads `arguments` or debug
/// info was requested.
pub fn eliminate_dead_variables(module: &mut IrModule, debug_info: bool) -> bool {
    let mut loaded: FxHashSet<VarId> = FxHashSet::default();
    for (_, function) in module.functions() {
        for inst in function.placed_insts() {
            if let InstKind::LoadFrame { var } = function.inst(inst).kind {
                loaded.insert(var);
            }
        }
    }

    let mut dead: FxHashSet<VarId> = FxHashSet::default();
    for (_, function) in module.functions() {
        for var in &function.frame {
            let v = module.variable(*var);
            let pinned = v.param.is_some() && (function.uses_arguments || debug_info);
            if !loaded.contains(var) && !v.eval_visible && !pinned {
                dead.insert(*var);
            }
        }
    }
    if dead.is_empty() {
        return false;
    }

    for id in module.function_ids() {
        let Some(function) = module.function_mut(id) else {
            continue;
        };
        let stores: FxHashSet<InstId> = function
            .placed_insts()
            .filter(|i| matches!(function.inst(*i).kind, InstKind::StoreFrame { var, .. } if dead.contains(&var)))
            .collect();
        function.remove_insts(&stores);
        function.frame.retain(|v| !dead.contains(v));
    }
    tracing::trace!(count = dead.len(), "dead variables removed");
    true
}

/// Clears the captured flag of variables only their owner still touches,
/// which inlining and dead function elimination can leave behind.
pub fn refresh_captures(module: &mut IrModule) -> usize {
    let mut foreign: FxHashSet<VarId> = FxHashSet::default();
    for (id, function) in module.functions() {
        for inst in function.placed_insts() {
            let var = match function.inst(inst).kind {
                InstKind::LoadFrame { var } | InstKind::StoreFrame { var, .. } => var,
                _ => continue,
            };
            if module.variable(var).function != id {
                foreign.insert(var);
            }
        }
    }
    let frames: Vec<VarId> = module
        .functions()
        .flat_map(|(_, f)| f.frame.iter().copied())
        .collect();
    let mut released = 0;
    for var in frames {
        let v = module.variable_mut(var);
        if v.captured && !v.eval_visible && !foreign.contains(&var) {
            v.captured = false;
            released += 1;
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::config::CompileFlags;
    use crate::optimizer::test_support::{insts, lower};

    fn frame_names(module: &IrModule, name: &str) -> Vec<String> {
        let id = module.function_named(name).unwrap();
        module
            .function(id)
            .unwrap()
            .frame
            .iter()
            .map(|v| module.variable(*v).name.clone())
            .collect()
    }

    #[test]
    fn test_unused_loads_are_removed() {
        let b = AstBuilder::new("function f(a) { a; }");
        let f = b.ident("f");
        let a = b.ident("a");
        let stmt = b.expr_stmt(b.id("a"));
        let program = b.program(vec![b.function_decl(f, vec![a], vec![stmt])]);

        let mut module = lower(&program, &CompileFlags::default());
        assert!(eliminate_dead_instructions(&mut module));
        assert!(!insts(&module, "f")
            .iter()
            .any(|k| matches!(k, InstKind::LoadFrame { .. })));
    }

    #[test]
    fn test_unread_variable_leaves_frame() {
        let b = AstBuilder::new("function f(a) { var x = 1; return a; }");
        let f = b.ident("f");
        let a = b.ident("a");
        let x = b.var(vec![b.declarator(b.ident("x"), Some(b.num("1")))]);
        let ret = b.ret(Some(b.id("a")));
        let program = b.program(vec![b.function_decl(f, vec![a], vec![x, ret])]);

        let mut module = lower(&program, &CompileFlags::default());
        assert_eq!(frame_names(&module, "f"), vec!["a", "x"]);
        assert!(eliminate_dead_variables(&mut module, false));
        assert_eq!(frame_names(&module, "f"), vec!["a"]);
        assert_eq!(
            insts(&module, "f")
                .iter()
                .filter(|k| matches!(k, InstKind::StoreFrame { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_pinned_parameters_survive() {
        let b = AstBuilder::new("function f(a) { return arguments; }");
        let f = b.ident("f");
        let a = b.ident("a");
        let ret = b.ret(Some(b.id("arguments")));
        let program = b.program(vec![b.function_decl(f, vec![a], vec![ret])]);

        let flags = CompileFlags::non_strict();
        let mut module = lower(&program, &flags);
        eliminate_dead_variables(&mut module, false);
        assert!(frame_names(&module, "f").contains(&"a".to_string()));

        let b = AstBuilder::new("function g(a) {}");
        let g = b.ident("g");
        let a = b.ident("a");
        let program = b.program(vec![b.function_decl(g, vec![a], vec![])]);
        let mut module = lower(&program, &flags);
        eliminate_dead_variables(&mut module, true);
        assert_eq!(frame_names(&module, "g"), vec!["a"]);
        eliminate_dead_variables(&mut module, false);
        assert!(frame_names(&module, "g").is_empty());
    }

    #[test]
    fn test_captures_refreshed_after_closure_removal() {
        let b = AstBuilder::new("function f() { var v = 1; function g() { return v; } return v; }");
        let f = b.ident("f");
        let v = b.var(vec![b.declarator(b.ident("v"), Some(b.num("1")))]);
        let g = b.ident("g");
        let inner = b.ret(Some(b.id("v")));
        let g = b.function_decl(g, vec![], vec![inner]);
        let ret = b.ret(Some(b.id("v")));
        let program = b.program(vec![b.function_decl(f, vec![], vec![v, g, ret])]);

        let mut module = lower(&program, &CompileFlags::default());
        let g = module.function_named("g").unwrap();
        assert_eq!(refresh_captures(&mut module), 0);
        module.remove_function(g);
        assert_eq!(refresh_captures(&mut module), 1);
    }
}
