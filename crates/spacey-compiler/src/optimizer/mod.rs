// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! IR optimizer.
//!
//! Every pass works on the whole module and reports whether it changed
//! anything. [`optimize`] runs them in a fixed order until a full round
//! changes nothing. The passes are conservative: whatever they cannot prove
//! unobservable is left alone, and they never report diagnostics.

mod cfg_simplify;
mod const_fold;
mod dce;
mod dead_functions;
mod inline;
mod stack_promotion;

pub use cfg_simplify::simplify_cfg;
pub use const_fold::fold_constants;
pub use dce::{eliminate_dead_instructions, eliminate_dead_variables, refresh_captures};
pub use dead_functions::{eliminate_dead_functions, eliminate_dead_globals, written_globals};
pub use inline::inline_iifes;
pub use stack_promotion::promote_stack_slots;

use rustc_hash::FxHashSet;

use crate::config::CompileFlags;
use crate::ir::IrModule;

/// Upper bound on fixpoint rounds.
const MAX_ROUNDS: usize = 32;

/// What an optimizer run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// Rounds run, including the final round that changed nothing
    pub rounds: usize,
    /// Live functions before and after
    pub functions: (usize, usize),
    /// Placed instructions and terminators before and after
    pub instructions: (usize, usize),
}

/// Runs the pass pipeline to a fixpoint.
pub fn optimize(module: &mut IrModule, flags: &CompileFlags) -> OptimizeStats {
    let mut stats = OptimizeStats {
        functions: (module.function_count(), 0),
        instructions: (module.instruction_count(), 0),
        ..OptimizeStats::default()
    };
    let originally_written: FxHashSet<String> = written_globals(module);

    loop {
        stats.rounds += 1;
        let mut changed = false;
        changed |= run("cfg-simplify", module, simplify_cfg);
        changed |= run("const-fold", module, fold_constants);
        changed |= run("stack-promotion", module, promote_stack_slots);
        changed |= run("dead-instructions", module, eliminate_dead_instructions);
        changed |= run("dead-variables", module, |m| {
            eliminate_dead_variables(m, flags.debug_info)
        });
        changed |= run("iife-inline", module, inline_iifes);
        changed |= run("dead-functions", module, eliminate_dead_functions);
        changed |= run("dead-globals", module, |m| {
            eliminate_dead_globals(m, &originally_written)
        });
        if !changed || stats.rounds >= MAX_ROUNDS {
            break;
        }
    }

    let released = refresh_captures(module);
    if released > 0 {
        tracing::debug!(released, "variables no longer captured");
    }
    stats.functions.1 = module.function_count();
    stats.instructions.1 = module.instruction_count();
    tracing::debug!(
        rounds = stats.rounds,
        functions_before = stats.functions.0,
        functions_after = stats.functions.1,
        instructions_before = stats.instructions.0,
        instructions_after = stats.instructions.1,
        "optimizer finished"
    );
    stats
}

fn run(name: &str, module: &mut IrModule, pass: impl FnOnce(&mut IrModule) -> bool) -> bool {
    let before = module.instruction_count();
    let changed = pass(module);
    if changed {
        tracing::debug!(
            pass = name,
            before,
            after = module.instruction_count(),
            "pass changed the module"
        );
    }
    changed
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ast::Program;
    use crate::binder;
    use crate::config::CompileFlags;
    use crate::diagnostics::DiagnosticEngine;
    use crate::ir::{InstKind, IrModule};
    use crate::irgen;

    pub fn lower(program: &Program, flags: &CompileFlags) -> IrModule {
        let mut engine = DiagnosticEngine::new();
        let tree = binder::bind(program, flags, &mut engine);
        irgen::generate(program, &tree, flags)
    }

    pub fn insts<'m>(module: &'m IrModule, name: &str) -> Vec<&'m InstKind> {
        let id = module.function_named(name).expect("function exists");
        let f = module.function(id).unwrap();
        f.placed_insts().map(|i| &f.inst(i).kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::ast::AstBuilder;
    use crate::ir::dump_module;

    #[test]
    fn test_dead_functions_collapse() {
        let b = AstBuilder::new(
            "function main() { function foo() {} var x = function bar() {}; } main();",
        );
        let main = b.ident("main");
        let foo = b.function_decl(b.ident("foo"), vec![], vec![]);
        let x = b.ident("x");
        let bar = b.function_expr(Some(b.ident("bar")), vec![], vec![]);
        let x = b.var(vec![b.declarator(x, Some(bar))]);
        let decl = b.function_decl(main, vec![], vec![foo, x]);
        let call = b.expr_stmt(b.call(b.id("main"), vec![]));
        let program = b.program(vec![decl, call]);

        let flags = CompileFlags::non_strict();
        let mut module = lower(&program, &flags);
        assert_eq!(module.function_count(), 4);
        let stats = optimize(&mut module, &flags);

        assert_eq!(module.function_count(), 2);
        assert_eq!(stats.functions, (4, 2));
        assert!(stats.instructions.1 < stats.instructions.0);
        let text = dump_module(&module);
        assert!(text.contains("function main()\nframe = []\n%BB0:\n  %0 = ReturnInst undefined : undefined\n"));
        assert!(text.contains("CreateFunctionInst %main()"));
        assert!(text.contains("StorePropertyInst"));
        assert!(!text.contains("foo"));
        assert!(!text.contains("bar"));
    }

    #[test]
    fn test_optimizer_reaches_fixpoint_on_empty_program() {
        let b = AstBuilder::new("");
        let program = b.program(vec![]);
        let flags = CompileFlags::default();
        let mut module = lower(&program, &flags);
        let stats = optimize(&mut module, &flags);
        assert!(stats.rounds <= 2);
        let global = insts(&module, "global");
        assert!(global.is_empty());
    }
}
