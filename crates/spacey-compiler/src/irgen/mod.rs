// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! IR generation from the bound AST.
//!
//! [`IrGen`] walks one function at a time, appending instructions to the
//! block under its cursor and opening fresh blocks wherever control flow
//! splits or joins. Nested functions are generated depth first when their
//! closure is created; the enclosing function's state is parked meanwhile.
//!
//! Every function gets an implicit return slot initialized to `undefined`.
//! Falling off the end returns the slot's value; in the global function the
//! slot also receives each expression statement's completion value.
//!
//! The generator never reports diagnostics. Functions the binder found
//! errors in are still generated so that sibling functions compile.

mod expressions;
mod scope;
mod statements;

#[cfg(test)]
mod tests;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{self, BlockStatement, Program, Statement};
use crate::binder::{self, BindingId, FunctionIndex, Hoisted, ScopeTree};
use crate::config::CompileFlags;
use crate::diagnostics::Span;
use crate::ir::{
    BlockId, Function, FunctionId, FunctionKind, InstId, InstKind, Instruction, IrModule,
    Operand, Terminator, VarId, Variable,
};

use statements::JumpScope;

/// Lowers a bound program to IR.
pub fn generate(program: &Program, tree: &ScopeTree, flags: &CompileFlags) -> IrModule {
    IrGen::new(tree, flags).build_program(program)
}

/// Per-function generation state.
struct FunctionState<'a> {
    index: FunctionIndex,
    function: Function,
    current: BlockId,
    /// Blocks whose terminator is final
    sealed: FxHashSet<BlockId>,
    /// Blocks in the order the cursor first entered them
    order: Vec<BlockId>,
    /// Handler given to newly created blocks
    handler: Option<BlockId>,
    jumps: Vec<JumpScope<'a>>,
    /// Labels waiting for the loop they are attached to
    pending_labels: Vec<String>,
    return_slot: Option<InstId>,
    /// Stack slots allocated at the top of the entry block
    allocs: usize,
    anon: u32,
    statement: u32,
}

impl<'a> FunctionState<'a> {
    fn new(index: FunctionIndex, mut function: Function) -> Self {
        let entry = function.add_block(Terminator::Return(Operand::undefined()));
        Self {
            index,
            function,
            current: entry,
            sealed: FxHashSet::default(),
            order: vec![entry],
            handler: None,
            jumps: Vec::new(),
            pending_labels: Vec::new(),
            return_slot: None,
            allocs: 0,
            anon: 0,
            statement: 0,
        }
    }

    fn finish(mut self) -> Function {
        let mut layout = self.order;
        for block in self.function.layout.iter() {
            if !layout.contains(block) {
                layout.push(*block);
            }
        }
        self.function.layout = layout;
        self.function
    }
}

/// The IR generator.
pub struct IrGen<'a> {
    tree: &'a ScopeTree,
    flags: &'a CompileFlags,
    module: IrModule,
    vars: FxHashMap<BindingId, VarId>,
    /// Frame variables of each function, by function id
    frames: Vec<Vec<VarId>>,
    state: FunctionState<'a>,
}

impl<'a> IrGen<'a> {
    /// Creates a generator. Every non-global binding gets its frame variable
    /// up front, so closures can refer to variables of functions that have
    /// not been generated yet.
    pub fn new(tree: &'a ScopeTree, flags: &'a CompileFlags) -> Self {
        let mut module = IrModule::new();
        let mut vars = FxHashMap::default();
        let mut frames = Vec::new();
        for (index, info) in tree.functions() {
            module.reserve_function();
            let mut frame = Vec::new();
            for binding in tree.frame_bindings(index) {
                let b = tree.binding(binding);
                let param = info
                    .params
                    .iter()
                    .rposition(|p| *p == binding)
                    .map(|i| i as u32);
                let var = module.add_variable(Variable {
                    name: b.name.clone(),
                    function: FunctionId(index.0),
                    captured: b.storage == binder::StorageClass::Captured,
                    is_const: b.is_const,
                    eval_visible: b.eval_visible,
                    param,
                });
                vars.insert(binding, var);
                frame.push(var);
            }
            frames.push(frame);
        }
        module.globals = tree
            .global_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        module.has_direct_eval = tree.functions().any(|(_, f)| f.has_direct_eval);

        let placeholder = Function::new("global", FunctionKind::Global, flags.strict, Span::DUMMY);
        Self {
            tree,
            flags,
            module,
            vars,
            frames,
            state: FunctionState::new(FunctionIndex::GLOBAL, placeholder),
        }
    }

    /// Generates the whole program.
    pub fn build_program(mut self, program: &'a Program) -> IrModule {
        let info = self.tree.function(FunctionIndex::GLOBAL);
        let mut function = Function::new("global", FunctionKind::Global, info.strict, program.span);
        function.frame = self.frames[0].clone();
        self.state = FunctionState::new(FunctionIndex::GLOBAL, function);
        self.prologue();

        let globals = self.module.globals.clone();
        for name in globals {
            self.emit(InstKind::DeclareGlobalVar { name }, program.span);
        }
        self.hoist_closures(&program.body);
        self.statements(&program.body);
        self.epilogue(program.span);

        let state = std::mem::replace(
            &mut self.state,
            FunctionState::new(
                FunctionIndex::GLOBAL,
                Function::new("", FunctionKind::Global, false, Span::DUMMY),
            ),
        );
        self.module.set_function(FunctionId::GLOBAL, state.finish());
        tracing::debug!(
            functions = self.module.function_count(),
            instructions = self.module.instruction_count(),
            "IR generated"
        );
        self.module
    }

    /// Generates a nested function and returns its id.
    fn build_function(&mut self, f: &'a ast::Function) -> Option<FunctionId> {
        let tree = self.tree;
        let Some(index) = tree.function_for(f) else {
            tracing::warn!(span = ?f.span, "function was not bound");
            return None;
        };
        let info = tree.function(index);
        let id = FunctionId(index.0);
        let kind = if f.is_arrow {
            FunctionKind::Arrow
        } else {
            FunctionKind::Normal
        };
        let mut function = Function::new(info.name.clone(), kind, info.strict, f.span);
        function.parent = info.parent.map(|p| FunctionId(p.0));
        function.params = f.params.iter().map(|p| p.name.clone()).collect();
        function.frame = self.frames[index.0 as usize].clone();
        tracing::trace!(name = %info.name, id = id.0, "generating function");

        let outer = std::mem::replace(&mut self.state, FunctionState::new(index, function));
        self.prologue();
        match &f.body {
            ast::FunctionBody::Block(body) => {
                self.hoist_closures(body);
                self.statements(body);
            }
            ast::FunctionBody::Expression(expr) => {
                let value = self.expression(expr);
                self.terminate(Terminator::Return(value), expr.span());
            }
        }
        self.epilogue(f.span);
        let state = std::mem::replace(&mut self.state, outer);
        self.module.set_function(id, state.finish());
        Some(id)
    }

    /// Return slot, parameters and the implicit bindings.
    fn prologue(&mut self) {
        let tree = self.tree;
        let index = self.state.index;
        let info = tree.function(index);
        let span = info.span;

        let slot = self.alloc_stack("ret", span);
        self.emit(
            InstKind::StoreStack {
                value: Operand::undefined(),
                slot,
            },
            span,
        );
        self.state.return_slot = Some(slot);

        for (i, binding) in info.params.iter().enumerate() {
            let value = self.value(InstKind::LoadParam { index: i as u32 + 1 }, span);
            self.store_binding(*binding, value, span);
        }
        if let Some(arguments) = info.arguments_binding {
            let value = self.value(InstKind::CreateArguments, span);
            self.store_binding(arguments, value, span);
            self.state.function.uses_arguments = true;
        }
        if let Some(callee) = info.callee_binding {
            let value = self.value(InstKind::LoadCallee, span);
            self.store_binding(callee, value, span);
        }
        if !info.is_arrow && index != FunctionIndex::GLOBAL {
            if let Some(this) = info.this_binding {
                let value = self.load_this(span);
                self.store_binding(this, value, span);
            }
        }
        let function = &mut self.state.function;
        function.has_direct_eval = info.has_direct_eval;
        function.error_count = info.error_count;
        function.first_error = info.first_error.clone();
    }

    fn epilogue(&mut self, span: Span) {
        if self.is_sealed() {
            return;
        }
        if let Some(slot) = self.state.return_slot {
            let value = self.value(InstKind::LoadStack { slot }, span);
            self.terminate(Terminator::Return(value), span);
        }
    }

    /// Creates closures for hoisted function declarations.
    fn hoist_closures(&mut self, body: &'a [Statement]) {
        for item in binder::hoisted_declarations(body) {
            if let Hoisted::Function(f) = item {
                let Some(id) = &f.id else { continue };
                let closure = self.closure(f);
                self.store_identifier(id, closure, true, f.span);
            }
        }
    }

    /// A closure for a nested function.
    fn closure(&mut self, f: &'a ast::Function) -> Operand {
        match self.build_function(f) {
            Some(function) => self.value(InstKind::CreateClosure { function }, f.span),
            None => Operand::undefined(),
        }
    }

    // ========================================================================
    // Blocks and instructions
    // ========================================================================

    fn is_sealed(&self) -> bool {
        self.state.sealed.contains(&self.state.current)
    }

    /// Creates a block protected by the current handler.
    fn new_block(&mut self) -> BlockId {
        let block = self
            .state
            .function
            .add_block(Terminator::Return(Operand::undefined()));
        self.state.function.block_mut(block).handler = self.state.handler;
        block
    }

    fn switch_to(&mut self, block: BlockId) {
        self.state.current = block;
        if !self.state.order.contains(&block) {
            self.state.order.push(block);
        }
    }

    /// Ends the current block. Does nothing if it already ended.
    fn terminate(&mut self, terminator: Terminator, span: Span) {
        if self.is_sealed() {
            return;
        }
        let current = self.state.current;
        let block = self.state.function.block_mut(current);
        block.terminator = terminator;
        block.span = span;
        self.state.sealed.insert(current);
    }

    /// Ends the current block with a jump to `target` and moves there.
    fn continue_in(&mut self, target: BlockId, span: Span) {
        self.terminate(Terminator::Branch(target), span);
        self.switch_to(target);
    }

    /// Appends an instruction to the current block. Code after a terminator
    /// goes to a fresh unreachable block.
    fn emit(&mut self, kind: InstKind, span: Span) -> InstId {
        if self.is_sealed() {
            let block = self.new_block();
            self.switch_to(block);
        }
        let id = self.state.function.add_inst(Instruction {
            kind,
            span,
            statement: self.state.statement,
        });
        let current = self.state.current;
        self.state.function.block_mut(current).insts.push(id);
        id
    }

    fn value(&mut self, kind: InstKind, span: Span) -> Operand {
        Operand::Value(self.emit(kind, span))
    }

    /// Allocates a named stack slot at the top of the entry block.
    fn alloc_stack(&mut self, purpose: &str, span: Span) -> InstId {
        let name = format!("?anon_{}_{purpose}", self.state.anon);
        self.state.anon += 1;
        let id = self.state.function.add_inst(Instruction {
            kind: InstKind::AllocStack { name },
            span,
            statement: 0,
        });
        let entry = self.state.function.entry();
        let at = self.state.allocs;
        self.state.function.block_mut(entry).insts.insert(at, id);
        self.state.allocs += 1;
        id
    }

    fn block_statement(&mut self, block: &'a BlockStatement) {
        self.statements(&block.body);
    }

    fn strict(&self) -> bool {
        self.state.function.strict
    }
}
