// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Semantic binder.
//!
//! Builds the [`ScopeTree`] for a program: every declaration gets a
//! [`Binding`], every identifier reference a [`Resolution`], and every
//! function a [`FunctionInfo`]. Declaration legality is checked along the
//! way. Problems are reported to the [`DiagnosticEngine`] and binding carries
//! on, so independent errors in one program are all found in one pass.
//!
//! Each function is processed in two steps: `var` and function declarations
//! are hoisted into the function scope first, then the body is walked in
//! source order. Diagnostics are therefore reported in source order.

mod scope;

pub use scope::{
    node_key, Binding, BindingId, DeclarationKind, FunctionIndex, FunctionInfo, Resolution, Scope,
    ScopeId, ScopeKind, ScopeTree, StorageClass,
};

use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::config::CompileFlags;
use crate::diagnostics::{Diagnostic, DiagnosticEngine, DiagnosticKind, Severity, Span};

/// Globals that are always present, so strict reads of them never warn.
pub const AMBIENT_GLOBALS: &[&str] = &[
    "Array", "ArrayBuffer", "BigInt", "Boolean", "DataView", "Date", "Error", "EvalError",
    "Float32Array", "Float64Array", "Function", "Infinity", "Int16Array", "Int32Array",
    "Int8Array", "JSON", "Map", "Math", "NaN", "Number", "Object", "Promise", "Proxy",
    "RangeError", "ReferenceError", "Reflect", "RegExp", "Set", "String", "Symbol",
    "SyntaxError", "TypeError", "URIError", "Uint16Array", "Uint32Array", "Uint8Array",
    "Uint8ClampedArray", "WeakMap", "WeakSet", "console", "decodeURI", "decodeURIComponent",
    "encodeURI", "encodeURIComponent", "escape", "eval", "globalThis", "isFinite", "isNaN",
    "parseFloat", "parseInt", "print", "undefined", "unescape",
];

/// Non-writable properties of the global object.
pub const READ_ONLY_GLOBALS: &[&str] = &["NaN", "Infinity", "undefined"];

/// Binds a whole program.
pub fn bind(program: &Program, flags: &CompileFlags, diagnostics: &mut DiagnosticEngine) -> ScopeTree {
    let mut binder = Binder {
        tree: ScopeTree::default(),
        flags,
        diagnostics,
        scope: ScopeId(0),
        function: FunctionIndex::GLOBAL,
        targets: Vec::new(),
        redeclared: FxHashSet::default(),
    };
    binder.bind_program(program);
    binder.finish()
}

/// A declaration found while hoisting.
#[derive(Debug, Clone, Copy)]
pub enum Hoisted<'a> {
    /// A `var` declarator's name
    Var(&'a Identifier),
    /// A function declaration
    Function(&'a Function),
}

/// Function-scoped declarations of a body, in source order. Nested
/// functions are not entered.
pub fn hoisted_declarations(body: &[Statement]) -> Vec<Hoisted<'_>> {
    let mut hoisted = Vec::new();
    for stmt in body {
        collect_hoisted_from_statement(stmt, &mut hoisted);
    }
    hoisted
}

/// Recursively collect hoisted declarations from a statement.
fn collect_hoisted_from_statement<'a>(stmt: &'a Statement, hoisted: &mut Vec<Hoisted<'a>>) {
    fn declaration<'a>(decl: &'a VariableDeclaration, hoisted: &mut Vec<Hoisted<'a>>) {
        if decl.kind == VariableKind::Var {
            hoisted.extend(decl.declarations.iter().map(|d| Hoisted::Var(&d.id)));
        }
    }

    match stmt {
        Statement::VariableDeclaration(decl) => declaration(decl, hoisted),
        Statement::FunctionDeclaration(f) => hoisted.push(Hoisted::Function(f)),
        Statement::Block(block) => {
            for inner in &block.body {
                collect_hoisted_from_statement(inner, hoisted);
            }
        }
        Statement::If(s) => {
            collect_hoisted_from_statement(&s.consequent, hoisted);
            if let Some(alt) = &s.alternate {
                collect_hoisted_from_statement(alt, hoisted);
            }
        }
        Statement::While(s) => collect_hoisted_from_statement(&s.body, hoisted),
        Statement::DoWhile(s) => collect_hoisted_from_statement(&s.body, hoisted),
        Statement::For(s) => {
            if let Some(ForInit::Declaration(decl)) = &s.init {
                declaration(decl, hoisted);
            }
            collect_hoisted_from_statement(&s.body, hoisted);
        }
        Statement::ForIn(ForInStatement { left, body, .. })
        | Statement::ForOf(ForOfStatement { left, body, .. }) => {
            if let ForInLeft::Declaration(decl) = left {
                declaration(decl, hoisted);
            }
            collect_hoisted_from_statement(body, hoisted);
        }
        Statement::Try(s) => {
            for inner in &s.block.body {
                collect_hoisted_from_statement(inner, hoisted);
            }
            if let Some(handler) = &s.handler {
                for inner in &handler.body.body {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
            if let Some(finalizer) = &s.finalizer {
                for inner in &finalizer.body {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
        }
        Statement::Switch(s) => {
            for case in &s.cases {
                for inner in &case.consequent {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
        }
        Statement::Labeled(s) => collect_hoisted_from_statement(&s.body, hoisted),
        Statement::With(s) => collect_hoisted_from_statement(&s.body, hoisted),
        _ => {}
    }
}

/// Kind of `break`/`continue` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Loop,
    Switch,
    Label { is_loop: bool },
}

#[derive(Debug)]
struct JumpTarget {
    label: Option<String>,
    kind: TargetKind,
}

struct Binder<'a> {
    tree: ScopeTree,
    flags: &'a CompileFlags,
    diagnostics: &'a mut DiagnosticEngine,
    scope: ScopeId,
    function: FunctionIndex,
    targets: Vec<JumpTarget>,
    /// Declarations that clash with an earlier lexical declaration
    redeclared: FxHashSet<usize>,
}

impl<'a> Binder<'a> {
    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn finish(mut self) -> ScopeTree {
        for index in 0..self.tree.binding_count() {
            let id = BindingId(index as u32);
            let binding = self.tree.binding(id);
            let storage = if self.tree.scope(binding.scope).kind == ScopeKind::Global {
                StorageClass::GlobalProperty
            } else if binding.captured {
                StorageClass::Captured
            } else if binding.kind == DeclarationKind::Parameter {
                StorageClass::Parameter
            } else {
                StorageClass::Local
            };
            self.tree.binding_mut(id).storage = storage;
        }
        tracing::debug!(
            scopes = self.tree.scope_count(),
            bindings = self.tree.binding_count(),
            errors = self.tree.error_count(),
            "binder finished"
        );
        self.tree
    }

    fn report_in(&mut self, function: FunctionIndex, kind: DiagnosticKind, span: Span) {
        let diagnostic = Diagnostic::new(kind, span);
        if diagnostic.severity == Severity::Error {
            let info = self.tree.function_mut(function);
            info.error_count += 1;
            if info.first_error.is_none() {
                info.first_error = Some(diagnostic.clone());
            }
        }
        self.diagnostics.push(diagnostic);
    }

    fn report(&mut self, kind: DiagnosticKind, span: Span) {
        self.report_in(self.function, kind, span);
    }

    fn is_strict(&self) -> bool {
        self.tree.function(self.function).strict
    }

    fn function_scope(&self) -> ScopeId {
        self.tree.function(self.function).scope
    }

    fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let outer = self.scope;
        self.scope = self.tree.add_scope(kind, Some(outer), self.function);
        outer
    }

    fn new_binding(&self, name: &str, scope: ScopeId, kind: DeclarationKind, span: Span) -> Binding {
        Binding {
            name: name.to_string(),
            scope,
            kind,
            storage: StorageClass::Local,
            is_const: kind == DeclarationKind::Const,
            is_var_declared: matches!(kind, DeclarationKind::Var | DeclarationKind::Function),
            is_function_name: matches!(
                kind,
                DeclarationKind::Function | DeclarationKind::FunctionExpressionName
            ),
            captured: false,
            eval_visible: false,
            span,
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn check_declared_name(&mut self, id: &Identifier, strict: bool, function: FunctionIndex) {
        if strict && id.is_eval_or_arguments() {
            self.report_in(
                function,
                DiagnosticKind::CannotDeclareReservedName(id.name.clone()),
                id.span,
            );
        }
    }

    fn hoist_function_body(&mut self, body: &[Statement]) {
        for item in hoisted_declarations(body) {
            match item {
                Hoisted::Var(id) => self.declare_var(id, DeclarationKind::Var),
                Hoisted::Function(f) => {
                    if let Some(id) = &f.id {
                        self.declare_var(id, DeclarationKind::Function);
                    }
                }
            }
        }
        self.hoist_lexical(body);
    }

    fn declare_var(&mut self, id: &Identifier, kind: DeclarationKind) {
        let scope = self.function_scope();
        match self.tree.scope(scope).lookup(&id.name) {
            Some(existing) => {
                let binding = self.tree.binding_mut(existing);
                if matches!(binding.kind, DeclarationKind::Let | DeclarationKind::Const) {
                    self.redeclared.insert(node_key(id));
                }
                if kind == DeclarationKind::Function {
                    binding.is_function_name = true;
                }
            }
            None => {
                let binding = self.new_binding(&id.name, scope, kind, id.span);
                self.tree.add_binding(binding, true);
            }
        }
    }

    /// Declares the `let`/`const` names of a statement list in the current scope.
    fn hoist_lexical(&mut self, body: &[Statement]) {
        for stmt in body {
            if let Statement::VariableDeclaration(decl) = stmt {
                self.hoist_lexical_declaration(decl);
            }
        }
    }

    fn hoist_lexical_declaration(&mut self, decl: &VariableDeclaration) {
        let kind = match decl.kind {
            VariableKind::Var => return,
            VariableKind::Let => DeclarationKind::Let,
            VariableKind::Const => DeclarationKind::Const,
        };
        for d in &decl.declarations {
            if self.tree.scope(self.scope).lookup(&d.id.name).is_some() {
                self.redeclared.insert(node_key(&d.id));
            } else {
                let binding = self.new_binding(&d.id.name, self.scope, kind, d.id.span);
                self.tree.add_binding(binding, true);
            }
        }
    }

    /// A `var` may not be hoisted across a lexical declaration of the same name.
    fn check_var_conflict(&mut self, id: &Identifier) {
        let function_scope = self.function_scope();
        let clash = self
            .tree
            .ancestors(self.scope)
            .take_while(|s| *s != function_scope)
            .filter_map(|s| self.tree.scope(s).lookup(&id.name))
            .any(|b| {
                matches!(
                    self.tree.binding(b).kind,
                    DeclarationKind::Let | DeclarationKind::Const
                )
            });
        if clash {
            self.redeclared.insert(node_key(id));
        }
    }

    fn check_redeclared(&mut self, id: &Identifier) {
        if self.redeclared.contains(&node_key(id)) {
            self.report(DiagnosticKind::Redeclaration(id.name.clone()), id.span);
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn resolve_name(&mut self, name: &str) -> Resolution {
        let mut next = Some(self.scope);
        while let Some(id) = next {
            let (kind, function, parent, found) = {
                let scope = self.tree.scope(id);
                (scope.kind, scope.function, scope.parent, scope.lookup(name))
            };
            if let Some(binding) = found {
                self.note_use(binding);
                return Resolution::Binding(binding);
            }
            if kind == ScopeKind::Function
                && name == "arguments"
                && !self.tree.function(function).is_arrow
            {
                let binding = self.implicit_arguments(function);
                self.note_use(binding);
                return Resolution::Binding(binding);
            }
            next = parent;
        }
        Resolution::Global
    }

    fn note_use(&mut self, binding: BindingId) {
        let scope = self.tree.binding(binding).scope;
        let scope = self.tree.scope(scope);
        if scope.kind != ScopeKind::Global && scope.function != self.function {
            self.tree.binding_mut(binding).captured = true;
        }
    }

    fn implicit_arguments(&mut self, function: FunctionIndex) -> BindingId {
        if let Some(existing) = self.tree.function(function).arguments_binding {
            return existing;
        }
        let info = self.tree.function(function);
        let binding = self.new_binding("arguments", info.scope, DeclarationKind::Arguments, info.span);
        let id = self.tree.add_binding(binding, true);
        let info = self.tree.function_mut(function);
        info.uses_arguments = true;
        info.arguments_binding = Some(id);
        id
    }

    fn resolve_this(&mut self) {
        let current = self.function;
        if !self.tree.function(current).is_arrow {
            return;
        }
        let mut owner = self.tree.function(current).parent;
        while let Some(f) = owner {
            if !self.tree.function(f).is_arrow {
                break;
            }
            owner = self.tree.function(f).parent;
        }
        let Some(owner) = owner.filter(|f| *f != FunctionIndex::GLOBAL) else {
            return;
        };
        let binding = match self.tree.function(owner).this_binding {
            Some(b) => b,
            None => {
                let info = self.tree.function(owner);
                let mut binding = self.new_binding("?this", info.scope, DeclarationKind::This, info.span);
                binding.captured = true;
                let id = self.tree.add_binding(binding, false);
                self.tree.function_mut(owner).this_binding = Some(id);
                id
            }
        };
        self.tree.function_mut(current).this_binding = Some(binding);
    }

    fn walk_read(&mut self, id: &Identifier, quiet: bool) {
        let resolution = self.resolve_name(&id.name);
        self.tree.set_resolution(id, resolution);
        if resolution == Resolution::Global
            && !quiet
            && self.is_strict()
            && !AMBIENT_GLOBALS.contains(&id.name.as_str())
        {
            let function = self.tree.function(self.function).name.clone();
            self.report(
                DiagnosticKind::UndeclaredVariable {
                    name: id.name.clone(),
                    function,
                },
                id.span,
            );
        }
    }

    fn walk_write(&mut self, id: &Identifier, also_read: bool) {
        if also_read {
            self.walk_read(id, false);
        } else {
            let resolution = self.resolve_name(&id.name);
            self.tree.set_resolution(id, resolution);
        }
        if self.tree.resolve(id) == Resolution::Global
            && !self.is_strict()
            && READ_ONLY_GLOBALS.contains(&id.name.as_str())
        {
            self.tree.mark_read_only_target(id);
        }
    }

    // ========================================================================
    // Program and functions
    // ========================================================================

    fn bind_program(&mut self, program: &Program) {
        let strict = self.flags.strict || program.has_use_strict_directive();
        let info = FunctionInfo {
            name: "global".to_string(),
            parent: None,
            scope: ScopeId(0),
            span: program.span,
            params: Vec::new(),
            strict,
            is_arrow: false,
            uses_arguments: false,
            has_direct_eval: false,
            arguments_binding: None,
            this_binding: None,
            callee_binding: None,
            error_count: 0,
            first_error: None,
        };
        self.function = self.tree.add_function(info, node_key(program));
        self.scope = self
            .tree
            .add_scope(ScopeKind::Global, None, self.function);
        self.hoist_function_body(&program.body);
        self.walk_statements(&program.body);
    }

    fn bind_function(&mut self, f: &Function, name_hint: Option<&str>, is_declaration: bool) {
        let strict = self.is_strict() || f.has_use_strict_directive();
        let name = f
            .id
            .as_ref()
            .map(|id| id.name.clone())
            .or_else(|| name_hint.map(str::to_string))
            .unwrap_or_default();
        tracing::trace!(name = %name, strict, "binding function");

        let info = FunctionInfo {
            name,
            parent: Some(self.function),
            scope: ScopeId(0),
            span: f.span,
            params: Vec::new(),
            strict,
            is_arrow: f.is_arrow,
            uses_arguments: false,
            has_direct_eval: false,
            arguments_binding: None,
            this_binding: None,
            callee_binding: None,
            error_count: 0,
            first_error: None,
        };
        let index = self.tree.add_function(info, node_key(f));
        let outer_function = std::mem::replace(&mut self.function, index);
        let outer_scope = self.enter_scope(ScopeKind::Function);
        self.tree.function_mut(index).scope = self.scope;
        let outer_targets = std::mem::take(&mut self.targets);

        let head = f.id.as_ref().map_or(f.span, |id| id.span);
        if f.is_async {
            self.report(DiagnosticKind::AsyncFunction, head);
        }
        if f.is_generator {
            self.report(DiagnosticKind::GeneratorFunction, head);
        }
        if !is_declaration {
            if let Some(id) = &f.id {
                self.check_declared_name(id, strict, index);
            }
        }

        let mut seen = FxHashSet::default();
        for param in &f.params {
            self.check_declared_name(param, strict, index);
            if !seen.insert(param.name.as_str()) && strict {
                self.report(DiagnosticKind::DuplicateParameter(param.name.clone()), param.span);
            }
            let binding = match self.tree.scope(self.scope).lookup(&param.name) {
                Some(existing) => existing,
                None => {
                    let binding =
                        self.new_binding(&param.name, self.scope, DeclarationKind::Parameter, param.span);
                    self.tree.add_binding(binding, true)
                }
            };
            self.tree.function_mut(index).params.push(binding);
            self.tree.set_resolution(param, Resolution::Binding(binding));
        }

        self.hoist_function_body(f.statements());

        if !is_declaration {
            if let Some(id) = &f.id {
                if self.tree.scope(self.scope).lookup(&id.name).is_none() {
                    let binding = self.new_binding(
                        &id.name,
                        self.scope,
                        DeclarationKind::FunctionExpressionName,
                        id.span,
                    );
                    let binding = self.tree.add_binding(binding, true);
                    self.tree.function_mut(index).callee_binding = Some(binding);
                    self.tree.set_resolution(id, Resolution::Binding(binding));
                }
            }
        }

        match &f.body {
            FunctionBody::Block(body) => self.walk_statements(body),
            FunctionBody::Expression(expr) => self.walk_expression(expr),
        }

        self.targets = outer_targets;
        self.scope = outer_scope;
        self.function = outer_function;
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn walk_statements(&mut self, body: &[Statement]) {
        for stmt in body {
            self.walk_statement(stmt);
        }
    }

    fn walk_block(&mut self, block: &BlockStatement) {
        let outer = self.enter_scope(ScopeKind::Block);
        self.hoist_lexical(&block.body);
        self.walk_statements(&block.body);
        self.scope = outer;
    }

    fn walk_loop_body(&mut self, body: &Statement) {
        self.targets.push(JumpTarget {
            label: None,
            kind: TargetKind::Loop,
        });
        self.walk_statement(body);
        self.targets.pop();
    }

    fn walk_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::VariableDeclaration(decl) => self.walk_declaration(decl),
            Statement::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    let strict = self.is_strict() || f.has_use_strict_directive();
                    self.check_declared_name(id, strict, self.function);
                    self.check_redeclared(id);
                    let resolution = self.resolve_name(&id.name);
                    self.tree.set_resolution(id, resolution);
                }
                self.bind_function(f, None, true);
            }
            Statement::Expression(s) => self.walk_expression(&s.expression),
            Statement::Block(block) => self.walk_block(block),
            Statement::If(s) => {
                self.walk_expression(&s.test);
                self.walk_statement(&s.consequent);
                if let Some(alt) = &s.alternate {
                    self.walk_statement(alt);
                }
            }
            Statement::While(s) => {
                self.walk_expression(&s.test);
                self.walk_loop_body(&s.body);
            }
            Statement::DoWhile(s) => {
                self.walk_loop_body(&s.body);
                self.walk_expression(&s.test);
            }
            Statement::For(s) => {
                let outer = self.enter_scope(ScopeKind::Block);
                match &s.init {
                    Some(ForInit::Declaration(decl)) => {
                        self.hoist_lexical_declaration(decl);
                        self.walk_declaration(decl);
                    }
                    Some(ForInit::Expression(e)) => self.walk_expression(e),
                    None => {}
                }
                if let Some(test) = &s.test {
                    self.walk_expression(test);
                }
                if let Some(update) = &s.update {
                    self.walk_expression(update);
                }
                self.walk_loop_body(&s.body);
                self.scope = outer;
            }
            Statement::ForIn(ForInStatement {
                left, right, body, ..
            }) => {
                let outer = self.enter_scope(ScopeKind::Block);
                self.walk_for_left(left);
                self.walk_expression(right);
                self.walk_loop_body(body);
                self.scope = outer;
            }
            Statement::ForOf(ForOfStatement {
                left, right, body, ..
            }) => {
                let outer = self.enter_scope(ScopeKind::Block);
                self.walk_for_left(left);
                self.walk_expression(right);
                self.walk_loop_body(body);
                self.scope = outer;
            }
            Statement::Return(s) => {
                if self.function == FunctionIndex::GLOBAL {
                    self.report(DiagnosticKind::ReturnOutsideFunction, s.span);
                }
                if let Some(arg) = &s.argument {
                    self.walk_expression(arg);
                }
            }
            Statement::Break(s) => self.check_break(s),
            Statement::Continue(s) => self.check_continue(s),
            Statement::Throw(s) => self.walk_expression(&s.argument),
            Statement::Try(s) => {
                self.walk_block(&s.block);
                if let Some(handler) = &s.handler {
                    self.walk_catch(handler);
                }
                if let Some(finalizer) = &s.finalizer {
                    self.walk_block(finalizer);
                }
            }
            Statement::With(s) => {
                let keyword = Span::new(s.span.start, s.span.start + 4);
                if self.is_strict() {
                    self.report(DiagnosticKind::WithInStrictMode, keyword);
                } else {
                    self.report(DiagnosticKind::WithUnsupported, keyword);
                }
                self.walk_expression(&s.object);
                self.walk_statement(&s.body);
            }
            Statement::Labeled(s) => {
                let mut labels = vec![s.label.name.clone()];
                let mut body: &Statement = &s.body;
                while let Statement::Labeled(inner) = body {
                    labels.push(inner.label.name.clone());
                    body = &inner.body;
                }
                let is_loop = body.is_loop();
                let count = labels.len();
                for label in labels {
                    self.targets.push(JumpTarget {
                        label: Some(label),
                        kind: TargetKind::Label { is_loop },
                    });
                }
                self.walk_statement(body);
                self.targets.truncate(self.targets.len() - count);
            }
            Statement::Switch(s) => {
                self.walk_expression(&s.discriminant);
                let outer = self.enter_scope(ScopeKind::Block);
                for case in &s.cases {
                    self.hoist_lexical(&case.consequent);
                }
                self.targets.push(JumpTarget {
                    label: None,
                    kind: TargetKind::Switch,
                });
                for case in &s.cases {
                    if let Some(test) = &case.test {
                        self.walk_expression(test);
                    }
                    self.walk_statements(&case.consequent);
                }
                self.targets.pop();
                self.scope = outer;
            }
            Statement::Debugger(_) | Statement::Empty(_) => {}
        }
    }

    fn walk_declaration(&mut self, decl: &VariableDeclaration) {
        let strict = self.is_strict();
        for d in &decl.declarations {
            self.check_declared_name(&d.id, strict, self.function);
            if decl.kind == VariableKind::Var {
                self.check_var_conflict(&d.id);
            }
            self.check_redeclared(&d.id);
            let resolution = self.resolve_name(&d.id.name);
            self.tree.set_resolution(&d.id, resolution);
            if let Some(init) = &d.init {
                self.walk_expression_named(init, Some(&d.id.name));
            }
        }
    }

    fn walk_for_left(&mut self, left: &ForInLeft) {
        match left {
            ForInLeft::Declaration(decl) => {
                self.hoist_lexical_declaration(decl);
                self.walk_declaration(decl);
            }
            ForInLeft::Expression(Expression::Identifier(id)) => {
                if id.is_eval_or_arguments() {
                    self.report(DiagnosticKind::InvalidAssignmentTarget, id.span);
                }
                self.walk_write(id, false);
            }
            ForInLeft::Expression(e @ Expression::Member(_)) => self.walk_expression(e),
            ForInLeft::Expression(other) => {
                self.report(DiagnosticKind::InvalidAssignmentTarget, other.span());
                self.walk_expression(other);
            }
        }
    }

    fn walk_catch(&mut self, handler: &CatchClause) {
        let outer = self.enter_scope(ScopeKind::Catch);
        if let Some(param) = &handler.param {
            let strict = self.is_strict();
            self.check_declared_name(param, strict, self.function);
            let binding =
                self.new_binding(&param.name, self.scope, DeclarationKind::CatchParameter, param.span);
            let binding = self.tree.add_binding(binding, true);
            self.tree.set_resolution(param, Resolution::Binding(binding));
        }
        self.hoist_lexical(&handler.body.body);
        self.walk_statements(&handler.body.body);
        self.scope = outer;
    }

    fn check_break(&mut self, s: &JumpStatement) {
        match &s.label {
            None => {
                let ok = self
                    .targets
                    .iter()
                    .any(|t| matches!(t.kind, TargetKind::Loop | TargetKind::Switch));
                if !ok {
                    self.report(DiagnosticKind::BreakOutsideLoop, s.span);
                }
            }
            Some(label) => {
                let ok = self
                    .targets
                    .iter()
                    .any(|t| t.label.as_deref() == Some(label.name.as_str()));
                if !ok {
                    self.report(DiagnosticKind::UndefinedLabel(label.name.clone()), label.span);
                }
            }
        }
    }

    fn check_continue(&mut self, s: &JumpStatement) {
        match &s.label {
            None => {
                if !self.targets.iter().any(|t| t.kind == TargetKind::Loop) {
                    self.report(DiagnosticKind::ContinueOutsideLoop, s.span);
                }
            }
            Some(label) => {
                let target = self
                    .targets
                    .iter()
                    .rev()
                    .find(|t| t.label.as_deref() == Some(label.name.as_str()))
                    .map(|t| t.kind);
                match target {
                    None => {
                        self.report(DiagnosticKind::UndefinedLabel(label.name.clone()), label.span)
                    }
                    Some(TargetKind::Label { is_loop: false }) => self.report(
                        DiagnosticKind::ContinueToNonLoop(label.name.clone()),
                        label.span,
                    ),
                    Some(_) => {}
                }
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn walk_expression(&mut self, expr: &Expression) {
        self.walk_expression_named(expr, None);
    }

    /// Walks an expression; `name` is inferred for an anonymous function.
    fn walk_expression_named(&mut self, expr: &Expression, name: Option<&str>) {
        match expr {
            Expression::Literal(_) => {}
            Expression::Identifier(id) => self.walk_read(id, false),
            Expression::This(_) => self.resolve_this(),
            Expression::Array(a) => {
                for element in a.elements.iter().flatten() {
                    self.walk_expression(element);
                }
            }
            Expression::Object(o) => {
                for property in &o.properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.walk_expression(key);
                    }
                    let key = property.key.static_name();
                    self.walk_expression_named(&property.value, key.as_deref());
                }
            }
            Expression::Binary(b) => {
                self.walk_expression(&b.left);
                self.walk_expression(&b.right);
            }
            Expression::Unary(u) => match (u.operator, &*u.argument) {
                (UnaryOperator::Typeof, Expression::Identifier(id)) => self.walk_read(id, true),
                (UnaryOperator::Delete, Expression::Identifier(id)) => {
                    if self.is_strict() {
                        self.report(DiagnosticKind::DeleteOfVariable, u.span);
                    }
                    self.walk_read(id, true);
                }
                _ => self.walk_expression(&u.argument),
            },
            Expression::Assignment(a) => self.walk_assignment(a),
            Expression::Call(c) => self.walk_call(c),
            Expression::New(c) => {
                self.walk_expression(&c.callee);
                for arg in &c.arguments {
                    self.walk_expression(arg);
                }
            }
            Expression::Member(m) => {
                self.walk_expression(&m.object);
                if let MemberProperty::Expression(p) = &m.property {
                    self.walk_expression(p);
                }
            }
            Expression::Conditional(c) => {
                self.walk_expression(&c.test);
                self.walk_expression(&c.consequent);
                self.walk_expression(&c.alternate);
            }
            Expression::Function(f) => self.bind_function(f, name, false),
            Expression::Update(u) => match &*u.argument {
                Expression::Identifier(id) => {
                    if id.is_eval_or_arguments() {
                        self.report(DiagnosticKind::InvalidUpdateOperand, id.span);
                    }
                    self.walk_write(id, true);
                }
                e @ Expression::Member(_) => self.walk_expression(e),
                other => {
                    self.report(DiagnosticKind::InvalidUpdateOperand, other.span());
                    self.walk_expression(other);
                }
            },
            Expression::Sequence(s) => {
                for e in &s.expressions {
                    self.walk_expression(e);
                }
            }
        }
    }

    fn walk_assignment(&mut self, a: &AssignmentExpression) {
        let compound = a.operator != AssignmentOperator::Assign;
        let inferred = match &*a.left {
            Expression::Identifier(id) => {
                if id.is_eval_or_arguments() {
                    self.report(DiagnosticKind::InvalidAssignmentTarget, id.span);
                }
                self.walk_write(id, compound);
                Some(id.name.clone())
            }
            Expression::Member(m) => {
                self.walk_expression(&a.left);
                match &m.property {
                    MemberProperty::Identifier(p) => Some(p.name.clone()),
                    MemberProperty::Expression(_) => None,
                }
            }
            other => {
                self.report(DiagnosticKind::InvalidAssignmentTarget, other.span());
                self.walk_expression(other);
                None
            }
        };
        self.walk_expression_named(&a.right, inferred.as_deref());
    }

    fn walk_call(&mut self, c: &CallExpression) {
        match &*c.callee {
            Expression::Identifier(id) if self.flags.allow_eval && id.name == "eval" => {
                let resolution = self.resolve_name(&id.name);
                self.tree.set_resolution(id, resolution);
                if resolution == Resolution::Global {
                    self.mark_direct_eval(c);
                }
            }
            callee => self.walk_expression(callee),
        }
        for arg in &c.arguments {
            self.walk_expression(arg);
        }
    }

    /// Everything visible from a direct `eval` must live in an environment.
    fn mark_direct_eval(&mut self, call: &CallExpression) {
        self.tree.mark_direct_eval(call);
        self.tree.function_mut(self.function).has_direct_eval = true;
        let visible: Vec<BindingId> = self
            .tree
            .ancestors(self.scope)
            .filter(|s| self.tree.scope(*s).kind != ScopeKind::Global)
            .flat_map(|s| self.tree.scope(s).bindings().to_vec())
            .collect();
        for binding in visible {
            let binding = self.tree.binding_mut(binding);
            binding.captured = true;
            binding.eval_visible = true;
        }
    }
}
