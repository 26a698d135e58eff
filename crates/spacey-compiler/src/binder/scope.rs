// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The scope tree produced by the binder.
//!
//! Scopes, bindings and functions live in flat arenas and refer to each other
//! by index. Side tables map AST nodes to their scope, function or
//! resolution; nodes are identified by address (see [`node_key`]).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{CallExpression, Function, Identifier};
use crate::diagnostics::{Diagnostic, Span};

/// Identity of an AST node for side-table lookups.
pub fn node_key<T>(node: &T) -> usize {
    node as *const T as usize
}

/// Index of a scope in the [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Index of a binding in the [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

/// Index of a function in the [`ScopeTree`]. The program is index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionIndex(pub u32);

impl FunctionIndex {
    /// The program's global function.
    pub const GLOBAL: FunctionIndex = FunctionIndex(0);
}

/// Kind of lexical scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Program top level
    Global,
    /// Function body, including parameters
    Function,
    /// Block, loop head or switch body
    Block,
    /// Catch clause parameter and body
    Catch,
}

/// A lexical binding table.
#[derive(Debug, Clone)]
pub struct Scope {
    /// What introduced the scope
    pub kind: ScopeKind,
    /// Enclosing scope
    pub parent: Option<ScopeId>,
    /// Function the scope belongs to
    pub function: FunctionIndex,
    bindings: Vec<BindingId>,
    names: FxHashMap<String, BindingId>,
}

impl Scope {
    /// Bindings declared here, in declaration order.
    pub fn bindings(&self) -> &[BindingId] {
        &self.bindings
    }

    /// Looks up a name declared directly in this scope.
    pub fn lookup(&self, name: &str) -> Option<BindingId> {
        self.names.get(name).copied()
    }
}

/// Where a binding's value lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// Property of the global object
    GlobalProperty,
    /// Slot private to the owning function
    Local,
    /// Slot in an environment shared with nested functions
    Captured,
    /// Formal parameter not captured by nested functions
    Parameter,
}

/// What declared a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
    /// Function declaration
    Function,
    /// Formal parameter
    Parameter,
    /// Catch clause parameter
    CatchParameter,
    /// Name of a named function expression, bound inside it
    FunctionExpressionName,
    /// Implicit `arguments` object
    Arguments,
    /// Lexical `this` captured by arrow functions
    This,
}

/// A declared name.
#[derive(Debug, Clone)]
pub struct Binding {
    /// The declared name
    pub name: String,
    /// Owning scope
    pub scope: ScopeId,
    /// Declaring construct
    pub kind: DeclarationKind,
    /// Storage class, final once binding completes
    pub storage: StorageClass,
    /// Declared with `const`
    pub is_const: bool,
    /// Declared with `var` (function scoped)
    pub is_var_declared: bool,
    /// Introduced by a function declaration or function expression name
    pub is_function_name: bool,
    /// Referenced from a function other than its owner
    pub captured: bool,
    /// Visible to a direct `eval`
    pub eval_visible: bool,
    /// Declaration site
    pub span: Span,
}

/// Facts about one function (or the program).
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Declared or inferred name; `global` for the program
    pub name: String,
    /// Lexically enclosing function
    pub parent: Option<FunctionIndex>,
    /// The function's own scope
    pub scope: ScopeId,
    /// Source range
    pub span: Span,
    /// Parameter bindings in order; duplicates repeat the binding
    pub params: Vec<BindingId>,
    /// Strict mode code
    pub strict: bool,
    /// Arrow function
    pub is_arrow: bool,
    /// Reads `arguments` without declaring it
    pub uses_arguments: bool,
    /// Contains a direct `eval`
    pub has_direct_eval: bool,
    /// Implicit `arguments` binding
    pub arguments_binding: Option<BindingId>,
    /// Binding holding `this` for nested arrows. For arrows, the binding
    /// they read `this` from (`None` means the global object).
    pub this_binding: Option<BindingId>,
    /// Binding of a named function expression's own name
    pub callee_binding: Option<BindingId>,
    /// Errors reported inside this function
    pub error_count: usize,
    /// First error reported inside this function
    pub first_error: Option<Diagnostic>,
}

/// What an identifier reference resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A declared binding
    Binding(BindingId),
    /// An undeclared name, accessed on the global object
    Global,
}

/// Output of the binder.
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    bindings: Vec<Binding>,
    functions: Vec<FunctionInfo>,
    function_of: FxHashMap<usize, FunctionIndex>,
    resolutions: FxHashMap<usize, Resolution>,
    read_only_targets: FxHashSet<usize>,
    direct_evals: FxHashSet<usize>,
}

impl ScopeTree {
    // ========================================================================
    // Construction (binder only)
    // ========================================================================

    pub(super) fn add_scope(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        function: FunctionIndex,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent,
            function,
            bindings: Vec::new(),
            names: FxHashMap::default(),
        });
        id
    }

    pub(super) fn add_function(&mut self, info: FunctionInfo, key: usize) -> FunctionIndex {
        let id = FunctionIndex(self.functions.len() as u32);
        self.functions.push(info);
        self.function_of.insert(key, id);
        id
    }

    /// Adds a binding; `named` bindings become visible to lookups.
    pub(super) fn add_binding(&mut self, binding: Binding, named: bool) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        let scope = &mut self.scopes[binding.scope.0 as usize];
        scope.bindings.push(id);
        if named {
            scope.names.insert(binding.name.clone(), id);
        }
        self.bindings.push(binding);
        id
    }

    pub(super) fn binding_mut(&mut self, id: BindingId) -> &mut Binding {
        &mut self.bindings[id.0 as usize]
    }

    pub(super) fn function_mut(&mut self, id: FunctionIndex) -> &mut FunctionInfo {
        &mut self.functions[id.0 as usize]
    }

    pub(super) fn set_resolution(&mut self, ident: &Identifier, resolution: Resolution) {
        self.resolutions.insert(node_key(ident), resolution);
    }

    pub(super) fn mark_read_only_target(&mut self, ident: &Identifier) {
        self.read_only_targets.insert(node_key(ident));
    }

    pub(super) fn mark_direct_eval(&mut self, call: &CallExpression) {
        self.direct_evals.insert(node_key(call));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// A scope by index.
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// A binding by index.
    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0 as usize]
    }

    /// A function by index.
    pub fn function(&self, id: FunctionIndex) -> &FunctionInfo {
        &self.functions[id.0 as usize]
    }

    /// All functions, the program first.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionIndex, &FunctionInfo)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionIndex(i as u32), f))
    }

    /// Number of scopes.
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Number of bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// The function index of a function node.
    pub fn function_for(&self, function: &Function) -> Option<FunctionIndex> {
        self.function_of.get(&node_key(function)).copied()
    }

    /// What an identifier resolved to. Unvisited identifiers are global.
    pub fn resolve(&self, ident: &Identifier) -> Resolution {
        self.resolutions
            .get(&node_key(ident))
            .copied()
            .unwrap_or(Resolution::Global)
    }

    /// Whether an assignment to this identifier writes a read-only global in
    /// sloppy code and must be dropped.
    pub fn is_read_only_target(&self, ident: &Identifier) -> bool {
        self.read_only_targets.contains(&node_key(ident))
    }

    /// Whether a call is a direct `eval`.
    pub fn is_direct_eval(&self, call: &CallExpression) -> bool {
        self.direct_evals.contains(&node_key(call))
    }

    /// Walks from `scope` to the root.
    pub fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), |s| self.scope(*s).parent)
    }

    /// Non-global bindings owned by `function`, in scope creation order.
    pub fn frame_bindings(&self, function: FunctionIndex) -> Vec<BindingId> {
        self.scopes
            .iter()
            .filter(|s| s.function == function && s.kind != ScopeKind::Global)
            .flat_map(|s| s.bindings.iter().copied())
            .collect()
    }

    /// Names declared at the top level, in declaration order.
    pub fn global_names(&self) -> Vec<&str> {
        self.scopes
            .first()
            .map(|global| {
                global
                    .bindings
                    .iter()
                    .map(|b| self.binding(*b).name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Owning function of a binding.
    pub fn owner(&self, binding: BindingId) -> FunctionIndex {
        self.scope(self.binding(binding).scope).function
    }

    /// Total errors reported while binding.
    pub fn error_count(&self) -> usize {
        self.functions.iter().map(|f| f.error_count).sum()
    }
}
