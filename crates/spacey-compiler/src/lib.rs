// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-compiler
//!
//! The front-end lowering pipeline of the Spacey JavaScript engine.
//!
//! ## Overview
//!
//! A parsed [`Program`] goes through four stages:
//! - [`binder`]: scope resolution and declaration legality checks
//! - [`irgen`]: lowering to a block-structured SSA-like [`ir`]
//! - [`optimizer`]: fixpoint passes over the IR
//! - [`bytecode`]: register allocation and emission into a compact module
//!
//! Problems in the program are collected by the [`diagnostics`] engine and
//! returned alongside the result, so one run reports every error it can.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_compiler::{CompileFlags, Compiler, SourceFile};
//!
//! let program = serde_json::from_str(&ast_json)?;
//! let source = SourceFile::new("main.js", text);
//! let outcome = Compiler::new(CompileFlags::default()).compile(&program, source)?;
//! for diagnostic in outcome.findings() {
//!     eprintln!("{}", diagnostic.message());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod binder;
pub mod bytecode;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ir;
pub mod irgen;
pub mod optimizer;

pub use ast::{ParseError, Program};
pub use bytecode::{BytecodeModule, CompiledModule};
pub use config::CompileFlags;
pub use diagnostics::{Diagnostic, DiagnosticEngine, DiagnosticKind, Outcome, Renderer, SourceFile};
pub use error::{Error, Result};
pub use ir::IrModule;

/// Runs the whole pipeline with one set of flags.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    flags: CompileFlags,
}

impl Compiler {
    /// Creates a compiler.
    pub fn new(flags: CompileFlags) -> Self {
        Self { flags }
    }

    /// The flags in use.
    pub fn flags(&self) -> &CompileFlags {
        &self.flags
    }

    /// Binds, lowers and (unless disabled) optimizes `program`.
    pub fn lower(&self, program: &Program) -> Outcome<IrModule> {
        let mut engine = DiagnosticEngine::new();
        let tree = binder::bind(program, &self.flags, &mut engine);
        let mut module = irgen::generate(program, &tree, &self.flags);
        if self.flags.optimize {
            let stats = optimizer::optimize(&mut module, &self.flags);
            tracing::debug!(
                functions = ?stats.functions,
                instructions = ?stats.instructions,
                "optimized"
            );
        }
        Outcome::success(module, engine.into_diagnostics())
    }

    /// Compiles `program` to bytecode.
    ///
    /// Functions with errors still get a body that throws the first one, so
    /// the returned outcome carries a module whenever the pipeline ran. The
    /// `Err` case is reserved for limits of the bytecode format.
    pub fn compile(&self, program: &Program, source: SourceFile) -> Result<Outcome<CompiledModule>> {
        let lowered = self.lower(program);
        let findings = lowered.findings().to_vec();
        let Some(module) = lowered.into_value() else {
            return Err(Error::InternalError("lowering produced no module".into()));
        };
        let compiled = CompiledModule::emit(module, source, self.flags.clone())?;
        tracing::debug!(
            errors = findings.iter().filter(|d| d.is_error()).count(),
            functions = compiled.module().functions.len(),
            "compiled"
        );
        Ok(Outcome::success(compiled, findings))
    }

    /// Compiles the output of an external parser. A parse failure becomes a
    /// fatal `SyntaxError` diagnostic.
    pub fn compile_parsed(
        &self,
        parsed: std::result::Result<Program, ParseError>,
        source: SourceFile,
    ) -> Result<Outcome<CompiledModule>> {
        match parsed {
            Ok(program) => self.compile(&program, source),
            Err(error) => {
                let fatal = Diagnostic::new(DiagnosticKind::Syntax(error.message), error.span);
                Ok(Outcome::failure(fatal, Vec::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::diagnostics::{DiagnosticCode, Span};

    #[test]
    fn test_compile_reports_and_emits() {
        let source = "function foo(arguments, eval) {} var x = 1;";
        let b = AstBuilder::new(source);
        let foo = b.ident("foo");
        let params = vec![b.ident("arguments"), b.ident("eval")];
        let foo = b.function_decl(foo, params, vec![]);
        let x = b.ident("x");
        let x = b.var(vec![b.declarator(x, Some(b.num("1")))]);
        let program = b.program(vec![foo, x]);

        let outcome = Compiler::new(CompileFlags::default())
            .compile(&program, SourceFile::new("t.js", source))
            .unwrap();
        assert_eq!(outcome.error_count(), 2);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.value().is_some());
        assert!(matches!(outcome.into_result(), Err(Error::CompilationFailed(2))));
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let parsed = Err(ParseError {
            message: "';' expected".into(),
            span: Span::new(3, 4),
        });
        let outcome = Compiler::default()
            .compile_parsed(parsed, SourceFile::new("t.js", "a b"))
            .unwrap();
        assert!(outcome.value().is_none());
        assert_eq!(outcome.fatal().unwrap().code(), DiagnosticCode::SyntaxError);
        assert_eq!(outcome.into_result().unwrap_err(), Error::SyntaxError("';' expected".into()));
    }

    #[test]
    fn test_unoptimized_keeps_more_code() {
        let source = "var x = 1 + 2;";
        let build = || {
            let b = AstBuilder::new(source);
            let x = b.ident("x");
            let init = b.binary(ast::BinaryOperator::Add, b.num("1"), b.num("2"));
            b.program(vec![b.var(vec![b.declarator(x, Some(init))])])
        };
        let count = |optimize: bool| {
            let flags = CompileFlags {
                optimize,
                ..CompileFlags::default()
            };
            let outcome = Compiler::new(flags).lower(&build());
            let module = outcome.into_value().unwrap();
            let global = module.function(ir::FunctionId::GLOBAL).unwrap();
            global.placed_insts().count()
        };
        assert!(count(false) > count(true));
    }
}
