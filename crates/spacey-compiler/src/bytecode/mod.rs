// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Register-based bytecode.
//!
//! [`CompiledModule::emit`] turns an [`IrModule`] into a [`BytecodeModule`]:
//! one function per live IR function, in IR id order with the global
//! function first, sharing module-wide string, literal and BigInt tables.
//! With the `lazy` flag only the global function is emitted up front and the
//! others are filled in by [`CompiledModule::compile_deferred`].

pub mod debug_info;
pub mod disasm;
mod emitter;
pub mod opcode;
pub mod regalloc;
pub mod tables;

pub use debug_info::{DebugInfo, DebugLocation, DebugSearchResult, FunctionDebugInfo};
pub use disasm::{disassemble, disassemble_code};
pub use emitter::MAX_REGISTERS;
pub use opcode::{OpCode, OperandType};
pub use tables::{BigIntTable, LiteralBuffers, StringTable};

use serde::{Deserialize, Serialize};

use crate::config::CompileFlags;
use crate::diagnostics::SourceFile;
use crate::error::{Error, Result};
use crate::ir::{FunctionId, IrModule};
use emitter::{emit_function, function_header, ModuleContext};

/// Fixed description of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHeader {
    /// Name; `global` for the top level
    pub name: String,
    /// String table id of the name
    pub name_id: u32,
    /// Declared parameters plus `this`
    pub param_count: u32,
    /// Registers the function needs
    pub frame_size: u32,
    /// Slots of the function's environment
    pub environment_size: u32,
    /// Strict mode code
    pub strict: bool,
}

/// A range of code covered by an exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered offset
    pub start: u32,
    /// One past the last covered offset
    pub end: u32,
    /// Offset of the handler
    pub target: u32,
}

/// One emitted function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BytecodeFunction {
    /// Header
    pub header: FunctionHeader,
    /// Instructions, or `None` while emission is deferred
    pub code: Option<Vec<u8>>,
    /// Exception table, innermost ranges first
    pub exceptions: Vec<ExceptionHandler>,
    /// `line:col:message` of the first error when the body only throws it
    pub compile_error: Option<String>,
}

impl BytecodeFunction {
    /// Whether the body has not been emitted yet.
    pub fn is_deferred(&self) -> bool {
        self.code.is_none()
    }
}

/// A serialized compilation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BytecodeModule {
    /// String table
    pub strings: StringTable,
    /// Array and object literal buffers
    pub literals: LiteralBuffers,
    /// BigInt constants
    pub bigints: BigIntTable,
    /// Functions by index; 0 is the global function
    pub functions: Vec<BytecodeFunction>,
    /// Debug metadata, when requested
    pub debug_info: Option<DebugInfo>,
}

impl BytecodeModule {
    /// The function at `index`.
    pub fn function(&self, index: u32) -> Option<&BytecodeFunction> {
        self.functions.get(index as usize)
    }

    /// Index of the first function called `name`.
    pub fn function_named(&self, name: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.header.name == name)
            .map(|i| i as u32)
    }

    /// Full textual listing.
    pub fn disassemble(&self) -> String {
        disassemble(self)
    }
}

/// An emitted module that can still emit its deferred functions.
#[derive(Debug)]
pub struct CompiledModule {
    module: BytecodeModule,
    ir: IrModule,
    source: SourceFile,
    flags: CompileFlags,
}

impl CompiledModule {
    /// Emits `ir`. Nested functions are left deferred when `flags.lazy` is set.
    pub fn emit(ir: IrModule, source: SourceFile, flags: CompileFlags) -> Result<Self> {
        let mut module = BytecodeModule::default();
        {
            let ctx = ModuleContext::new(&ir, &source, &flags);
            let ids = ctx.ordered_ids();
            for id in &ids {
                let header = function_header(&ctx, *id, &mut module)?;
                module.functions.push(BytecodeFunction {
                    header,
                    ..BytecodeFunction::default()
                });
            }
            for id in ids {
                if !flags.lazy || id == FunctionId::GLOBAL {
                    emit_function(&ctx, id, &mut module)?;
                }
            }
        }
        tracing::debug!(
            functions = module.functions.len(),
            strings = module.strings.len(),
            array_buffer = module.literals.array.len(),
            lazy = flags.lazy,
            "module emitted"
        );
        Ok(Self {
            module,
            ir,
            source,
            flags,
        })
    }

    /// The emitted module.
    pub fn module(&self) -> &BytecodeModule {
        &self.module
    }

    /// Consumes the wrapper, returning the emitted module.
    pub fn into_module(self) -> BytecodeModule {
        self.module
    }

    /// The IR the module was emitted from.
    pub fn ir(&self) -> &IrModule {
        &self.ir
    }

    /// Indices of the functions still waiting for emission.
    pub fn deferred(&self) -> Vec<u32> {
        self.module
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_deferred())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Bytecode index of an IR function.
    pub fn function_index(&self, id: FunctionId) -> Option<u32> {
        self.ir
            .function_ids()
            .iter()
            .position(|f| *f == id)
            .map(|i| i as u32)
    }

    /// Emits a deferred function, adding to the shared tables.
    pub fn compile_deferred(&mut self, index: u32) -> Result<()> {
        let function = self
            .module
            .function(index)
            .ok_or(Error::UnknownFunction(index))?;
        if !function.is_deferred() {
            return Err(Error::NotDeferred(index));
        }
        let ctx = ModuleContext::new(&self.ir, &self.source, &self.flags);
        let id = *ctx
            .ordered_ids()
            .get(index as usize)
            .ok_or(Error::UnknownFunction(index))?;
        tracing::debug!(index, "compiling deferred function");
        emit_function(&ctx, id, &mut self.module)
    }

    /// Emits every deferred function. Returns how many were emitted.
    pub fn compile_all_deferred(&mut self) -> Result<usize> {
        let pending = self.deferred();
        for index in &pending {
            self.compile_deferred(*index)?;
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::opcode::decode;
    use super::*;
    use crate::ast::{AstBuilder, Program};
    use crate::optimizer::optimize;
    use crate::optimizer::test_support::lower;

    fn compile(program: &Program, source: &str, flags: CompileFlags) -> Result<CompiledModule> {
        let mut ir = lower(program, &flags);
        if flags.optimize {
            optimize(&mut ir, &flags);
        }
        CompiledModule::emit(ir, SourceFile::new("test.js", source), flags)
    }

    fn listing(compiled: &CompiledModule, name: &str) -> String {
        let module = compiled.module();
        let index = module.function_named(name).expect("function exists");
        disassemble_code(module.functions[index as usize].code.as_deref().expect("emitted"))
    }

    fn return_this(source: &str, strict: bool) -> CompiledModule {
        let b = AstBuilder::new(source);
        let name = b.ident("fooNS");
        let ret = b.ret(Some(b.this()));
        let program = b.program(vec![b.function_decl(name, vec![], vec![ret])]);
        let flags = CompileFlags {
            strict,
            ..CompileFlags::default()
        };
        compile(&program, source, flags).unwrap()
    }

    #[test]
    fn test_sloppy_this() {
        let compiled = return_this("function fooNS() { return this; }", false);
        assert_eq!(listing(&compiled, "fooNS"), "[@ 0] LoadThisNS 0<Reg8>\n[@ 2] Ret 0<Reg8>\n");
        let index = compiled.module().function_named("fooNS").unwrap();
        let header = &compiled.module().functions[index as usize].header;
        assert_eq!((header.param_count, header.frame_size, header.environment_size), (1, 1, 0));
        assert!(!header.strict);
    }

    #[test]
    fn test_strict_this() {
        let compiled = return_this("function fooNS() { return this; }", true);
        assert_eq!(
            listing(&compiled, "fooNS"),
            "[@ 0] LoadParam 0<Reg8>, 0<UInt8>\n[@ 3] Ret 0<Reg8>\n"
        );
    }

    #[test]
    fn test_return_constant() {
        let source = "function f() { return 42; }";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let ret = b.ret(Some(b.num("42")));
        let program = b.program(vec![b.function_decl(f, vec![], vec![ret])]);
        let compiled = compile(&program, source, CompileFlags::default()).unwrap();
        assert_eq!(
            listing(&compiled, "f"),
            "[@ 0] LoadConstUInt8 0<Reg8>, 42<UInt8>\n[@ 3] Ret 0<Reg8>\n"
        );
    }

    #[test]
    fn test_array_buffers_are_shared() {
        let source = "var x = [true, false, 0, 1]; var y = [1, 2, 3]; var z = [1, 2, 3];";
        let b = AstBuilder::new(source);
        let x = b.ident("x");
        let xs = b.array(vec![
            Some(b.boolean(true)),
            Some(b.boolean(false)),
            Some(b.num("0")),
            Some(b.num("1")),
        ]);
        let x = b.var(vec![b.declarator(x, Some(xs))]);
        let y = b.ident("y");
        let ys = b.array(vec![Some(b.num("1")), Some(b.num("2")), Some(b.num("3"))]);
        let y = b.var(vec![b.declarator(y, Some(ys))]);
        let z = b.ident("z");
        let zs = b.array(vec![Some(b.num("1")), Some(b.num("2")), Some(b.num("3"))]);
        let z = b.var(vec![b.declarator(z, Some(zs))]);
        let program = b.program(vec![x, y, z]);

        let compiled = compile(&program, source, CompileFlags::default()).unwrap();
        let text = listing(&compiled, "global");
        assert!(text.contains("4<UInt16>, 4<UInt16>, 0<UInt16>"));
        assert_eq!(text.matches("3<UInt16>, 3<UInt16>, 11<UInt16>").count(), 2);
    }

    #[test]
    fn test_property_cache_indices_increase() {
        let source = "function f(o) { o.x = 1; o.y = 2; }";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let o = b.ident("o");
        let x = b.expr_stmt(b.assign(
            crate::ast::AssignmentOperator::Assign,
            b.member(b.id("o"), "x"),
            b.num("1"),
        ));
        let y = b.expr_stmt(b.assign(
            crate::ast::AssignmentOperator::Assign,
            b.member(b.id("o"), "y"),
            b.num("2"),
        ));
        let program = b.program(vec![b.function_decl(f, vec![o], vec![x, y])]);

        let compiled = compile(&program, source, CompileFlags::default()).unwrap();
        let text = listing(&compiled, "f");
        let caches: Vec<&str> = text
            .lines()
            .filter(|l| l.contains("PutById"))
            .filter_map(|l| l.split(", ").nth(2))
            .collect();
        assert_eq!(caches, vec!["1<UInt8>", "2<UInt8>"]);
    }

    #[test]
    fn test_captured_variable_uses_environment() {
        let source = "function outer() { var v = 1; function inner() { return v; } return inner; }";
        let b = AstBuilder::new(source);
        let outer = b.ident("outer");
        let v = b.var(vec![b.declarator(b.ident("v"), Some(b.num("1")))]);
        let inner_name = b.ident("inner");
        let inner_ret = b.ret(Some(b.id("v")));
        let inner = b.function_decl(inner_name, vec![], vec![inner_ret]);
        let ret = b.ret(Some(b.id("inner")));
        let program = b.program(vec![b.function_decl(outer, vec![], vec![v, inner, ret])]);

        let compiled = compile(&program, source, CompileFlags::default()).unwrap();
        assert_eq!(
            listing(&compiled, "inner"),
            "[@ 0] GetEnvironment 0<Reg8>, 0<UInt8>\n\
             [@ 3] LoadFromEnvironment 0<Reg8>, 0<Reg8>, 0<UInt8>\n\
             [@ 7] Ret 0<Reg8>\n"
        );
        let outer_code = listing(&compiled, "outer");
        assert!(outer_code.starts_with("[@ 0] CreateEnvironment"));
        assert!(outer_code.contains("StoreToEnvironment"));
        assert!(outer_code.contains("CreateClosure"));
        let index = compiled.module().function_named("outer").unwrap();
        assert_eq!(compiled.module().functions[index as usize].header.environment_size, 1);
    }

    #[test]
    fn test_long_jumps_are_relaxed() {
        let stores: Vec<String> = (0..20).map(|i| format!("a.p{i} = 1;")).collect();
        let source = format!("function f(a) {{ while (a) {{ {} }} }}", stores.join(" "));
        let b = AstBuilder::new(&source);
        let f = b.ident("f");
        let a = b.ident("a");
        let test = b.id("a");
        let body: Vec<_> = (0..20)
            .map(|i| {
                let target = b.member(b.id("a"), &format!("p{i}"));
                b.expr_stmt(b.assign(crate::ast::AssignmentOperator::Assign, target, b.num("1")))
            })
            .collect();
        let body = b.block(body);
        let program = b.program(vec![b.function_decl(f, vec![a], vec![b.while_(test, body)])]);

        let compiled = compile(&program, &source, CompileFlags::default()).unwrap();
        let text = listing(&compiled, "f");
        assert!(text.contains("JmpLong") || text.contains("JmpTrueLong") || text.contains("JmpFalseLong"));
    }

    #[test]
    fn test_short_loops_use_short_jumps() {
        let source = "function f(a) { while (a) { a.p = 1; } }";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let a = b.ident("a");
        let test = b.id("a");
        let store = b.expr_stmt(b.assign(
            crate::ast::AssignmentOperator::Assign,
            b.member(b.id("a"), "p"),
            b.num("1"),
        ));
        let body = b.block(vec![store]);
        let program = b.program(vec![b.function_decl(f, vec![a], vec![b.while_(test, body)])]);

        let compiled = compile(&program, source, CompileFlags::default()).unwrap();
        let text = listing(&compiled, "f");
        assert!(text.contains("Jmp"));
        assert!(!text.contains("Long"));
    }

    #[test]
    fn test_too_many_registers() {
        let zeros = vec!["0"; 300].join(", ");
        let source = format!("f({zeros});");
        let b = AstBuilder::new(&source);
        let callee = b.id("f");
        let args = (0..300).map(|_| b.num("0")).collect();
        let program = b.program(vec![b.expr_stmt(b.call(callee, args))]);

        let err = compile(&program, &source, CompileFlags::non_strict()).unwrap_err();
        assert!(matches!(err, Error::TooManyRegisters { limit: 256, .. }));
    }

    #[test]
    fn test_function_with_error_throws_on_call() {
        let source = "function f() { return 1; }\nfunction g() {\n  break;\n}";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let ret = b.ret(Some(b.num("1")));
        let f = b.function_decl(f, vec![], vec![ret]);
        let g = b.ident("g");
        let brk = b.brk(None);
        let g = b.function_decl(g, vec![], vec![brk]);
        let program = b.program(vec![f, g]);

        let flags = CompileFlags {
            lazy: true,
            ..CompileFlags::default()
        };
        let mut compiled = compile(&program, source, flags).unwrap();
        let g = compiled.module().function_named("g").unwrap();
        assert!(compiled.module().functions[g as usize].is_deferred());
        compiled.compile_deferred(g).unwrap();

        let function = &compiled.module().functions[g as usize];
        assert_eq!(
            function.compile_error.as_deref(),
            Some("3:3:'break' not within a loop or a switch")
        );
        let code = function.code.as_deref().unwrap();
        let (op, operands, _) = decode(code, 0).unwrap();
        assert_eq!(op, OpCode::ThrowSyntaxError);
        let id = operands[0].as_int() as u32;
        assert_eq!(
            compiled.module().strings.get(id),
            Some("3:3:'break' not within a loop or a switch")
        );
    }

    #[test]
    fn test_deferred_emission_reuses_tables() {
        let source = "function f() { return \"hello\"; }";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let ret = b.ret(Some(b.string("hello")));
        let program = b.program(vec![b.function_decl(f, vec![], vec![ret])]);

        let flags = CompileFlags {
            lazy: true,
            ..CompileFlags::default()
        };
        let mut compiled = compile(&program, source, flags).unwrap();
        let f = compiled.module().function_named("f").unwrap();
        assert_eq!(compiled.deferred(), vec![f]);
        assert!(compiled.module().strings.find("hello").is_none());
        let strings_before = compiled.module().strings.len();

        compiled.compile_deferred(f).unwrap();
        assert!(compiled.deferred().is_empty());
        assert_eq!(compiled.module().strings.len(), strings_before + 1);
        assert!(compiled.module().strings.find("hello").is_some());

        assert_eq!(compiled.compile_deferred(f), Err(Error::NotDeferred(f)));
        assert_eq!(compiled.compile_deferred(99), Err(Error::UnknownFunction(99)));
    }

    #[test]
    fn test_lazy_and_eager_bodies_match() {
        let source = "function f(a) { return a + 1; }";
        let build = || {
            let b = AstBuilder::new(source);
            let f = b.ident("f");
            let a = b.ident("a");
            let ret = b.ret(Some(b.binary(crate::ast::BinaryOperator::Add, b.id("a"), b.num("1"))));
            b.program(vec![b.function_decl(f, vec![a], vec![ret])])
        };
        let eager = compile(&build(), source, CompileFlags::default()).unwrap();
        let lazy_flags = CompileFlags {
            lazy: true,
            ..CompileFlags::default()
        };
        let mut lazy = compile(&build(), source, lazy_flags).unwrap();
        assert_eq!(lazy.compile_all_deferred().unwrap(), 1);
        assert_eq!(listing(&eager, "f"), listing(&lazy, "f"));
    }

    #[test]
    fn test_exception_table_targets_catch() {
        let source = "try { f(); } catch (e) { }";
        let b = AstBuilder::new(source);
        let call = b.expr_stmt(b.call(b.id("f"), vec![]));
        let block = b.block_stmt(vec![call]);
        let e = b.ident("e");
        let handler = b.catch(Some(e), b.block_stmt(vec![]));
        let program = b.program(vec![b.try_(block, Some(handler), None)]);

        let compiled = compile(&program, source, CompileFlags::non_strict()).unwrap();
        let global = &compiled.module().functions[0];
        assert!(!global.exceptions.is_empty());
        let code = global.code.as_deref().unwrap();
        for handler in &global.exceptions {
            assert!(handler.start < handler.end);
            let (op, _, _) = decode(code, handler.target as usize).unwrap();
            assert_eq!(op, OpCode::Catch);
        }
    }

    #[test]
    fn test_debug_info() {
        let source = "function f(a) {\n  return a;\n}";
        let b = AstBuilder::new(source);
        let f = b.ident("f");
        let a = b.ident("a");
        let ret = b.ret(Some(b.id("a")));
        let program = b.program(vec![b.function_decl(f, vec![a], vec![ret])]);

        let flags = CompileFlags {
            debug_info: true,
            ..CompileFlags::default()
        };
        let compiled = compile(&program, source, flags).unwrap();
        let index = compiled.module().function_named("f").unwrap();
        let info = compiled.module().debug_info.as_ref().unwrap();
        let found = info.address_for_location(2, None).unwrap();
        assert_eq!(found.function, index);
        assert_eq!(info.location_for_address(index, found.address).unwrap().line, 2);
        assert_eq!(info.function(index).unwrap().registers, vec![(0, "a".to_string())]);
        assert!(info.variable_names(index).is_empty());

        let plain = compile(&program, source, CompileFlags::default()).unwrap();
        assert!(plain.module().debug_info.is_none());
    }

    #[test]
    fn test_module_serializes() {
        let compiled = return_this("function fooNS() { return this; }", false);
        let json = serde_json::to_string(compiled.module()).unwrap();
        let back: BytecodeModule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.functions, compiled.module().functions);
        assert_eq!(back.disassemble(), compiled.module().disassemble());
    }
}
