// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

use super::*;
use crate::ast::{
    AssignmentOperator, AstBuilder, BinaryOperator, UnaryOperator, UpdateOperator,
};
use crate::diagnostics::DiagnosticEngine;
use crate::ir::{dump_module, Constant};

fn lower(program: &Program, flags: &CompileFlags) -> IrModule {
    let mut engine = DiagnosticEngine::new();
    let tree = binder::bind(program, flags, &mut engine);
    generate(program, &tree, flags)
}

fn insts<'m>(module: &'m IrModule, name: &str) -> Vec<&'m InstKind> {
    let id = module.function_named(name).expect("function exists");
    let f = module.function(id).unwrap();
    f.placed_insts().map(|i| &f.inst(i).kind).collect()
}

#[test]
fn test_global_read_and_write() {
    let b = AstBuilder::new("var x = y;");
    let decl = b.var(vec![b.declarator(b.ident("x"), Some(b.id("y")))]);
    let program = b.program(vec![decl]);

    let module = lower(&program, &CompileFlags::default());
    let expected = "\
function global()
frame = [], globals = [x]
%BB0:
  %0 = AllocStackInst $?anon_0_ret
  %1 = StoreStackInst undefined : undefined, %0
  %2 = DeclareGlobalVarInst \"x\" : string
  %3 = TryLoadGlobalPropertyInst globalObject : object, \"y\" : string
  %4 = StorePropertyInst %3, globalObject : object, \"x\" : string
  %5 = LoadStackInst %0
  %6 = ReturnInst %5
function_end
";
    assert_eq!(dump_module(&module), expected);
}

#[test]
fn test_this_depends_on_strictness() {
    let b = AstBuilder::new("this;");
    let program = b.program(vec![b.expr_stmt(b.this())]);

    let sloppy = lower(&program, &CompileFlags::non_strict());
    assert!(dump_module(&sloppy).contains("LoadThisNSInst"));

    let strict = lower(&program, &CompileFlags::default());
    assert!(dump_module(&strict).contains("LoadParamInst %this"));
}

#[test]
fn test_parameters_are_stored_in_the_frame() {
    let b = AstBuilder::new("function foo(a) { return a; }");
    let foo = b.ident("foo");
    let a = b.ident("a");
    let ret = b.ret(Some(b.id("a")));
    let program = b.program(vec![b.function_decl(foo, vec![a], vec![ret])]);

    let module = lower(&program, &CompileFlags::default());
    let text = dump_module(&module);
    assert!(text.contains("%3 = CreateFunctionInst %foo()"));
    assert!(text.contains("StorePropertyInst %3 : closure, globalObject : object, \"foo\" : string"));
    assert!(text.contains("function foo(a)\nframe = [a]\n"));
    assert!(text.contains("  %2 = LoadParamInst %a\n  %3 = StoreFrameInst %2, [a]\n"));
    assert!(text.contains("  %4 = LoadFrameInst [a]\n  %5 = ReturnInst %4\n"));
}

#[test]
fn test_read_only_global_store_is_dropped() {
    let b = AstBuilder::new("NaN = true; typeof NaN;");
    let assign = b.assign(AssignmentOperator::Assign, b.id("NaN"), b.boolean(true));
    let first = b.expr_stmt(assign);
    let second = b.expr_stmt(b.unary(UnaryOperator::Typeof, b.id("NaN")));
    let program = b.program(vec![first, second]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = insts(&module, "global");
    assert!(!global.iter().any(|k| matches!(
        k,
        InstKind::StoreProperty { .. } | InstKind::TryStoreGlobalProperty { .. }
    )));
    assert!(dump_module(&module).contains("UnaryOperatorInst 'typeof', %"));
    assert!(dump_module(&module).contains(" : number\n"));
}

#[test]
fn test_if_else_blocks() {
    let b = AstBuilder::new("if (a) b(); else c();");
    let test = b.id("a");
    let then = b.expr_stmt(b.call(b.id("b"), vec![]));
    let otherwise = b.expr_stmt(b.call(b.id("c"), vec![]));
    let program = b.program(vec![b.if_(test, then, Some(otherwise))]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = module.function(FunctionId::GLOBAL).unwrap();
    assert_eq!(global.layout.len(), 4);
    assert!(matches!(
        global.block(global.entry()).terminator,
        Terminator::CondBranch { .. }
    ));
}

#[test]
fn test_finally_runs_on_every_exit() {
    let b = AstBuilder::new("function f() { try { return 1; } finally { g(); } }");
    let f = b.ident("f");
    let ret = b.ret(Some(b.num("1")));
    let body = b.block_stmt(vec![ret]);
    let call = b.expr_stmt(b.call(b.id("g"), vec![]));
    let finalizer = b.block_stmt(vec![call]);
    let stmt = b.try_(body, None, Some(finalizer));
    let program = b.program(vec![b.function_decl(f, vec![], vec![stmt])]);

    let mut module = lower(&program, &CompileFlags::non_strict());
    let id = module.function_named("f").unwrap();
    let function = module.function_mut(id).unwrap();
    function.remove_unreachable_blocks();
    let calls = function
        .placed_insts()
        .filter(|i| {
            matches!(&function.inst(*i).kind,
                InstKind::TryLoadGlobalProperty { name } if name == "g")
        })
        .count();
    // once before the return, once in the rethrowing handler
    assert_eq!(calls, 2);
    assert!(dump_module(&module).contains("// handler"));
}

#[test]
fn test_catch_stores_exception() {
    let b = AstBuilder::new("function f() { try { g(); } catch (e) { return e; } }");
    let f = b.ident("f");
    let call = b.expr_stmt(b.call(b.id("g"), vec![]));
    let body = b.block_stmt(vec![call]);
    let e = b.ident("e");
    let ret = b.ret(Some(b.id("e")));
    let clause = b.catch(Some(e), b.block_stmt(vec![ret]));
    let stmt = b.try_(body, Some(clause), None);
    let program = b.program(vec![b.function_decl(f, vec![], vec![stmt])]);

    let module = lower(&program, &CompileFlags::non_strict());
    let id = module.function_named("f").unwrap();
    let function = module.function(id).unwrap();
    let handler = function
        .layout
        .iter()
        .find_map(|b| function.block(*b).handler)
        .expect("protected block");
    let first = function.block(handler).insts[0];
    assert_eq!(function.inst(first).kind, InstKind::Catch);
}

#[test]
fn test_array_literal_buffers_leading_constants() {
    let b = AstBuilder::new("[1, 2, x, , ];");
    let one = b.num("1");
    let two = b.num("2");
    let x = b.id("x");
    let array = b.array(vec![Some(one), Some(two), Some(x), None]);
    let program = b.program(vec![b.expr_stmt(array)]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = insts(&module, "global");
    let alloc = global
        .iter()
        .find_map(|k| match k {
            InstKind::AllocArray {
                elements,
                size_hint,
            } => Some((elements.clone(), *size_hint)),
            _ => None,
        })
        .unwrap();
    assert_eq!(alloc, (vec![Constant::Number(1.0), Constant::Number(2.0)], 4));
    assert!(global.iter().any(|k| matches!(
        k,
        InstKind::StoreOwnProperty { key: Operand::Const(Constant::Number(n)), .. } if *n == 2.0
    )));
    assert!(global.iter().any(|k| matches!(
        k,
        InstKind::StoreProperty { key: Operand::Const(Constant::String(s)), .. } if s == "length"
    )));
}

#[test]
fn test_object_literal_buffers_static_prefix() {
    let b = AstBuilder::new("({a: 1, b: x, c: 2});");
    let a = b.prop(b.key("a"), b.num("1"));
    let bx = b.prop(b.key("b"), b.id("x"));
    let c = b.prop(b.key("c"), b.num("2"));
    let program = b.program(vec![b.expr_stmt(b.object(vec![a, bx, c]))]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = insts(&module, "global");
    assert!(global.iter().any(|k| matches!(
        k,
        InstKind::AllocObjectLiteral { keys, .. } if keys.len() == 1
    )));
    let stores = global
        .iter()
        .filter(|k| matches!(k, InstKind::StoreOwnProperty { .. }))
        .count();
    assert_eq!(stores, 2);
}

#[test]
fn test_duplicate_keys_disable_object_buffer() {
    let b = AstBuilder::new("({a: 1, a: 2});");
    let first = b.prop(b.key("a"), b.num("1"));
    let second = b.prop(b.key("a"), b.num("2"));
    let program = b.program(vec![b.expr_stmt(b.object(vec![first, second]))]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = insts(&module, "global");
    assert!(global
        .iter()
        .any(|k| matches!(k, InstKind::AllocObject { size_hint: 2 })));
    assert!(!global
        .iter()
        .any(|k| matches!(k, InstKind::AllocObjectLiteral { .. })));
}

#[test]
fn test_const_assignment_throws() {
    let b = AstBuilder::new("function f() { const k = 1; k = 2; }");
    let f = b.ident("f");
    let decl = b.const_(vec![b.declarator(b.ident("k"), Some(b.num("1")))]);
    let assign = b.expr_stmt(b.assign(AssignmentOperator::Assign, b.id("k"), b.num("2")));
    let program = b.program(vec![b.function_decl(f, vec![], vec![decl, assign])]);

    let module = lower(&program, &CompileFlags::default());
    let f = insts(&module, "f");
    assert_eq!(
        f.iter()
            .filter(|k| matches!(k, InstKind::StoreFrame { .. }))
            .count(),
        1
    );
    assert!(f
        .iter()
        .any(|k| matches!(k, InstKind::ThrowConstAssignment { name } if name == "k")));
}

#[test]
fn test_direct_eval() {
    let b = AstBuilder::new("function f() { var v; eval(\"v\"); }");
    let f = b.ident("f");
    let decl = b.var(vec![b.declarator(b.ident("v"), None)]);
    let call = b.expr_stmt(b.call(b.id("eval"), vec![b.string("v")]));
    let program = b.program(vec![b.function_decl(f, vec![], vec![decl, call])]);

    let flags = CompileFlags {
        allow_eval: true,
        ..CompileFlags::default()
    };
    let module = lower(&program, &flags);
    assert!(module.has_direct_eval);
    let id = module.function_named("f").unwrap();
    let function = module.function(id).unwrap();
    assert!(function.has_direct_eval);
    let v = module.variable(function.frame[0]);
    assert!(v.eval_visible && v.captured);
    assert!(insts(&module, "f")
        .iter()
        .any(|k| matches!(k, InstKind::DirectEval { strict: true, .. })));
}

#[test]
fn test_arrow_reads_saved_this() {
    let b = AstBuilder::new("function f() { return () => this; }");
    let f = b.ident("f");
    let arrow = b.arrow(vec![], b.this());
    let ret = b.ret(Some(arrow));
    let program = b.program(vec![b.function_decl(f, vec![], vec![ret])]);

    let module = lower(&program, &CompileFlags::non_strict());
    let outer = insts(&module, "f");
    assert!(outer.iter().any(|k| matches!(k, InstKind::LoadThisNS)));
    assert!(outer.iter().any(|k| matches!(k, InstKind::StoreFrame { .. })));

    let (arrow_id, arrow) = module
        .functions()
        .find(|(_, f)| f.kind == FunctionKind::Arrow)
        .unwrap();
    assert!(!arrow.uses_this);
    assert!(arrow
        .placed_insts()
        .any(|i| matches!(arrow.inst(i).kind, InstKind::LoadFrame { .. })));
    assert_eq!(arrow.parent, module.function_named("f"));
    assert_ne!(arrow_id, FunctionId::GLOBAL);
}

#[test]
fn test_postfix_update_returns_numeric_old_value() {
    let b = AstBuilder::new("var i = 0; i++;");
    let decl = b.var(vec![b.declarator(b.ident("i"), Some(b.num("0")))]);
    let update = b.expr_stmt(b.update(UpdateOperator::Increment, false, b.id("i")));
    let program = b.program(vec![decl, update]);

    let module = lower(&program, &CompileFlags::non_strict());
    let text = dump_module(&module);
    assert!(text.contains("UnaryOperatorInst 'numeric'"));
    assert!(text.contains("UnaryOperatorInst '++'"));
}

#[test]
fn test_logical_and_uses_a_join_block() {
    let b = AstBuilder::new("a && b;");
    let and = b.binary(BinaryOperator::LogicalAnd, b.id("a"), b.id("b"));
    let program = b.program(vec![b.expr_stmt(and)]);

    let module = lower(&program, &CompileFlags::non_strict());
    let global = module.function(FunctionId::GLOBAL).unwrap();
    assert_eq!(global.layout.len(), 3);
    assert!(dump_module(&module).contains("$?anon_1_logical"));
}

#[test]
fn test_arguments_object_created_at_entry() {
    let b = AstBuilder::new("function f() { return arguments; }");
    let f = b.ident("f");
    let ret = b.ret(Some(b.id("arguments")));
    let program = b.program(vec![b.function_decl(f, vec![], vec![ret])]);

    let module = lower(&program, &CompileFlags::non_strict());
    let id = module.function_named("f").unwrap();
    assert!(module.function(id).unwrap().uses_arguments);
    assert!(insts(&module, "f")
        .iter()
        .any(|k| matches!(k, InstKind::CreateArguments)));
}
