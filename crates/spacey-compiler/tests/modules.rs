// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

use spacey_compiler::ast::{AstBuilder, Program};
use spacey_compiler::ir::IrModule;
use spacey_compiler::{BytecodeModule, CompileFlags, Compiler, SourceFile};

const SOURCE: &str = "var a = \"hi\"; var o = {k: \"hi\", n: 2}; function f() { return [\"hi\", 2, null]; }";

fn program() -> Program {
    let b = AstBuilder::new(SOURCE);
    let a = b.ident("a");
    let a = b.var(vec![b.declarator(a, Some(b.string("hi")))]);
    let o = b.ident("o");
    let k = b.prop(b.key("k"), b.string("hi"));
    let n = b.prop(b.key("n"), b.num("2"));
    let o = b.var(vec![b.declarator(o, Some(b.object(vec![k, n])))]);
    let f = b.ident("f");
    let array = b.array(vec![Some(b.string("hi")), Some(b.num("2")), Some(b.null())]);
    let ret = b.ret(Some(array));
    let f = b.function_decl(f, vec![], vec![ret]);
    b.program(vec![a, o, f])
}

fn build(flags: CompileFlags) -> BytecodeModule {
    Compiler::new(flags)
        .compile(&program(), SourceFile::new("m.js", SOURCE))
        .unwrap()
        .into_result()
        .unwrap()
        .into_module()
}

#[test]
fn test_identical_strings_share_one_entry() {
    let module = build(CompileFlags::default());
    let matches = module.strings.iter().filter(|(_, s, _)| *s == "hi").count();
    assert_eq!(matches, 1);
    let id = module.strings.find("hi").unwrap();
    assert_eq!(module.strings.get(id), Some("hi"));
}

#[test]
fn test_building_twice_is_deterministic() {
    let first = build(CompileFlags::default());
    let second = build(CompileFlags::default());
    assert_eq!(first.disassemble(), second.disassemble());
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    let strings: Vec<String> = first.strings.iter().map(|(_, s, _)| s.to_string()).collect();
    let again: Vec<String> = second.strings.iter().map(|(_, s, _)| s.to_string()).collect();
    assert_eq!(strings, again);
}

#[test]
fn test_lazy_module_matches_eager_after_deferred_emission() {
    let eager = build(CompileFlags::default());
    let flags = CompileFlags {
        lazy: true,
        ..CompileFlags::default()
    };
    let mut lazy = Compiler::new(flags)
        .compile(&program(), SourceFile::new("m.js", SOURCE))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(lazy.deferred().len(), 1);
    assert!(lazy.module().disassemble().contains("deferred (function 1)"));
    assert_eq!(lazy.compile_all_deferred().unwrap(), 1);
    assert!(lazy.deferred().is_empty());
    assert_eq!(lazy.module().functions[1].code, eager.functions[1].code);
    assert!(lazy.module().strings.find("hi").is_some());
}

fn lowered(source: &str, build: impl FnOnce(&AstBuilder<'_>) -> Program) -> IrModule {
    let b = AstBuilder::new(source);
    let program = build(&b);
    Compiler::new(CompileFlags::default())
        .lower(&program)
        .into_value()
        .unwrap()
}

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
fn test_immediately_called_function_and_its_capture_disappear() {
    let source = "function main() { var v = 1; (function () { v; })(); } main();";
    let module = lowered(source, |b| {
        let main = b.ident("main");
        let v = b.var(vec![b.declarator(b.ident("v"), Some(b.num("1")))]);
        let read = b.expr_stmt(b.id("v"));
        let iife = b.function_expr(None, vec![], vec![read]);
        let call = b.expr_stmt(b.call(iife, vec![]));
        let decl = b.function_decl(main, vec![], vec![v, call]);
        let run = b.expr_stmt(b.call(b.id("main"), vec![]));
        b.program(vec![decl, run])
    });

    assert_eq!(module.function_count(), 2);
    assert!(module.function_named("main").is_some());
    assert!(frame_names(&module, "main").is_empty());
}

#[test]
fn test_escaping_closure_keeps_its_capture() {
    let source = "function main() { var v = 1; return function () { return v; }; } main();";
    let module = lowered(source, |b| {
        let main = b.ident("main");
        let v = b.var(vec![b.declarator(b.ident("v"), Some(b.num("1")))]);
        let inner_ret = b.ret(Some(b.id("v")));
        let inner = b.function_expr(None, vec![], vec![inner_ret]);
        let ret = b.ret(Some(inner));
        let decl = b.function_decl(main, vec![], vec![v, ret]);
        let run = b.expr_stmt(b.call(b.id("main"), vec![]));
        b.program(vec![decl, run])
    });

    assert_eq!(module.function_count(), 3);
    assert_eq!(frame_names(&module, "main"), vec!["v"]);
    let main = module.function_named("main").unwrap();
    let v = module.function(main).unwrap().frame[0];
    assert!(module.variable(v).captured);
}
