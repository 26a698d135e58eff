// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

use criterion::{criterion_group, criterion_main, Criterion};
use spacey_compiler::ast::{AssignmentOperator, AstBuilder, BinaryOperator, Program};
use spacey_compiler::{CompileFlags, Compiler, SourceFile};
use std::hint::black_box;

/// `function fN(a, b) { var t = a + b; o.pN = t; return t; }` repeated.
fn many_functions(count: usize) -> (String, Program) {
    let source: String = (0..count)
        .map(|i| format!("function f{i}(a, b) {{ var t = a + b; o.p{i} = t; return t; }}\n"))
        .collect();
    let b = AstBuilder::new(&source);
    let body = (0..count)
        .map(|i| {
            let name = b.ident(&format!("f{i}"));
            let params = vec![b.ident("a"), b.ident("b")];
            let t = b.ident("t");
            let sum = b.binary(BinaryOperator::Add, b.id("a"), b.id("b"));
            let decl = b.var(vec![b.declarator(t, Some(sum))]);
            let target = b.member(b.id("o"), &format!("p{i}"));
            let store = b.expr_stmt(b.assign(AssignmentOperator::Assign, target, b.id("t")));
            let ret = b.ret(Some(b.id("t")));
            b.function_decl(name, params, vec![decl, store, ret])
        })
        .collect();
    let program = b.program(body);
    (source, program)
}

fn bench_compile(c: &mut Criterion) {
    let (source, program) = many_functions(200);
    let file = SourceFile::new("bench.js", source);

    c.bench_function("compile_200_functions", |b| {
        let compiler = Compiler::new(CompileFlags::non_strict());
        b.iter(|| {
            let outcome = compiler.compile(black_box(&program), file.clone());
            black_box(outcome.is_ok())
        });
    });

    c.bench_function("compile_200_functions_lazy", |b| {
        let compiler = Compiler::new(CompileFlags {
            lazy: true,
            ..CompileFlags::non_strict()
        });
        b.iter(|| {
            let outcome = compiler.compile(black_box(&program), file.clone());
            black_box(outcome.is_ok())
        });
    });
}

fn bench_lower(c: &mut Criterion) {
    let (_, program) = many_functions(200);

    c.bench_function("lower_unoptimized", |b| {
        let compiler = Compiler::new(CompileFlags {
            optimize: false,
            ..CompileFlags::non_strict()
        });
        b.iter(|| black_box(compiler.lower(black_box(&program)).has_errors()));
    });

    c.bench_function("lower_optimized", |b| {
        let compiler = Compiler::new(CompileFlags::non_strict());
        b.iter(|| black_box(compiler.lower(black_box(&program)).has_errors()));
    });
}

criterion_group!(benches, bench_compile, bench_lower);
criterion_main!(benches);
