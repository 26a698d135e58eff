// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Declaration and assignment legality checks reported through the public
//! compiler interface.

use spacey_compiler::ast::{
    AssignmentOperator, AstBuilder, ForInLeft, ForInit, Program, UpdateOperator, VariableKind,
};
use spacey_compiler::diagnostics::{DiagnosticCode, Span};
use spacey_compiler::{CompileFlags, Compiler, Diagnostic};

fn findings(program: &Program, flags: CompileFlags) -> Vec<Diagnostic> {
    Compiler::new(flags).lower(program).findings().to_vec()
}

fn with_code(diagnostics: &[Diagnostic], code: DiagnosticCode) -> Vec<Span> {
    diagnostics
        .iter()
        .filter(|d| d.code() == code)
        .map(|d| d.span)
        .collect()
}

#[test]
fn test_assignments_to_eval_and_arguments_are_invalid() {
    let source = "eval = 1; arguments += 2; eval++; --arguments;";
    let b = AstBuilder::new(source);
    let first_target = b.id("eval");
    let first_span = first_target.span();
    let first = b.expr_stmt(b.assign(AssignmentOperator::Assign, first_target, b.num("1")));
    let second_target = b.id("arguments");
    let second_span = second_target.span();
    let second = b.expr_stmt(b.assign(AssignmentOperator::AddAssign, second_target, b.num("2")));
    let third_target = b.id("eval");
    let third_span = third_target.span();
    let third = b.expr_stmt(b.update(UpdateOperator::Increment, false, third_target));
    let fourth_target = b.id("arguments");
    let fourth_span = fourth_target.span();
    let fourth = b.expr_stmt(b.update(UpdateOperator::Decrement, true, fourth_target));
    let program = b.program(vec![first, second, third, fourth]);

    for flags in [CompileFlags::non_strict(), CompileFlags::default()] {
        let diagnostics = findings(&program, flags);
        assert_eq!(
            with_code(&diagnostics, DiagnosticCode::InvalidLhs),
            vec![first_span, second_span, third_span, fourth_span]
        );
    }
}

#[test]
fn test_strict_reserved_declarations_are_reported_in_source_order() {
    let source = "function eval(arguments) { var eval; }";
    let b = AstBuilder::new(source);
    let name = b.ident("eval");
    let param = b.ident("arguments");
    let var_name = b.ident("eval");
    let spans = vec![name.span, param.span, var_name.span];
    let body = b.var(vec![b.declarator(var_name, None)]);
    let program = b.program(vec![b.function_decl(name, vec![param], vec![body])]);

    let strict = findings(&program, CompileFlags::default());
    assert_eq!(with_code(&strict, DiagnosticCode::CannotDeclareReservedName), spans);

    let sloppy = findings(&program, CompileFlags::non_strict());
    assert!(with_code(&sloppy, DiagnosticCode::CannotDeclareReservedName).is_empty());
}

#[test]
fn test_every_reserved_declaration_in_strict_function_is_reported() {
    let source = "function bar() { \"use strict\"; var eval; var eval; var arguments, eval; \
                  for (var eval = 0; false;) {} for (var arguments in o) {} try {} catch (eval) {} }";
    let b = AstBuilder::new(source);
    let bar = b.ident("bar");
    let directive = b.expr_stmt(b.string("use strict"));

    let first = b.ident("eval");
    let mut spans = vec![first.span];
    let first = b.var(vec![b.declarator(first, None)]);
    let again = b.ident("eval");
    spans.push(again.span);
    let again = b.var(vec![b.declarator(again, None)]);

    let arguments = b.ident("arguments");
    let eval = b.ident("eval");
    spans.extend([arguments.span, eval.span]);
    let list = b.var(vec![b.declarator(arguments, None), b.declarator(eval, None)]);

    let loop_var = b.ident("eval");
    spans.push(loop_var.span);
    let init = b.declaration(VariableKind::Var, vec![b.declarator(loop_var, Some(b.num("0")))]);
    let test = b.boolean(false);
    let for_loop = b.for_(Some(ForInit::Declaration(init)), Some(test), None, b.block(vec![]));

    let key = b.ident("arguments");
    spans.push(key.span);
    let left = b.declaration(VariableKind::Var, vec![b.declarator(key, None)]);
    let object = b.id("o");
    let for_in = b.for_in(ForInLeft::Declaration(left), object, b.block(vec![]));

    let protected = b.block_stmt(vec![]);
    let param = b.ident("eval");
    spans.push(param.span);
    let handler = b.catch(Some(param), b.block_stmt(vec![]));
    let try_stmt = b.try_(protected, Some(handler), None);

    let body = vec![directive, first, again, list, for_loop, for_in, try_stmt];
    let program = b.program(vec![b.function_decl(bar, vec![], body)]);

    let diagnostics = findings(&program, CompileFlags::non_strict());
    let reserved: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.code() == DiagnosticCode::CannotDeclareReservedName)
        .collect();
    assert_eq!(reserved.iter().map(|d| d.span).collect::<Vec<_>>(), spans);
    let messages: Vec<String> = reserved.iter().map(|d| d.message()).collect();
    assert_eq!(
        messages,
        vec![
            "cannot declare 'eval'",
            "cannot declare 'eval'",
            "cannot declare 'arguments'",
            "cannot declare 'eval'",
            "cannot declare 'eval'",
            "cannot declare 'arguments'",
            "cannot declare 'eval'",
        ]
    );
}

#[test]
fn test_reserved_declarations_are_allowed_in_sloppy_function() {
    let source = "function baz() { var eval; var arguments, eval; try {} catch (eval) {} }";
    let b = AstBuilder::new(source);
    let baz = b.ident("baz");
    let first = b.var(vec![b.declarator(b.ident("eval"), None)]);
    let arguments = b.declarator(b.ident("arguments"), None);
    let eval = b.declarator(b.ident("eval"), None);
    let list = b.var(vec![arguments, eval]);
    let protected = b.block_stmt(vec![]);
    let param = b.ident("eval");
    let handler = b.catch(Some(param), b.block_stmt(vec![]));
    let try_stmt = b.try_(protected, Some(handler), None);
    let program = b.program(vec![b.function_decl(baz, vec![], vec![first, list, try_stmt])]);

    let diagnostics = findings(&program, CompileFlags::non_strict());
    assert!(with_code(&diagnostics, DiagnosticCode::CannotDeclareReservedName).is_empty());
}

#[test]
fn test_use_strict_directive_enables_checks() {
    let source = "function f(eval) { \"use strict\"; }";
    let b = AstBuilder::new(source);
    let f = b.ident("f");
    let param = b.ident("eval");
    let span = param.span;
    let directive = b.expr_stmt(b.string("use strict"));
    let program = b.program(vec![b.function_decl(f, vec![param], vec![directive])]);

    let diagnostics = findings(&program, CompileFlags::non_strict());
    assert_eq!(
        with_code(&diagnostics, DiagnosticCode::CannotDeclareReservedName),
        vec![span]
    );
}

#[test]
fn test_undeclared_reads_warn_only_in_strict_code() {
    let source = "var x = y;";
    let b = AstBuilder::new(source);
    let x = b.ident("x");
    let program = b.program(vec![b.var(vec![b.declarator(x, Some(b.id("y")))])]);

    let strict = findings(&program, CompileFlags::default());
    let warnings = with_code(&strict, DiagnosticCode::UndeclaredVariable);
    assert_eq!(warnings, vec![Span::new(8, 9)]);
    assert!(strict.iter().all(|d| !d.is_error()));
    assert_eq!(
        strict[0].message(),
        "the variable \"y\" was not declared in function \"global\""
    );

    let sloppy = findings(&program, CompileFlags::non_strict());
    assert!(sloppy.is_empty());
}
