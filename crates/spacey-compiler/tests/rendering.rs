// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

use spacey_compiler::ast::{AssignmentOperator, AstBuilder};
use spacey_compiler::diagnostics::{RenderedDiagnostic, Severity};
use spacey_compiler::{CompileFlags, Compiler, Renderer, SourceFile};

/// Compiles `x = 1`-style source whose only problem is an assignment to
/// `eval`, rendering the diagnostic at `width`.
fn render_eval_assignment(source: &str, width: usize) -> RenderedDiagnostic {
    let b = AstBuilder::new(source);
    let target = b.id("eval");
    let assign = b.assign(AssignmentOperator::Assign, target, b.num("2"));
    let program = b.program(vec![b.expr_stmt(assign)]);
    let file = SourceFile::new("wide.js", source);
    let outcome = Compiler::new(CompileFlags::non_strict())
        .compile(&program, file.clone())
        .unwrap();
    let mut rendered = outcome.render(&file, &Renderer::new(width));
    assert_eq!(rendered.len(), 1);
    rendered.remove(0)
}

fn caret_column(rendered: &RenderedDiagnostic) -> usize {
    rendered.caret_line.find('^').expect("caret present")
}

fn text_at_caret(rendered: &RenderedDiagnostic) -> String {
    rendered
        .source_line
        .chars()
        .skip(caret_column(rendered))
        .take(4)
        .collect()
}

#[test]
fn test_long_lines_are_truncated_around_the_error() {
    let padding = "x".repeat(60);
    let source = format!("{padding}; eval = 2;");
    let rendered = render_eval_assignment(&source, 30);

    assert_eq!(rendered.severity, Severity::Error);
    assert_eq!(rendered.column, 63);
    assert!(rendered.source_line.starts_with("..."));
    assert!(rendered.source_line.chars().count() <= 30);
    assert_eq!(text_at_caret(&rendered), "eval");
    assert!(rendered.caret_line.ends_with("^~~~"));
}

#[test]
fn test_short_lines_are_left_alone() {
    let source = "eval = 2;";
    let rendered = render_eval_assignment(source, 30);
    assert_eq!(rendered.source_line, source);
    assert_eq!(rendered.caret_line, "^~~~");
    assert_eq!(
        rendered.header(),
        "wide.js:1:1: error: invalid assignment left-hand side"
    );
}

#[test]
fn test_caret_counts_characters_not_bytes() {
    let source = "\"ééé\"; eval = 2;";
    let b_offset = source.find("eval").unwrap();
    let rendered = render_eval_assignment(source, 0);

    assert_eq!(rendered.column as usize, b_offset + 1);
    assert_eq!(caret_column(&rendered), source[..b_offset].chars().count());
    assert_eq!(text_at_caret(&rendered), "eval");
}

#[test]
fn test_truncation_and_wide_characters_combine() {
    let padding = "é".repeat(50);
    let source = format!("\"{padding}\"; eval = 2;");
    let rendered = render_eval_assignment(&source, 24);

    assert!(rendered.source_line.starts_with("..."));
    assert_eq!(text_at_caret(&rendered), "eval");
}
