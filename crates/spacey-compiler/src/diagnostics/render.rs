// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Caret rendering.
//!
//! Column numbers in the header are 1-based byte columns. Caret placement
//! works in display cells: every code point takes one cell and tabs expand to
//! the next multiple of [`TAB_WIDTH`].

use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt;

use super::{Diagnostic, Severity, SourceFile};

/// Tab stops used when expanding source lines.
pub const TAB_WIDTH: usize = 8;

const ELLIPSIS: &str = "...";

/// Formats diagnostics against their source text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    max_width: usize,
    color: bool,
}

impl Renderer {
    /// Creates a renderer. A `max_width` of 0 disables truncation.
    pub fn new(max_width: usize) -> Self {
        Self {
            max_width,
            color: false,
        }
    }

    /// Enables or disables ANSI colors in `Display` output.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Renders one diagnostic.
    pub fn render(&self, source: &SourceFile, diagnostic: &Diagnostic) -> RenderedDiagnostic {
        let loc = source.line_col(diagnostic.span.start);
        let line_start = source.line_start(loc.line);
        let line = source.line_text(loc.line);

        let (cells, offsets) = expand_line(line);
        let start_byte = (diagnostic.span.start - line_start) as usize;
        let end_byte = (diagnostic.span.end.saturating_sub(line_start) as usize).min(line.len());

        let sc = cell_at(&offsets, start_byte);
        let ec = cell_at(&offsets, end_byte).max(sc + 1);

        let (source_line, caret_offset) = self.window(&cells, sc, ec);
        let mut caret_line = " ".repeat(caret_offset);
        caret_line.push('^');
        caret_line.push_str(&"~".repeat(ec - sc - 1));

        RenderedDiagnostic {
            severity: diagnostic.severity,
            message: diagnostic.message(),
            file: source.name().to_string(),
            line: loc.line,
            column: loc.column,
            source_line,
            caret_line,
            color: self.color,
        }
    }

    /// Picks the visible part of the expanded line. Returns the text and the
    /// cell where the caret starts inside it.
    fn window(&self, cells: &[char], sc: usize, ec: usize) -> (String, usize) {
        let total = cells.len();
        let w = self.max_width;
        if w <= 2 * ELLIPSIS.len() || total <= w {
            return (cells.iter().collect(), sc);
        }
        let avail = w - 2 * ELLIPSIS.len();
        if ec - sc > avail {
            // The span itself does not fit; show everything.
            return (cells.iter().collect(), sc);
        }

        let start = if sc + ec >= avail {
            (sc + ec - avail) / 2
        } else {
            0
        };
        let end = if start == 0 {
            w - ELLIPSIS.len()
        } else {
            start + avail
        }
        .min(total);

        let mut text = String::new();
        let mut caret = sc - start;
        if start > 0 {
            text.push_str(ELLIPSIS);
            caret += ELLIPSIS.len();
        }
        text.extend(&cells[start..end]);
        if end < total {
            text.push_str(ELLIPSIS);
        }
        (text, caret)
    }
}

/// Expands tabs and maps every byte offset of `line` to its display cell.
fn expand_line(line: &str) -> (Vec<char>, Vec<(usize, usize)>) {
    let mut cells = Vec::with_capacity(line.len());
    let mut offsets = Vec::with_capacity(line.len());
    for (byte, ch) in line.char_indices() {
        offsets.push((byte, cells.len()));
        if ch == '\t' {
            let pad = TAB_WIDTH - cells.len() % TAB_WIDTH;
            cells.extend(std::iter::repeat_n(' ', pad));
        } else {
            cells.push(ch);
        }
    }
    offsets.push((line.len(), cells.len()));
    (cells, offsets)
}

/// Display cell of the character containing `byte`.
fn cell_at(offsets: &[(usize, usize)], byte: usize) -> usize {
    match offsets.binary_search_by_key(&byte, |&(b, _)| b) {
        Ok(i) => offsets[i].1,
        Err(i) => offsets[i.saturating_sub(1)].1,
    }
}

/// A diagnostic laid out for a terminal or test harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDiagnostic {
    /// Error, warning or note
    pub severity: Severity,
    /// The message text
    pub message: String,
    /// Source file name
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based byte column
    pub column: u32,
    /// The (possibly truncated) source line
    pub source_line: String,
    /// Caret underline aligned with `source_line`
    pub caret_line: String,
    #[serde(skip)]
    color: bool,
}

impl RenderedDiagnostic {
    /// The `file:line:col: severity: message` header.
    pub fn header(&self) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.severity, self.message
        )
    }
}

impl fmt::Display for RenderedDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.color {
            writeln!(f, "{}", self.header())?;
            writeln!(f, "{}", self.source_line)?;
            return write!(f, "{}", self.caret_line);
        }

        let location = format!("{}:{}:{}:", self.file, self.line, self.column);
        let severity = format!("{}:", self.severity);
        write!(f, "{} ", location.bold())?;
        match self.severity {
            Severity::Error => write!(f, "{}", severity.red().bold())?,
            Severity::Warning => write!(f, "{}", severity.magenta().bold())?,
            Severity::Note => write!(f, "{}", severity.cyan().bold())?,
        }
        writeln!(f, " {}", self.message.bold())?;
        writeln!(f, "{}", self.source_line)?;
        write!(f, "{}", self.caret_line.green().bold())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Span};

    fn render_at(text: &str, needle: &str, len: u32, width: usize) -> RenderedDiagnostic {
        let file = SourceFile::new("t.js", text);
        let start = text.find(needle).unwrap() as u32;
        let diagnostic = Diagnostic::new(
            DiagnosticKind::Syntax("invalid numeric literal".into()),
            Span::new(start, start + len),
        );
        Renderer::new(width).render(&file, &diagnostic)
    }

    fn zeros(n: usize) -> String {
        "0 + ".repeat(n)
    }

    #[test]
    fn test_no_truncation_when_unlimited() {
        let text = format!("{}42invalid;", zeros(22));
        let r = render_at(&text, "42invalid", 9, 0);
        assert_eq!(r.source_line, text);
        assert_eq!(r.caret_line, format!("{}^~~~~~~~~", " ".repeat(88)));
    }

    #[test]
    fn test_truncates_prefix() {
        let text = format!("{}42invalid;", zeros(22));
        let r = render_at(&text, "42invalid", 9, 80);
        assert_eq!(r.column, 89);
        assert_eq!(r.source_line, format!("...{} 42invalid;", " 0 +".repeat(8)));
        assert_eq!(r.caret_line, format!("{}^~~~~~~~~", " ".repeat(36)));
    }

    #[test]
    fn test_truncates_suffix() {
        let text = format!("42invalid{}", " + 0".repeat(22) + ";");
        let r = render_at(&text, "42invalid", 9, 80);
        assert_eq!(r.column, 1);
        assert_eq!(r.source_line, format!("{}...", &text[..77]));
        assert_eq!(r.caret_line, "^~~~~~~~~");
    }

    #[test]
    fn test_truncates_both_sides() {
        let text = format!("{}42invalid{}", zeros(12), " + 0".repeat(10) + ";");
        let r = render_at(&text, "42invalid", 9, 80);
        assert_eq!(r.column, 49);
        assert!(r.source_line.starts_with("... 0 + 0"));
        assert!(r.source_line.ends_with("..."));
        assert_eq!(r.source_line.chars().count(), 80);
        assert_eq!(r.caret_line, format!("{}^~~~~~~~~", " ".repeat(36)));
    }

    #[test]
    fn test_span_wider_than_window_is_not_truncated() {
        let text = format!("42{}", "long".repeat(26));
        let r = render_at(&text, "42", text.len() as u32, 80);
        assert_eq!(r.source_line, text);
        assert_eq!(r.caret_line.chars().count(), text.len());
    }

    #[test]
    fn test_caret_counts_code_points() {
        let text = format!("\"😺\" + 42invalid{};", " + 0".repeat(22));
        let r = render_at(&text, "42invalid", 9, 80);
        assert_eq!(r.column, 10);
        assert_eq!(r.caret_line, format!("{}^~~~~~~~~", " ".repeat(6)));
        assert!(r.source_line.ends_with("..."));
        assert_eq!(r.source_line.chars().count(), 80);
    }

    #[test]
    fn test_wide_prefix_is_elided() {
        let text = format!("\"{}\" + 42invalid;", "😺".repeat(66));
        let r = render_at(&text, "42invalid", 9, 80);
        assert!(r.source_line.starts_with("...😺😺"));
        assert!(r.source_line.ends_with("\" + 42invalid;"));
        let caret = r.caret_line.find('^').unwrap();
        let under: String = r.source_line.chars().skip(caret).take(9).collect();
        assert_eq!(under, "42invalid");
    }

    #[test]
    fn test_tabs_expand_to_stops() {
        let text = format!("0 +  42\"\t\"{};", " + 0".repeat(22));
        let r = render_at(&text, "\"\t", 1, 80);
        assert_eq!(r.column, 8);
        assert!(r.source_line.starts_with("0 +  42\"        \" + 0"));
        assert_eq!(r.caret_line, format!("{}^", " ".repeat(7)));
    }

    #[test]
    fn test_display_layout() {
        let file = SourceFile::new("a.js", "eval = 1;");
        let diagnostic = Diagnostic::new(DiagnosticKind::InvalidAssignmentTarget, Span::new(0, 4));
        let r = Renderer::new(0).render(&file, &diagnostic);
        assert_eq!(
            r.to_string(),
            "a.js:1:1: error: invalid assignment left-hand side\neval = 1;\n^~~~"
        );
    }
}
