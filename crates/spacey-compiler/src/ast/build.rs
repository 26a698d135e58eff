// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Span-locating AST constructors.
//!
//! [`AstBuilder`] builds trees for a known source text and finds each node's
//! span by searching the text. Leaves (identifiers, literals, `this`, jump
//! keywords) are located by a forward search from a cursor, so they must be
//! constructed in source order, which is the natural evaluation order of
//! nested constructor calls. Composite nodes take the union of their
//! children's spans, extended to their leading keyword and closing bracket.

use std::cell::Cell;

use unicode_xid::UnicodeXID;

use super::*;

/// Builds AST nodes whose spans point into `source`.
#[derive(Debug)]
pub struct AstBuilder<'s> {
    source: &'s str,
    cursor: Cell<usize>,
}

fn is_word_char(c: char) -> bool {
    c == '$' || c.is_xid_continue()
}

fn span_of(start: usize, len: usize) -> Span {
    Span::new(start as u32, (start + len) as u32)
}

/// Parses a numeric literal lexeme.
fn parse_number(text: &str) -> f64 {
    let clean = text.replace('_', "");
    let radix = match clean.get(..2) {
        Some("0x") | Some("0X") => 16,
        Some("0o") | Some("0O") => 8,
        Some("0b") | Some("0B") => 2,
        _ => return clean.parse().unwrap_or(f64::NAN),
    };
    u64::from_str_radix(&clean[2..], radix)
        .map(|n| n as f64)
        .unwrap_or(f64::NAN)
}

impl<'s> AstBuilder<'s> {
    /// Creates a builder for `source`.
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            cursor: Cell::new(0),
        }
    }

    /// The source text nodes are located in.
    pub fn source(&self) -> &'s str {
        self.source
    }

    // ========================================================================
    // Searching
    // ========================================================================

    fn is_boundary(&self, start: usize, len: usize) -> bool {
        let before = self.source[..start].chars().next_back();
        let after = self.source[start + len..].chars().next();
        let word_edges =
            !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);
        let quoted = matches!((before, after), (Some('"'), Some('"')) | (Some('\''), Some('\'')));
        word_edges && !quoted
    }

    fn locate(&self, text: &str, whole_word: bool) -> Span {
        let mut from = self.cursor.get();
        while let Some(found) = self.source[from..].find(text) {
            let start = from + found;
            if !whole_word || self.is_boundary(start, text.len()) {
                self.cursor.set(start + text.len());
                return span_of(start, text.len());
            }
            from = start + text.len().max(1);
        }
        tracing::warn!(text, cursor = self.cursor.get(), "AstBuilder: text not found");
        Span::DUMMY
    }

    /// Finds the next whole-word occurrence of `word` and moves past it.
    pub fn word(&self, word: &str) -> Span {
        self.locate(word, true)
    }

    /// Finds the next occurrence of `text` and moves past it.
    pub fn text(&self, text: &str) -> Span {
        self.locate(text, false)
    }

    /// Finds the last occurrence of `text` ending before `anchor`, or searches
    /// forward when there is no anchor.
    fn before(&self, text: &str, anchor: Span, whole_word: bool) -> Span {
        if anchor == Span::DUMMY {
            return self.locate(text, whole_word);
        }
        let mut end = anchor.start as usize;
        while let Some(start) = self.source[..end].rfind(text) {
            if !whole_word || self.is_boundary(start, text.len()) {
                return span_of(start, text.len());
            }
            end = start;
        }
        anchor
    }

    fn keyword_before(&self, word: &str, anchor: Span) -> Span {
        self.before(word, anchor, true)
    }

    fn first_span(spans: impl IntoIterator<Item = Span>) -> Span {
        spans
            .into_iter()
            .find(|s| *s != Span::DUMMY)
            .unwrap_or(Span::DUMMY)
    }

    fn union(spans: impl IntoIterator<Item = Span>) -> Span {
        spans.into_iter().fold(Span::DUMMY, Span::to)
    }

    // ========================================================================
    // Leaves
    // ========================================================================

    /// An identifier.
    pub fn ident(&self, name: &str) -> Identifier {
        Identifier {
            name: name.to_string(),
            span: self.word(name),
        }
    }

    /// An identifier reference expression.
    pub fn id(&self, name: &str) -> Expression {
        Expression::Identifier(self.ident(name))
    }

    fn literal(value: Literal, span: Span) -> Expression {
        Expression::Literal(LiteralExpression { value, span })
    }

    /// A numeric literal written as `text` in the source.
    pub fn num(&self, text: &str) -> Expression {
        Self::literal(Literal::Number(parse_number(text)), self.word(text))
    }

    /// A string literal with contents `value`, single or double quoted.
    pub fn string(&self, value: &str) -> Expression {
        let from = self.cursor.get();
        let double = format!("\"{value}\"");
        let single = format!("'{value}'");
        let rest = &self.source[from..];
        let quoted = match (rest.find(&double), rest.find(&single)) {
            (Some(d), Some(s)) if s < d => single,
            (None, Some(_)) => single,
            _ => double,
        };
        Self::literal(Literal::String(value.to_string()), self.text(&quoted))
    }

    /// A `true` or `false` literal.
    pub fn boolean(&self, value: bool) -> Expression {
        let span = self.word(if value { "true" } else { "false" });
        Self::literal(Literal::Boolean(value), span)
    }

    /// The `null` literal.
    pub fn null(&self) -> Expression {
        Self::literal(Literal::Null, self.word("null"))
    }

    /// A BigInt literal; `digits` excludes the `n` suffix.
    pub fn bigint(&self, digits: &str) -> Expression {
        let span = self.text(&format!("{digits}n"));
        Self::literal(Literal::BigInt(digits.to_string()), span)
    }

    /// A regular expression literal.
    pub fn regexp(&self, pattern: &str, flags: &str) -> Expression {
        let span = self.text(&format!("/{pattern}/{flags}"));
        Self::literal(
            Literal::RegExp {
                pattern: pattern.to_string(),
                flags: flags.to_string(),
            },
            span,
        )
    }

    /// The `this` keyword.
    pub fn this(&self) -> Expression {
        Expression::This(self.word("this"))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// A binary or logical expression.
    pub fn binary(&self, operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
        let span = left.span().to(right.span());
        Expression::Binary(BinaryExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            span,
        })
    }

    /// A unary expression.
    pub fn unary(&self, operator: UnaryOperator, argument: Expression) -> Expression {
        let anchor = argument.span();
        let start = match operator {
            UnaryOperator::Minus => self.before("-", anchor, false),
            UnaryOperator::Plus => self.before("+", anchor, false),
            UnaryOperator::LogicalNot => self.before("!", anchor, false),
            UnaryOperator::BitwiseNot => self.before("~", anchor, false),
            UnaryOperator::Typeof => self.keyword_before("typeof", anchor),
            UnaryOperator::Void => self.keyword_before("void", anchor),
            UnaryOperator::Delete => self.keyword_before("delete", anchor),
        };
        Expression::Unary(UnaryExpression {
            operator,
            span: start.to(anchor),
            argument: Box::new(argument),
        })
    }

    /// An assignment expression.
    pub fn assign(&self, operator: AssignmentOperator, left: Expression, right: Expression) -> Expression {
        let span = left.span().to(right.span());
        Expression::Assignment(AssignmentExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            span,
        })
    }

    /// A prefix or postfix `++`/`--`.
    pub fn update(&self, operator: UpdateOperator, prefix: bool, argument: Expression) -> Expression {
        let text = match operator {
            UpdateOperator::Increment => "++",
            UpdateOperator::Decrement => "--",
        };
        let anchor = argument.span();
        let op = if prefix {
            self.before(text, anchor, false)
        } else {
            self.text(text)
        };
        Expression::Update(UpdateExpression {
            operator,
            prefix,
            span: op.to(anchor),
            argument: Box::new(argument),
        })
    }

    /// A call expression.
    pub fn call(&self, callee: Expression, arguments: Vec<Expression>) -> Expression {
        let close = self.text(")");
        let span = callee.span().to(close);
        Expression::Call(CallExpression {
            callee: Box::new(callee),
            arguments,
            span,
        })
    }

    /// A `new` expression.
    pub fn new_expr(&self, callee: Expression, arguments: Vec<Expression>) -> Expression {
        let start = self.keyword_before("new", callee.span());
        let close = self.text(")");
        Expression::New(CallExpression {
            span: start.to(close),
            callee: Box::new(callee),
            arguments,
        })
    }

    /// A static member access `object.name`.
    pub fn member(&self, object: Expression, name: &str) -> Expression {
        let property = self.ident(name);
        let span = object.span().to(property.span);
        Expression::Member(MemberExpression {
            object: Box::new(object),
            property: MemberProperty::Identifier(property),
            span,
        })
    }

    /// A computed member access `object[property]`.
    pub fn index(&self, object: Expression, property: Expression) -> Expression {
        let close = self.text("]");
        let span = object.span().to(close);
        Expression::Member(MemberExpression {
            object: Box::new(object),
            property: MemberProperty::Expression(Box::new(property)),
            span,
        })
    }

    /// A conditional expression.
    pub fn cond(&self, test: Expression, consequent: Expression, alternate: Expression) -> Expression {
        let span = test.span().to(alternate.span());
        Expression::Conditional(ConditionalExpression {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            span,
        })
    }

    /// An array literal; `None` elements are holes.
    pub fn array(&self, elements: Vec<Option<Expression>>) -> Expression {
        let first = Self::first_span(elements.iter().flatten().map(Expression::span));
        let open = self.before("[", first, false);
        let close = self.text("]");
        Expression::Array(ArrayExpression {
            elements,
            span: open.to(close),
        })
    }

    /// An object literal.
    pub fn object(&self, properties: Vec<Property>) -> Expression {
        let first = Self::first_span(properties.iter().map(|p| p.span));
        let open = self.before("{", first, false);
        let close = self.text("}");
        Expression::Object(ObjectExpression {
            properties,
            span: open.to(close),
        })
    }

    /// A `key: value` property.
    pub fn prop(&self, key: PropertyKey, value: Expression) -> Property {
        let key_span = match &key {
            PropertyKey::Identifier(id) => id.span,
            PropertyKey::Literal(lit) => lit.span,
            PropertyKey::Computed(expr) => expr.span(),
        };
        Property {
            span: key_span.to(value.span()),
            key,
            value,
            shorthand: false,
        }
    }

    /// A shorthand `{ name }` property.
    pub fn shorthand(&self, name: &str) -> Property {
        let id = self.ident(name);
        Property {
            span: id.span,
            key: PropertyKey::Identifier(id.clone()),
            value: Expression::Identifier(id),
            shorthand: true,
        }
    }

    /// An identifier property key.
    pub fn key(&self, name: &str) -> PropertyKey {
        PropertyKey::Identifier(self.ident(name))
    }

    /// A string or numeric literal property key.
    pub fn literal_key(&self, literal: Expression) -> PropertyKey {
        match literal {
            Expression::Literal(lit) => PropertyKey::Literal(lit),
            other => PropertyKey::Computed(Box::new(other)),
        }
    }

    /// A computed property key.
    pub fn computed_key(&self, expr: Expression) -> PropertyKey {
        PropertyKey::Computed(Box::new(expr))
    }

    /// A comma expression.
    pub fn seq(&self, expressions: Vec<Expression>) -> Expression {
        let span = Self::union(expressions.iter().map(Expression::span));
        Expression::Sequence(SequenceExpression { expressions, span })
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn close_body(&self, body: &[Statement]) -> Span {
        let first = Self::first_span(body.iter().map(Statement::span));
        let open = self.before("{", first, false);
        open.to(self.text("}"))
    }

    /// A `function` with a block body.
    pub fn function(&self, id: Option<Identifier>, params: Vec<Identifier>, body: Vec<Statement>) -> Function {
        let anchor = Self::first_span(
            id.iter()
                .map(|i| i.span)
                .chain(params.iter().map(|p| p.span))
                .chain(body.iter().map(Statement::span)),
        );
        let start = self.keyword_before("function", anchor);
        let body_span = self.close_body(&body);
        Function {
            id,
            params,
            body: FunctionBody::Block(body),
            is_async: false,
            is_generator: false,
            is_arrow: false,
            span: start.to(body_span),
        }
    }

    /// A function declaration statement.
    pub fn function_decl(&self, id: Identifier, params: Vec<Identifier>, body: Vec<Statement>) -> Statement {
        Statement::FunctionDeclaration(self.function(Some(id), params, body))
    }

    /// A function expression.
    pub fn function_expr(&self, id: Option<Identifier>, params: Vec<Identifier>, body: Vec<Statement>) -> Expression {
        Expression::Function(self.function(id, params, body))
    }

    /// An arrow function with an expression body.
    pub fn arrow(&self, params: Vec<Identifier>, body: Expression) -> Expression {
        let start = match params.first() {
            Some(p) => p.span,
            None => {
                let arrow = self.before("=>", body.span(), false);
                self.before("(", arrow, false)
            }
        };
        Expression::Function(Function {
            id: None,
            params,
            span: start.to(body.span()),
            body: FunctionBody::Expression(Box::new(body)),
            is_async: false,
            is_generator: false,
            is_arrow: true,
        })
    }

    /// An arrow function with a block body.
    pub fn arrow_block(&self, params: Vec<Identifier>, body: Vec<Statement>) -> Expression {
        let body_span = self.close_body(&body);
        let start = match params.first() {
            Some(p) => p.span,
            None => {
                let arrow = self.before("=>", body_span, false);
                self.before("(", arrow, false)
            }
        };
        Expression::Function(Function {
            id: None,
            params,
            body: FunctionBody::Block(body),
            is_async: false,
            is_generator: false,
            is_arrow: true,
            span: start.to(body_span),
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// A whole program spanning the full source.
    pub fn program(&self, body: Vec<Statement>) -> Program {
        Program {
            body,
            span: Span::new(0, self.source.len() as u32),
        }
    }

    /// A declarator `id = init`.
    pub fn declarator(&self, id: Identifier, init: Option<Expression>) -> VariableDeclarator {
        let span = id.span.to(init.as_ref().map_or(Span::DUMMY, Expression::span));
        VariableDeclarator { id, init, span }
    }

    /// A `var`/`let`/`const` declaration.
    pub fn declaration(&self, kind: VariableKind, declarations: Vec<VariableDeclarator>) -> VariableDeclaration {
        let first = Self::first_span(declarations.iter().map(|d| d.span));
        let start = self.keyword_before(kind.keyword(), first);
        let span = start.to(Self::union(declarations.iter().map(|d| d.span)));
        VariableDeclaration {
            kind,
            declarations,
            span,
        }
    }

    /// A `var` statement.
    pub fn var(&self, declarations: Vec<VariableDeclarator>) -> Statement {
        Statement::VariableDeclaration(self.declaration(VariableKind::Var, declarations))
    }

    /// A `let` statement.
    pub fn let_(&self, declarations: Vec<VariableDeclarator>) -> Statement {
        Statement::VariableDeclaration(self.declaration(VariableKind::Let, declarations))
    }

    /// A `const` statement.
    pub fn const_(&self, declarations: Vec<VariableDeclarator>) -> Statement {
        Statement::VariableDeclaration(self.declaration(VariableKind::Const, declarations))
    }

    /// An expression statement.
    pub fn expr_stmt(&self, expression: Expression) -> Statement {
        let span = expression.span();
        Statement::Expression(ExpressionStatement { expression, span })
    }

    /// A block `{ ... }` as a plain struct.
    pub fn block_stmt(&self, body: Vec<Statement>) -> BlockStatement {
        let span = self.close_body(&body);
        BlockStatement { body, span }
    }

    /// A block statement.
    pub fn block(&self, body: Vec<Statement>) -> Statement {
        Statement::Block(self.block_stmt(body))
    }

    /// An `if` statement.
    pub fn if_(&self, test: Expression, consequent: Statement, alternate: Option<Statement>) -> Statement {
        let start = self.keyword_before("if", test.span());
        let end = alternate.as_ref().map_or(consequent.span(), Statement::span);
        Statement::If(IfStatement {
            test,
            consequent: Box::new(consequent),
            alternate: alternate.map(Box::new),
            span: start.to(end),
        })
    }

    /// A `while` loop.
    pub fn while_(&self, test: Expression, body: Statement) -> Statement {
        let start = self.keyword_before("while", test.span());
        Statement::While(WhileStatement {
            span: start.to(body.span()),
            test,
            body: Box::new(body),
        })
    }

    /// A `do ... while` loop.
    pub fn do_while(&self, body: Statement, test: Expression) -> Statement {
        let start = self.keyword_before("do", body.span());
        Statement::DoWhile(DoWhileStatement {
            span: start.to(test.span()),
            body: Box::new(body),
            test,
        })
    }

    /// A `for (init; test; update)` loop.
    pub fn for_(
        &self,
        init: Option<ForInit>,
        test: Option<Expression>,
        update: Option<Expression>,
        body: Statement,
    ) -> Statement {
        let init_span = match &init {
            Some(ForInit::Declaration(d)) => d.span,
            Some(ForInit::Expression(e)) => e.span(),
            None => Span::DUMMY,
        };
        let anchor = Self::first_span([
            init_span,
            test.as_ref().map_or(Span::DUMMY, Expression::span),
            update.as_ref().map_or(Span::DUMMY, Expression::span),
            body.span(),
        ]);
        let start = self.keyword_before("for", anchor);
        Statement::For(ForStatement {
            span: start.to(body.span()),
            init,
            test,
            update,
            body: Box::new(body),
        })
    }

    fn for_left_span(left: &ForInLeft) -> Span {
        match left {
            ForInLeft::Declaration(d) => d.span,
            ForInLeft::Expression(e) => e.span(),
        }
    }

    /// A `for (left in right)` loop.
    pub fn for_in(&self, left: ForInLeft, right: Expression, body: Statement) -> Statement {
        let start = self.keyword_before("for", Self::for_left_span(&left));
        Statement::ForIn(ForInStatement {
            span: start.to(body.span()),
            left,
            right,
            body: Box::new(body),
        })
    }

    /// A `for (left of right)` loop.
    pub fn for_of(&self, left: ForInLeft, right: Expression, body: Statement) -> Statement {
        let start = self.keyword_before("for", Self::for_left_span(&left));
        Statement::ForOf(ForOfStatement {
            span: start.to(body.span()),
            left,
            right,
            body: Box::new(body),
        })
    }

    /// A `return` statement.
    pub fn ret(&self, argument: Option<Expression>) -> Statement {
        let span = match &argument {
            Some(arg) => self.keyword_before("return", arg.span()).to(arg.span()),
            None => self.word("return"),
        };
        Statement::Return(ReturnStatement { argument, span })
    }

    fn jump(&self, keyword: &str, label: Option<&str>) -> JumpStatement {
        let span = self.word(keyword);
        let label = label.map(|name| self.ident(name));
        JumpStatement {
            span: span.to(label.as_ref().map_or(Span::DUMMY, |l| l.span)),
            label,
        }
    }

    /// A `break` statement.
    pub fn brk(&self, label: Option<&str>) -> Statement {
        Statement::Break(self.jump("break", label))
    }

    /// A `continue` statement.
    pub fn cont(&self, label: Option<&str>) -> Statement {
        Statement::Continue(self.jump("continue", label))
    }

    /// A `throw` statement.
    pub fn throw(&self, argument: Expression) -> Statement {
        let span = self.keyword_before("throw", argument.span()).to(argument.span());
        Statement::Throw(ThrowStatement { argument, span })
    }

    /// A `catch (param) { ... }` clause.
    pub fn catch(&self, param: Option<Identifier>, body: BlockStatement) -> CatchClause {
        let anchor = param.as_ref().map_or(body.span, |p| p.span);
        let start = self.keyword_before("catch", anchor);
        CatchClause {
            span: start.to(body.span),
            param,
            body,
        }
    }

    /// A `try` statement.
    pub fn try_(
        &self,
        block: BlockStatement,
        handler: Option<CatchClause>,
        finalizer: Option<BlockStatement>,
    ) -> Statement {
        let start = self.keyword_before("try", block.span);
        let end = finalizer
            .as_ref()
            .map(|f| f.span)
            .or(handler.as_ref().map(|h| h.span))
            .unwrap_or(block.span);
        Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
            span: start.to(end),
        })
    }

    /// A `with` statement.
    pub fn with(&self, object: Expression, body: Statement) -> Statement {
        let start = self.keyword_before("with", object.span());
        Statement::With(WithStatement {
            span: start.to(body.span()),
            object,
            body: Box::new(body),
        })
    }

    /// A labeled statement.
    pub fn labeled(&self, label: Identifier, body: Statement) -> Statement {
        Statement::Labeled(LabeledStatement {
            span: label.span.to(body.span()),
            label,
            body: Box::new(body),
        })
    }

    /// A `case test:` or `default:` clause.
    pub fn case(&self, test: Option<Expression>, consequent: Vec<Statement>) -> SwitchCase {
        let start = match &test {
            Some(t) => self.keyword_before("case", t.span()),
            None => {
                let first = Self::first_span(consequent.iter().map(Statement::span));
                self.keyword_before("default", first)
            }
        };
        let end = Self::union(consequent.iter().map(Statement::span));
        SwitchCase {
            test,
            consequent,
            span: start.to(end),
        }
    }

    /// A `switch` statement.
    pub fn switch(&self, discriminant: Expression, cases: Vec<SwitchCase>) -> Statement {
        let start = self.keyword_before("switch", discriminant.span());
        let close = self.text("}");
        Statement::Switch(SwitchStatement {
            discriminant,
            cases,
            span: start.to(close),
        })
    }

    /// A `debugger` statement.
    pub fn debugger(&self) -> Statement {
        Statement::Debugger(self.word("debugger"))
    }

    /// An empty statement.
    pub fn empty(&self) -> Statement {
        Statement::Empty(self.text(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaves_in_source_order() {
        let b = AstBuilder::new("var x = y;");
        let x = b.ident("x");
        let y = b.id("y");
        assert_eq!(x.span, Span::new(4, 5));
        assert_eq!(y.span(), Span::new(8, 9));
    }

    #[test]
    fn test_identifier_respects_word_boundaries() {
        let b = AstBuilder::new("arguments = args;");
        b.ident("arguments");
        assert_eq!(b.ident("args").span, Span::new(12, 16));
    }

    #[test]
    fn test_statement_spans_reach_keywords() {
        let src = "function foo() { return 42; }";
        let b = AstBuilder::new(src);
        let id = b.ident("foo");
        let ret = b.ret(Some(b.num("42")));
        assert_eq!(ret.span(), Span::new(17, 26));
        let f = b.function(Some(id), vec![], vec![ret]);
        assert_eq!(f.span, Span::new(0, src.len() as u32));
    }

    #[test]
    fn test_string_literal_span_includes_quotes() {
        let b = AstBuilder::new("x = 'hi';");
        b.id("x");
        assert_eq!(b.string("hi").span(), Span::new(4, 8));
    }

    #[test]
    fn test_hex_numbers() {
        let b = AstBuilder::new("0x10");
        let Expression::Literal(lit) = b.num("0x10") else {
            panic!("not a literal");
        };
        assert_eq!(lit.value, Literal::Number(16.0));
    }

    #[test]
    fn test_nested_blocks_consume_their_braces() {
        let src = "{ { a; } b; }";
        let b = AstBuilder::new(src);
        let inner_stmt = b.expr_stmt(b.id("a"));
        let inner = b.block(vec![inner_stmt]);
        let after = b.expr_stmt(b.id("b"));
        let outer = b.block(vec![inner.clone(), after]);
        assert_eq!(inner.span(), Span::new(2, 8));
        assert_eq!(outer.span(), Span::new(0, src.len() as u32));
    }
}
