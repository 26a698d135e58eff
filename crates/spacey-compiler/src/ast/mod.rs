// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Abstract Syntax Tree (AST) definitions for JavaScript.
//!
//! These structures are ESTree-shaped and carry a byte [`Span`] on every
//! node. They are produced by an external parser (usually as JSON) or built
//! in-process with [`AstBuilder`].
//!
//! Later stages key side tables by node address, so a `Program` must not be
//! moved or mutated while it is being compiled.

mod build;

pub use build::AstBuilder;

use serde::{Deserialize, Serialize};

use crate::diagnostics::Span;

/// A complete JavaScript program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// The statements in the program
    pub body: Vec<Statement>,
    /// Source range of the program
    pub span: Span,
}

impl Program {
    /// Whether the program begins with a `"use strict"` directive.
    pub fn has_use_strict_directive(&self) -> bool {
        has_use_strict_directive(&self.body)
    }
}

/// A parse failure reported by the external parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    /// The parser's message
    pub message: String,
    /// Where parsing failed
    pub span: Span,
}

/// An identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    /// The name of the identifier
    pub name: String,
    /// Source range of the name
    pub span: Span,
}

impl Identifier {
    /// Whether this is `eval` or `arguments`.
    pub fn is_eval_or_arguments(&self) -> bool {
        self.name == "eval" || self.name == "arguments"
    }
}

/// A JavaScript statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Variable declaration (var, let, const)
    VariableDeclaration(VariableDeclaration),
    /// Function declaration
    FunctionDeclaration(Function),
    /// Expression statement
    Expression(ExpressionStatement),
    /// Block statement { ... }
    Block(BlockStatement),
    /// If statement
    If(IfStatement),
    /// Switch statement
    Switch(SwitchStatement),
    /// While statement
    While(WhileStatement),
    /// Do-while statement
    DoWhile(DoWhileStatement),
    /// For statement
    For(ForStatement),
    /// For-in statement
    ForIn(ForInStatement),
    /// For-of statement
    ForOf(ForOfStatement),
    /// Return statement
    Return(ReturnStatement),
    /// Break statement
    Break(JumpStatement),
    /// Continue statement
    Continue(JumpStatement),
    /// Throw statement
    Throw(ThrowStatement),
    /// Try statement
    Try(TryStatement),
    /// With statement
    With(WithStatement),
    /// Labeled statement
    Labeled(LabeledStatement),
    /// Debugger statement
    Debugger(Span),
    /// Empty statement (;)
    Empty(Span),
}

impl Statement {
    /// Source range of the statement.
    pub fn span(&self) -> Span {
        match self {
            Statement::VariableDeclaration(s) => s.span,
            Statement::FunctionDeclaration(f) => f.span,
            Statement::Expression(s) => s.span,
            Statement::Block(s) => s.span,
            Statement::If(s) => s.span,
            Statement::Switch(s) => s.span,
            Statement::While(s) => s.span,
            Statement::DoWhile(s) => s.span,
            Statement::For(s) => s.span,
            Statement::ForIn(s) => s.span,
            Statement::ForOf(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::Break(s) | Statement::Continue(s) => s.span,
            Statement::Throw(s) => s.span,
            Statement::Try(s) => s.span,
            Statement::With(s) => s.span,
            Statement::Labeled(s) => s.span,
            Statement::Debugger(span) | Statement::Empty(span) => *span,
        }
    }

    /// Whether this statement is an iteration statement.
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Statement::While(_)
                | Statement::DoWhile(_)
                | Statement::For(_)
                | Statement::ForIn(_)
                | Statement::ForOf(_)
        )
    }
}

/// Whether a statement list starts with a `"use strict"` directive.
pub fn has_use_strict_directive(body: &[Statement]) -> bool {
    for statement in body {
        let Statement::Expression(ExpressionStatement {
            expression:
                Expression::Literal(LiteralExpression {
                    value: Literal::String(text),
                    ..
                }),
            ..
        }) = statement
        else {
            return false;
        };
        if text == "use strict" {
            return true;
        }
    }
    false
}

/// Variable declaration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// var declaration
    Var,
    /// let declaration
    Let,
    /// const declaration
    Const,
}

impl VariableKind {
    /// The keyword introducing the declaration.
    pub fn keyword(self) -> &'static str {
        match self {
            VariableKind::Var => "var",
            VariableKind::Let => "let",
            VariableKind::Const => "const",
        }
    }
}

/// A variable declaration statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    /// The kind of declaration
    pub kind: VariableKind,
    /// The declarators
    pub declarations: Vec<VariableDeclarator>,
    /// Source range
    pub span: Span,
}

/// A single variable declarator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclarator {
    /// The identifier being declared
    pub id: Identifier,
    /// Optional initializer expression
    pub init: Option<Expression>,
    /// Source range
    pub span: Span,
}

/// A function declaration, function expression or arrow function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// The function name
    pub id: Option<Identifier>,
    /// The parameters
    pub params: Vec<Identifier>,
    /// The function body
    pub body: FunctionBody,
    /// Whether this is an async function
    pub is_async: bool,
    /// Whether this is a generator function
    pub is_generator: bool,
    /// Whether this is an arrow function
    pub is_arrow: bool,
    /// Source range
    pub span: Span,
}

impl Function {
    /// The body statements, or an empty slice for expression-bodied arrows.
    pub fn statements(&self) -> &[Statement] {
        match &self.body {
            FunctionBody::Block(body) => body,
            FunctionBody::Expression(_) => &[],
        }
    }

    /// Whether the body begins with a `"use strict"` directive.
    pub fn has_use_strict_directive(&self) -> bool {
        has_use_strict_directive(self.statements())
    }
}

/// Function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionBody {
    /// Block body
    Block(Vec<Statement>),
    /// Expression body of an arrow function
    Expression(Box<Expression>),
}

/// An expression statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionStatement {
    /// The expression
    pub expression: Expression,
    /// Source range
    pub span: Span,
}

/// A block statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStatement {
    /// The statements in the block
    pub body: Vec<Statement>,
    /// Source range
    pub span: Span,
}

/// An if statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    /// The condition
    pub test: Expression,
    /// The then branch
    pub consequent: Box<Statement>,
    /// The optional else branch
    pub alternate: Option<Box<Statement>>,
    /// Source range
    pub span: Span,
}

/// A while statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStatement {
    /// The condition
    pub test: Expression,
    /// The loop body
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// A for statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStatement {
    /// The initializer
    pub init: Option<ForInit>,
    /// The condition
    pub test: Option<Expression>,
    /// The update expression
    pub update: Option<Expression>,
    /// The loop body
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// For loop initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    /// Variable declaration
    Declaration(VariableDeclaration),
    /// Expression
    Expression(Expression),
}

/// A switch statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatement {
    /// The discriminant expression
    pub discriminant: Expression,
    /// The case clauses
    pub cases: Vec<SwitchCase>,
    /// Source range
    pub span: Span,
}

/// A switch case clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// The test expression (None for default)
    pub test: Option<Expression>,
    /// The consequent statements
    pub consequent: Vec<Statement>,
    /// Source range
    pub span: Span,
}

/// A do-while statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoWhileStatement {
    /// The loop body
    pub body: Box<Statement>,
    /// The condition
    pub test: Expression,
    /// Source range
    pub span: Span,
}

/// A for-in statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForInStatement {
    /// The left-hand side
    pub left: ForInLeft,
    /// The object to iterate over
    pub right: Expression,
    /// The loop body
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// A for-of statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForOfStatement {
    /// The left-hand side
    pub left: ForInLeft,
    /// The iterable
    pub right: Expression,
    /// The loop body
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// Left-hand side of for-in/for-of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInLeft {
    /// Variable declaration
    Declaration(VariableDeclaration),
    /// Expression (identifier or member)
    Expression(Expression),
}

/// A return statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatement {
    /// The return value
    pub argument: Option<Expression>,
    /// Source range
    pub span: Span,
}

/// A break or continue statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpStatement {
    /// The optional target label
    pub label: Option<Identifier>,
    /// Source range
    pub span: Span,
}

/// A throw statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowStatement {
    /// The thrown expression
    pub argument: Expression,
    /// Source range
    pub span: Span,
}

/// A try statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStatement {
    /// The try block
    pub block: BlockStatement,
    /// The catch clause
    pub handler: Option<CatchClause>,
    /// The finally block
    pub finalizer: Option<BlockStatement>,
    /// Source range
    pub span: Span,
}

/// A catch clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// The error parameter
    pub param: Option<Identifier>,
    /// The catch body
    pub body: BlockStatement,
    /// Source range
    pub span: Span,
}

/// A with statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithStatement {
    /// The object expression
    pub object: Expression,
    /// The body statement
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// A labeled statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledStatement {
    /// The label identifier
    pub label: Identifier,
    /// The labeled body
    pub body: Box<Statement>,
    /// Source range
    pub span: Span,
}

/// A JavaScript expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Literal(LiteralExpression),
    /// Identifier reference
    Identifier(Identifier),
    /// this keyword
    This(Span),
    /// Array literal
    Array(ArrayExpression),
    /// Object literal
    Object(ObjectExpression),
    /// Binary expression, including `&&`, `||` and `??`
    Binary(BinaryExpression),
    /// Unary expression
    Unary(UnaryExpression),
    /// Assignment expression
    Assignment(AssignmentExpression),
    /// Call expression
    Call(CallExpression),
    /// Member access expression
    Member(MemberExpression),
    /// Conditional (ternary) expression
    Conditional(ConditionalExpression),
    /// Function or arrow function expression
    Function(Function),
    /// new expression
    New(CallExpression),
    /// Update expression (++/--)
    Update(UpdateExpression),
    /// Sequence expression (comma operator)
    Sequence(SequenceExpression),
}

impl Expression {
    /// Source range of the expression.
    pub fn span(&self) -> Span {
        match self {
            Expression::Literal(e) => e.span,
            Expression::Identifier(e) => e.span,
            Expression::This(span) => *span,
            Expression::Array(e) => e.span,
            Expression::Object(e) => e.span,
            Expression::Binary(e) => e.span,
            Expression::Unary(e) => e.span,
            Expression::Assignment(e) => e.span,
            Expression::Call(e) | Expression::New(e) => e.span,
            Expression::Member(e) => e.span,
            Expression::Conditional(e) => e.span,
            Expression::Function(f) => f.span,
            Expression::Update(e) => e.span,
            Expression::Sequence(e) => e.span,
        }
    }

    /// The identifier, if this expression is a plain identifier reference.
    pub fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            Expression::Identifier(id) => Some(id),
            _ => None,
        }
    }

    /// Whether this expression may appear on the left of an assignment.
    pub fn is_reference(&self) -> bool {
        matches!(self, Expression::Identifier(_) | Expression::Member(_))
    }
}

/// A literal expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralExpression {
    /// The literal value
    pub value: Literal,
    /// Source range
    pub span: Span,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// null literal
    Null,
    /// BigInt literal digits, without the `n` suffix
    BigInt(String),
    /// Regular expression literal
    RegExp {
        /// Pattern source
        pattern: String,
        /// Flags
        flags: String,
    },
}

/// An array expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayExpression {
    /// The elements (None represents a hole)
    pub elements: Vec<Option<Expression>>,
    /// Source range
    pub span: Span,
}

/// An object expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExpression {
    /// The properties
    pub properties: Vec<Property>,
    /// Source range
    pub span: Span,
}

/// An object property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// The property key
    pub key: PropertyKey,
    /// The property value
    pub value: Expression,
    /// Whether this is shorthand syntax
    pub shorthand: bool,
    /// Source range
    pub span: Span,
}

/// A property key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKey {
    /// Identifier key
    Identifier(Identifier),
    /// Computed key
    Computed(Box<Expression>),
    /// Literal key (e.g., numeric or string)
    Literal(LiteralExpression),
}

impl PropertyKey {
    /// The key's name when it is known statically.
    pub fn static_name(&self) -> Option<String> {
        match self {
            PropertyKey::Identifier(id) => Some(id.name.clone()),
            PropertyKey::Literal(lit) => match &lit.value {
                Literal::String(s) => Some(s.clone()),
                Literal::Number(n) => Some(crate::ir::number_to_string(*n)),
                _ => None,
            },
            PropertyKey::Computed(_) => None,
        }
    }
}

/// A binary expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpression {
    /// The operator
    pub operator: BinaryOperator,
    /// The left operand
    pub left: Box<Expression>,
    /// The right operand
    pub right: Box<Expression>,
    /// Source range
    pub span: Span,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    // Comparison
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    // Logical
    LogicalAnd,
    LogicalOr,
    NullishCoalescing,
    // Bitwise
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    // Other
    In,
    InstanceOf,
}

impl BinaryOperator {
    /// Whether this operator short-circuits.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinaryOperator::LogicalAnd
                | BinaryOperator::LogicalOr
                | BinaryOperator::NullishCoalescing
        )
    }
}

/// A unary expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    /// The operator
    pub operator: UnaryOperator,
    /// The operand
    pub argument: Box<Expression>,
    /// Source range
    pub span: Span,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    /// -
    Minus,
    /// +
    Plus,
    /// !
    LogicalNot,
    /// ~
    BitwiseNot,
    /// typeof
    Typeof,
    /// void
    Void,
    /// delete
    Delete,
}

/// An assignment expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentExpression {
    /// The operator
    pub operator: AssignmentOperator,
    /// The left-hand side
    pub left: Box<Expression>,
    /// The right-hand side
    pub right: Box<Expression>,
    /// Source range
    pub span: Span,
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    ExponentAssign,
    LeftShiftAssign,
    RightShiftAssign,
    UnsignedRightShiftAssign,
    BitwiseAndAssign,
    BitwiseOrAssign,
    BitwiseXorAssign,
    LogicalAndAssign,
    LogicalOrAssign,
    NullishCoalescingAssign,
}

impl AssignmentOperator {
    /// The binary operator a compound assignment applies.
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        use AssignmentOperator::*;
        Some(match self {
            Assign => return None,
            AddAssign => BinaryOperator::Add,
            SubtractAssign => BinaryOperator::Subtract,
            MultiplyAssign => BinaryOperator::Multiply,
            DivideAssign => BinaryOperator::Divide,
            ModuloAssign => BinaryOperator::Modulo,
            ExponentAssign => BinaryOperator::Exponent,
            LeftShiftAssign => BinaryOperator::LeftShift,
            RightShiftAssign => BinaryOperator::RightShift,
            UnsignedRightShiftAssign => BinaryOperator::UnsignedRightShift,
            BitwiseAndAssign => BinaryOperator::BitwiseAnd,
            BitwiseOrAssign => BinaryOperator::BitwiseOr,
            BitwiseXorAssign => BinaryOperator::BitwiseXor,
            LogicalAndAssign => BinaryOperator::LogicalAnd,
            LogicalOrAssign => BinaryOperator::LogicalOr,
            NullishCoalescingAssign => BinaryOperator::NullishCoalescing,
        })
    }
}

/// A call or `new` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpression {
    /// The function being called
    pub callee: Box<Expression>,
    /// The arguments
    pub arguments: Vec<Expression>,
    /// Source range
    pub span: Span,
}

/// A member access expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberExpression {
    /// The object
    pub object: Box<Expression>,
    /// The property
    pub property: MemberProperty,
    /// Source range
    pub span: Span,
}

/// Member property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberProperty {
    /// Identifier property (`a.b`)
    Identifier(Identifier),
    /// Computed property expression (`a[b]`)
    Expression(Box<Expression>),
}

/// A conditional (ternary) expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalExpression {
    /// The condition
    pub test: Box<Expression>,
    /// The consequent (if true)
    pub consequent: Box<Expression>,
    /// The alternate (if false)
    pub alternate: Box<Expression>,
    /// Source range
    pub span: Span,
}

/// An update expression (++/--)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExpression {
    /// The operator
    pub operator: UpdateOperator,
    /// The operand
    pub argument: Box<Expression>,
    /// Whether prefix (++x) or postfix (x++)
    pub prefix: bool,
    /// Source range
    pub span: Span,
}

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOperator {
    /// ++
    Increment,
    /// --
    Decrement,
}

/// A sequence expression (comma operator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExpression {
    /// The expressions
    pub expressions: Vec<Expression>,
    /// Source range
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(text: &str) -> Statement {
        Statement::Expression(ExpressionStatement {
            expression: Expression::Literal(LiteralExpression {
                value: Literal::String(text.to_string()),
                span: Span::DUMMY,
            }),
            span: Span::DUMMY,
        })
    }

    #[test]
    fn test_use_strict_after_other_directive() {
        let body = vec![directive("use asm"), directive("use strict")];
        assert!(has_use_strict_directive(&body));
    }

    #[test]
    fn test_use_strict_must_lead() {
        let body = vec![Statement::Empty(Span::DUMMY), directive("use strict")];
        assert!(!has_use_strict_directive(&body));
    }

    #[test]
    fn test_static_property_names() {
        let key = PropertyKey::Literal(LiteralExpression {
            value: Literal::Number(1.0),
            span: Span::DUMMY,
        });
        assert_eq!(key.static_name().as_deref(), Some("1"));
        let key = PropertyKey::Computed(Box::new(Expression::This(Span::DUMMY)));
        assert_eq!(key.static_name(), None);
    }

    #[test]
    fn test_program_deserializes_from_json() {
        let json = r#"{
            "body": [{"Debugger": {"start": 0, "end": 9}}],
            "span": {"start": 0, "end": 10}
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.body[0].span(), Span::new(0, 9));
    }
}
