// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Control-flow intermediate representation.
//!
//! A [`IrModule`] owns an arena of [`Function`]s and an arena of
//! [`Variable`]s. Each function owns its blocks and an instruction arena;
//! blocks list instruction ids in execution order and end in exactly one
//! [`Terminator`]. Values are instruction results ([`Operand::Value`]) or
//! constants ([`Operand::Const`]), and are never mutated once produced.
//! Source variables are written through stack slots, frame variables or
//! global properties, never by redefining a value.

mod dump;

pub use dump::dump_module;

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::BinaryOperator;
use crate::diagnostics::{Diagnostic, Span};

/// Index of a function in its module. The global function is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// The module's global function.
    pub const GLOBAL: FunctionId = FunctionId(0);
}

/// Index of a block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an instruction within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Index of a variable in its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

// ============================================================================
// Values
// ============================================================================

/// Static type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// The undefined value
    Undefined,
    /// null
    Null,
    /// true or false
    Boolean,
    /// A number
    Number,
    /// A BigInt
    BigInt,
    /// A string
    String,
    /// Any object
    Object,
    /// A function object created by a closure instruction
    Closure,
    /// Unknown
    Any,
}

impl ValueType {
    /// Whether values of this type are never objects.
    pub fn is_primitive(self) -> bool {
        !matches!(self, ValueType::Object | ValueType::Closure | ValueType::Any)
    }

    /// Result of `typeof` for values of this type, when it is fixed.
    pub fn typeof_name(self) -> Option<&'static str> {
        Some(match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "object",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::BigInt => "bigint",
            ValueType::String => "string",
            ValueType::Closure => "function",
            ValueType::Object | ValueType::Any => return None,
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::BigInt => "bigint",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Closure => "closure",
            ValueType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// undefined
    Undefined,
    /// null
    Null,
    /// A boolean
    Bool(bool),
    /// A number
    Number(f64),
    /// A string
    String(String),
    /// A BigInt, as decimal digits with an optional leading `-`
    BigInt(String),
    /// The global object
    GlobalObject,
}

impl Constant {
    /// Static type of the constant.
    pub fn value_type(&self) -> ValueType {
        match self {
            Constant::Undefined => ValueType::Undefined,
            Constant::Null => ValueType::Null,
            Constant::Bool(_) => ValueType::Boolean,
            Constant::Number(_) => ValueType::Number,
            Constant::String(_) => ValueType::String,
            Constant::BigInt(_) => ValueType::BigInt,
            Constant::GlobalObject => ValueType::Object,
        }
    }

    /// ToBoolean, when known.
    pub fn truthiness(&self) -> Option<bool> {
        Some(match self {
            Constant::Undefined | Constant::Null => false,
            Constant::Bool(b) => *b,
            Constant::Number(n) => !(*n == 0.0 || n.is_nan()),
            Constant::String(s) => !s.is_empty(),
            Constant::BigInt(digits) => !digits
                .trim_start_matches('-')
                .trim_start_matches('0')
                .is_empty(),
            Constant::GlobalObject => true,
        })
    }

    /// Whether this constant can be stored in a literal buffer.
    pub fn is_bufferable(&self) -> bool {
        matches!(
            self,
            Constant::Null | Constant::Bool(_) | Constant::Number(_) | Constant::String(_)
        )
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Undefined => f.write_str("undefined"),
            Constant::Null => f.write_str("null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Number(n) => f.write_str(&number_to_string(*n)),
            Constant::String(s) => write!(f, "{s:?}"),
            Constant::BigInt(digits) => write!(f, "{digits}n"),
            Constant::GlobalObject => f.write_str("globalObject"),
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Result of an instruction in the same function
    Value(InstId),
    /// A constant
    Const(Constant),
}

impl Operand {
    /// The undefined constant.
    pub fn undefined() -> Self {
        Operand::Const(Constant::Undefined)
    }

    /// A string constant.
    pub fn string(s: impl Into<String>) -> Self {
        Operand::Const(Constant::String(s.into()))
    }

    /// A number constant.
    pub fn number(n: f64) -> Self {
        Operand::Const(Constant::Number(n))
    }

    /// The global object.
    pub fn global_object() -> Self {
        Operand::Const(Constant::GlobalObject)
    }

    /// The defining instruction, for non-constant operands.
    pub fn as_value(&self) -> Option<InstId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::Const(_) => None,
        }
    }

    /// The constant, for constant operands.
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(c) => Some(c),
            Operand::Value(_) => None,
        }
    }
}

/// Formats a number the way `Number.prototype.toString` does.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let sign = if n < 0.0 { "-" } else { "" };
    // `{:e}` yields the shortest round-tripping digits
    let exp_form = format!("{:e}", n.abs());
    let (mantissa, exponent) = exp_form.split_once('e').unwrap_or((exp_form.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n_exp = exponent.parse::<i32>().unwrap_or(0) + 1;

    let body = if k <= n_exp && n_exp <= 21 {
        format!("{digits}{}", "0".repeat((n_exp - k) as usize))
    } else if 0 < n_exp && n_exp <= 21 {
        let (int, frac) = digits.split_at(n_exp as usize);
        format!("{int}.{frac}")
    } else if -6 < n_exp && n_exp <= 0 {
        format!("0.{}{digits}", "0".repeat((-n_exp) as usize))
    } else {
        let e = n_exp - 1;
        let e_sign = if e < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{e_sign}{}", e.abs())
        } else {
            format!("{first}.{rest}e{e_sign}{}", e.abs())
        }
    };
    format!("{sign}{body}")
}

// ============================================================================
// Instructions
// ============================================================================

/// Unary operators at the IR level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation
    Minus,
    /// ToNumber
    Plus,
    /// Logical not
    Not,
    /// Bitwise not
    BitNot,
    /// typeof
    TypeOf,
    /// void
    Void,
    /// Numeric increment
    Inc,
    /// Numeric decrement
    Dec,
    /// ToNumeric, the old value of a postfix update
    ToNumeric,
}

impl UnaryOp {
    /// Operator spelling used by the dump.
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Minus => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Void => "void",
            UnaryOp::Inc => "++",
            UnaryOp::Dec => "--",
            UnaryOp::ToNumeric => "numeric",
        }
    }
}

/// Spelling of a binary operator.
pub fn binary_symbol(op: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match op {
        Add => "+",
        Subtract => "-",
        Multiply => "*",
        Divide => "/",
        Modulo => "%",
        Exponent => "**",
        Equal => "==",
        NotEqual => "!=",
        StrictEqual => "===",
        StrictNotEqual => "!==",
        LessThan => "<",
        LessThanEqual => "<=",
        GreaterThan => ">",
        GreaterThanEqual => ">=",
        LogicalAnd => "&&",
        LogicalOr => "||",
        NullishCoalescing => "??",
        BitwiseAnd => "&",
        BitwiseOr => "|",
        BitwiseXor => "^",
        LeftShift => "<<",
        RightShift => ">>",
        UnsignedRightShift => ">>>",
        In => "in",
        InstanceOf => "instanceof",
    }
}

/// The operation an instruction performs.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum InstKind {
    /// Allocates a function-private stack slot
    AllocStack { name: String },
    /// Reads a stack slot
    LoadStack { slot: InstId },
    /// Writes a stack slot
    StoreStack { value: Operand, slot: InstId },
    /// Reads a frame variable
    LoadFrame { var: VarId },
    /// Writes a frame variable
    StoreFrame { value: Operand, var: VarId },
    /// Ensures a global property exists
    DeclareGlobalVar { name: String },
    /// Reads a global property, throwing if absent
    TryLoadGlobalProperty { name: String },
    /// Writes a global property, throwing if absent
    TryStoreGlobalProperty { value: Operand, name: String },
    /// `object[key]`
    LoadProperty { object: Operand, key: Operand },
    /// `object[key] = value`
    StoreProperty {
        value: Operand,
        object: Operand,
        key: Operand,
    },
    /// Defines an own enumerable property
    StoreOwnProperty {
        value: Operand,
        object: Operand,
        key: Operand,
    },
    /// `delete object[key]`
    DeleteProperty { object: Operand, key: Operand },
    /// An empty object
    AllocObject { size_hint: u32 },
    /// An object initialized from the key and value buffers
    AllocObjectLiteral {
        keys: Vec<Constant>,
        values: Vec<Constant>,
    },
    /// An array whose leading elements come from the array buffer
    AllocArray { elements: Vec<Constant>, size_hint: u32 },
    /// A regular expression object
    CreateRegExp { pattern: String, flags: String },
    /// A closure over the current environment
    CreateClosure { function: FunctionId },
    /// The `arguments` object
    CreateArguments,
    /// A parameter; index 0 is `this`
    LoadParam { index: u32 },
    /// `this` coerced to an object, for sloppy code
    LoadThisNS,
    /// The function object being run
    LoadCallee,
    /// A non-short-circuit binary operator
    BinaryOp {
        op: BinaryOperator,
        left: Operand,
        right: Operand,
    },
    /// A unary operator
    UnaryOp { op: UnaryOp, operand: Operand },
    /// A call with an explicit receiver
    Call {
        callee: Operand,
        this: Operand,
        args: Vec<Operand>,
    },
    /// `new callee(args)`
    Construct { callee: Operand, args: Vec<Operand> },
    /// A direct `eval`
    DirectEval { argument: Operand, strict: bool },
    /// Property name iterator for for-in
    GetPNameList { object: Operand },
    /// Next property name, or undefined when exhausted
    GetNextPName { iterator: Operand },
    /// Iterator for for-of
    IteratorBegin { iterable: Operand },
    /// Next iterator result object
    IteratorNext { iterator: Operand },
    /// The exception caught by the enclosing handler
    Catch,
    /// `debugger`
    Debugger,
    /// Throws a TypeError for an assignment to a constant
    ThrowConstAssignment { name: String },
}

impl InstKind {
    /// Name used by the dump.
    pub fn name(&self) -> &'static str {
        match self {
            InstKind::AllocStack { .. } => "AllocStackInst",
            InstKind::LoadStack { .. } => "LoadStackInst",
            InstKind::StoreStack { .. } => "StoreStackInst",
            InstKind::LoadFrame { .. } => "LoadFrameInst",
            InstKind::StoreFrame { .. } => "StoreFrameInst",
            InstKind::DeclareGlobalVar { .. } => "DeclareGlobalVarInst",
            InstKind::TryLoadGlobalProperty { .. } => "TryLoadGlobalPropertyInst",
            InstKind::TryStoreGlobalProperty { .. } => "TryStoreGlobalPropertyInst",
            InstKind::LoadProperty { .. } => "LoadPropertyInst",
            InstKind::StoreProperty { .. } => "StorePropertyInst",
            InstKind::StoreOwnProperty { .. } => "StoreOwnPropertyInst",
            InstKind::DeleteProperty { .. } => "DeletePropertyInst",
            InstKind::AllocObject { .. } => "AllocObjectInst",
            InstKind::AllocObjectLiteral { .. } => "AllocObjectLiteralInst",
            InstKind::AllocArray { .. } => "AllocArrayInst",
            InstKind::CreateRegExp { .. } => "CreateRegExpInst",
            InstKind::CreateClosure { .. } => "CreateFunctionInst",
            InstKind::CreateArguments => "CreateArgumentsInst",
            InstKind::LoadParam { .. } => "LoadParamInst",
            InstKind::LoadThisNS => "LoadThisNSInst",
            InstKind::LoadCallee => "GetCalleeInst",
            InstKind::BinaryOp { .. } => "BinaryOperatorInst",
            InstKind::UnaryOp { .. } => "UnaryOperatorInst",
            InstKind::Call { .. } => "CallInst",
            InstKind::Construct { .. } => "ConstructInst",
            InstKind::DirectEval { .. } => "DirectEvalInst",
            InstKind::GetPNameList { .. } => "GetPNameListInst",
            InstKind::GetNextPName { .. } => "GetNextPNameInst",
            InstKind::IteratorBegin { .. } => "IteratorBeginInst",
            InstKind::IteratorNext { .. } => "IteratorNextInst",
            InstKind::Catch => "CatchInst",
            InstKind::Debugger => "DebuggerInst",
            InstKind::ThrowConstAssignment { .. } => "ThrowConstAssignmentInst",
        }
    }

    /// Value operands, in evaluation order.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstKind::StoreStack { value, .. }
            | InstKind::StoreFrame { value, .. }
            | InstKind::TryStoreGlobalProperty { value, .. } => vec![value],
            InstKind::LoadProperty { object, key } | InstKind::DeleteProperty { object, key } => {
                vec![object, key]
            }
            InstKind::StoreProperty { value, object, key }
            | InstKind::StoreOwnProperty { value, object, key } => vec![value, object, key],
            InstKind::BinaryOp { left, right, .. } => vec![left, right],
            InstKind::UnaryOp { operand, .. } => vec![operand],
            InstKind::Call { callee, this, args } => {
                let mut all = vec![callee, this];
                all.extend(args);
                all
            }
            InstKind::Construct { callee, args } => {
                let mut all = vec![callee];
                all.extend(args);
                all
            }
            InstKind::DirectEval { argument, .. } => vec![argument],
            InstKind::GetPNameList { object } => vec![object],
            InstKind::GetNextPName { iterator } | InstKind::IteratorNext { iterator } => {
                vec![iterator]
            }
            InstKind::IteratorBegin { iterable } => vec![iterable],
            _ => Vec::new(),
        }
    }

    /// Mutable access to the value operands.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            InstKind::StoreStack { value, .. }
            | InstKind::StoreFrame { value, .. }
            | InstKind::TryStoreGlobalProperty { value, .. } => vec![value],
            InstKind::LoadProperty { object, key } | InstKind::DeleteProperty { object, key } => {
                vec![object, key]
            }
            InstKind::StoreProperty { value, object, key }
            | InstKind::StoreOwnProperty { value, object, key } => vec![value, object, key],
            InstKind::BinaryOp { left, right, .. } => vec![left, right],
            InstKind::UnaryOp { operand, .. } => vec![operand],
            InstKind::Call { callee, this, args } => {
                let mut all = vec![callee, this];
                all.extend(args.iter_mut());
                all
            }
            InstKind::Construct { callee, args } => {
                let mut all = vec![callee];
                all.extend(args.iter_mut());
                all
            }
            InstKind::DirectEval { argument, .. } => vec![argument],
            InstKind::GetPNameList { object } => vec![object],
            InstKind::GetNextPName { iterator } | InstKind::IteratorNext { iterator } => {
                vec![iterator]
            }
            InstKind::IteratorBegin { iterable } => vec![iterable],
            _ => Vec::new(),
        }
    }

    /// The stack slot a stack access refers to. Slots are not value operands.
    pub fn slot(&self) -> Option<InstId> {
        match self {
            InstKind::LoadStack { slot } | InstKind::StoreStack { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Whether the instruction produces a value.
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            InstKind::StoreStack { .. }
                | InstKind::StoreFrame { .. }
                | InstKind::DeclareGlobalVar { .. }
                | InstKind::TryStoreGlobalProperty { .. }
                | InstKind::StoreProperty { .. }
                | InstKind::StoreOwnProperty { .. }
                | InstKind::Debugger
                | InstKind::ThrowConstAssignment { .. }
        )
    }

    /// Whether removing an unused instance could change behavior.
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstKind::AllocStack { .. }
            | InstKind::LoadStack { .. }
            | InstKind::LoadFrame { .. }
            | InstKind::AllocObject { .. }
            | InstKind::AllocObjectLiteral { .. }
            | InstKind::AllocArray { .. }
            | InstKind::CreateRegExp { .. }
            | InstKind::CreateClosure { .. }
            | InstKind::CreateArguments
            | InstKind::LoadParam { .. }
            | InstKind::LoadThisNS
            | InstKind::LoadCallee => false,
            InstKind::UnaryOp { op, .. } => {
                !matches!(op, UnaryOp::Not | UnaryOp::TypeOf | UnaryOp::Void)
            }
            InstKind::BinaryOp { op, .. } => {
                !matches!(op, BinaryOperator::StrictEqual | BinaryOperator::StrictNotEqual)
            }
            _ => true,
        }
    }

    /// Whether the instruction may throw.
    pub fn may_throw(&self) -> bool {
        match self {
            InstKind::StoreStack { .. }
            | InstKind::StoreFrame { .. }
            | InstKind::DeclareGlobalVar { .. }
            | InstKind::Catch
            | InstKind::Debugger => false,
            other => other.has_side_effects(),
        }
    }
}

/// One instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation
    pub kind: InstKind,
    /// Source range it was lowered from
    pub span: Span,
    /// Index of the source statement within its function
    pub statement: u32,
}

/// How a block ends.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Terminator {
    /// Unconditional jump
    Branch(BlockId),
    /// Two-way jump on ToBoolean(cond)
    CondBranch {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Return from the function
    Return(Operand),
    /// Throw an exception
    Throw(Operand),
}

impl Terminator {
    /// Successor blocks, excluding exception handlers.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) | Terminator::Throw(_) => Vec::new(),
        }
    }

    /// Value operands.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Terminator::CondBranch { cond, .. } => vec![cond],
            Terminator::Return(value) | Terminator::Throw(value) => vec![value],
            Terminator::Branch(_) => Vec::new(),
        }
    }

    /// Mutable access to the value operands.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::CondBranch { cond, .. } => vec![cond],
            Terminator::Return(value) | Terminator::Throw(value) => vec![value],
            Terminator::Branch(_) => Vec::new(),
        }
    }

    /// Name used by the dump.
    pub fn name(&self) -> &'static str {
        match self {
            Terminator::Branch(_) => "BranchInst",
            Terminator::CondBranch { .. } => "CondBranchInst",
            Terminator::Return(_) => "ReturnInst",
            Terminator::Throw(_) => "ThrowInst",
        }
    }
}

/// A straight-line instruction sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Instructions in execution order
    pub insts: Vec<InstId>,
    /// The single terminator
    pub terminator: Terminator,
    /// Handler receiving exceptions thrown in this block
    pub handler: Option<BlockId>,
    /// Span of the terminator
    pub span: Span,
}

// ============================================================================
// Functions and variables
// ============================================================================

/// Kind of function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Program top level
    Global,
    /// `function` declaration or expression
    Normal,
    /// Arrow function
    Arrow,
}

/// A variable stored in a function's frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Declared name
    pub name: String,
    /// Owning function
    pub function: FunctionId,
    /// Read or written by a nested function; lives in the environment
    pub captured: bool,
    /// Declared `const`
    pub is_const: bool,
    /// Visible to a direct `eval`
    pub eval_visible: bool,
    /// Parameter index, excluding `this`
    pub param: Option<u32>,
}

/// One function's IR.
#[derive(Debug, Clone)]
pub struct Function {
    /// Name; empty for anonymous functions
    pub name: String,
    /// Kind
    pub kind: FunctionKind,
    /// Strict mode code
    pub strict: bool,
    /// Lexically enclosing function
    pub parent: Option<FunctionId>,
    /// Frame variables in declaration order
    pub frame: Vec<VarId>,
    /// Parameter names, excluding `this`
    pub params: Vec<String>,
    /// Blocks, indexed by [`BlockId`]
    pub blocks: Vec<BasicBlock>,
    /// Live blocks in layout order; the first is the entry
    pub layout: Vec<BlockId>,
    /// Instruction arena, indexed by [`InstId`]
    pub insts: Vec<Instruction>,
    /// Reads the `arguments` object
    pub uses_arguments: bool,
    /// Reads `this`
    pub uses_this: bool,
    /// Contains a direct `eval`
    pub has_direct_eval: bool,
    /// Source range
    pub span: Span,
    /// Number of errors reported in the function
    pub error_count: usize,
    /// First error reported in the function
    pub first_error: Option<Diagnostic>,
}

impl Function {
    /// Creates an empty function with a single entry block.
    pub fn new(name: impl Into<String>, kind: FunctionKind, strict: bool, span: Span) -> Self {
        Self {
            name: name.into(),
            kind,
            strict,
            parent: None,
            frame: Vec::new(),
            params: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            insts: Vec::new(),
            uses_arguments: false,
            uses_this: false,
            has_direct_eval: false,
            span,
            error_count: 0,
            first_error: None,
        }
    }

    /// The entry block.
    pub fn entry(&self) -> BlockId {
        self.layout.first().copied().unwrap_or(BlockId(0))
    }

    /// Appends a block ending in `terminator` and places it last in layout.
    pub fn add_block(&mut self, terminator: Terminator) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            insts: Vec::new(),
            terminator,
            handler: None,
            span: Span::DUMMY,
        });
        self.layout.push(id);
        id
    }

    /// A block.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    /// A mutable block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    /// Adds an instruction to the arena without placing it in a block.
    pub fn add_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    /// An instruction.
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0 as usize]
    }

    /// A mutable instruction.
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0 as usize]
    }

    /// Live instructions in layout order.
    pub fn placed_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.layout
            .iter()
            .flat_map(|b| self.block(*b).insts.iter().copied())
    }

    /// Live exception handlers and successors of `block`.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let b = self.block(block);
        let mut out = b.terminator.successors();
        if let Some(handler) = b.handler {
            out.push(handler);
        }
        out
    }

    /// Blocks reachable from the entry through successors and handlers, in
    /// layout order.
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.entry()];
        while let Some(block) = stack.pop() {
            if seen.insert(block) {
                stack.extend(self.successors(block));
            }
        }
        self.layout
            .iter()
            .copied()
            .filter(|b| seen.contains(b))
            .collect()
    }

    /// Drops unreachable blocks from the layout. Returns how many were dropped.
    pub fn remove_unreachable_blocks(&mut self) -> usize {
        let reachable = self.reachable();
        let removed = self.layout.len() - reachable.len();
        self.layout = reachable;
        removed
    }

    /// How often each live instruction is referenced by live code, either as
    /// an operand or as the slot of a stack access.
    pub fn use_counts(&self) -> FxHashMap<InstId, usize> {
        let mut counts = FxHashMap::default();
        for block in &self.layout {
            let block = self.block(*block);
            for inst in &block.insts {
                let kind = &self.inst(*inst).kind;
                let used = kind
                    .operands()
                    .into_iter()
                    .filter_map(Operand::as_value)
                    .chain(kind.slot());
                for id in used {
                    *counts.entry(id).or_insert(0) += 1;
                }
            }
            for operand in block.terminator.operands() {
                if let Some(id) = operand.as_value() {
                    *counts.entry(id).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Replaces every operand referring to `old` with `new`.
    pub fn replace_all_uses(&mut self, old: InstId, new: &Operand) {
        let target = Operand::Value(old);
        for inst in &mut self.insts {
            for operand in inst.kind.operands_mut() {
                if *operand == target {
                    *operand = new.clone();
                }
            }
        }
        for block in &mut self.blocks {
            for operand in block.terminator.operands_mut() {
                if *operand == target {
                    *operand = new.clone();
                }
            }
        }
    }

    /// Takes instructions out of their blocks.
    pub fn remove_insts(&mut self, dead: &FxHashSet<InstId>) {
        if dead.is_empty() {
            return;
        }
        for block in &mut self.blocks {
            block.insts.retain(|i| !dead.contains(i));
        }
    }

    /// Predecessors of every live block, handlers included.
    pub fn predecessors(&self) -> FxHashMap<BlockId, Vec<BlockId>> {
        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for block in &self.layout {
            for succ in self.successors(*block) {
                preds.entry(succ).or_default().push(*block);
            }
        }
        preds
    }

    /// Static type of an operand.
    pub fn operand_type(&self, operand: &Operand) -> ValueType {
        match operand {
            Operand::Const(c) => c.value_type(),
            Operand::Value(id) => self.result_type(*id),
        }
    }

    /// Static type of an instruction's result.
    pub fn result_type(&self, id: InstId) -> ValueType {
        match &self.inst(id).kind {
            InstKind::TryLoadGlobalProperty { name } => global_type(name),
            InstKind::LoadProperty {
                object: Operand::Const(Constant::GlobalObject),
                key: Operand::Const(Constant::String(name)),
            } => global_type(name),
            InstKind::AllocObject { .. }
            | InstKind::AllocObjectLiteral { .. }
            | InstKind::AllocArray { .. }
            | InstKind::CreateRegExp { .. }
            | InstKind::CreateArguments
            | InstKind::Construct { .. }
            | InstKind::GetPNameList { .. }
            | InstKind::IteratorBegin { .. }
            | InstKind::IteratorNext { .. }
            | InstKind::LoadThisNS => ValueType::Object,
            InstKind::CreateClosure { .. } | InstKind::LoadCallee => ValueType::Closure,
            InstKind::DeleteProperty { .. } => ValueType::Boolean,
            InstKind::UnaryOp { op, operand } => match op {
                UnaryOp::Not => ValueType::Boolean,
                UnaryOp::TypeOf => ValueType::String,
                UnaryOp::Void => ValueType::Undefined,
                UnaryOp::Plus => ValueType::Number,
                UnaryOp::Minus
                | UnaryOp::BitNot
                | UnaryOp::Inc
                | UnaryOp::Dec
                | UnaryOp::ToNumeric => {
                    if self.operand_type(operand) == ValueType::Number {
                        ValueType::Number
                    } else {
                        ValueType::Any
                    }
                }
            },
            InstKind::BinaryOp { op, left, right } => {
                binary_result_type(*op, self.operand_type(left), self.operand_type(right))
            }
            _ => ValueType::Any,
        }
    }
}

/// Type of a read-only global property of known type.
fn global_type(name: &str) -> ValueType {
    match name {
        "NaN" | "Infinity" => ValueType::Number,
        _ => ValueType::Any,
    }
}

fn binary_result_type(op: BinaryOperator, left: ValueType, right: ValueType) -> ValueType {
    use BinaryOperator::*;
    let numbers = left == ValueType::Number && right == ValueType::Number;
    match op {
        Equal | NotEqual | StrictEqual | StrictNotEqual | LessThan | LessThanEqual
        | GreaterThan | GreaterThanEqual | In | InstanceOf => ValueType::Boolean,
        Add if left == ValueType::String || right == ValueType::String => ValueType::String,
        UnsignedRightShift if left != ValueType::BigInt => ValueType::Number,
        _ if numbers => ValueType::Number,
        _ => ValueType::Any,
    }
}

// ============================================================================
// Module
// ============================================================================

/// A whole compilation unit.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    functions: Vec<Option<Function>>,
    variables: Vec<Variable>,
    /// Declared global names, in declaration order
    pub globals: Vec<String>,
    /// Some function contains a direct `eval`
    pub has_direct_eval: bool,
}

impl IrModule {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id for a function built later with [`Self::set_function`].
    pub fn reserve_function(&mut self) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(None);
        id
    }

    /// Installs a function body.
    pub fn set_function(&mut self, id: FunctionId, function: Function) {
        self.functions[id.0 as usize] = Some(function);
    }

    /// A live function.
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// A live function, mutably.
    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Removes a function; its id is never reused.
    pub fn remove_function(&mut self, id: FunctionId) -> Option<Function> {
        self.functions.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Ids of live functions, in creation order.
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| FunctionId(i as u32))
            .collect()
    }

    /// Live functions, in creation order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FunctionId(i as u32), f)))
    }

    /// Number of live functions.
    pub fn function_count(&self) -> usize {
        self.functions.iter().filter(|f| f.is_some()).count()
    }

    /// Finds a live function by name.
    pub fn function_named(&self, name: &str) -> Option<FunctionId> {
        self.functions()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    /// Adds a variable.
    pub fn add_variable(&mut self, variable: Variable) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(variable);
        id
    }

    /// A variable.
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    /// A variable, mutably.
    pub fn variable_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.0 as usize]
    }

    /// Total instructions placed in live blocks.
    pub fn instruction_count(&self) -> usize {
        self.functions()
            .map(|(_, f)| f.placed_insts().count() + f.layout.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(123e-20), "1.23e-18");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
    }

    #[test]
    fn test_constant_truthiness() {
        assert_eq!(Constant::Number(f64::NAN).truthiness(), Some(false));
        assert_eq!(Constant::String(String::new()).truthiness(), Some(false));
        assert_eq!(Constant::BigInt("0".into()).truthiness(), Some(false));
        assert_eq!(Constant::BigInt("-3".into()).truthiness(), Some(true));
        assert_eq!(Constant::GlobalObject.truthiness(), Some(true));
    }

    #[test]
    fn test_result_types() {
        let mut f = Function::new("f", FunctionKind::Normal, true, Span::DUMMY);
        let inst = |kind| Instruction {
            kind,
            span: Span::DUMMY,
            statement: 0,
        };
        let nan = f.add_inst(inst(InstKind::TryLoadGlobalProperty { name: "NaN".into() }));
        let sum = f.add_inst(inst(InstKind::BinaryOp {
            op: BinaryOperator::Add,
            left: Operand::Value(nan),
            right: Operand::number(1.0),
        }));
        let text = f.add_inst(inst(InstKind::BinaryOp {
            op: BinaryOperator::Add,
            left: Operand::string("a"),
            right: Operand::Value(sum),
        }));
        assert_eq!(f.result_type(nan), ValueType::Number);
        assert_eq!(f.result_type(sum), ValueType::Number);
        assert_eq!(f.result_type(text), ValueType::String);
        assert_eq!(ValueType::Number.typeof_name(), Some("number"));
    }

    #[test]
    fn test_removed_functions_keep_ids() {
        let mut module = IrModule::new();
        let a = module.reserve_function();
        let b = module.reserve_function();
        module.set_function(a, Function::new("global", FunctionKind::Global, false, Span::DUMMY));
        module.set_function(b, Function::new("f", FunctionKind::Normal, false, Span::DUMMY));
        module.remove_function(a);
        assert_eq!(module.function_ids(), vec![b]);
        assert_eq!(module.function_named("f"), Some(b));
    }
}
