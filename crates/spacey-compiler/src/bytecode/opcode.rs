// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Opcode definitions and instruction encoding.
//!
//! Every instruction is one opcode byte followed by its operands in
//! little-endian order. The operand list of each opcode is fixed, so the
//! instruction stream can be decoded without any side table.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind and width of an encoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandType {
    /// Register number, one byte
    Reg8,
    /// Unsigned byte
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 32-bit integer
    Imm32,
    /// IEEE-754 double
    Double,
    /// Signed 8-bit jump offset, relative to the jump's first byte
    Addr8,
    /// Signed 32-bit jump offset, relative to the jump's first byte
    Addr32,
}

impl OperandType {
    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            OperandType::Reg8 | OperandType::UInt8 | OperandType::Addr8 => 1,
            OperandType::UInt16 => 2,
            OperandType::UInt32 | OperandType::Imm32 | OperandType::Addr32 => 4,
            OperandType::Double => 8,
        }
    }

    /// Name shown by the disassembler.
    pub const fn name(self) -> &'static str {
        match self {
            OperandType::Reg8 => "Reg8",
            OperandType::UInt8 => "UInt8",
            OperandType::UInt16 => "UInt16",
            OperandType::UInt32 => "UInt32",
            OperandType::Imm32 => "Imm32",
            OperandType::Double => "Double",
            OperandType::Addr8 => "Addr8",
            OperandType::Addr32 => "Addr32",
        }
    }
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident ( $($ty:ident),* ) ),* $(,)?) => {
        /// Bytecode operation codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum OpCode {
            $( $(#[$doc])* $name, )*
        }

        impl OpCode {
            /// Every opcode, indexed by its encoding.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name),*];

            /// Mnemonic.
            pub const fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name),)*
                }
            }

            /// Operand types in encoding order.
            pub const fn operands(self) -> &'static [OperandType] {
                match self {
                    $(OpCode::$name => &[$(OperandType::$ty),*],)*
                }
            }
        }
    };
}

opcodes! {
    // Frame and constants
    /// Returns the value in a register
    Ret(Reg8),
    /// Copies a register
    Mov(Reg8, Reg8),
    /// Loads undefined
    LoadConstUndefined(Reg8),
    /// Loads null
    LoadConstNull(Reg8),
    /// Loads true
    LoadConstTrue(Reg8),
    /// Loads false
    LoadConstFalse(Reg8),
    /// Loads the number 0
    LoadConstZero(Reg8),
    /// Loads a small non-negative integer
    LoadConstUInt8(Reg8, UInt8),
    /// Loads a 32-bit integer
    LoadConstInt(Reg8, Imm32),
    /// Loads any other number
    LoadConstDouble(Reg8, Double),
    /// Loads a string by table index
    LoadConstString(Reg8, UInt16),
    /// Loads a string with a large table index
    LoadConstStringLongIndex(Reg8, UInt32),
    /// Loads a BigInt by table index
    LoadConstBigInt(Reg8, UInt16),
    /// Loads a BigInt with a large table index
    LoadConstBigIntLongIndex(Reg8, UInt32),
    /// Loads a parameter; index 0 is `this`
    LoadParam(Reg8, UInt8),
    /// Loads a parameter with a large index
    LoadParamLong(Reg8, UInt32),
    /// Loads `this` coerced to an object
    LoadThisNS(Reg8),
    /// Loads the running closure
    GetCallee(Reg8),
    /// Creates the `arguments` object
    CreateArguments(Reg8),

    // Globals
    /// Loads the global object
    GetGlobalObject(Reg8),
    /// Declares a global property by string index
    DeclareGlobalVar(UInt32),

    // Properties
    /// `dst = obj.name` with a property cache slot
    GetById(Reg8, Reg8, UInt8, UInt16),
    /// `GetById` with a large string index
    GetByIdLong(Reg8, Reg8, UInt8, UInt32),
    /// `GetById` throwing a ReferenceError if the property is missing
    TryGetById(Reg8, Reg8, UInt8, UInt16),
    /// `TryGetById` with a large string index
    TryGetByIdLong(Reg8, Reg8, UInt8, UInt32),
    /// `obj.name = value` with a property cache slot
    PutById(Reg8, Reg8, UInt8, UInt16),
    /// `PutById` with a large string index
    PutByIdLong(Reg8, Reg8, UInt8, UInt32),
    /// `PutById` throwing a ReferenceError if the property is missing
    TryPutById(Reg8, Reg8, UInt8, UInt16),
    /// `TryPutById` with a large string index
    TryPutByIdLong(Reg8, Reg8, UInt8, UInt32),
    /// `dst = obj[key]`
    GetByVal(Reg8, Reg8, Reg8),
    /// `obj[key] = value`
    PutByVal(Reg8, Reg8, Reg8),
    /// Defines a new own property by name
    PutNewOwnById(Reg8, Reg8, UInt16),
    /// `PutNewOwnById` with a large string index
    PutNewOwnByIdLong(Reg8, Reg8, UInt32),
    /// Defines an own indexed property
    PutOwnByIndex(Reg8, Reg8, UInt8),
    /// `PutOwnByIndex` with a large index
    PutOwnByIndexL(Reg8, Reg8, UInt32),
    /// Defines an own property with a computed key
    PutOwnByVal(Reg8, Reg8, Reg8, UInt8),
    /// `dst = delete obj.name`
    DelById(Reg8, Reg8, UInt16),
    /// `DelById` with a large string index
    DelByIdLong(Reg8, Reg8, UInt32),
    /// `dst = delete obj[key]`
    DelByVal(Reg8, Reg8, Reg8),

    // Allocation
    /// Creates an empty object
    NewObject(Reg8),
    /// Creates an object from the key and value buffers
    NewObjectWithBuffer(Reg8, UInt16, UInt16, UInt16, UInt16),
    /// `NewObjectWithBuffer` with large buffer offsets
    NewObjectWithBufferLong(Reg8, UInt16, UInt16, UInt32, UInt32),
    /// Creates an array with a size hint
    NewArray(Reg8, UInt16),
    /// Creates an array from the array buffer
    NewArrayWithBuffer(Reg8, UInt16, UInt16, UInt16),
    /// `NewArrayWithBuffer` with a large buffer offset
    NewArrayWithBufferLong(Reg8, UInt16, UInt16, UInt32),
    /// Creates a regular expression from pattern and flag strings
    CreateRegExp(Reg8, UInt32, UInt32),

    // Environments and closures
    /// Creates the environment of the running function
    CreateEnvironment(Reg8),
    /// Loads an enclosing environment; level 0 is the creator's
    GetEnvironment(Reg8, UInt8),
    /// Reads an environment slot
    LoadFromEnvironment(Reg8, Reg8, UInt8),
    /// Reads an environment slot with a large index
    LoadFromEnvironmentL(Reg8, Reg8, UInt16),
    /// Writes an environment slot
    StoreToEnvironment(Reg8, UInt8, Reg8),
    /// Writes an environment slot with a large index
    StoreToEnvironmentL(Reg8, UInt16, Reg8),
    /// Creates a closure over an environment
    CreateClosure(Reg8, Reg8, UInt16),
    /// `CreateClosure` with a large function index
    CreateClosureLongIndex(Reg8, Reg8, UInt32),

    // Binary operators: dst, left, right
    /// `+`
    Add(Reg8, Reg8, Reg8),
    /// `-`
    Sub(Reg8, Reg8, Reg8),
    /// `*`
    Mul(Reg8, Reg8, Reg8),
    /// `/`
    Div(Reg8, Reg8, Reg8),
    /// `%`
    Mod(Reg8, Reg8, Reg8),
    /// `**`
    Exp(Reg8, Reg8, Reg8),
    /// `==`
    Eq(Reg8, Reg8, Reg8),
    /// `!=`
    Neq(Reg8, Reg8, Reg8),
    /// `===`
    StrictEq(Reg8, Reg8, Reg8),
    /// `!==`
    StrictNeq(Reg8, Reg8, Reg8),
    /// `<`
    Less(Reg8, Reg8, Reg8),
    /// `<=`
    LessEq(Reg8, Reg8, Reg8),
    /// `>`
    Greater(Reg8, Reg8, Reg8),
    /// `>=`
    GreaterEq(Reg8, Reg8, Reg8),
    /// `&`
    BitAnd(Reg8, Reg8, Reg8),
    /// `|`
    BitOr(Reg8, Reg8, Reg8),
    /// `^`
    BitXor(Reg8, Reg8, Reg8),
    /// `<<`
    LShift(Reg8, Reg8, Reg8),
    /// `>>`
    RShift(Reg8, Reg8, Reg8),
    /// `>>>`
    URshift(Reg8, Reg8, Reg8),
    /// `in`
    IsIn(Reg8, Reg8, Reg8),
    /// `instanceof`
    InstanceOf(Reg8, Reg8, Reg8),

    // Unary operators: dst, operand
    /// Arithmetic negation
    Negate(Reg8, Reg8),
    /// ToNumber
    ToNumber(Reg8, Reg8),
    /// ToNumeric
    ToNumeric(Reg8, Reg8),
    /// Logical not
    Not(Reg8, Reg8),
    /// Bitwise not
    BitNot(Reg8, Reg8),
    /// typeof
    TypeOf(Reg8, Reg8),
    /// Numeric increment
    Inc(Reg8, Reg8),
    /// Numeric decrement
    Dec(Reg8, Reg8),

    // Calls: dst, callee, argument count including `this`
    /// Calls with the arguments in the highest registers of the frame
    Call(Reg8, Reg8, UInt8),
    /// `Call` with a large argument count
    CallLong(Reg8, Reg8, UInt32),
    /// `new` with the arguments in the highest registers of the frame
    Construct(Reg8, Reg8, UInt8),
    /// `Construct` with a large argument count
    ConstructLong(Reg8, Reg8, UInt32),
    /// Direct `eval`: dst, argument, strictness
    DirectEval(Reg8, Reg8, UInt8),

    // Iteration
    /// Property name iterator for for-in
    GetPNameList(Reg8, Reg8),
    /// Next property name, or undefined
    GetNextPName(Reg8, Reg8),
    /// Iterator for for-of
    IteratorBegin(Reg8, Reg8),
    /// Next iterator result object
    IteratorNext(Reg8, Reg8),

    // Exceptions and control flow
    /// Loads the exception being handled
    Catch(Reg8),
    /// Throws the value in a register
    Throw(Reg8),
    /// Throws a TypeError naming a constant by string index
    ThrowConstAssignment(UInt32),
    /// Throws a SyntaxError with a message by string index
    ThrowSyntaxError(UInt32),
    /// Debugger statement
    Debugger(),
    /// Unconditional jump
    Jmp(Addr8),
    /// `Jmp` with a 32-bit offset
    JmpLong(Addr32),
    /// Jumps if the register is truthy
    JmpTrue(Addr8, Reg8),
    /// `JmpTrue` with a 32-bit offset
    JmpTrueLong(Addr32, Reg8),
    /// Jumps if the register is falsy
    JmpFalse(Addr8, Reg8),
    /// `JmpFalse` with a 32-bit offset
    JmpFalseLong(Addr32, Reg8),
}

impl OpCode {
    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        OpCode::ALL.get(byte as usize).copied()
    }

    /// Encoded size of an instruction, opcode byte included.
    pub fn size(self) -> usize {
        1 + self.operands().iter().map(|t| t.size()).sum::<usize>()
    }

    /// The 32-bit form of a short jump.
    pub fn long_jump(self) -> Option<OpCode> {
        match self {
            OpCode::Jmp => Some(OpCode::JmpLong),
            OpCode::JmpTrue => Some(OpCode::JmpTrueLong),
            OpCode::JmpFalse => Some(OpCode::JmpFalseLong),
            _ => None,
        }
    }

    /// Whether this opcode transfers control to a jump offset.
    pub fn is_jump(self) -> bool {
        self.operands()
            .iter()
            .any(|t| matches!(t, OperandType::Addr8 | OperandType::Addr32))
    }
}

/// A decoded or to-be-encoded operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandValue {
    /// Register, unsigned integer, index or relative address
    Int(i64),
    /// Double constant
    Double(f64),
}

impl OperandValue {
    /// The integer value, with doubles truncated.
    pub fn as_int(self) -> i64 {
        match self {
            OperandValue::Int(v) => v,
            OperandValue::Double(d) => d as i64,
        }
    }
}

/// Appends one encoded instruction to `out`.
pub fn encode(op: OpCode, operands: &[OperandValue], out: &mut Vec<u8>) -> Result<()> {
    let types = op.operands();
    if types.len() != operands.len() {
        return Err(Error::InternalError(format!(
            "{} takes {} operands, got {}",
            op.name(),
            types.len(),
            operands.len()
        )));
    }
    out.push(op as u8);
    for (ty, value) in types.iter().zip(operands) {
        let out_of_range =
            || Error::InternalError(format!("operand {value:?} of {} does not fit {}", op.name(), ty.name()));
        match (ty, value) {
            (OperandType::Double, OperandValue::Double(d)) => out.extend_from_slice(&d.to_le_bytes()),
            (OperandType::Double, OperandValue::Int(i)) => out.extend_from_slice(&(*i as f64).to_le_bytes()),
            (OperandType::Reg8 | OperandType::UInt8, v) => {
                out.push(u8::try_from(v.as_int()).map_err(|_| out_of_range())?)
            }
            (OperandType::Addr8, v) => {
                out.push(i8::try_from(v.as_int()).map_err(|_| out_of_range())? as u8)
            }
            (OperandType::UInt16, v) => {
                let v = u16::try_from(v.as_int()).map_err(|_| out_of_range())?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::UInt32, v) => {
                let v = u32::try_from(v.as_int()).map_err(|_| out_of_range())?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Imm32 | OperandType::Addr32, v) => {
                let v = i32::try_from(v.as_int()).map_err(|_| out_of_range())?;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Decodes the instruction at `offset`, returning it and its size.
pub fn decode(code: &[u8], offset: usize) -> Option<(OpCode, Vec<OperandValue>, usize)> {
    let op = OpCode::from_byte(*code.get(offset)?)?;
    let mut pos = offset + 1;
    let mut operands = Vec::with_capacity(op.operands().len());
    for ty in op.operands() {
        let bytes = code.get(pos..pos + ty.size())?;
        let value = match ty {
            OperandType::Reg8 | OperandType::UInt8 => OperandValue::Int(bytes[0] as i64),
            OperandType::Addr8 => OperandValue::Int(bytes[0] as i8 as i64),
            OperandType::UInt16 => OperandValue::Int(u16::from_le_bytes([bytes[0], bytes[1]]) as i64),
            OperandType::UInt32 => OperandValue::Int(u32::from_le_bytes(bytes.try_into().ok()?) as i64),
            OperandType::Imm32 | OperandType::Addr32 => {
                OperandValue::Int(i32::from_le_bytes(bytes.try_into().ok()?) as i64)
            }
            OperandType::Double => OperandValue::Double(f64::from_le_bytes(bytes.try_into().ok()?)),
        };
        operands.push(value);
        pos += ty.size();
    }
    Some((op, operands, pos - offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes_round_trip() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i);
            assert_eq!(OpCode::from_byte(i as u8), Some(*op));
        }
        assert_eq!(OpCode::from_byte(255), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(OpCode::Ret.size(), 2);
        assert_eq!(OpCode::LoadConstUInt8.size(), 3);
        assert_eq!(OpCode::LoadConstDouble.size(), 10);
        assert_eq!(OpCode::GetById.size(), 6);
        assert_eq!(OpCode::JmpLong.size(), 5);
        assert_eq!(OpCode::Debugger.size(), 1);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let mut out = Vec::new();
        assert!(encode(OpCode::Ret, &[OperandValue::Int(256)], &mut out).is_err());
        assert!(encode(OpCode::Jmp, &[OperandValue::Int(-129)], &mut out).is_err());
        assert!(encode(OpCode::Ret, &[], &mut out).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let mut out = Vec::new();
        encode(OpCode::JmpTrue, &[OperandValue::Int(-4), OperandValue::Int(3)], &mut out).unwrap();
        encode(OpCode::LoadConstDouble, &[OperandValue::Int(1), OperandValue::Double(1.5)], &mut out).unwrap();
        assert_eq!(&out[..3], &[OpCode::JmpTrue as u8, 0xfc, 3]);

        let (op, operands, size) = decode(&out, 0).unwrap();
        assert_eq!(op, OpCode::JmpTrue);
        assert_eq!(operands, vec![OperandValue::Int(-4), OperandValue::Int(3)]);
        let (op, operands, _) = decode(&out, size).unwrap();
        assert_eq!(op, OpCode::LoadConstDouble);
        assert_eq!(operands[1], OperandValue::Double(1.5));
    }
}
