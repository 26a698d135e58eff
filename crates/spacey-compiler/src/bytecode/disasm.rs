// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Human-readable listing of a bytecode module.

use std::fmt::Write;

use super::opcode::{decode, OperandType, OperandValue};
use super::tables::{deserialize_range, Literal, LiteralBuffer, StringTable};
use super::{BytecodeFunction, BytecodeModule};
use crate::ir::number_to_string;

/// Lists one function's instructions as `[@ offset] Name operand<Type>, ...`.
pub fn disassemble_code(code: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;
    while offset < code.len() {
        let Some((op, operands, size)) = decode(code, offset) else {
            let _ = writeln!(out, "[@ {offset}] <invalid 0x{:02x}>", code[offset]);
            break;
        };
        let operands: Vec<String> = op
            .operands()
            .iter()
            .zip(&operands)
            .map(|(ty, value)| format_operand(*ty, *value))
            .collect();
        if operands.is_empty() {
            let _ = writeln!(out, "[@ {offset}] {}", op.name());
        } else {
            let _ = writeln!(out, "[@ {offset}] {} {}", op.name(), operands.join(", "));
        }
        offset += size;
    }
    out
}

fn format_operand(ty: OperandType, value: OperandValue) -> String {
    match value {
        OperandValue::Double(d) => format!("{}<{}>", number_to_string(d), ty.name()),
        OperandValue::Int(i) => format!("{i}<{}>", ty.name()),
    }
}

/// Full listing: tables, then every function in index order.
pub fn disassemble(module: &BytecodeModule) -> String {
    let mut out = String::new();
    write_strings(&mut out, &module.strings);
    write_buffer(&mut out, "Array Buffer", &module.literals.array, &module.strings);
    write_buffer(&mut out, "Object Key Buffer", &module.literals.object_keys, &module.strings);
    write_buffer(&mut out, "Object Value Buffer", &module.literals.object_values, &module.strings);
    if !module.bigints.is_empty() {
        let _ = writeln!(out, "BigInt Table:");
        for id in 0..module.bigints.len() as u32 {
            if let Some(value) = module.bigints.get(id) {
                let _ = writeln!(out, "  bigint{id}: {value}n");
            }
        }
        out.push('\n');
    }
    for (index, function) in module.functions.iter().enumerate() {
        write_function(&mut out, index, function);
    }
    out
}

fn write_strings(out: &mut String, strings: &StringTable) {
    let _ = writeln!(out, "Global String Table:");
    for (id, s, entry) in strings.iter() {
        let kind = if entry.ascii { "ASCII" } else { "UTF-8" };
        let id_mark = if entry.identifier { "i" } else { "" };
        let _ = writeln!(
            out,
            "s{id}[{kind}, {}..{}]{id_mark}: {s}",
            entry.offset,
            entry.offset + entry.length
        );
    }
    out.push('\n');
}

fn write_buffer(out: &mut String, title: &str, buffer: &LiteralBuffer, strings: &StringTable) {
    if buffer.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for (offset, length) in buffer.sequences() {
        let literals = deserialize_range(buffer.bytes(), *offset as usize, *length as usize).unwrap_or_default();
        let items: Vec<String> = literals.iter().map(|l| format_literal(*l, strings)).collect();
        let _ = writeln!(out, "  [@ {offset}] {}", items.join(", "));
    }
    out.push('\n');
}

fn format_literal(literal: Literal, strings: &StringTable) -> String {
    match literal {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Integer(i) => format!("[int {i}]"),
        Literal::Number(n) => format!("[double {}]", number_to_string(n)),
        Literal::String(id) => format!("[String {id}] {:?}", strings.get(id).unwrap_or("")),
    }
}

fn write_function(out: &mut String, index: usize, function: &BytecodeFunction) {
    let h = &function.header;
    let _ = writeln!(
        out,
        "Function<{}>({} params, {} registers, {} symbols):",
        h.name, h.param_count, h.frame_size, h.environment_size
    );
    match &function.code {
        None => {
            let _ = writeln!(out, "  deferred (function {index})");
        }
        Some(code) => out.push_str(&disassemble_code(code)),
    }
    if !function.exceptions.is_empty() {
        let _ = writeln!(out, "Exception Handlers:");
        for (i, handler) in function.exceptions.iter().enumerate() {
            let _ = writeln!(
                out,
                "{i}: start = {}, end = {}, target = {}",
                handler.start, handler.end, handler.target
            );
        }
    }
    out.push('\n');
}
