// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Lowering of IR functions to bytecode.
//!
//! A function's registers are laid out as
//!
//! ```text
//! [pinned params][variables, stack slots, env, global object, scratch][values][outgoing]
//! ```
//!
//! Parameters are pinned to the lowest registers when the function reads
//! `arguments` or debug info was requested. Values share registers through
//! linear scan. Calls pass `this` and the arguments in the highest registers
//! of the frame.

use rustc_hash::{FxHashMap, FxHashSet};

use super::debug_info::{DebugLocation, FunctionDebugInfo};
use super::opcode::{encode, OpCode, OperandValue};
use super::regalloc::{self, LiveInterval, Linearization, VReg};
use super::{BytecodeFunction, BytecodeModule, ExceptionHandler, FunctionHeader};
use crate::ast::BinaryOperator;
use crate::config::CompileFlags;
use crate::diagnostics::{SourceFile, Span};
use crate::error::{Error, Result};
use crate::ir::{
    BlockId, Constant, Function, FunctionId, InstId, InstKind, IrModule, Operand, Terminator,
    UnaryOp, VarId,
};

/// Largest frame the 8-bit register encoding can address.
pub const MAX_REGISTERS: u32 = 256;

/// Module-wide facts every function emission needs.
pub(crate) struct ModuleContext<'a> {
    pub ir: &'a IrModule,
    pub source: &'a SourceFile,
    pub flags: &'a CompileFlags,
    /// Bytecode index of every live function
    pub indices: FxHashMap<FunctionId, u32>,
    env_slots: FxHashMap<VarId, u32>,
    env_sizes: FxHashMap<FunctionId, u32>,
    environments: FxHashSet<FunctionId>,
}

impl<'a> ModuleContext<'a> {
    pub fn new(ir: &'a IrModule, source: &'a SourceFile, flags: &'a CompileFlags) -> Self {
        let mut ctx = Self {
            ir,
            source,
            flags,
            indices: FxHashMap::default(),
            env_slots: FxHashMap::default(),
            env_sizes: FxHashMap::default(),
            environments: FxHashSet::default(),
        };
        for (index, id) in ir.function_ids().into_iter().enumerate() {
            ctx.indices.insert(id, index as u32);
        }
        for (id, function) in ir.functions() {
            let mut size = 0;
            for var in &function.frame {
                if ir.variable(*var).captured {
                    ctx.env_slots.insert(*var, size);
                    size += 1;
                }
            }
            ctx.env_sizes.insert(id, size);
            // The top level has no enclosing environment for its closures.
            let creates_closures = function
                .placed_insts()
                .any(|i| matches!(function.inst(i).kind, InstKind::CreateClosure { .. }));
            if size > 0 || (function.parent.is_none() && creates_closures) {
                ctx.environments.insert(id);
            }
        }
        ctx
    }

    /// Function ids in bytecode index order.
    pub fn ordered_ids(&self) -> Vec<FunctionId> {
        let mut ids: Vec<(u32, FunctionId)> = self.indices.iter().map(|(id, i)| (*i, *id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Environments between `from` and the owner of a variable: 0 is the
    /// environment `from`'s closure was created in.
    fn env_level(&self, from: FunctionId, owner: FunctionId) -> Option<u32> {
        let mut level = 0;
        let mut current = self.ir.function(from)?.parent;
        while let Some(id) = current {
            if id == owner {
                return Some(level);
            }
            if self.environments.contains(&id) {
                level += 1;
            }
            current = self.ir.function(id)?.parent;
        }
        None
    }
}

/// Header fields known without emitting the body.
pub(crate) fn function_header(ctx: &ModuleContext<'_>, id: FunctionId, module: &mut BytecodeModule) -> Result<FunctionHeader> {
    let function = ctx.ir.function(id).ok_or_else(|| Error::InternalError(format!("function {} missing", id.0)))?;
    let name = if function.parent.is_none() && function.name.is_empty() {
        "global".to_string()
    } else {
        function.name.clone()
    };
    Ok(FunctionHeader {
        name_id: module.strings.insert(&name),
        name,
        param_count: function.params.len() as u32 + 1,
        frame_size: 0,
        environment_size: 0,
        strict: function.strict,
    })
}

/// Emits the body of function `id` into its slot of `module`.
pub(crate) fn emit_function(ctx: &ModuleContext<'_>, id: FunctionId, module: &mut BytecodeModule) -> Result<()> {
    let index = *ctx
        .indices
        .get(&id)
        .ok_or_else(|| Error::InternalError(format!("function {} has no index", id.0)))?;
    let function = ctx.ir.function(id).ok_or_else(|| Error::InternalError(format!("function {} missing", id.0)))?;
    let mut header = function_header(ctx, id, module)?;

    let emitted = match &function.first_error {
        Some(error) => {
            let at = ctx.source.line_col(error.span.start);
            let text = format!("{}:{}:{}", at.line, at.column, error.message());
            let string = module.strings.insert(&text);
            let mut code = Vec::new();
            encode(OpCode::ThrowSyntaxError, &[OperandValue::Int(string as i64)], &mut code)?;
            tracing::debug!(function = %header.name, %text, "function emitted as compile error");
            BytecodeFunction {
                header,
                code: Some(code),
                exceptions: Vec::new(),
                compile_error: Some(text),
            }
        }
        None => {
            let emitter = FunctionEmitter::new(ctx, id, function, module)?;
            let (code, exceptions, frame_size, debug) = emitter.run()?;
            header.frame_size = frame_size;
            header.environment_size = ctx.env_sizes.get(&id).copied().unwrap_or(0);
            tracing::debug!(
                function = %header.name,
                bytes = code.len(),
                registers = frame_size,
                "function emitted"
            );
            if let Some(debug) = debug {
                module.debug_info.get_or_insert_with(Default::default).set_function(index, debug);
            }
            BytecodeFunction {
                header,
                code: Some(code),
                exceptions,
                compile_error: None,
            }
        }
    };

    let slot = module
        .functions
        .get_mut(index as usize)
        .ok_or(Error::UnknownFunction(index))?;
    *slot = emitted;
    Ok(())
}

// ============================================================================
// Function emission
// ============================================================================

/// Where a frame variable lives.
#[derive(Debug, Clone, Copy)]
enum VarLocation {
    Register(u32),
    /// A slot of the function's own environment
    Own(u32),
    /// A slot of an enclosing environment
    Outer { level: u32, slot: u32 },
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Value(OperandValue),
    Label(BlockId),
}

#[derive(Debug)]
struct PendingInstr {
    op: OpCode,
    operands: Vec<Pending>,
    location: Option<(u32, u32, u32)>,
}

type Emitted = (Vec<u8>, Vec<ExceptionHandler>, u32, Option<FunctionDebugInfo>);

struct FunctionEmitter<'c, 'a, 'm> {
    ctx: &'c ModuleContext<'a>,
    id: FunctionId,
    function: &'a Function,
    module: &'m mut BytecodeModule,
    lin: Linearization,

    vars: FxHashMap<VarId, u32>,
    slots: FxHashMap<InstId, u32>,
    values: FxHashMap<InstId, u32>,
    temps: FxHashMap<(u32, usize), u32>,
    env: Option<u32>,
    global: Option<u32>,
    scratch: Option<u32>,
    frame_size: u32,

    code: Vec<PendingInstr>,
    labels: FxHashMap<BlockId, usize>,
    block_ranges: Vec<(BlockId, usize, usize)>,
    location: Option<(u32, u32, u32)>,
    cache_index: u32,
}

impl<'c, 'a, 'm> FunctionEmitter<'c, 'a, 'm> {
    fn new(
        ctx: &'c ModuleContext<'a>,
        id: FunctionId,
        function: &'a Function,
        module: &'m mut BytecodeModule,
    ) -> Result<Self> {
        let mut emitter = Self {
            ctx,
            id,
            function,
            module,
            lin: Linearization::new(function),
            vars: FxHashMap::default(),
            slots: FxHashMap::default(),
            values: FxHashMap::default(),
            temps: FxHashMap::default(),
            env: None,
            global: None,
            scratch: None,
            frame_size: 0,
            code: Vec::new(),
            labels: FxHashMap::default(),
            block_ranges: Vec::new(),
            location: None,
            cache_index: 0,
        };
        emitter.assign_registers()?;
        Ok(emitter)
    }

    fn insts(&self) -> impl Iterator<Item = (u32, InstId, &'a InstKind)> + '_ {
        let function = self.function;
        function
            .placed_insts()
            .map(move |i| (self.lin.inst(i).unwrap_or(0), i, &function.inst(i).kind))
    }

    // ------------------------------------------------------------------------
    // Register assignment
    // ------------------------------------------------------------------------

    fn assign_registers(&mut self) -> Result<()> {
        let ir = self.ctx.ir;
        let function = self.function;
        let mut next = 0;

        let pinned = if function.uses_arguments || self.ctx.flags.debug_info {
            function.params.len() as u32
        } else {
            0
        };
        for var in &function.frame {
            let v = ir.variable(*var);
            if let Some(param) = v.param.filter(|p| *p < pinned && !v.captured) {
                self.vars.insert(*var, param);
            }
        }
        next += pinned;
        for var in &function.frame {
            if !ir.variable(*var).captured && !self.vars.contains_key(var) {
                self.vars.insert(*var, next);
                next += 1;
            }
        }

        let placed: Vec<(u32, InstId, &'a InstKind)> = self.insts().collect();
        let mut uses_global = false;
        let mut outer_store = false;
        let mut max_outgoing = 0;
        for &(_, id, kind) in &placed {
            match kind {
                InstKind::AllocStack { .. } => {
                    self.slots.insert(id, next);
                    next += 1;
                }
                InstKind::TryLoadGlobalProperty { .. } | InstKind::TryStoreGlobalProperty { .. } => {
                    uses_global = true
                }
                InstKind::StoreFrame { var, .. } => {
                    outer_store |= ir.variable(*var).function != self.id && ir.variable(*var).captured
                }
                InstKind::Call { args, .. } | InstKind::Construct { args, .. } => {
                    max_outgoing = max_outgoing.max(args.len() as u32 + 1)
                }
                _ => {}
            }
            uses_global |= kind
                .operands()
                .into_iter()
                .any(|o| matches!(o, Operand::Const(Constant::GlobalObject)));
        }
        uses_global |= function.layout.iter().any(|b| {
            function
                .block(*b)
                .terminator
                .operands()
                .into_iter()
                .any(|o| matches!(o, Operand::Const(Constant::GlobalObject)))
        });

        if self.ctx.environments.contains(&self.id) {
            self.env = Some(next);
            next += 1;
        }
        if uses_global {
            self.global = Some(next);
            next += 1;
        }
        if outer_store {
            self.scratch = Some(next);
            next += 1;
        }

        // Values first, then constant temporaries, both in layout order.
        let results: Vec<InstId> = placed
            .iter()
            .filter(|(_, _, kind)| kind.has_result() && !matches!(kind, InstKind::AllocStack { .. }))
            .map(|(_, id, _)| *id)
            .collect();
        let mut intervals = regalloc::value_intervals(function, &self.lin, &results);
        let mut temp_keys = Vec::new();
        for &(pos, _, kind) in &placed {
            for (index, operand) in kind.operands().into_iter().enumerate() {
                if let Operand::Const(c) = operand {
                    if !self.is_direct(kind, index, c) {
                        temp_keys.push((pos, index));
                    }
                }
            }
        }
        for block in &function.layout {
            let (_, pos) = self.lin.block(*block);
            match &function.block(*block).terminator {
                Terminator::Return(Operand::Const(c)) | Terminator::Throw(Operand::Const(c))
                    if !matches!(c, Constant::GlobalObject) =>
                {
                    temp_keys.push((pos, 0))
                }
                _ => {}
            }
        }
        for (i, (pos, _)) in temp_keys.iter().enumerate() {
            intervals.push(LiveInterval {
                vreg: VReg((results.len() + i) as u32),
                start: *pos,
                end: *pos,
            });
        }

        let allocation = regalloc::allocate(&intervals);
        for (i, id) in results.iter().enumerate() {
            self.values.insert(*id, next + allocation.registers[i]);
        }
        for (i, key) in temp_keys.iter().enumerate() {
            self.temps.insert(*key, next + allocation.registers[results.len() + i]);
        }

        self.frame_size = next + allocation.used + max_outgoing;
        if self.frame_size > MAX_REGISTERS {
            return Err(Error::TooManyRegisters {
                function: function.name.clone(),
                registers: self.frame_size,
                limit: MAX_REGISTERS,
            });
        }
        Ok(())
    }

    /// Whether a constant operand is consumed without its own register.
    fn is_direct(&self, kind: &InstKind, index: usize, c: &Constant) -> bool {
        if matches!(c, Constant::GlobalObject) {
            return true;
        }
        let string = matches!(c, Constant::String(_));
        match kind {
            InstKind::StoreStack { .. } => true,
            InstKind::StoreFrame { var, .. } => self.vars.contains_key(var),
            InstKind::LoadProperty { .. } | InstKind::DeleteProperty { .. } => index == 1 && string,
            InstKind::StoreProperty { .. } => index == 2 && string,
            InstKind::StoreOwnProperty { .. } => index == 2 && (string || array_index(c).is_some()),
            InstKind::Call { .. } | InstKind::Construct { .. } => index >= 1,
            _ => false,
        }
    }

    fn var_location(&self, var: VarId) -> Result<VarLocation> {
        if let Some(reg) = self.vars.get(&var) {
            return Ok(VarLocation::Register(*reg));
        }
        let owner = self.ctx.ir.variable(var).function;
        let slot = *self
            .ctx
            .env_slots
            .get(&var)
            .ok_or_else(|| Error::InternalError(format!("variable {} has no storage", var.0)))?;
        if owner == self.id {
            return Ok(VarLocation::Own(slot));
        }
        let level = self.ctx.env_level(self.id, owner).ok_or_else(|| {
            Error::InternalError(format!(
                "variable '{}' is not in scope of '{}'",
                self.ctx.ir.variable(var).name,
                self.function.name
            ))
        })?;
        Ok(VarLocation::Outer { level, slot })
    }

    // ------------------------------------------------------------------------
    // Instruction selection
    // ------------------------------------------------------------------------

    fn push(&mut self, op: OpCode, operands: &[i64]) {
        let operands = operands.iter().map(|v| Pending::Value(OperandValue::Int(*v))).collect();
        self.code.push(PendingInstr {
            op,
            operands,
            location: self.location,
        });
    }

    fn push_jump(&mut self, op: OpCode, target: BlockId, cond: Option<u32>) {
        let mut operands = vec![Pending::Label(target)];
        if let Some(cond) = cond {
            operands.push(Pending::Value(OperandValue::Int(cond as i64)));
        }
        self.code.push(PendingInstr {
            op,
            operands,
            location: self.location,
        });
    }

    fn string(&mut self, s: &str) -> u32 {
        self.module.strings.insert(s)
    }

    fn cache(&mut self) -> i64 {
        // Sites past the last index share the uncached slot 0.
        if self.cache_index < u8::MAX as u32 {
            self.cache_index += 1;
            self.cache_index as i64
        } else {
            0
        }
    }

    fn load_const(&mut self, dst: u32, c: &Constant) -> Result<()> {
        let r = dst as i64;
        match c {
            Constant::Undefined => self.push(OpCode::LoadConstUndefined, &[r]),
            Constant::Null => self.push(OpCode::LoadConstNull, &[r]),
            Constant::Bool(true) => self.push(OpCode::LoadConstTrue, &[r]),
            Constant::Bool(false) => self.push(OpCode::LoadConstFalse, &[r]),
            Constant::Number(n) => {
                let int = *n as i32;
                let exact = int as f64 == *n && !(*n == 0.0 && n.is_sign_negative());
                if exact && int == 0 {
                    self.push(OpCode::LoadConstZero, &[r]);
                } else if exact && (1..=255).contains(&int) {
                    self.push(OpCode::LoadConstUInt8, &[r, int as i64]);
                } else if exact {
                    self.push(OpCode::LoadConstInt, &[r, int as i64]);
                } else {
                    self.code.push(PendingInstr {
                        op: OpCode::LoadConstDouble,
                        operands: vec![
                            Pending::Value(OperandValue::Int(r)),
                            Pending::Value(OperandValue::Double(*n)),
                        ],
                        location: self.location,
                    });
                }
            }
            Constant::String(s) => {
                let id = self.string(s);
                let op = short_or_long(id, OpCode::LoadConstString, OpCode::LoadConstStringLongIndex);
                self.push(op, &[r, id as i64]);
            }
            Constant::BigInt(digits) => {
                let id = self
                    .module
                    .bigints
                    .insert(digits)
                    .ok_or_else(|| Error::InternalError(format!("malformed BigInt literal {digits}")))?;
                let op = short_or_long(id, OpCode::LoadConstBigInt, OpCode::LoadConstBigIntLongIndex);
                self.push(op, &[r, id as i64]);
            }
            Constant::GlobalObject => {
                let global = self.global_reg()?;
                self.push(OpCode::Mov, &[r, global as i64]);
            }
        }
        Ok(())
    }

    fn global_reg(&self) -> Result<u32> {
        self.global
            .ok_or_else(|| Error::InternalError("global object register missing".into()))
    }

    /// Register holding operand `index` of the instruction at `pos`. Constant
    /// operands are loaded into their temporary first.
    fn operand(&mut self, pos: u32, index: usize, operand: &Operand) -> Result<i64> {
        match operand {
            Operand::Value(id) => self
                .values
                .get(id)
                .map(|r| *r as i64)
                .ok_or_else(|| Error::InternalError(format!("value %{} has no register", id.0))),
            Operand::Const(Constant::GlobalObject) => Ok(self.global_reg()? as i64),
            Operand::Const(c) => {
                let temp = *self
                    .temps
                    .get(&(pos, index))
                    .ok_or_else(|| Error::InternalError(format!("no temporary for operand {index} at {pos}")))?;
                self.load_const(temp, c)?;
                Ok(temp as i64)
            }
        }
    }

    fn load_into(&mut self, dst: u32, operand: &Operand) -> Result<()> {
        match operand {
            Operand::Value(_) => {
                let src = self.operand(0, 0, operand)?;
                if src != dst as i64 {
                    self.push(OpCode::Mov, &[dst as i64, src]);
                }
                Ok(())
            }
            Operand::Const(c) => self.load_const(dst, c),
        }
    }

    fn result(&self, id: InstId) -> i64 {
        self.values.get(&id).copied().unwrap_or(0) as i64
    }

    fn set_location(&mut self, span: Span, statement: u32) {
        if span != Span::DUMMY {
            let at = self.ctx.source.line_col(span.start);
            self.location = Some((at.line, at.column, statement));
        }
    }

    fn run(mut self) -> Result<Emitted> {
        if let Some(env) = self.env {
            self.push(OpCode::CreateEnvironment, &[env as i64]);
        }
        if let Some(global) = self.global {
            self.push(OpCode::GetGlobalObject, &[global as i64]);
        }

        let function = self.function;
        let layout = &function.layout;
        for (i, block) in layout.iter().enumerate() {
            let start = self.code.len();
            self.labels.insert(*block, start);
            let b = function.block(*block);
            for inst in &b.insts {
                let instruction = function.inst(*inst);
                self.set_location(instruction.span, instruction.statement);
                let pos = self.lin.inst(*inst).unwrap_or(0);
                self.instruction(pos, *inst, &instruction.kind)?;
            }
            self.set_location(b.span, self.location.map_or(0, |l| l.2));
            let (_, pos) = self.lin.block(*block);
            self.terminator(pos, &b.terminator, layout.get(i + 1).copied())?;
            self.block_ranges.push((*block, start, self.code.len()));
        }

        let (code, offsets) = self.assemble()?;
        let exceptions = self.exception_table(&offsets);
        let debug = self.ctx.flags.debug_info.then(|| self.debug_info(&offsets));
        Ok((code, exceptions, self.frame_size, debug))
    }

    fn instruction(&mut self, pos: u32, id: InstId, kind: &InstKind) -> Result<()> {
        let dst = self.result(id);
        match kind {
            InstKind::AllocStack { .. } => {}
            InstKind::LoadStack { slot } => {
                let src = self.slot_reg(*slot)?;
                self.push(OpCode::Mov, &[dst, src as i64]);
            }
            InstKind::StoreStack { value, slot } => {
                let reg = self.slot_reg(*slot)?;
                self.load_into(reg, value)?;
            }
            InstKind::LoadFrame { var } => match self.var_location(*var)? {
                VarLocation::Register(reg) => self.push(OpCode::Mov, &[dst, reg as i64]),
                VarLocation::Own(slot) => {
                    let env = self.env.unwrap_or(0) as i64;
                    self.push(env_op(slot, OpCode::LoadFromEnvironment, OpCode::LoadFromEnvironmentL), &[dst, env, slot as i64]);
                }
                VarLocation::Outer { level, slot } => {
                    self.push(OpCode::GetEnvironment, &[dst, level as i64]);
                    self.push(env_op(slot, OpCode::LoadFromEnvironment, OpCode::LoadFromEnvironmentL), &[dst, dst, slot as i64]);
                }
            },
            InstKind::StoreFrame { value, var } => match self.var_location(*var)? {
                VarLocation::Register(reg) => self.load_into(reg, value)?,
                VarLocation::Own(slot) => {
                    let v = self.operand(pos, 0, value)?;
                    let env = self.env.unwrap_or(0) as i64;
                    self.push(env_op(slot, OpCode::StoreToEnvironment, OpCode::StoreToEnvironmentL), &[env, slot as i64, v]);
                }
                VarLocation::Outer { level, slot } => {
                    let v = self.operand(pos, 0, value)?;
                    let scratch = self
                        .scratch
                        .ok_or_else(|| Error::InternalError("scratch register missing".into()))? as i64;
                    self.push(OpCode::GetEnvironment, &[scratch, level as i64]);
                    self.push(env_op(slot, OpCode::StoreToEnvironment, OpCode::StoreToEnvironmentL), &[scratch, slot as i64, v]);
                }
            },
            InstKind::DeclareGlobalVar { name } => {
                let s = self.string(name);
                self.push(OpCode::DeclareGlobalVar, &[s as i64]);
            }
            InstKind::TryLoadGlobalProperty { name } => {
                let global = self.global_reg()? as i64;
                let cache = self.cache();
                let s = self.string(name);
                self.push(short_or_long(s, OpCode::TryGetById, OpCode::TryGetByIdLong), &[dst, global, cache, s as i64]);
            }
            InstKind::TryStoreGlobalProperty { value, name } => {
                let v = self.operand(pos, 0, value)?;
                let global = self.global_reg()? as i64;
                let cache = self.cache();
                let s = self.string(name);
                self.push(short_or_long(s, OpCode::TryPutById, OpCode::TryPutByIdLong), &[global, v, cache, s as i64]);
            }
            InstKind::LoadProperty { object, key } => {
                let obj = self.operand(pos, 0, object)?;
                match key {
                    Operand::Const(Constant::String(name)) => {
                        let cache = self.cache();
                        let s = self.string(name);
                        self.push(short_or_long(s, OpCode::GetById, OpCode::GetByIdLong), &[dst, obj, cache, s as i64]);
                    }
                    _ => {
                        let k = self.operand(pos, 1, key)?;
                        self.push(OpCode::GetByVal, &[dst, obj, k]);
                    }
                }
            }
            InstKind::StoreProperty { value, object, key } => {
                let v = self.operand(pos, 0, value)?;
                let obj = self.operand(pos, 1, object)?;
                match key {
                    Operand::Const(Constant::String(name)) => {
                        let cache = self.cache();
                        let s = self.string(name);
                        self.push(short_or_long(s, OpCode::PutById, OpCode::PutByIdLong), &[obj, v, cache, s as i64]);
                    }
                    _ => {
                        let k = self.operand(pos, 2, key)?;
                        self.push(OpCode::PutByVal, &[obj, k, v]);
                    }
                }
            }
            InstKind::StoreOwnProperty { value, object, key } => {
                let v = self.operand(pos, 0, value)?;
                let obj = self.operand(pos, 1, object)?;
                match key.as_const() {
                    Some(Constant::String(name)) => {
                        let s = self.string(name);
                        self.push(short_or_long(s, OpCode::PutNewOwnById, OpCode::PutNewOwnByIdLong), &[obj, v, s as i64]);
                    }
                    Some(c) if array_index(c).is_some() => {
                        let index = array_index(c).unwrap_or(0);
                        let op = if index <= u8::MAX as u32 { OpCode::PutOwnByIndex } else { OpCode::PutOwnByIndexL };
                        self.push(op, &[obj, v, index as i64]);
                    }
                    _ => {
                        let k = self.operand(pos, 2, key)?;
                        self.push(OpCode::PutOwnByVal, &[obj, v, k, 1]);
                    }
                }
            }
            InstKind::DeleteProperty { object, key } => {
                let obj = self.operand(pos, 0, object)?;
                match key {
                    Operand::Const(Constant::String(name)) => {
                        let s = self.string(name);
                        self.push(short_or_long(s, OpCode::DelById, OpCode::DelByIdLong), &[dst, obj, s as i64]);
                    }
                    _ => {
                        let k = self.operand(pos, 1, key)?;
                        self.push(OpCode::DelByVal, &[dst, obj, k]);
                    }
                }
            }
            InstKind::AllocObject { .. } => self.push(OpCode::NewObject, &[dst]),
            InstKind::AllocObjectLiteral { keys, values } => {
                let (k, v) = self
                    .module
                    .literals
                    .add_object(keys, values, &mut self.module.strings)
                    .ok_or_else(|| Error::InternalError("object literal is not bufferable".into()))?;
                let count = keys.len().min(u16::MAX as usize) as i64;
                let op = if k.max(v) <= u16::MAX as u32 {
                    OpCode::NewObjectWithBuffer
                } else {
                    OpCode::NewObjectWithBufferLong
                };
                self.push(op, &[dst, count, count, k as i64, v as i64]);
            }
            InstKind::AllocArray { elements, size_hint } => {
                let hint = (*size_hint).min(u16::MAX as u32) as i64;
                if elements.is_empty() {
                    self.push(OpCode::NewArray, &[dst, hint]);
                } else {
                    let offset = self
                        .module
                        .literals
                        .add_array(elements, &mut self.module.strings)
                        .ok_or_else(|| Error::InternalError("array literal is not bufferable".into()))?;
                    let count = elements.len().min(u16::MAX as usize) as i64;
                    let op = short_or_long(offset, OpCode::NewArrayWithBuffer, OpCode::NewArrayWithBufferLong);
                    self.push(op, &[dst, hint, count, offset as i64]);
                }
            }
            InstKind::CreateRegExp { pattern, flags } => {
                let p = self.string(pattern);
                let f = self.string(flags);
                self.push(OpCode::CreateRegExp, &[dst, p as i64, f as i64]);
            }
            InstKind::CreateClosure { function } => {
                let index = *self
                    .ctx
                    .indices
                    .get(function)
                    .ok_or_else(|| Error::InternalError(format!("closure over dead function {}", function.0)))?;
                let env = match self.env {
                    Some(env) => env as i64,
                    None => {
                        self.push(OpCode::GetEnvironment, &[dst, 0]);
                        dst
                    }
                };
                let op = short_or_long(index, OpCode::CreateClosure, OpCode::CreateClosureLongIndex);
                self.push(op, &[dst, env, index as i64]);
            }
            InstKind::CreateArguments => self.push(OpCode::CreateArguments, &[dst]),
            InstKind::LoadParam { index } => {
                let op = if *index <= u8::MAX as u32 { OpCode::LoadParam } else { OpCode::LoadParamLong };
                self.push(op, &[dst, *index as i64]);
            }
            InstKind::LoadThisNS => self.push(OpCode::LoadThisNS, &[dst]),
            InstKind::LoadCallee => self.push(OpCode::GetCallee, &[dst]),
            InstKind::BinaryOp { op, left, right } => {
                let l = self.operand(pos, 0, left)?;
                let r = self.operand(pos, 1, right)?;
                self.push(binary_opcode(*op)?, &[dst, l, r]);
            }
            InstKind::UnaryOp { op, operand } => {
                if *op == UnaryOp::Void {
                    self.push(OpCode::LoadConstUndefined, &[dst]);
                } else {
                    let v = self.operand(pos, 0, operand)?;
                    self.push(unary_opcode(*op), &[dst, v]);
                }
            }
            InstKind::Call { callee, this, args } => {
                let c = self.operand(pos, 0, callee)?;
                let argc = args.len() as u32 + 1;
                let base = self.frame_size - argc;
                self.load_into(base, this)?;
                for (i, arg) in args.iter().enumerate() {
                    self.load_into(base + 1 + i as u32, arg)?;
                }
                let op = if argc <= u8::MAX as u32 { OpCode::Call } else { OpCode::CallLong };
                self.push(op, &[dst, c, argc as i64]);
            }
            InstKind::Construct { callee, args } => {
                let c = self.operand(pos, 0, callee)?;
                let argc = args.len() as u32 + 1;
                let base = self.frame_size - argc;
                self.push(OpCode::LoadConstUndefined, &[base as i64]);
                for (i, arg) in args.iter().enumerate() {
                    self.load_into(base + 1 + i as u32, arg)?;
                }
                let op = if argc <= u8::MAX as u32 { OpCode::Construct } else { OpCode::ConstructLong };
                self.push(op, &[dst, c, argc as i64]);
            }
            InstKind::DirectEval { argument, strict } => {
                let a = self.operand(pos, 0, argument)?;
                self.push(OpCode::DirectEval, &[dst, a, *strict as i64]);
            }
            InstKind::GetPNameList { object } => {
                let o = self.operand(pos, 0, object)?;
                self.push(OpCode::GetPNameList, &[dst, o]);
            }
            InstKind::GetNextPName { iterator } => {
                let i = self.operand(pos, 0, iterator)?;
                self.push(OpCode::GetNextPName, &[dst, i]);
            }
            InstKind::IteratorBegin { iterable } => {
                let i = self.operand(pos, 0, iterable)?;
                self.push(OpCode::IteratorBegin, &[dst, i]);
            }
            InstKind::IteratorNext { iterator } => {
                let i = self.operand(pos, 0, iterator)?;
                self.push(OpCode::IteratorNext, &[dst, i]);
            }
            InstKind::Catch => self.push(OpCode::Catch, &[dst]),
            InstKind::Debugger => self.push(OpCode::Debugger, &[]),
            InstKind::ThrowConstAssignment { name } => {
                let s = self.string(name);
                self.push(OpCode::ThrowConstAssignment, &[s as i64]);
            }
        }
        Ok(())
    }

    fn slot_reg(&self, slot: InstId) -> Result<u32> {
        self.slots
            .get(&slot)
            .copied()
            .ok_or_else(|| Error::InternalError(format!("stack slot %{} missing", slot.0)))
    }

    fn terminator(&mut self, pos: u32, terminator: &Terminator, next: Option<BlockId>) -> Result<()> {
        match terminator {
            Terminator::Branch(target) => {
                if Some(*target) != next {
                    self.push_jump(OpCode::Jmp, *target, None);
                }
            }
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => {
                if let Some(truthy) = cond.as_const().and_then(Constant::truthiness) {
                    let target = if truthy { *then_block } else { *else_block };
                    if Some(target) != next {
                        self.push_jump(OpCode::Jmp, target, None);
                    }
                    return Ok(());
                }
                let c = self.operand(pos, 0, cond)? as u32;
                if Some(*then_block) == next {
                    self.push_jump(OpCode::JmpFalse, *else_block, Some(c));
                } else {
                    self.push_jump(OpCode::JmpTrue, *then_block, Some(c));
                    if Some(*else_block) != next {
                        self.push_jump(OpCode::Jmp, *else_block, None);
                    }
                }
            }
            Terminator::Return(value) => {
                let v = self.operand(pos, 0, value)?;
                self.push(OpCode::Ret, &[v]);
            }
            Terminator::Throw(value) => {
                let v = self.operand(pos, 0, value)?;
                self.push(OpCode::Throw, &[v]);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------------

    /// Picks jump widths and encodes. Returns the code and the offset of
    /// every instruction plus the end offset.
    fn assemble(&mut self) -> Result<(Vec<u8>, Vec<u32>)> {
        // Jumps start short and only ever grow, so this terminates.
        loop {
            let offsets = self.offsets();
            let mut grew = false;
            for i in 0..self.code.len() {
                let instr = &self.code[i];
                let Some(long) = instr.op.long_jump() else {
                    continue;
                };
                if let Some(Pending::Label(target)) = instr.operands.first().copied() {
                    let delta = self.label_offset(target, &offsets)? as i64 - offsets[i] as i64;
                    if i8::try_from(delta).is_err() {
                        self.code[i].op = long;
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }

        let offsets = self.offsets();
        let mut out = Vec::with_capacity(offsets.last().copied().unwrap_or(0) as usize);
        for (i, instr) in self.code.iter().enumerate() {
            let mut operands = Vec::with_capacity(instr.operands.len());
            for operand in &instr.operands {
                operands.push(match operand {
                    Pending::Value(v) => *v,
                    Pending::Label(target) => {
                        OperandValue::Int(self.label_offset(*target, &offsets)? as i64 - offsets[i] as i64)
                    }
                });
            }
            encode(instr.op, &operands, &mut out)?;
        }
        Ok((out, offsets))
    }

    fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.code.len() + 1);
        let mut at = 0;
        for instr in &self.code {
            offsets.push(at);
            at += instr.op.size() as u32;
        }
        offsets.push(at);
        offsets
    }

    fn label_offset(&self, block: BlockId, offsets: &[u32]) -> Result<u32> {
        self.labels
            .get(&block)
            .and_then(|i| offsets.get(*i))
            .copied()
            .ok_or_else(|| Error::InternalError(format!("jump to unplaced block %BB{}", block.0)))
    }

    fn exception_table(&self, offsets: &[u32]) -> Vec<ExceptionHandler> {
        let mut table: Vec<ExceptionHandler> = Vec::new();
        for (block, first, last) in &self.block_ranges {
            let Some(handler) = self.function.block(*block).handler else {
                continue;
            };
            let (start, end) = (offsets[*first], offsets[*last]);
            let Ok(target) = self.label_offset(handler, offsets) else {
                continue;
            };
            if start == end {
                continue;
            }
            match table.last_mut() {
                Some(prev) if prev.target == target && prev.end == start => prev.end = end,
                _ => table.push(ExceptionHandler { start, end, target }),
            }
        }
        table
    }

    fn debug_info(&self, offsets: &[u32]) -> FunctionDebugInfo {
        let mut locations: Vec<DebugLocation> = Vec::new();
        for (i, instr) in self.code.iter().enumerate() {
            let Some((line, column, statement)) = instr.location else {
                continue;
            };
            let same = locations
                .last()
                .is_some_and(|l| (l.line, l.column, l.statement) == (line, column, statement));
            if !same {
                locations.push(DebugLocation {
                    address: offsets[i],
                    line,
                    column,
                    statement,
                });
            }
        }

        let ir = self.ctx.ir;
        let mut variables = vec![String::new(); self.ctx.env_sizes.get(&self.id).copied().unwrap_or(0) as usize];
        let mut registers = Vec::new();
        for var in &self.function.frame {
            let name = ir.variable(*var).name.clone();
            if let Some(reg) = self.vars.get(var) {
                registers.push((*reg, name));
            } else if let Some(slot) = self.ctx.env_slots.get(var) {
                if let Some(entry) = variables.get_mut(*slot as usize) {
                    *entry = name;
                }
            }
        }
        FunctionDebugInfo {
            locations,
            variables,
            registers,
        }
    }
}

fn short_or_long(index: u32, short: OpCode, long: OpCode) -> OpCode {
    if index <= u16::MAX as u32 { short } else { long }
}

fn env_op(slot: u32, short: OpCode, long: OpCode) -> OpCode {
    if slot <= u8::MAX as u32 { short } else { long }
}

/// The constant as an array index, when it is one.
fn array_index(c: &Constant) -> Option<u32> {
    match c {
        Constant::Number(n) if *n >= 0.0 && *n < u32::MAX as f64 && n.fract() == 0.0 && !n.is_sign_negative() => {
            Some(*n as u32)
        }
        _ => None,
    }
}

fn binary_opcode(op: BinaryOperator) -> Result<OpCode> {
    use BinaryOperator::*;
    Ok(match op {
        Add => OpCode::Add,
        Subtract => OpCode::Sub,
        Multiply => OpCode::Mul,
        Divide => OpCode::Div,
        Modulo => OpCode::Mod,
        Exponent => OpCode::Exp,
        Equal => OpCode::Eq,
        NotEqual => OpCode::Neq,
        StrictEqual => OpCode::StrictEq,
        StrictNotEqual => OpCode::StrictNeq,
        LessThan => OpCode::Less,
        LessThanEqual => OpCode::LessEq,
        GreaterThan => OpCode::Greater,
        GreaterThanEqual => OpCode::GreaterEq,
        BitwiseAnd => OpCode::BitAnd,
        BitwiseOr => OpCode::BitOr,
        BitwiseXor => OpCode::BitXor,
        LeftShift => OpCode::LShift,
        RightShift => OpCode::RShift,
        UnsignedRightShift => OpCode::URshift,
        In => OpCode::IsIn,
        InstanceOf => OpCode::InstanceOf,
        LogicalAnd | LogicalOr | NullishCoalescing => {
            return Err(Error::InternalError(format!("short-circuit operator {op:?} reached the emitter")));
        }
    })
}

fn unary_opcode(op: UnaryOp) -> OpCode {
    match op {
        UnaryOp::Minus => OpCode::Negate,
        UnaryOp::Plus => OpCode::ToNumber,
        UnaryOp::Not => OpCode::Not,
        UnaryOp::BitNot => OpCode::BitNot,
        UnaryOp::TypeOf => OpCode::TypeOf,
        UnaryOp::Inc => OpCode::Inc,
        UnaryOp::Dec => OpCode::Dec,
        UnaryOp::ToNumeric | UnaryOp::Void => OpCode::ToNumeric,
    }
}
