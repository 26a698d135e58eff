// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Textual IR dump.
//!
//! Instructions and blocks are renumbered in layout order, so the dump of a
//! function does not depend on how many instructions the optimizer deleted.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use super::*;

/// Renders every live function of `module`.
pub fn dump_module(module: &IrModule) -> String {
    let mut out = String::new();
    for (index, (id, _)) in module.functions().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&dump_function(module, id));
    }
    out
}

/// Renders one function.
pub fn dump_function(module: &IrModule, id: FunctionId) -> String {
    let Some(function) = module.function(id) else {
        return String::new();
    };
    Printer::new(module, function).print(id)
}

struct Printer<'m> {
    module: &'m IrModule,
    function: &'m Function,
    values: FxHashMap<InstId, usize>,
    blocks: FxHashMap<BlockId, usize>,
}

impl<'m> Printer<'m> {
    fn new(module: &'m IrModule, function: &'m Function) -> Self {
        let mut values = FxHashMap::default();
        let mut blocks = FxHashMap::default();
        let mut next = 0;
        for (position, block) in function.layout.iter().enumerate() {
            blocks.insert(*block, position);
            for inst in &function.block(*block).insts {
                values.insert(*inst, next);
                next += 1;
            }
            // terminators take a number too
            next += 1;
        }
        Self {
            module,
            function,
            values,
            blocks,
        }
    }

    fn print(&self, id: FunctionId) -> String {
        let f = self.function;
        let mut out = String::new();
        let _ = writeln!(out, "function {}({})", f.name, f.params.join(", "));
        let frame: Vec<&str> = f
            .frame
            .iter()
            .map(|v| self.module.variable(*v).name.as_str())
            .collect();
        if id == FunctionId::GLOBAL {
            let _ = writeln!(
                out,
                "frame = [{}], globals = [{}]",
                frame.join(", "),
                self.module.globals.join(", ")
            );
        } else {
            let _ = writeln!(out, "frame = [{}]", frame.join(", "));
        }

        let mut number = 0;
        for block_id in &f.layout {
            let block = f.block(*block_id);
            match block.handler {
                Some(handler) => {
                    let _ = writeln!(out, "{}: // handler {}", self.block(*block_id), self.block(handler));
                }
                None => {
                    let _ = writeln!(out, "{}:", self.block(*block_id));
                }
            }
            for inst in &block.insts {
                let kind = &f.inst(*inst).kind;
                let operands = self.inst_operands(kind);
                let _ = writeln!(out, "  %{number} = {}{}", kind.name(), spaced(&operands));
                number += 1;
            }
            let operands = self.terminator_operands(&block.terminator);
            let _ = writeln!(
                out,
                "  %{number} = {}{}",
                block.terminator.name(),
                spaced(&operands)
            );
            number += 1;
        }
        out.push_str("function_end\n");
        out
    }

    fn block(&self, id: BlockId) -> String {
        match self.blocks.get(&id) {
            Some(position) => format!("%BB{position}"),
            None => format!("%BB?{}", id.0),
        }
    }

    fn value(&self, id: InstId) -> String {
        match self.values.get(&id) {
            Some(n) => format!("%{n}"),
            None => format!("%?{}", id.0),
        }
    }

    fn constant(c: &Constant) -> String {
        format!("{c} : {}", c.value_type())
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Const(c) => Self::constant(c),
            Operand::Value(id) => match self.function.result_type(*id) {
                ValueType::Any => self.value(*id),
                ty => format!("{} : {ty}", self.value(*id)),
            },
        }
    }

    fn string(s: &str) -> String {
        Self::constant(&Constant::String(s.to_string()))
    }

    fn var(&self, var: VarId) -> String {
        format!("[{}]", self.module.variable(var).name)
    }

    fn inst_operands(&self, kind: &InstKind) -> Vec<String> {
        let global = || Self::constant(&Constant::GlobalObject);
        match kind {
            InstKind::AllocStack { name } => vec![format!("${name}")],
            InstKind::LoadStack { slot } => vec![self.value(*slot)],
            InstKind::StoreStack { value, slot } => vec![self.operand(value), self.value(*slot)],
            InstKind::LoadFrame { var } => vec![self.var(*var)],
            InstKind::StoreFrame { value, var } => vec![self.operand(value), self.var(*var)],
            InstKind::DeclareGlobalVar { name } | InstKind::ThrowConstAssignment { name } => {
                vec![Self::string(name)]
            }
            InstKind::TryLoadGlobalProperty { name } => vec![global(), Self::string(name)],
            InstKind::TryStoreGlobalProperty { value, name } => {
                vec![self.operand(value), global(), Self::string(name)]
            }
            InstKind::AllocObject { size_hint } => {
                vec![Self::constant(&Constant::Number(f64::from(*size_hint)))]
            }
            InstKind::AllocObjectLiteral { keys, values } => keys
                .iter()
                .zip(values)
                .flat_map(|(k, v)| [Self::constant(k), Self::constant(v)])
                .collect(),
            InstKind::AllocArray {
                elements,
                size_hint,
            } => std::iter::once(Self::constant(&Constant::Number(f64::from(*size_hint))))
                .chain(elements.iter().map(Self::constant))
                .collect(),
            InstKind::CreateRegExp { pattern, flags } => {
                vec![Self::string(pattern), Self::string(flags)]
            }
            InstKind::CreateClosure { function } => {
                let name = self
                    .module
                    .function(*function)
                    .map(|f| f.name.as_str())
                    .filter(|n| !n.is_empty())
                    .unwrap_or("anonymous");
                vec![format!("%{name}()")]
            }
            InstKind::LoadParam { index: 0 } => vec!["%this".to_string()],
            InstKind::LoadParam { index } => {
                let name = self
                    .function
                    .params
                    .get(*index as usize - 1)
                    .cloned()
                    .unwrap_or_else(|| format!("arg{index}"));
                vec![format!("%{name}")]
            }
            InstKind::BinaryOp { op, left, right } => vec![
                format!("'{}'", binary_symbol(*op)),
                self.operand(left),
                self.operand(right),
            ],
            InstKind::UnaryOp { op, operand } => {
                vec![format!("'{}'", op.symbol()), self.operand(operand)]
            }
            other => other.operands().into_iter().map(|o| self.operand(o)).collect(),
        }
    }

    fn terminator_operands(&self, terminator: &Terminator) -> Vec<String> {
        match terminator {
            Terminator::Branch(target) => vec![self.block(*target)],
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => vec![
                self.operand(cond),
                self.block(*then_block),
                self.block(*else_block),
            ],
            Terminator::Return(value) | Terminator::Throw(value) => vec![self.operand(value)],
        }
    }
}

fn spaced(operands: &[String]) -> String {
    if operands.is_empty() {
        String::new()
    } else {
        format!(" {}", operands.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(kind: InstKind) -> Instruction {
        Instruction {
            kind,
            span: Span::DUMMY,
            statement: 0,
        }
    }

    #[test]
    fn test_dump_layout() {
        let mut module = IrModule::new();
        let id = module.reserve_function();
        let mut f = Function::new("global", FunctionKind::Global, true, Span::DUMMY);
        let entry = f.add_block(Terminator::Return(Operand::undefined()));
        let slot = f.add_inst(inst(InstKind::AllocStack {
            name: "?anon_0_ret".into(),
        }));
        let store = f.add_inst(inst(InstKind::StoreStack {
            value: Operand::undefined(),
            slot,
        }));
        let load = f.add_inst(inst(InstKind::LoadStack { slot }));
        f.block_mut(entry).insts = vec![slot, store, load];
        f.block_mut(entry).terminator = Terminator::Return(Operand::Value(load));
        module.set_function(id, f);
        module.globals.push("x".into());

        let expected = "\
function global()
frame = [], globals = [x]
%BB0:
  %0 = AllocStackInst $?anon_0_ret
  %1 = StoreStackInst undefined : undefined, %0
  %2 = LoadStackInst %0
  %3 = ReturnInst %2
function_end
";
        assert_eq!(dump_module(&module), expected);
    }

    #[test]
    fn test_typed_values_show_their_type() {
        let mut module = IrModule::new();
        let id = module.reserve_function();
        let mut f = Function::new("global", FunctionKind::Global, false, Span::DUMMY);
        let entry = f.add_block(Terminator::Return(Operand::undefined()));
        let nan = f.add_inst(inst(InstKind::TryLoadGlobalProperty { name: "NaN".into() }));
        let ty = f.add_inst(inst(InstKind::UnaryOp {
            op: UnaryOp::TypeOf,
            operand: Operand::Value(nan),
        }));
        f.block_mut(entry).insts = vec![nan, ty];
        f.block_mut(entry).terminator = Terminator::Return(Operand::Value(ty));
        module.set_function(id, f);

        let text = dump_module(&module);
        assert!(text.contains("%1 = UnaryOperatorInst 'typeof', %0 : number"));
        assert!(text.contains("%2 = ReturnInst %1 : string"));
    }
}
