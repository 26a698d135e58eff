// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Liveness and linear-scan register allocation.
//!
//! Instructions and terminators are numbered in layout order. A value is
//! live from its definition to its last use, stretched over every block it
//! is live into or out of, so loops keep their values alive across the back
//! edge. Intervals are then assigned the lowest free register in order of
//! their start, ties broken by the order the values were numbered.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, Function, InstId, Operand};

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

/// Inclusive range of positions a virtual register must survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    /// The register
    pub vreg: VReg,
    /// Position of the definition
    pub start: u32,
    /// Position of the last use
    pub end: u32,
}

/// Positions of the instructions and terminators of a function.
#[derive(Debug, Default)]
pub struct Linearization {
    insts: FxHashMap<InstId, u32>,
    blocks: FxHashMap<BlockId, (u32, u32)>,
    len: u32,
}

impl Linearization {
    /// Numbers every placed instruction, then the block's terminator.
    pub fn new(function: &Function) -> Self {
        let mut lin = Self::default();
        for block in &function.layout {
            let start = lin.len;
            for inst in &function.block(*block).insts {
                lin.insts.insert(*inst, lin.len);
                lin.len += 1;
            }
            lin.blocks.insert(*block, (start, lin.len));
            lin.len += 1;
        }
        lin
    }

    /// Position of an instruction.
    pub fn inst(&self, id: InstId) -> Option<u32> {
        self.insts.get(&id).copied()
    }

    /// Position of a block's first instruction and of its terminator.
    pub fn block(&self, id: BlockId) -> (u32, u32) {
        self.blocks.get(&id).copied().unwrap_or((0, 0))
    }
}

/// Live intervals of the instruction results listed in `values`, which
/// become `VReg(0)`, `VReg(1)` and so on in that order.
pub fn value_intervals(function: &Function, lin: &Linearization, values: &[InstId]) -> Vec<LiveInterval> {
    let tracked: FxHashMap<InstId, usize> = values.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let mut start: Vec<u32> = values.iter().map(|v| lin.inst(*v).unwrap_or(0)).collect();
    let mut end = start.clone();

    let extend = |operand: &Operand, pos: u32, start: &mut Vec<u32>, end: &mut Vec<u32>| {
        if let Some(index) = operand.as_value().and_then(|v| tracked.get(&v)) {
            start[*index] = start[*index].min(pos);
            end[*index] = end[*index].max(pos);
        }
    };

    // Block-local uses and definitions.
    let mut uses: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
    let mut defs: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
    for block in &function.layout {
        let b = function.block(*block);
        let (_, term_pos) = lin.block(*block);
        let block_uses = uses.entry(*block).or_default();
        let block_defs = defs.entry(*block).or_default();
        for inst in &b.insts {
            let pos = lin.inst(*inst).unwrap_or(0);
            for operand in function.inst(*inst).kind.operands() {
                extend(operand, pos, &mut start, &mut end);
                if let Some(v) = operand.as_value() {
                    if !block_defs.contains(&v) {
                        block_uses.insert(v);
                    }
                }
            }
            block_defs.insert(*inst);
        }
        for operand in b.terminator.operands() {
            extend(operand, term_pos, &mut start, &mut end);
            if let Some(v) = operand.as_value() {
                if !block_defs.contains(&v) {
                    block_uses.insert(v);
                }
            }
        }
    }

    // Backward dataflow to a fixpoint.
    let mut live_in: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
    let mut live_out: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
    let mut changed = true;
    while changed {
        changed = false;
        for block in function.layout.iter().rev() {
            let mut out: FxHashSet<InstId> = FxHashSet::default();
            for succ in function.successors(*block) {
                if let Some(set) = live_in.get(&succ) {
                    out.extend(set.iter().copied());
                }
            }
            let mut inn: FxHashSet<InstId> = uses.get(block).cloned().unwrap_or_default();
            let block_defs = defs.get(block);
            inn.extend(out.iter().copied().filter(|v| !block_defs.is_some_and(|d| d.contains(v))));
            if live_in.get(block) != Some(&inn) {
                live_in.insert(*block, inn);
                changed = true;
            }
            live_out.insert(*block, out);
        }
    }

    for block in &function.layout {
        let (first, last) = lin.block(*block);
        for (sets, pos) in [(&live_in, first), (&live_out, last)] {
            if let Some(set) = sets.get(block) {
                for v in set {
                    extend(&Operand::Value(*v), pos, &mut start, &mut end);
                }
            }
        }
    }

    (0..values.len())
        .map(|i| LiveInterval {
            vreg: VReg(i as u32),
            start: start[i],
            end: end[i],
        })
        .collect()
}

/// Result of [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Register of each virtual register, relative to the first value register
    pub registers: Vec<u32>,
    /// Number of distinct registers used
    pub used: u32,
}

/// Linear scan over `intervals`, indexed by virtual register number.
pub fn allocate(intervals: &[LiveInterval]) -> Allocation {
    let mut order: Vec<&LiveInterval> = intervals.iter().collect();
    order.sort_by_key(|iv| (iv.start, iv.vreg.0));

    let mut registers = vec![0; intervals.len()];
    let mut active: Vec<(u32, u32)> = Vec::new(); // (end, register)
    let mut free: Vec<u32> = Vec::new();
    let mut used = 0;

    for iv in order {
        active.retain(|&(end, reg)| {
            if end < iv.start {
                free.push(reg);
                false
            } else {
                true
            }
        });
        free.sort_unstable_by(|a, b| b.cmp(a));
        let reg = match free.pop() {
            Some(reg) => reg,
            None => {
                used += 1;
                used - 1
            }
        };
        registers[iv.vreg.0 as usize] = reg;
        active.push((iv.end, reg));
    }

    Allocation { registers, used }
}
