//! Quickened code and its ancillary data array
//!
//! Quickening copies a code unit's static stream into a mutable stream of
//! [`QuickInstr`], turning every family opcode into its family's adaptive
//! member, and allocates one shared array of 8-byte [`CacheEntry`] slots.
//!
//! A family site at position `p` whose quickened operand is `o` owns the
//! entries starting at `p / 2 + o`. Offsets are laid out in stream order with
//! a cursor, so the reserved ranges never overlap. An offset that does not fit
//! in the operand byte leaves the site as its plain generic opcode.
//!
//! All mutation goes through [`Cell`], so frames executing the same unit
//! (recursion) share one view of the stream. Every slot is written whole and
//! specialized members re-check their guards on each execution, so a frame
//! that observes a stale entry only takes the generic path.

mod cache;
mod family;
pub(crate) mod specialize;
mod stats;

pub use cache::{AdaptiveEntry, CacheEntry, VersionPair};
pub use family::{BinaryAddOp, CallOp, LoadAttrOp, LoadGlobalOp, QuickInstr, QuickOp};
pub use stats::{FamilyReport, FamilyStats, SiteInfo, SiteState, SpecFailure, SpecializationStats, StatsReport};

use crate::bytecode::{CodeUnit, Family, Instruction};
use crate::error::{Error, Result};
use std::cell::Cell;
use std::mem;
use std::ops::Range;

/// The mutable execution form of a code unit
pub struct QuickenedCode {
    instructions: Box<[Cell<QuickInstr>]>,
    cache: Box<[Cell<CacheEntry>]>,
}

impl QuickenedCode {
    /// Quicken a static stream within a byte budget
    pub(crate) fn quicken(code: &[Instruction], memory_limit: usize) -> Result<Self> {
        let mut layout = Vec::with_capacity(code.len());
        let mut cursor = 0usize;
        for (position, instruction) in code.iter().enumerate() {
            let Some(family) = instruction.opcode.family() else {
                layout.push(QuickInstr::plain(*instruction));
                continue;
            };
            let entries = family.cache_entries();
            if entries == 0 {
                // Counter lives in the operand
                layout.push(QuickInstr::new(QuickOp::adaptive(family), 0));
                continue;
            }
            let base = cursor.max(position / 2);
            match u8::try_from(base - position / 2) {
                Ok(offset) => {
                    layout.push(QuickInstr::new(QuickOp::adaptive(family), offset));
                    cursor = base + entries;
                }
                Err(_) => layout.push(QuickInstr::plain(*instruction)),
            }
        }

        let requested = code.len() * mem::size_of::<Cell<QuickInstr>>()
            + cursor * mem::size_of::<Cell<CacheEntry>>();
        if requested > memory_limit {
            return Err(Error::memory_limit_exceeded(requested, memory_limit));
        }

        let mut instructions: Vec<Cell<QuickInstr>> = Vec::new();
        instructions
            .try_reserve_exact(layout.len())
            .map_err(|_| Error::allocation_failed(requested))?;
        let mut cache: Vec<Cell<CacheEntry>> = Vec::new();
        cache
            .try_reserve_exact(cursor)
            .map_err(|_| Error::allocation_failed(requested))?;

        instructions.extend(layout.into_iter().map(Cell::new));
        cache.resize_with(cursor, || Cell::new(CacheEntry::EMPTY));

        let quickened = Self {
            instructions: instructions.into_boxed_slice(),
            cache: cache.into_boxed_slice(),
        };
        // Seed each two-entry site with its original operand
        for (position, instruction) in code.iter().enumerate() {
            if quickened.cache_range(position).is_some() {
                quickened.set_adaptive_entry(position, AdaptiveEntry::new(instruction.arg));
            }
        }
        Ok(quickened)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of ancillary entries
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Bytes held by the quickened stream and the ancillary array
    pub fn memory_size(&self) -> usize {
        self.instructions.len() * mem::size_of::<Cell<QuickInstr>>()
            + self.cache.len() * mem::size_of::<Cell<CacheEntry>>()
    }

    /// Instruction at a position
    #[inline]
    pub fn instr(&self, position: usize) -> QuickInstr {
        self.instructions[position].get()
    }

    /// Snapshot of the whole quickened stream
    pub fn instructions(&self) -> Vec<QuickInstr> {
        self.instructions.iter().map(Cell::get).collect()
    }

    /// Snapshot of the raw ancillary array
    pub fn cache_bits(&self) -> Vec<u64> {
        self.cache.iter().map(|entry| entry.get().bits()).collect()
    }

    /// Entries reserved by the quickened site at a position
    pub fn cache_range(&self, position: usize) -> Option<Range<usize>> {
        let instr = self.instructions.get(position)?.get();
        let entries = instr.op.family()?.cache_entries();
        if entries == 0 {
            return None;
        }
        let base = position / 2 + instr.arg as usize;
        Some(base..base + entries)
    }

    #[inline]
    fn entry(&self, position: usize, slot: usize) -> CacheEntry {
        let base = position / 2 + self.instructions[position].get().arg as usize;
        self.cache.get(base + slot).map_or(CacheEntry::EMPTY, Cell::get)
    }

    #[inline]
    fn set_entry(&self, position: usize, slot: usize, entry: CacheEntry) {
        let base = position / 2 + self.instructions[position].get().arg as usize;
        debug_assert!(base + slot < self.cache.len());
        if let Some(cell) = self.cache.get(base + slot) {
            cell.set(entry);
        }
    }

    /// First entry of a two-entry site
    #[inline]
    pub fn adaptive_entry(&self, position: usize) -> AdaptiveEntry {
        self.entry(position, 0).into()
    }

    #[inline]
    pub(crate) fn set_adaptive_entry(&self, position: usize, entry: AdaptiveEntry) {
        self.set_entry(position, 0, entry.into());
    }

    /// Second entry of a two-entry site
    #[inline]
    pub fn versions(&self, position: usize) -> VersionPair {
        self.entry(position, 1).into()
    }

    #[inline]
    pub(crate) fn set_versions(&self, position: usize, versions: VersionPair) {
        self.set_entry(position, 1, versions.into());
    }

    fn has_entries(&self, position: usize) -> bool {
        self.instructions[position]
            .get()
            .op
            .family()
            .is_some_and(|family| family.cache_entries() > 0)
    }

    /// Execution counter (adaptive) or saturating counter (specialized)
    #[inline]
    pub fn counter(&self, position: usize) -> u8 {
        if self.has_entries(position) {
            self.adaptive_entry(position).counter
        } else {
            self.instructions[position].get().arg
        }
    }

    #[inline]
    pub(crate) fn set_counter(&self, position: usize, counter: u8) {
        if self.has_entries(position) {
            let mut entry = self.adaptive_entry(position);
            entry.counter = counter;
            self.set_adaptive_entry(position, entry);
        } else {
            let cell = &self.instructions[position];
            let mut instr = cell.get();
            instr.arg = counter;
            cell.set(instr);
        }
    }

    /// Count one adaptive execution; true once the site is due for specialization
    pub(crate) fn tick_adaptive(&self, position: usize, threshold: u8) -> bool {
        let executions = self.counter(position).saturating_add(1);
        self.set_counter(position, executions);
        executions >= threshold
    }

    /// Forget adaptive progress after a refused specialization
    pub(crate) fn reset_adaptive(&self, position: usize) {
        self.set_counter(position, 0);
    }

    /// Swap the member at a site. The operand (cache offset) is kept, so the
    /// site keeps its entries.
    fn rewrite(&self, position: usize, op: QuickOp) {
        let cell = &self.instructions[position];
        let mut instr = cell.get();
        debug_assert_eq!(instr.op.family(), op.family(), "rewrite crossed families");
        debug_assert!(op.family().is_some());
        instr.op = op;
        cell.set(instr);
    }

    /// Install a specialized member with a fresh saturating counter
    pub(crate) fn specialize(&self, position: usize, op: QuickOp, counter: u8) {
        self.rewrite(position, op);
        self.set_counter(position, counter);
    }

    /// Return a site to its family's adaptive member
    pub(crate) fn deoptimize(&self, position: usize, family: Family) {
        self.rewrite(position, QuickOp::adaptive(family));
        self.set_counter(position, 0);
    }

    /// Instrumentation for every family site
    pub fn sites(&self) -> Vec<SiteInfo> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(position, cell)| {
                let instr = cell.get();
                let state = match instr.op {
                    QuickOp::Plain(opcode) if opcode.family().is_some() => SiteState::Unquickened,
                    QuickOp::Plain(_) => return None,
                    op if op.is_adaptive() => SiteState::Adaptive {
                        executions: self.counter(position),
                    },
                    _ => SiteState::Specialized {
                        counter: self.counter(position),
                    },
                };
                Some(SiteInfo {
                    position,
                    opcode: instr.op.base_opcode(),
                    op: instr.op,
                    state,
                })
            })
            .collect()
    }

    /// Disassemble the current quickened stream
    pub fn disassemble(&self, code: &CodeUnit) -> String {
        let mut output = format!(
            "== {} (quickened, {} entries) ==\n",
            code.name(),
            self.cache.len()
        );
        for (position, cell) in self.instructions.iter().enumerate() {
            let instr = cell.get();
            let operand = match (instr.op, self.cache_range(position)) {
                (QuickOp::Plain(opcode), _) => code.format_operand(Instruction::new(opcode, instr.arg)),
                (op, Some(range)) => {
                    let entry = self.adaptive_entry(position);
                    format!(
                        "{} cache={}..{} counter={}",
                        code.format_operand(Instruction::new(op.base_opcode(), entry.original_arg)),
                        range.start,
                        range.end,
                        entry.counter
                    )
                }
                (_, None) => format!("counter={}", instr.arg),
            };
            output.push_str(&format!("{:04} {:24} {}\n", position, instr.op.name(), operand));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use pretty_assertions::assert_eq;

    const NO_LIMIT: usize = usize::MAX;

    fn stream(ops: &[(Opcode, u8)]) -> Vec<Instruction> {
        ops.iter().map(|&(op, arg)| Instruction::new(op, arg)).collect()
    }

    #[test]
    fn test_family_sites_become_adaptive() {
        let code = stream(&[
            (Opcode::LoadGlobal, 0),
            (Opcode::LoadConst, 1),
            (Opcode::BinaryAdd, 0),
            (Opcode::Return, 0),
        ]);
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        assert_eq!(q.len(), 4);
        assert_eq!(q.instr(0).op, QuickOp::LoadGlobal(LoadGlobalOp::Adaptive));
        assert_eq!(q.instr(1), QuickInstr::plain(code[1]));
        assert_eq!(q.instr(2), QuickInstr::new(QuickOp::BinaryAdd(BinaryAddOp::Adaptive), 0));
        assert_eq!(q.cache_len(), 2);
        assert_eq!(q.adaptive_entry(0), AdaptiveEntry::new(0));
    }

    #[test]
    fn test_dense_sites_do_not_overlap() {
        // Four consecutive two-entry sites need eight entries from position 0
        let code = stream(&[
            (Opcode::LoadGlobal, 3),
            (Opcode::LoadAttr, 4),
            (Opcode::LoadAttr, 5),
            (Opcode::Call, 1),
            (Opcode::Return, 0),
        ]);
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        let ranges: Vec<_> = (0..4).map(|p| q.cache_range(p).unwrap()).collect();
        assert_eq!(ranges, vec![0..2, 2..4, 4..6, 6..8]);
        assert_eq!(q.instr(3).arg, 5); // 3 / 2 + 5 == 6
        for (position, instruction) in code.iter().take(4).enumerate() {
            assert_eq!(q.adaptive_entry(position).original_arg, instruction.arg);
        }
    }

    #[test]
    fn test_sparse_sites_use_zero_offset() {
        let mut code = vec![Instruction::new(Opcode::Nop, 0); 20];
        code[10] = Instruction::new(Opcode::LoadGlobal, 0);
        code[16] = Instruction::new(Opcode::LoadGlobal, 0);
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        assert_eq!(q.instr(10).arg, 0);
        assert_eq!(q.instr(16).arg, 0);
        assert_eq!(q.cache_range(10), Some(5..7));
        assert_eq!(q.cache_range(16), Some(8..10));
        assert_eq!(q.cache_len(), 10);
    }

    #[test]
    fn test_offset_overflow_leaves_site_unquickened() {
        // 300 consecutive two-entry sites outrun the operand byte
        let code: Vec<_> = (0..300).map(|_| Instruction::new(Opcode::LoadGlobal, 0)).collect();
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        let sites = q.sites();
        let unquickened: Vec<_> = sites
            .iter()
            .filter(|site| site.state == SiteState::Unquickened)
            .map(|site| site.position)
            .collect();
        assert!(!unquickened.is_empty());
        for position in unquickened.iter().copied() {
            assert_eq!(q.instr(position), QuickInstr::plain(code[position]));
            assert_eq!(q.cache_range(position), None);
        }

        // Every quickened range is in bounds and disjoint from the others
        let mut owned = vec![false; q.cache_len()];
        for position in 0..code.len() {
            if let Some(range) = q.cache_range(position) {
                for slot in range {
                    assert!(!owned[slot], "entry {} shared", slot);
                    owned[slot] = true;
                }
            }
        }
    }

    #[test]
    fn test_quickening_is_deterministic() {
        let code = stream(&[
            (Opcode::LoadGlobal, 0),
            (Opcode::LoadAttr, 1),
            (Opcode::LoadFast, 0),
            (Opcode::BinaryAdd, 0),
            (Opcode::LoadGlobal, 2),
            (Opcode::Call, 1),
            (Opcode::Return, 0),
        ]);
        let first = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        let second = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        assert_eq!(first.instructions(), second.instructions());
        assert_eq!(first.cache_bits(), second.cache_bits());
        assert_eq!(first.memory_size(), second.memory_size());
    }

    #[test]
    fn test_memory_limit() {
        let code = stream(&[(Opcode::LoadGlobal, 0), (Opcode::Return, 0)]);
        let err = QuickenedCode::quicken(&code, 8).err().unwrap();
        assert!(matches!(
            err,
            Error::ResourceLimitError {
                kind: crate::error::ResourceLimitKind::MemoryLimit,
                ..
            }
        ));
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        assert!(q.memory_size() >= 16);
        assert!(QuickenedCode::quicken(&code, q.memory_size()).is_ok());
    }

    #[test]
    fn test_counters_for_both_layouts() {
        let code = stream(&[(Opcode::Call, 2), (Opcode::BinaryAdd, 0)]);
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();

        assert!(!q.tick_adaptive(0, 2));
        assert!(q.tick_adaptive(0, 2));
        assert_eq!(q.counter(0), 2);
        assert_eq!(q.adaptive_entry(0).original_arg, 2);
        q.reset_adaptive(0);
        assert_eq!(q.counter(0), 0);

        assert!(!q.tick_adaptive(1, 3));
        assert_eq!(q.instr(1).arg, 1);
        q.specialize(1, QuickOp::BinaryAdd(BinaryAddOp::Int), 4);
        assert_eq!(q.instr(1), QuickInstr::new(QuickOp::BinaryAdd(BinaryAddOp::Int), 4));
        q.deoptimize(1, Family::BinaryAdd);
        assert_eq!(q.instr(1), QuickInstr::new(QuickOp::BinaryAdd(BinaryAddOp::Adaptive), 0));
    }

    #[test]
    fn test_specialize_keeps_cache_offset() {
        let code = stream(&[(Opcode::LoadAttr, 0), (Opcode::LoadAttr, 1), (Opcode::LoadAttr, 2)]);
        let q = QuickenedCode::quicken(&code, NO_LIMIT).unwrap();
        let before = q.cache_range(2);
        q.specialize(2, QuickOp::LoadAttr(LoadAttrOp::InstanceValue), 4);
        assert_eq!(q.cache_range(2), before);
        assert_eq!(q.adaptive_entry(2).original_arg, 2);
        assert_eq!(q.counter(2), 4);
        assert_eq!(
            q.sites()[2].state,
            SiteState::Specialized { counter: 4 }
        );
    }

    #[test]
    fn test_disassemble_shows_members() {
        let mut builder = crate::bytecode::CodeBuilder::new("dis");
        builder.emit_name(Opcode::LoadGlobal, "abs").unwrap();
        builder.emit_op(Opcode::Return);
        let unit = builder.build().unwrap();
        let q = unit.quicken(NO_LIMIT).unwrap();
        let text = q.disassemble(&unit);
        assert!(text.contains("LoadGlobalAdaptive"));
        assert!(text.contains("0 (abs) cache=0..2 counter=0"));
    }
}
