use tracing::{debug, warn};

use crate::{
    analysis::{
        context::ResolutionContext,
        disasm::{Ins, InsKind},
    },
    obj::{AccessClass, FileRange, SymbolKind},
};

/// Mnemonics that can carry the low half of a split-immediate pair.
const LO_MNEMONICS: &[&str] = &[
    "addiu", "lw", "sw", "lh", "sh", "lhu", "lb", "sb", "lbu", "lwc1", "swc1", "ldc1", "sdc1",
];

/// How far past a `lui` the resolver looks for the matching low half.
const LO_LOOKAHEAD: usize = 8;

/// Resolved display form of an instruction's operands. Symbolic variants hold
/// addresses, not names; names are chosen only when the segment's rendering is
/// finalized, after every duplicate is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandRepr {
    Raw(String),
    /// Whole operand replaced by a function name.
    Call { target: u32 },
    /// Trailing branch target replaced by a local label.
    Branch { prefix: String, target: u32 },
    /// Immediate replaced by `%hi(sym)`.
    Hi { prefix: String, target: u32 },
    /// Immediate replaced by `%lo(sym)`, keeping any `($reg)` indexing.
    Lo { prefix: String, target: u32, suffix: String },
}

#[derive(Debug, Clone)]
pub struct ResolvedIns {
    pub rom: u32,
    pub vram: u32,
    pub code: u32,
    pub mnemonic: String,
    pub operands: OperandRepr,
    pub delay_slot: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedFunction {
    pub vram: u32,
    pub rom: u32,
    pub ins: Vec<ResolvedIns>,
}

/// Runs the single forward resolution pass over one function, then the
/// bounded split-immediate lookahead.
pub fn resolve_function(ctx: &mut ResolutionContext, ins: &[Ins]) -> ResolvedFunction {
    assert!(!ins.is_empty(), "empty function");
    let func_vram = ins[0].vram;
    let func_end = ins.last().unwrap().vram + 4;

    let mut out: Vec<ResolvedIns> = ins.iter().map(|i| resolve_one(ctx, func_vram, i)).collect();
    resolve_split_immediates(ctx, func_vram, func_end, ins, &mut out);

    ResolvedFunction { vram: func_vram, rom: ins[0].rom, ins: out }
}

fn resolve_one(ctx: &mut ResolutionContext, func_vram: u32, ins: &Ins) -> ResolvedIns {
    let mut mnemonic = ins.mnemonic.clone();
    let operands = match ins.kind {
        InsKind::MovePseudo => {
            // The decoder presents a synthetic alias; recover the real opcode
            // from the low six encoding bits.
            match ins.code & 0x3F {
                0x25 => mnemonic = "or".to_string(),
                0x2D => mnemonic = "daddu".to_string(),
                0x21 => mnemonic = "addu".to_string(),
                func => {
                    warn!(
                        "Unrecognized move pseudo-op at {:#010X} (function bits {:#04X}), passing through",
                        ins.vram, func
                    );
                    return raw(ins);
                }
            }
            OperandRepr::Raw(format!("{}, $zero", ins.operands))
        }
        InsKind::Call { target } => {
            let name = ctx.func_name(target);
            if !ctx.defined_funcs.contains(&name) {
                ctx.request_glabel(target);
            }
            OperandRepr::Call { target }
        }
        InsKind::Branch { target } => {
            ctx.add_label(func_vram, target);
            OperandRepr::Branch { prefix: operand_head(&ins.operands), target }
        }
        InsKind::CoprocMove => {
            // Re-derive the coprocessor register from the rd field; keep the
            // canonical two-operand form.
            let gpr = ins.operands.split(' ').next().unwrap_or("");
            OperandRepr::Raw(format!("{} ${}", gpr, ins.rd()))
        }
        InsKind::JumpReg { rs } => {
            ctx.jtbl_jumps.insert(ins.vram, rs);
            OperandRepr::Raw(ins.operands.clone())
        }
        _ => OperandRepr::Raw(ins.operands.clone()),
    };
    ResolvedIns {
        rom: ins.rom,
        vram: ins.vram,
        code: ins.code,
        mnemonic,
        operands,
        delay_slot: ins.delay_slot,
    }
}

fn raw(ins: &Ins) -> ResolvedIns {
    ResolvedIns {
        rom: ins.rom,
        vram: ins.vram,
        code: ins.code,
        mnemonic: ins.mnemonic.clone(),
        operands: OperandRepr::Raw(ins.operands.clone()),
        delay_slot: ins.delay_slot,
    }
}

/// Everything up to the final comma-separated operand, comma included.
fn operand_head(operands: &str) -> String {
    match operands.rsplit_once(", ") {
        Some((head, _)) => format!("{head}, "),
        None => String::new(),
    }
}

fn resolve_split_immediates(
    ctx: &mut ResolutionContext,
    func_vram: u32,
    func_end: u32,
    ins: &[Ins],
    out: &mut [ResolvedIns],
) {
    for i in 0..ins.len() {
        if ins[i].kind != InsKind::Hi || !matches!(out[i].operands, OperandRepr::Raw(_)) {
            continue;
        }
        let upper = ins[i].code & 0xFFFF;
        if upper < 0x8000 {
            // Small scratch constant, not the high half of an address.
            continue;
        }

        for j in i + 1..ins.len().min(i + 1 + LO_LOOKAHEAD) {
            if !LO_MNEMONICS.contains(&ins[j].mnemonic.as_str()) || ins[j].rs() != ins[i].rt() {
                continue;
            }
            // First matching-register use decides this lui, one way or the
            // other; an unresolved candidate is expected, not an error.
            if !matches!(out[j].operands, OperandRepr::Raw(_)) {
                break;
            }
            let addr = (upper << 16).wrapping_add_signed(ins[j].imm_lo());
            let Some(symbol) = ctx.symbols().lookup(addr) else {
                break;
            };
            let kind = symbol.kind;

            let (lo_prefix, lo_suffix) = match split_lo_operand(&ins[j].operands) {
                Some(parts) => parts,
                None => break,
            };

            if let Some(class) = AccessClass::from_mnemonic(&ins[j].mnemonic) {
                ctx.update_access(addr, class);
            }
            if kind == SymbolKind::JumpTable {
                ctx.jumptables.insert(addr, (func_vram, func_end));
            }

            out[i].operands =
                OperandRepr::Hi { prefix: operand_head(&ins[i].operands), target: addr };
            out[j].operands = OperandRepr::Lo { prefix: lo_prefix, target: addr, suffix: lo_suffix };
            break;
        }
    }
}

/// Splits the final operand of a low-half candidate around its immediate:
/// `"$v0, 0x3450($t0)"` → `("$v0, ", "($t0)")`. Returns `None` for operand
/// text the rewrite cannot safely take apart.
fn split_lo_operand(operands: &str) -> Option<(String, String)> {
    let (head, last) = match operands.rsplit_once(", ") {
        Some((head, last)) => (format!("{head}, "), last),
        None => (String::new(), operands),
    };
    match last.find('(') {
        Some(0) => None,
        Some(pos) => Some((head, last[pos..].to_string())),
        None => Some((head, String::new())),
    }
}

/// Correlates discovered jump tables with their dispatch sites: reads table
/// words out of the ROM while they land inside the owning function, each one
/// becoming a local label target.
pub fn scan_jump_tables(ctx: &mut ResolutionContext, rom: &[u8], range: &FileRange) {
    let tables: Vec<(u32, (u32, u32))> =
        ctx.jumptables.iter().map(|(&addr, &span)| (addr, span)).collect();
    for (table_vram, (func_start, func_end)) in tables {
        let Some(rom_offset) = range.vram_to_rom(table_vram) else {
            continue;
        };
        if rom_offset == 0 {
            continue;
        }
        let mut offset = rom_offset as usize;
        while offset + 4 <= rom.len() {
            let word =
                u32::from_be_bytes([rom[offset], rom[offset + 1], rom[offset + 2], rom[offset + 3]]);
            if word < func_start || word > func_end {
                break;
            }
            debug!("Jump table {table_vram:#010X} entry {word:#010X}");
            ctx.add_label(func_start, word);
            offset += 4;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        analysis::disasm::{Ins, InsKind},
        obj::{RangeKind, Symbol, SymbolTable},
    };

    fn ins(vram: u32, code: u32, mnemonic: &str, operands: &str, kind: InsKind) -> Ins {
        Ins {
            vram,
            rom: vram & 0xFFFFFF,
            code,
            mnemonic: mnemonic.to_string(),
            operands: operands.to_string(),
            kind,
            delay_slot: false,
        }
    }

    fn data_sym(table: &mut SymbolTable, name: &str, address: u32) {
        table.add(Symbol { name: name.to_string(), address, kind: SymbolKind::Data });
    }

    #[test]
    fn split_immediate_round_trip() {
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_80123450", 0x80123450);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x8D02_3450, "lw", "$v0, 0x3450($t0)", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(
            resolved.ins[0].operands,
            OperandRepr::Hi { prefix: "$t0, ".to_string(), target: 0x80123450 }
        );
        assert_eq!(
            resolved.ins[1].operands,
            OperandRepr::Lo {
                prefix: "$v0, ".to_string(),
                target: 0x80123450,
                suffix: "($t0)".to_string()
            }
        );
    }

    #[test]
    fn split_immediate_unknown_address_left_alone() {
        let table = SymbolTable::default();
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x8D02_3450, "lw", "$v0, 0x3450($t0)", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(resolved.ins[0].operands, OperandRepr::Raw("$t0, 0x8012".to_string()));
        assert_eq!(resolved.ins[1].operands, OperandRepr::Raw("$v0, 0x3450($t0)".to_string()));
    }

    #[test]
    fn split_immediate_stops_at_first_candidate() {
        // The first matching-register use has no known symbol; the resolver
        // must not keep scanning to the later, resolvable one.
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_80123450", 0x80123450);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x8D02_9990, "lw", "$v0, -0x6670($t0)", InsKind::Other),
            ins(0x80000408, 0x8D03_3450, "lw", "$v1, 0x3450($t0)", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        for r in &resolved.ins {
            assert!(matches!(r.operands, OperandRepr::Raw(_)));
        }
    }

    #[test]
    fn split_immediate_negative_low_half() {
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_8012FFF0", 0x8012FFF0);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8013, "lui", "$t0, 0x8013", InsKind::Hi),
            ins(0x80000404, 0x8D02_FFF0, "lw", "$v0, -0x10($t0)", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(
            resolved.ins[1].operands,
            OperandRepr::Lo {
                prefix: "$v0, ".to_string(),
                target: 0x8012FFF0,
                suffix: "($t0)".to_string()
            }
        );
    }

    #[test]
    fn split_immediate_addiu_has_no_suffix() {
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_80123450", 0x80123450);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x2502_3450, "addiu", "$v0, $t0, 0x3450", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(
            resolved.ins[1].operands,
            OperandRepr::Lo {
                prefix: "$v0, $t0, ".to_string(),
                target: 0x80123450,
                suffix: String::new()
            }
        );
    }

    #[test]
    fn split_immediate_ignores_other_base_registers() {
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_80123450", 0x80123450);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        // Base register $t1 (9), lui target $t0 (8).
        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x8D22_3450, "lw", "$v0, 0x3450($t1)", InsKind::Other),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert!(matches!(resolved.ins[0].operands, OperandRepr::Raw(_)));
        assert!(matches!(resolved.ins[1].operands, OperandRepr::Raw(_)));
    }

    #[test]
    fn call_records_glabel_request() {
        let table = SymbolTable::default();
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x0C00_048D, "jal", "0x80001234", InsKind::Call { target: 0x80001234 }),
            ins(0x80000404, 0, "nop", "", InsKind::Nop),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(resolved.ins[0].operands, OperandRepr::Call { target: 0x80001234 });
        let pending: Vec<_> = ctx.pending_glabels().collect();
        assert_eq!(pending, vec![(&0x80001234, &"func_80001234".to_string())]);
    }

    #[test]
    fn call_to_defined_function_not_requested() {
        let mut table = SymbolTable::default();
        table.add(Symbol {
            name: "osInit".to_string(),
            address: 0x80001234,
            kind: SymbolKind::Function,
        });
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);
        ctx.defined_funcs.insert("osInit".to_string());

        let func =
            [ins(0x80000400, 0x0C00_048D, "jal", "0x80001234", InsKind::Call { target: 0x80001234 })];
        resolve_function(&mut ctx, &func);
        assert_eq!(ctx.pending_glabels().count(), 0);
    }

    #[test]
    fn branch_registers_local_label() {
        let table = SymbolTable::default();
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(
                0x80000400,
                0x1500_0001,
                "bne",
                "$t0, $zero, 0x8000040C",
                InsKind::Branch { target: 0x8000040C },
            ),
            ins(0x80000404, 0, "nop", "", InsKind::Nop),
            ins(0x80000408, 0, "nop", "", InsKind::Nop),
        ];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(
            resolved.ins[0].operands,
            OperandRepr::Branch { prefix: "$t0, $zero, ".to_string(), target: 0x8000040C }
        );
        assert!(ctx.take_label(0x80000400, 0x8000040C));
    }

    #[test]
    fn move_pseudo_decomposes_to_real_opcode() {
        let table = SymbolTable::default();
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        // addu encoding (function bits 0x21)
        let func = [ins(0x80000400, 0x0200_2021, "move", "$a0, $s0", InsKind::MovePseudo)];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(resolved.ins[0].mnemonic, "addu");
        assert_eq!(resolved.ins[0].operands, OperandRepr::Raw("$a0, $s0, $zero".to_string()));

        // or encoding (0x25)
        let func = [ins(0x80000400, 0x0200_2025, "move", "$a0, $s0", InsKind::MovePseudo)];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(resolved.ins[0].mnemonic, "or");
    }

    #[test]
    fn coproc_move_uses_encoded_rd() {
        let table = SymbolTable::default();
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        // mtc0 $t0, rd=9
        let func = [ins(0x80000400, 0x4088_4800, "mtc0", "$t0, $12", InsKind::CoprocMove)];
        let resolved = resolve_function(&mut ctx, &func);
        assert_eq!(resolved.ins[0].operands, OperandRepr::Raw("$t0, $9".to_string()));
    }

    #[test]
    fn access_width_tracks_precedence_across_references() {
        let mut table = SymbolTable::default();
        data_sym(&mut table, "D_80123450", 0x80123450);
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);

        let func = [
            ins(0x80000400, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000404, 0x2502_3450, "addiu", "$v0, $t0, 0x3450", InsKind::Other),
            ins(0x80000408, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x8000040C, 0x9502_3450, "lhu", "$v0, 0x3450($t0)", InsKind::Other),
            ins(0x80000410, 0x3C08_8012, "lui", "$t0, 0x8012", InsKind::Hi),
            ins(0x80000414, 0xA102_3450, "sb", "$v0, 0x3450($t0)", InsKind::Other),
        ];
        resolve_function(&mut ctx, &func);
        assert_eq!(ctx.access(0x80123450), Some(AccessClass::Short));
    }

    #[test]
    fn jump_table_scan_collects_in_span_words() {
        let mut table = SymbolTable::default();
        table.add(Symbol {
            name: "jtbl_80000500".to_string(),
            address: 0x80000500,
            kind: SymbolKind::JumpTable,
        });
        let mut ctx = ResolutionContext::new(&table, BTreeSet::new(), 0x1000);
        ctx.jumptables.insert(0x80000500, (0x80000400, 0x80000480));

        let range = FileRange {
            start: 0x1000,
            end: 0x2000,
            name: "main".to_string(),
            vram: 0x80000400,
            kind: RangeKind::C,
        };
        // ROM image: the table lives at rom 0x1100 and holds two in-span
        // entries followed by an out-of-span word that stops the scan.
        let mut rom = vec![0u8; 0x2000];
        rom[0x1100..0x1104].copy_from_slice(&0x80000420u32.to_be_bytes());
        rom[0x1104..0x1108].copy_from_slice(&0x80000440u32.to_be_bytes());
        rom[0x1108..0x110C].copy_from_slice(&0x00000000u32.to_be_bytes());

        scan_jump_tables(&mut ctx, &rom, &range);
        assert!(ctx.take_label(0x80000400, 0x80000420));
        assert!(ctx.take_label(0x80000400, 0x80000440));
        assert_eq!(ctx.leftover_labels(0x80000400), 0);
    }
}
