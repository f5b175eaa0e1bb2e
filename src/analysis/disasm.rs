use rabbitizer::{Instruction, InstructionDisplayFlags, InstructionFlags, IsaVersion, Vram};

/// Classification of a decoded instruction, fixed once at decode time so the
/// passes downstream can match exhaustively instead of comparing mnemonic
/// strings.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InsKind {
    /// Branch-class: conditional branches, `bal`, and unconditional `j`,
    /// with the resolved absolute target.
    Branch { target: u32 },
    /// `jal` with its absolute target.
    Call { target: u32 },
    /// `jr $ra`.
    Return,
    /// `jr` through any other register; a jump-table dispatch candidate.
    JumpReg { rs: u8 },
    /// `lui`, the upper half of a potential split-immediate pair.
    Hi,
    /// `mtc0`/`mfc0`, needing the rd field re-extracted from the encoding.
    CoprocMove,
    /// Decoder-synthesized `move`, to be decomposed to its real opcode.
    MovePseudo,
    Nop,
    Other,
}

/// One decoded instruction. Immutable once decoded; the resolver only ever
/// derives new display text, it never touches these fields.
#[derive(Debug, Clone)]
pub struct Ins {
    pub vram: u32,
    pub rom: u32,
    pub code: u32,
    pub mnemonic: String,
    pub operands: String,
    pub kind: InsKind,
    pub delay_slot: bool,
}

impl Ins {
    pub fn rs(&self) -> u8 { ((self.code >> 21) & 0x1F) as u8 }

    pub fn rt(&self) -> u8 { ((self.code >> 16) & 0x1F) as u8 }

    pub fn rd(&self) -> u8 { ((self.code >> 11) & 0x1F) as u8 }

    /// Sign-extended low 16 bits of the encoding.
    pub fn imm_lo(&self) -> i32 { (self.code & 0xFFFF) as u16 as i16 as i32 }

    pub fn is_nop(&self) -> bool { matches!(self.kind, InsKind::Nop) }
}

/// Decodes a big-endian code range into instruction records. Trailing bytes
/// that don't fill a word are ignored; the range planner guarantees there are
/// none for well-formed configs.
pub fn decode(bytes: &[u8], vram: u32, rom: u32) -> Vec<Ins> {
    let flags = InstructionFlags::new(IsaVersion::MIPS_III).with_j_as_branch(true);
    let display_flags = InstructionDisplayFlags::new();
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let offset = (i * 4) as u32;
        out.push(adapt(word, vram + offset, rom + offset, flags, &display_flags));
    }
    out
}

fn adapt(
    word: u32,
    vram: u32,
    rom: u32,
    flags: InstructionFlags,
    display_flags: &InstructionDisplayFlags,
) -> Ins {
    let instr = Instruction::new(word, Vram::new(vram), flags);
    if !instr.is_valid() {
        // Data in the middle of a code range; pass it through as a word.
        return Ins {
            vram,
            rom,
            code: word,
            mnemonic: ".word".to_string(),
            operands: format!("{word:#010X}"),
            kind: InsKind::Other,
            delay_slot: false,
        };
    }

    let imm_override: Option<&str> = None;
    let text = instr.display(display_flags, imm_override, 0).to_string();
    let (mnemonic, operands) = match text.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic.to_string(), rest.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    };

    let kind = classify(&instr, word, &mnemonic);
    Ins {
        vram,
        rom,
        code: word,
        mnemonic,
        operands,
        kind,
        delay_slot: instr.opcode().has_delay_slot(),
    }
}

fn classify(instr: &Instruction, word: u32, mnemonic: &str) -> InsKind {
    if instr.is_nop() {
        InsKind::Nop
    } else if instr.is_return() {
        InsKind::Return
    } else if instr.is_jumptable_jump() {
        InsKind::JumpReg { rs: ((word >> 21) & 0x1F) as u8 }
    } else if instr.opcode().is_jump_with_address() && instr.opcode().does_link() {
        match instr.get_instr_index_as_vram() {
            Some(target) => InsKind::Call { target: target.inner() },
            None => InsKind::Other,
        }
    } else if let Some(target) = instr.get_branch_vram_generic() {
        InsKind::Branch { target: target.inner() }
    } else if let Some(target) = instr.get_instr_index_as_vram() {
        // `j` when the decoder doesn't fold it into the branch class.
        InsKind::Branch { target: target.inner() }
    } else if mnemonic == "lui" {
        InsKind::Hi
    } else if mnemonic == "mtc0" || mnemonic == "mfc0" {
        InsKind::CoprocMove
    } else if mnemonic == "move" {
        InsKind::MovePseudo
    } else {
        InsKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn field_extraction() {
        // lw $v0, 0x3450($t0)
        let ins = Ins {
            vram: 0x80000000,
            rom: 0x1000,
            code: 0x8D02_3450,
            mnemonic: "lw".to_string(),
            operands: "$v0, 0x3450($t0)".to_string(),
            kind: InsKind::Other,
            delay_slot: false,
        };
        assert_eq!(ins.rs(), 8);
        assert_eq!(ins.rt(), 2);
        assert_eq!(ins.imm_lo(), 0x3450);

        // Negative immediate sign-extends.
        let ins = Ins { code: 0x8D02_FFF0, ..ins };
        assert_eq!(ins.imm_lo(), -0x10);
    }

    #[test]
    fn decode_classifies_core_forms() {
        let bytes = words(&[
            0x0C00_048D, // jal 0x80001234
            0x0000_0000, // nop
            0x03E0_0008, // jr $ra
            0x0060_0008, // jr $v1
            0x3C08_8012, // lui $t0, 0x8012
        ]);
        let ins = decode(&bytes, 0x80000000, 0x1000);
        assert_eq!(ins.len(), 5);
        assert_eq!(ins[0].kind, InsKind::Call { target: 0x80001234 });
        assert_eq!(ins[1].kind, InsKind::Nop);
        assert_eq!(ins[2].kind, InsKind::Return);
        assert_eq!(ins[3].kind, InsKind::JumpReg { rs: 3 });
        assert_eq!(ins[4].kind, InsKind::Hi);
        assert_eq!(ins[4].mnemonic, "lui");
        // Addresses advance one word at a time over both spaces.
        assert_eq!(ins[4].vram, 0x80000010);
        assert_eq!(ins[4].rom, 0x1010);
    }

    #[test]
    fn decode_branch_target() {
        // bne $t0, $zero, .+0x10 (imm counts words from the delay slot)
        let bytes = words(&[0x1500_0003]);
        let ins = decode(&bytes, 0x80000100, 0x0);
        assert_eq!(ins[0].kind, InsKind::Branch { target: 0x80000110 });
        assert!(!ins[0].is_nop());
    }
}
