use tracing::debug;

use crate::analysis::{
    context::ResolutionContext,
    resolver::{OperandRepr, ResolvedFunction, ResolvedIns},
};

/// One line of a rendered function. Symbol names stay as addresses until
/// [`render_function`] runs, after the whole segment's labels are known, so
/// duplicate-name disambiguation needs no second pass over emitted text.
#[derive(Debug, Clone)]
pub enum AsmLine {
    Glabel { addr: u32 },
    Label { addr: u32 },
    Ins { ins: ResolvedIns, indent: bool },
}

#[derive(Debug, Clone)]
pub struct FunctionLayout {
    pub vram: u32,
    pub rom: u32,
    pub lines: Vec<AsmLine>,
}

/// Builds the line list for one function: the global label, pending local
/// labels interleaved at their instruction, and the delay-slot indent flag.
/// Registers the function's label as emitted with the context.
pub fn layout_function(ctx: &mut ResolutionContext, func: &ResolvedFunction) -> FunctionLayout {
    ctx.add_glabel(func.vram);
    let mut lines = vec![AsmLine::Glabel { addr: func.vram }];

    let mut indent_next = false;
    for ins in &func.ins {
        if ctx.take_label(func.vram, ins.vram) {
            lines.push(AsmLine::Label { addr: ins.vram });
        }
        lines.push(AsmLine::Ins { ins: ins.clone(), indent: indent_next });
        indent_next = ins.delay_slot;
    }

    let leftover = ctx.leftover_labels(func.vram);
    if leftover > 0 {
        // Branch targets outside the function body (tail jumps into a
        // neighbor); they get no local label here.
        debug!("{leftover} unplaced label(s) in function at {:#010X}", func.vram);
        ctx.clear_labels(func.vram);
    }

    FunctionLayout { vram: func.vram, rom: func.rom, lines }
}

/// Renders a laid-out function to text, resolving every symbolic placeholder
/// through the context's finalized names.
pub fn render_function(
    ctx: &ResolutionContext,
    layout: &FunctionLayout,
    mnemonic_ljust: usize,
) -> String {
    let mut out = String::new();
    for line in &layout.lines {
        match line {
            AsmLine::Glabel { addr } => {
                out.push_str(&format!("glabel {}\n", ctx.final_func_name(*addr)));
            }
            AsmLine::Label { addr } => {
                out.push_str(&format!(".L{addr:X}:\n"));
            }
            AsmLine::Ins { ins, indent } => {
                let mnemonic = if *indent {
                    format!(" {}", ins.mnemonic)
                } else {
                    ins.mnemonic.clone()
                };
                out.push_str(&format!(
                    "/* {:X} {:X} {:08X} */  {:<width$}{}\n",
                    ins.rom,
                    ins.vram,
                    ins.code,
                    mnemonic,
                    operand_text(ctx, &ins.operands),
                    width = mnemonic_ljust
                ));
            }
        }
    }
    out
}

fn operand_text(ctx: &ResolutionContext, operands: &OperandRepr) -> String {
    match operands {
        OperandRepr::Raw(text) => text.clone(),
        OperandRepr::Call { target } => ctx.final_func_name(*target),
        OperandRepr::Branch { prefix, target } => format!("{prefix}.L{target:X}"),
        OperandRepr::Hi { prefix, target } => {
            format!("{prefix}%hi({})", symbol_display_name(ctx, *target))
        }
        OperandRepr::Lo { prefix, target, suffix } => {
            format!("{prefix}%lo({}){suffix}", symbol_display_name(ctx, *target))
        }
    }
}

fn symbol_display_name(ctx: &ResolutionContext, addr: u32) -> String {
    use crate::obj::SymbolKind;
    match ctx.symbols().lookup(addr) {
        Some(sym) if sym.kind != SymbolKind::Function => sym.name.clone(),
        _ => ctx.final_func_name(addr),
    }
}

/// Header for a standalone assembly file covering a whole code range.
pub fn file_header(section_name: &str) -> String {
    let mut out = String::new();
    out.push_str(".include \"macro.inc\"\n");
    out.push('\n');
    out.push_str("# assembler directives\n");
    out.push_str(".set noat      # allow manual use of $at\n");
    out.push_str(".set noreorder # don't insert nops after branches\n");
    out.push_str(".set gp=64     # allow use of 64-bit general purpose registers\n");
    out.push('\n');
    out.push_str(&format!(".section {section_name}, \"ax\"\n"));
    out.push('\n');
    out
}

/// Header for per-function files that get included from C translation units.
pub fn gcc_inc_header() -> String {
    let mut out = String::new();
    out.push_str(".set noat      # allow manual use of $at\n");
    out.push_str(".set noreorder # don't insert nops after branches\n");
    out.push('\n');
    out
}
