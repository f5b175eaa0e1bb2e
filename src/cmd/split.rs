use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Result};
use argp::FromArgs;
use path_slash::PathBufExt;
use sanitise_file_name::sanitise;
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{
        boundaries::detect_functions,
        context::ResolutionContext,
        disasm,
        resolver::{self, ResolvedFunction},
    },
    obj::{ranges::plan_segment, FileRange, RangeKind, Segment, SymbolTable},
    util::{
        asm,
        config::{self, Compiler, Options},
        csource,
        file::{read_rom, write_bin_file, write_text_file},
        ldscript,
    },
};

#[derive(FromArgs, PartialEq, Debug)]
/// Splits a ROM image into per-function assembly, source stubs, raw
/// binaries, and a linker script.
#[argp(subcommand, name = "split")]
pub struct Args {
    #[argp(positional)]
    /// project configuration (YAML)
    config: PathBuf,
    #[argp(positional)]
    /// ROM image (Yay0-compressed images are decompressed transparently)
    rom: PathBuf,
    #[argp(option, short = 'o')]
    /// output directory (defaults to the current directory)
    out: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    let config = config::load_config(&args.config)?;
    let symbols = match &config.symbol_addrs {
        Some(symbol_path) => {
            let path = match args.config.parent() {
                Some(parent) => parent.join(symbol_path),
                None => symbol_path.clone(),
            };
            config::load_symbols(path)?
        }
        None => SymbolTable::default(),
    };
    let rom = read_rom(&args.rom)?;
    let out = args.out.clone().unwrap_or_else(|| PathBuf::from("."));

    // Plan and validate every segment up front; nothing is decoded or
    // written until the whole configuration is known to be sound.
    let segments =
        config.segments.iter().map(plan_segment).collect::<Result<Vec<Segment>>>()?;
    for seg in &segments {
        ensure!(
            (seg.rom_end as usize) <= rom.len(),
            "Segment '{}' ends at {:#X}, past the end of the ROM ({:#X})",
            seg.name,
            seg.rom_end,
            rom.len()
        );
    }

    let mut all_functions: BTreeSet<String> = BTreeSet::new();
    let mut undefined: BTreeMap<u32, String> = BTreeMap::new();
    let mut failures = 0usize;

    for seg in &segments {
        info!("Splitting segment '{}' ({:#X}..{:#X})", seg.name, seg.rom_start, seg.rom_end);
        let mut ctx = ResolutionContext::new(&symbols, all_functions.clone(), seg.rom_start);
        for range in &seg.ranges {
            if let Err(e) = split_range(&config.options, &mut ctx, seg, range, &rom, &out) {
                // One broken artifact doesn't take the rest of the segment
                // down with it.
                error!("Failed to split range '{}': {e:?}", range.name);
                failures += 1;
            }
        }
        for (addr, sym) in &symbols.data {
            if let Some(class) = ctx.access(*addr) {
                debug!("{} observed with access width {}", sym.name, class.size());
            }
        }
        for (addr, name) in ctx.pending_glabels() {
            undefined.insert(*addr, name.clone());
        }
        all_functions.extend(ctx.emitted_names().iter().cloned());
    }

    // Requests satisfied by a label some other segment ended up emitting are
    // not undefined after all.
    undefined.retain(|_, name| !all_functions.contains(name));
    if !undefined.is_empty() {
        let text: String =
            undefined.iter().map(|(addr, name)| format!("{name} = 0x{addr:X};\n")).collect();
        write_text_file(out.join("undefined_funcs.txt"), &text)?;
    }

    let ld_name = match &config.options.ld_script {
        Some(name) => name.clone(),
        None => format!("{}.ld", config.name),
    };
    write_text_file(out.join(ld_name), &ldscript::generate_ldscript(&segments))?;

    if failures > 0 {
        bail!("{failures} range(s) failed to split");
    }
    Ok(())
}

fn split_range(
    options: &Options,
    ctx: &mut ResolutionContext,
    seg: &Segment,
    range: &FileRange,
    rom: &[u8],
    out: &Path,
) -> Result<()> {
    let bytes = &rom[range.start as usize..range.end as usize];
    match range.kind {
        RangeKind::Bin => {
            if !options.mode_active("bin") {
                return Ok(());
            }
            write_bin_file(out.join("bin").join(format!("{}.bin", range.name)), bytes)
        }
        RangeKind::Header => {
            if !options.mode_active("code") {
                return Ok(());
            }
            let text: String = bytes
                .chunks_exact(4)
                .map(|b| format!(".word 0x{:08X}\n", u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
                .collect();
            write_text_file(out.join("asm").join(format!("{}.s", range.name)), &text)
        }
        RangeKind::Asm | RangeKind::Hasm | RangeKind::C => {
            if !options.mode_active("code") {
                return Ok(());
            }
            split_code_range(options, ctx, seg, range, rom, out)
        }
    }
}

fn split_code_range(
    options: &Options,
    ctx: &mut ResolutionContext,
    seg: &Segment,
    range: &FileRange,
    rom: &[u8],
    out: &Path,
) -> Result<()> {
    let c_path = out.join("src").join(format!("{}.c", range.name));
    let defined = if range.kind == RangeKind::C {
        csource::scan_companion(&c_path)?
    } else {
        BTreeSet::new()
    };
    ctx.defined_funcs.extend(defined.iter().cloned());

    let bytes = &rom[range.start as usize..range.end as usize];
    if bytes.len() % 4 != 0 {
        warn!("Code range '{}' is not word-aligned, trailing bytes ignored", range.name);
    }
    let ins = disasm::decode(bytes, range.vram, range.start);
    if ins.is_empty() {
        return Ok(());
    }

    let known_starts = ctx.defined_function_starts();
    let bounds = detect_functions(&ins, &known_starts);
    let funcs: Vec<ResolvedFunction> =
        bounds.iter().map(|&(s, e)| resolver::resolve_function(ctx, &ins[s..e])).collect();
    resolver::scan_jump_tables(ctx, rom, range);
    let layouts: Vec<asm::FunctionLayout> =
        funcs.iter().map(|func| asm::layout_function(ctx, func)).collect();

    if options.find_file_boundaries {
        report_file_boundaries(&bounds, &ins);
    }

    match range.kind {
        RangeKind::C => {
            write_nonmatchings(options, ctx, range, &layouts, &defined, &c_path, out)
        }
        _ => write_asm_file(options, ctx, seg, range, &layouts, out),
    }
}

/// A non-final function ending in padding usually means a translation unit
/// boundary the config doesn't know about yet.
fn report_file_boundaries(bounds: &[(usize, usize)], ins: &[disasm::Ins]) {
    for &(start, end) in &bounds[..bounds.len().saturating_sub(1)] {
        if end - start >= 2 && ins[end - 1].is_nop() && ins[end - 2].is_nop() {
            println!(
                "function at vram {:X} ends with nops so a new file probably starts at rom address 0x{:X}",
                ins[start].vram,
                ins[end - 1].rom + 4
            );
        }
    }
}

fn write_asm_file(
    options: &Options,
    ctx: &ResolutionContext,
    seg: &Segment,
    range: &FileRange,
    layouts: &[asm::FunctionLayout],
    out: &Path,
) -> Result<()> {
    let path = out.join("asm").join(format!("{}.s", range.name));
    if range.kind == RangeKind::Hasm && path.exists() {
        info!("Keeping hand-written '{}'", path.display());
        return Ok(());
    }

    let mut text = asm::file_header(&seg.section_name());
    for layout in layouts {
        text.push_str(&asm::render_function(ctx, layout, options.mnemonic_ljust));
        text.push('\n');
    }
    write_text_file(&path, &text)?;
    info!("Disassembled {} to {}", range.name, path.display());
    Ok(())
}

fn write_nonmatchings(
    options: &Options,
    ctx: &ResolutionContext,
    range: &FileRange,
    layouts: &[asm::FunctionLayout],
    defined: &BTreeSet<String>,
    c_path: &Path,
    out: &Path,
) -> Result<()> {
    let nonmatchings = out.join("asm").join("nonmatchings").join(&range.name);
    let mut func_names = Vec::with_capacity(layouts.len());

    for layout in layouts {
        let func_name = ctx.final_func_name(layout.vram);
        if !defined.contains(&func_name) {
            let mut text = String::new();
            if options.compiler == Compiler::Gcc {
                text.push_str(&asm::gcc_inc_header());
            }
            text.push_str(&asm::render_function(ctx, layout, options.mnemonic_ljust));
            text.push('\n');

            let path = nonmatchings.join(format!("{}.s", sanitise(&func_name)));
            write_text_file(&path, &text)?;
            info!("Disassembled {} to {}", func_name, path.display());
        }
        func_names.push(func_name);
    }

    if !c_path.exists() {
        let mut lines = vec!["#include \"common.h\"".to_string(), String::new()];
        for func_name in &func_names {
            match options.compiler {
                Compiler::Gcc => {
                    lines.push(format!("INCLUDE_ASM(s32, \"{}\", {});", range.name, func_name));
                }
                Compiler::Ido => {
                    let asm_path = PathBuf::from("asm")
                        .join("nonmatchings")
                        .join(&range.name)
                        .join(format!("{}.s", sanitise(func_name)));
                    lines.push(format!("#pragma GLOBAL_ASM(\"{}\")", asm_path.to_slash_lossy()));
                }
            }
            lines.push(String::new());
        }
        write_text_file(c_path, &lines.join("\n"))?;
        info!("Wrote stub source {}", c_path.display());
    }
    Ok(())
}
