use itertools::Itertools;

use crate::obj::{RangeKind, Segment};

/// Build directory prefix for a range's object file.
fn subdir(kind: RangeKind) -> &'static str {
    match kind {
        RangeKind::C => "src",
        RangeKind::Asm | RangeKind::Hasm | RangeKind::Header => "asm",
        RangeKind::Bin => "bin",
    }
}

/// Target section of a range's object inside the segment's output section.
fn object_section(kind: RangeKind, section_name: &str) -> String {
    match kind {
        RangeKind::C => ".text".to_string(),
        RangeKind::Bin => ".data".to_string(),
        _ => section_name.to_string(),
    }
}

/// Renders one segment's linker-section block, address annotation included.
pub fn segment_section(seg: &Segment) -> String {
    let section_name = seg.section_name();
    let objects = seg
        .ranges
        .iter()
        .map(|range| {
            format!(
                "        build/{}/{}.o({});",
                subdir(range.kind),
                range.name,
                object_section(range.kind, &section_name)
            )
        })
        .join("\n");

    format!(
        "    /* 0x{:X} {:X}-{:X} (len {:X}) */\n    {} 0x{:X} : AT(0x{:X}) {{\n{}\n    }}\n\n",
        seg.vram,
        seg.rom_start,
        seg.rom_end,
        seg.rom_end - seg.rom_start,
        section_name,
        seg.vram,
        seg.rom_start,
        objects
    )
}

/// Renders the whole linker script body for the project's segments.
pub fn generate_ldscript(segments: &[Segment]) -> String {
    segments.iter().map(segment_section).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::obj::FileRange;

    #[test]
    fn renders_segment_block() {
        let seg = Segment {
            name: "main".to_string(),
            rom_start: 0x1000,
            rom_end: 0x4000,
            vram: 0x80000400,
            vram_lock: false,
            ranges: vec![
                FileRange {
                    start: 0x1000,
                    end: 0x2000,
                    name: "main".to_string(),
                    vram: 0x80000400,
                    kind: RangeKind::C,
                },
                FileRange {
                    start: 0x2000,
                    end: 0x3000,
                    name: "main_2000".to_string(),
                    vram: 0x80001400,
                    kind: RangeKind::Asm,
                },
                FileRange {
                    start: 0x3000,
                    end: 0x4000,
                    name: "main_3000".to_string(),
                    vram: 0x80002400,
                    kind: RangeKind::Bin,
                },
            ],
        };
        assert_eq!(
            segment_section(&seg),
            "    /* 0x80000400 1000-4000 (len 3000) */\n\
             \x20   .text_1000 0x80000400 : AT(0x1000) {\n\
             \x20       build/src/main.o(.text);\n\
             \x20       build/asm/main_2000.o(.text_1000);\n\
             \x20       build/bin/main_3000.o(.data);\n\
             \x20   }\n\n"
        );
    }
}
