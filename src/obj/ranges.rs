use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::{
    obj::{FileRange, RangeKind, Segment},
    util::config::{FileEntry, SegmentDef},
};

/// Expands a segment's declared file list into ordered, contiguous
/// [`FileRange`]s. With no declared files the whole segment becomes a single
/// asm range. Validation happens here, before any byte of the ROM is decoded.
pub fn plan_segment(def: &SegmentDef) -> Result<Segment> {
    ensure!(
        def.start < def.end,
        "Segment '{}' is empty ({:#X}..{:#X})",
        def.name,
        def.start,
        def.end
    );

    let mut ranges = Vec::new();
    if def.files.is_empty() {
        ranges.push(FileRange {
            start: def.start,
            end: def.end,
            name: def.name.clone(),
            vram: def.vram,
            kind: RangeKind::Asm,
        });
    } else {
        for (i, entry) in def.files.iter().enumerate() {
            let (start, end, kind, name) = match entry {
                FileEntry::Full { start, end, kind, name } => {
                    (*start, *end, kind.as_str(), name.clone())
                }
                FileEntry::Named(start, kind, name) => {
                    (*start, next_start(def, i), kind.as_str(), Some(name.clone()))
                }
                FileEntry::Compact(start, kind) => (*start, next_start(def, i), kind.as_str(), None),
            };
            let kind = RangeKind::from_config(kind)
                .with_context(|| format!("In segment '{}'", def.name))?;
            let name = name.unwrap_or_else(|| format!("{}_{:X}", def.name, start));
            let vram = if def.vram_lock {
                def.vram
            } else {
                let offset = start.checked_sub(def.start).ok_or_else(|| {
                    anyhow!(
                        "File range at {:#X} starts before segment '{}' ({:#X})",
                        start,
                        def.name,
                        def.start
                    )
                })?;
                def.vram + offset
            };
            ranges.push(FileRange { start, end, name, vram, kind });
        }
    }

    let mut prev_start = None;
    for range in &ranges {
        ensure!(
            range.start < range.end,
            "Empty file range '{}' ({:#X}..{:#X}) in segment '{}'",
            range.name,
            range.start,
            range.end,
            def.name
        );
        ensure!(
            range.start >= def.start && range.end <= def.end,
            "File range '{}' ({:#X}..{:#X}) outside segment '{}' ({:#X}..{:#X})",
            range.name,
            range.start,
            range.end,
            def.name,
            def.start,
            def.end
        );
        if let Some(prev) = prev_start {
            if range.start <= prev {
                bail!("Non-monotonic file ranges in segment '{}'", def.name);
            }
        }
        prev_start = Some(range.start);
    }

    Ok(Segment {
        name: def.name.clone(),
        rom_start: def.start,
        rom_end: def.end,
        vram: def.vram,
        vram_lock: def.vram_lock,
        ranges,
    })
}

fn next_start(def: &SegmentDef, i: usize) -> u32 {
    match def.files.get(i + 1) {
        Some(FileEntry::Full { start, .. })
        | Some(FileEntry::Named(start, _, _))
        | Some(FileEntry::Compact(start, _)) => *start,
        None => def.end,
    }
}
