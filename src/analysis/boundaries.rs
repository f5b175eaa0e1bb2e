use std::collections::BTreeSet;

use crate::analysis::disasm::{Ins, InsKind};

/// Partitions a decoded code range into functions, returned as index ranges
/// that cover the input exactly.
///
/// A `jr $ra` only ends a function if no recorded branch interval straddles
/// it; hand-written assembly routinely branches across a mid-function return.
/// `known_starts` holds vram addresses of functions already defined in
/// companion source, which force a boundary in front of them.
pub fn detect_functions(ins: &[Ins], known_starts: &BTreeSet<u32>) -> Vec<(usize, usize)> {
    if ins.is_empty() {
        return Vec::new();
    }

    let branches: Vec<(u32, u32)> = ins
        .iter()
        .filter_map(|i| match i.kind {
            InsKind::Branch { target } => Some((i.vram, target)),
            _ => None,
        })
        .collect();

    let mut funcs: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    let mut end_func = false;

    for i in 0..ins.len() {
        if matches!(ins[i].kind, InsKind::Return) {
            let addr = ins[i].vram;
            let straddled = branches
                .iter()
                .any(|&(b, t)| (b > addr && t <= addr) || (b <= addr && t > addr));
            if !straddled {
                // The end checks run starting at the delay slot, not here.
                end_func = true;
                continue;
            }
        }

        if i + 1 < ins.len() && known_starts.contains(&ins[i + 1].vram) {
            end_func = true;
        }

        // A pending end commits once the rest of the stream is pure padding,
        // or right before the next real instruction. Padding nops between
        // the two stay with the function that ends.
        if end_func && (all_nops(&ins[i..]) || (i + 1 < ins.len() && !ins[i + 1].is_nop())) {
            funcs.push((start, i + 1));
            start = i + 1;
            end_func = false;
        }
    }

    if start < ins.len() {
        if !all_nops(&ins[start..]) || funcs.is_empty() {
            funcs.push((start, ins.len()));
        } else {
            // Trailing padding joins the previous function; a function must
            // contain at least one real instruction.
            funcs.last_mut().unwrap().1 = ins.len();
        }
    }
    funcs
}

fn all_nops(ins: &[Ins]) -> bool {
    ins.iter().all(|i| i.is_nop())
}
