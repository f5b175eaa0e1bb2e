use std::io::Cursor;

use anyhow::{ensure, Result};
use byteorder::{BigEndian, ReadBytesExt};

pub const YAY0_MAGIC: [u8; 4] = *b"Yay0";

/// Decompresses a Yay0 stream into a new buffer. Expects the magic-tagged
/// header followed by the mask, link, and chunk streams.
pub fn decompress_yay0(input: &[u8]) -> Result<Vec<u8>> {
    ensure!(input.len() >= 16, "Yay0 stream too short");
    ensure!(input[0..4] == YAY0_MAGIC, "Not a Yay0 stream");

    let mut header = Cursor::new(&input[4..16]);
    let decompressed_size = header.read_u32::<BigEndian>()? as usize;
    let mut link_idx = header.read_u32::<BigEndian>()? as usize;
    let mut chunk_idx = header.read_u32::<BigEndian>()? as usize;

    let mut mask_idx = 16usize;
    let mut mask = 0u32;
    let mut mask_bits = 0u32;

    let mut out = vec![0u8; decompressed_size];
    let mut idx = 0usize;

    while idx < decompressed_size {
        if mask_bits == 0 {
            ensure!(mask_idx + 4 <= input.len(), "Yay0 mask stream truncated");
            mask = u32::from_be_bytes([
                input[mask_idx],
                input[mask_idx + 1],
                input[mask_idx + 2],
                input[mask_idx + 3],
            ]);
            mask_idx += 4;
            mask_bits = 32;
        }

        if mask & 0x8000_0000 != 0 {
            ensure!(chunk_idx < input.len(), "Yay0 chunk stream truncated");
            out[idx] = input[chunk_idx];
            idx += 1;
            chunk_idx += 1;
        } else {
            ensure!(link_idx + 2 <= input.len(), "Yay0 link stream truncated");
            let link = u16::from_be_bytes([input[link_idx], input[link_idx + 1]]) as usize;
            link_idx += 2;

            let disp = (link & 0xFFF) + 1;
            let mut count = link >> 12;
            if count == 0 {
                ensure!(chunk_idx < input.len(), "Yay0 chunk stream truncated");
                count = input[chunk_idx] as usize + 18;
                chunk_idx += 1;
            } else {
                count += 2;
            }

            ensure!(disp <= idx, "Yay0 back-reference before output start");
            for _ in 0..count {
                ensure!(idx < decompressed_size, "Yay0 output overrun");
                out[idx] = out[idx - disp];
                idx += 1;
            }
        }

        mask <<= 1;
        mask_bits -= 1;
    }

    Ok(out)
}
