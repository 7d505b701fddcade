//! Run-length encoding for the column grids. Chunk grids are long runs of
//! the same byte (air above ground, stone below), so (count, value) pairs
//! shrink them by orders of magnitude before the region-level zstd pass.

/// Encodes `data` as little-endian (u16 count, u8 value) runs.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter().copied();
    let Some(mut current) = iter.next() else {
        return out;
    };
    let mut count: u16 = 1;

    for byte in iter {
        if byte == current && count < u16::MAX {
            count += 1;
        } else {
            out.extend_from_slice(&count.to_le_bytes());
            out.push(current);
            current = byte;
            count = 1;
        }
    }
    out.extend_from_slice(&count.to_le_bytes());
    out.push(current);
    out
}

/// Decodes an RLE stream, checking it yields exactly `expected_len` bytes.
pub fn rle_decode(encoded: &[u8], expected_len: usize) -> Result<Vec<u8>, String> {
    if encoded.len() % 3 != 0 {
        return Err(format!(
            "rle stream length {} is not a multiple of 3",
            encoded.len()
        ));
    }

    let mut out = Vec::with_capacity(expected_len);
    for run in encoded.chunks_exact(3) {
        let count = u16::from_le_bytes([run[0], run[1]]) as usize;
        if count == 0 {
            return Err("rle stream contains a zero-length run".to_string());
        }
        if out.len() + count > expected_len {
            return Err(format!(
                "rle stream overflows expected length {expected_len}"
            ));
        }
        out.resize(out.len() + count, run[2]);
    }

    if out.len() != expected_len {
        return Err(format!(
            "rle stream decoded to {} bytes, expected {expected_len}",
            out.len()
        ));
    }
    Ok(out)
}
