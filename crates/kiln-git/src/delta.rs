//! Git delta instruction decoding.
//!
//! A delta is two size varints (base length, result length) followed by
//! copy instructions (high bit set: copy a range of the base) and insert
//! instructions (high bit clear: the next `n` bytes are literal data).

use crate::{GitError, Result};

/// A copy with a zero size field copies this many bytes.
const DEFAULT_COPY_SIZE: usize = 0x10000;

fn read_size(delta: &[u8], pos: &mut usize) -> Result<usize> {
    let mut size = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| GitError::InvalidDelta("truncated size header".into()))?;
        *pos += 1;
        if shift >= usize::BITS {
            return Err(GitError::InvalidDelta("size header overflows".into()));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Reads the base and result sizes a delta declares.
pub fn delta_sizes(delta: &[u8]) -> Result<(usize, usize)> {
    let mut pos = 0;
    let base = read_size(delta, &mut pos)?;
    let result = read_size(delta, &mut pos)?;
    Ok((base, result))
}

/// Applies `delta` to `base`, returning the reconstructed object data.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(GitError::InvalidDelta(format!(
            "base is {} bytes but delta expects {}",
            base.len(),
            base_size
        )));
    }
    let result_size = read_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(result_size.min(base.len() + delta.len()));

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| GitError::InvalidDelta("truncated copy offset".into()))?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * i);
                }
            }
            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| GitError::InvalidDelta("truncated copy size".into()))?;
                    pos += 1;
                    size |= (byte as usize) << (8 * i);
                }
            }
            if size == 0 {
                size = DEFAULT_COPY_SIZE;
            }
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= base.len())
                .ok_or_else(|| {
                    GitError::InvalidDelta(format!(
                        "copy of {} bytes at {} exceeds base of {}",
                        size,
                        offset,
                        base.len()
                    ))
                })?;
            out.extend_from_slice(&base[offset..end]);
        } else if op != 0 {
            let len = op as usize;
            let literal = delta
                .get(pos..pos + len)
                .ok_or_else(|| GitError::InvalidDelta("truncated insert".into()))?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(GitError::InvalidDelta("reserved opcode 0".into()));
        }

        if out.len() > result_size {
            return Err(GitError::InvalidDelta("result exceeds declared size".into()));
        }
    }

    if out.len() != result_size {
        return Err(GitError::InvalidDelta(format!(
            "result is {} bytes but delta declares {}",
            out.len(),
            result_size
        )));
    }
    Ok(out)
}
