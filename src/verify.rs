//! Block content generation and verification for data-integrity checks
//!
//! Every 8-byte-aligned position within a file carries the little-endian
//! u64 value of its own file offset plus a user-chosen salt. Fill and
//! verify work on arbitrary buffer offsets and lengths, so write and
//! verification-read may use different block sizes; partial head and tail
//! bytes are copied from the containing 8-byte value.

const CHECKSUM_LEN: u64 = 8;

/// First mismatching byte found during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityMismatch {
    /// Absolute file offset of the mismatch.
    pub offset: u64,
    pub expected: u8,
    pub actual: u8,
}

/// Fill `buf` with the integrity pattern for the given file offset.
pub fn fill_integrity_buf(buf: &mut [u8], file_offset: u64, salt: u64) {
    let mut bytes_done = 0usize;
    let mut bytes_left = buf.len();
    let mut current_offset = file_offset;

    while bytes_left > 0 {
        // the checksum value is always computed for the containing
        // 8-byte-aligned offset, even when only part of it is copied
        let aligned_start = current_offset - (current_offset % CHECKSUM_LEN);
        let checksum = aligned_start.wrapping_add(salt).to_le_bytes();

        let start_index = (current_offset - aligned_start) as usize;
        let copy_len = bytes_left.min(CHECKSUM_LEN as usize - start_index);

        buf[bytes_done..bytes_done + copy_len]
            .copy_from_slice(&checksum[start_index..start_index + copy_len]);

        bytes_done += copy_len;
        bytes_left -= copy_len;
        current_offset += copy_len as u64;
    }
}

/// Verify `buf` against the integrity pattern. On mismatch, report the
/// exact file offset with expected and actual byte values.
pub fn verify_integrity_buf(
    buf: &[u8],
    file_offset: u64,
    salt: u64,
) -> Result<(), IntegrityMismatch> {
    let mut expected = vec![0u8; buf.len()];
    fill_integrity_buf(&mut expected, file_offset, salt);

    if buf == expected.as_slice() {
        return Ok(());
    }

    for (index, (&actual, &want)) in buf.iter().zip(expected.iter()).enumerate() {
        if actual != want {
            return Err(IntegrityMismatch {
                offset: file_offset + index as u64,
                expected: want,
                actual,
            });
        }
    }

    // length mismatch cannot happen (same-length buffers), but keep the
    // compiler honest
    Err(IntegrityMismatch {
        offset: file_offset,
        expected: 0,
        actual: 0,
    })
}
