//! Content-defined chunking (Asymmetric Extremum)
//!
//! Splits a byte buffer into variable-length chunks whose boundaries are
//! determined by the content itself, so a local edit only perturbs nearby
//! boundaries and the rest of the stream re-synchronizes. Deduplication
//! depends on that property.
//!
//! AE is hashless: instead of a rolling hash it looks for positions whose
//! byte value is the maximum of a backward-only window ending at the scan
//! cursor. The window never extends forward, so the scan never backtracks.
//! A candidate boundary is additionally gated on the byte-value spread of
//! the window (max - min >= 8), which rejects boundaries inside
//! low-entropy regions such as runs of zeros where "everything is the
//! maximum".
//!
//! The function is pure and deterministic: the same bytes always produce
//! the same boundaries, regardless of where the buffer came from.

use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::models::Chunk;

/// Minimum byte-value spread a candidate's window must show.
const ENTROPY_THRESHOLD: u8 = 8;

/// Split `data` into content-defined chunks.
///
/// Guarantees, for any input and any valid options:
/// - chunks cover `data` exactly, in order, with no gaps or overlaps;
/// - every chunk except possibly the last has `size >= min_size`;
/// - every chunk has `size <= max_size`;
/// - empty input yields an empty list.
///
/// # Errors
///
/// Returns a validation error when `options` is inconsistent
/// (`min_size == 0` or `min_size > target_size > max_size` violations).
pub fn chunk(data: &[u8], options: &ChunkerConfig) -> Result<Vec<Chunk>> {
    options.validate()?;

    let mut chunks = Vec::new();
    if data.is_empty() {
        return Ok(chunks);
    }

    let window = options.window_size();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining <= options.min_size {
            chunks.push(make_chunk(data, offset, data.len()));
            break;
        }

        let scan_end = (offset + options.max_size).min(data.len());
        let cut = find_cut(&data[offset..scan_end], options.min_size, window)
            .map(|local| offset + local)
            .unwrap_or(scan_end);

        chunks.push(make_chunk(data, offset, cut));
        offset = cut;
    }

    Ok(chunks)
}

fn make_chunk(data: &[u8], start: usize, end: usize) -> Chunk {
    Chunk {
        offset: start as u64,
        size: (end - start) as u64,
        bytes: data[start..end].to_vec(),
    }
}

/// Scan one chunk's byte range for an accepted cut point.
///
/// `region` starts at the chunk's first byte and is already truncated at
/// the maximum scan length; indices are local to it. The windows are
/// clamped to the region start so boundaries never depend on bytes of a
/// previous chunk.
fn find_cut(region: &[u8], min_size: usize, window: usize) -> Option<usize> {
    let scan_start = min_size;

    // Seed the tracked maximum over the window ending at the scan start.
    let lo = scan_start.saturating_sub(window - 1);
    let (mut max_pos, mut max_val) = max_in(region, lo, scan_start);

    for i in (scan_start + 1)..region.len() {
        if region[i] >= max_val {
            max_pos = i;
            max_val = region[i];
        } else if i - max_pos >= window {
            // The tracked maximum slid out of the trailing window; this is
            // the only place the algorithm re-reads earlier bytes.
            let lo = i + 1 - window;
            let (pos, val) = max_in(region, lo, i);
            max_pos = pos;
            max_val = val;
        }

        if max_pos == i && window_spread(region, i, window) >= ENTROPY_THRESHOLD {
            return Some(i);
        }
    }

    None
}

/// Position and value of the maximum byte in `region[lo..=hi]`, latest
/// occurrence winning ties.
fn max_in(region: &[u8], lo: usize, hi: usize) -> (usize, u8) {
    let mut max_pos = lo;
    let mut max_val = region[lo];
    for (i, &b) in region.iter().enumerate().take(hi + 1).skip(lo + 1) {
        if b >= max_val {
            max_pos = i;
            max_val = b;
        }
    }
    (max_pos, max_val)
}

/// Byte-value spread (max - min) over the window `[i - window, i)`,
/// clamped to the region start.
fn window_spread(region: &[u8], i: usize, window: usize) -> u8 {
    let lo = i.saturating_sub(window);
    let mut min_val = u8::MAX;
    let mut max_val = 0u8;
    for &b in &region[lo..i] {
        min_val = min_val.min(b);
        max_val = max_val.max(b);
    }
    max_val - min_val
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    /// Deterministic pseudo-random bytes without pulling in an RNG.
    fn varied_bytes(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    fn assert_coverage(data: &[u8], chunks: &[Chunk]) {
        let mut expected_offset = 0u64;
        for chunk in chunks {
            assert_eq!(chunk.offset, expected_offset, "gap or overlap in chunks");
            assert_eq!(chunk.bytes.len() as u64, chunk.size);
            assert_eq!(
                chunk.bytes.as_slice(),
                &data[chunk.offset as usize..(chunk.offset + chunk.size) as usize]
            );
            expected_offset += chunk.size;
        }
        assert_eq!(expected_offset, data.len() as u64, "chunks must cover input");
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunks = chunk(&[], &defaults()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_input_below_min_size_is_one_chunk() {
        let data = b"Hello";
        let chunks = chunk(data, &defaults()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].size, 5);
        assert_eq!(chunks[0].bytes, data);
    }

    #[test]
    fn test_coverage_and_bounds_on_varied_data() {
        let data = varied_bytes(1024 * 1024);
        let options = defaults();
        let chunks = chunk(&data, &options).unwrap();

        assert!(chunks.len() > 1, "1 MiB of varied data must split");
        assert_coverage(&data, &chunks);

        for c in &chunks[..chunks.len() - 1] {
            assert!(
                c.size as usize >= options.min_size,
                "non-final chunk below min: {}",
                c.size
            );
            assert!(c.size as usize <= options.max_size);
        }
        assert!(chunks.last().unwrap().size as usize <= options.max_size);
    }

    #[test]
    fn test_deterministic() {
        let data = varied_bytes(256 * 1024);
        let a = chunk(&data, &defaults()).unwrap();
        let b = chunk(&data, &defaults()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_low_entropy_data_hits_max_size() {
        // All-zero data never passes the entropy gate, so every cut falls
        // back to max_size.
        let data = vec![0u8; 200_000];
        let options = defaults();
        let chunks = chunk(&data, &options).unwrap();
        assert_coverage(&data, &chunks);
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.size as usize, options.max_size);
        }
    }

    #[test]
    fn test_boundaries_independent_of_position() {
        // Chunk boundaries past the first chunk re-synchronize: chunking
        // the tail of the data from its own start reproduces the same
        // relative boundaries.
        let data = varied_bytes(512 * 1024);
        let options = defaults();
        let chunks = chunk(&data, &options).unwrap();
        assert!(chunks.len() > 2);

        let second_start = chunks[0].size as usize;
        let tail = &data[second_start..];
        let tail_chunks = chunk(tail, &options).unwrap();

        assert_eq!(tail_chunks[0].size, chunks[1].size);
        assert_eq!(tail_chunks[0].bytes, chunks[1].bytes);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = ChunkerConfig {
            min_size: 70000,
            target_size: 8192,
            max_size: 65536,
        };
        assert!(chunk(b"data", &options).is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_full_coverage(data in prop::collection::vec(any::<u8>(), 0..100_000)) {
                let chunks = chunk(&data, &defaults()).unwrap();
                let total: u64 = chunks.iter().map(|c| c.size).sum();
                prop_assert_eq!(total, data.len() as u64);

                let mut offset = 0u64;
                for c in &chunks {
                    prop_assert_eq!(c.offset, offset);
                    offset += c.size;
                }
            }

            #[test]
            fn prop_size_bounds(data in prop::collection::vec(any::<u8>(), 0..100_000)) {
                let options = defaults();
                let chunks = chunk(&data, &options).unwrap();
                for (i, c) in chunks.iter().enumerate() {
                    prop_assert!(c.size as usize <= options.max_size);
                    if i + 1 < chunks.len() {
                        prop_assert!(c.size as usize >= options.min_size);
                    }
                }
            }

            #[test]
            fn prop_deterministic(data in prop::collection::vec(any::<u8>(), 0..50_000)) {
                let a = chunk(&data, &defaults()).unwrap();
                let b = chunk(&data, &defaults()).unwrap();
                prop_assert_eq!(a, b);
            }
        }
    }
}
