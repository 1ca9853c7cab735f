// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The IDR slice header, the coding-tree quadtree recursion, and the
//! transform-tree leaf: the syntax layer that ties the CABAC engine,
//! the residual coder, intra prediction and the integer transform
//! together into one slice's worth of coded data.

use alloc::vec;
use alloc::vec::Vec;

use crate::bit_writer::BitWriter;
use crate::cabac::{context::ContextSet, Engine};
use crate::frame::Frame;
use crate::params::{LOG2_CTB_SIZE, LOG2_MIN_CB_SIZE};
use crate::predict::{planar_predict, PlaneRecon};
use crate::residual::encode_residual;
use crate::transform::{dequantize, forward_transform, inverse_transform, quantize};

pub const CTB_SIZE: usize = 1 << LOG2_CTB_SIZE;
pub const MIN_CB_SIZE: usize = 1 << LOG2_MIN_CB_SIZE;

/// Write the IDR slice header's RBSP bits, up to and including the
/// `byte_alignment()` call that puts the writer in position for CABAC
/// data to follow. Every field beyond what `slice_pic_parameter_set_id`,
/// `slice_type` and `slice_qp_delta` need is fixed by the choices baked
/// into the parameter sets this crate emits (no SAO, no deblocking
/// override, one slice per picture), so none of their conditional
/// syntax elements are present here.
pub fn write_slice_header(bw: &mut BitWriter) {
    bw.write_bit(true); // first_slice_segment_in_pic_flag
    bw.write_bit(false); // no_output_of_prior_pics_flag
    bw.write_ue(0); // slice_pic_parameter_set_id
    bw.write_ue(2); // slice_type: I
    bw.write_se(0); // slice_qp_delta: 0, since init_qp_minus26 in the PPS already carries `qp - 26`
    bw.align_for_cabac();
}

/// One transform unit's prediction, residual and coded-block state,
/// computed before any bit is emitted so the cbf flags (known only once
/// the whole block's levels are in hand) can be signaled in the order
/// the transform tree requires.
struct TuResult {
    cbf: bool,
    levels: Vec<i32>,
    predicted: Vec<u8>,
}

fn prepare_tu(source: &[u8], recon: &PlaneRecon, x0: usize, y0: usize, size: usize, qp: u8) -> TuResult {
    let (top, left, top_right, bottom_left) = recon.gather_neighbors(x0, y0, size);
    let predicted = planar_predict(&top, &left, top_right, bottom_left, size);
    let mut residual = vec![0i32; size * size];
    for i in 0..size * size {
        residual[i] = source[i] as i32 - predicted[i] as i32;
    }
    let coeffs = forward_transform(&residual, size);
    let levels: Vec<i32> = coeffs.iter().map(|&c| quantize(c, qp)).collect();
    let cbf = levels.iter().any(|&l| l != 0);
    TuResult { cbf, levels, predicted }
}

fn reconstruct_tu(recon: &mut PlaneRecon, x0: usize, y0: usize, size: usize, qp: u8, tu: &TuResult) {
    let samples = if tu.cbf {
        let dequantized: Vec<i32> = tu.levels.iter().map(|&l| dequantize(l, qp)).collect();
        let residual = inverse_transform(&dequantized, size);
        (0..size * size)
            .map(|i| (tu.predicted[i] as i32 + residual[i]).clamp(0, 255) as u8)
            .collect::<Vec<u8>>()
    } else {
        tu.predicted.clone()
    };
    recon.set_block(x0, y0, size, &samples);
}

/// One coding unit: always intra, always 2Nx2N, always Planar luma with
/// derive-from-luma ("DM") chroma. There is no mode decision in this
/// crate, so the only signaling work left is emitting the fixed choices
/// and the actual residual data.
#[allow(clippy::too_many_arguments)]
fn encode_coding_unit(
    engine: &mut Engine,
    ctx: &mut ContextSet,
    frame: &Frame,
    recon_y: &mut PlaneRecon,
    recon_cb: &mut PlaneRecon,
    recon_cr: &mut PlaneRecon,
    qp: u8,
    monochrome: bool,
    x0: usize,
    y0: usize,
    size: usize,
) {
    // part_mode: one bin, always 2Nx2N (signaled only because
    // size == MinCbLog2SizeY, per the coding-tree recursion below).
    engine.encode_bin(true, &mut ctx.part_mode);

    // prediction unit: every reconstructed neighbor is always Planar,
    // so the real MPM-list derivation collapses to the same
    // {Planar, DC, Angular26} list everywhere and entry 0 is always it.
    engine.encode_bin(true, &mut ctx.prev_intra_luma_pred_flag);
    engine.encode_bypass(false); // mpm_idx = 0, truncated unary cMax=2

    let luma_src = frame.luma_block(x0 as u32, y0 as u32, size as u32);
    let luma_tu = prepare_tu(&luma_src, recon_y, x0, y0, size, qp);

    let chroma = if !monochrome {
        // intra_chroma_pred_mode: DM (derive from luma) always chosen.
        engine.encode_bin(false, &mut ctx.intra_chroma_pred_mode);

        let cx0 = x0 / 2;
        let cy0 = y0 / 2;
        let csize = size / 2;
        let cb_src = frame.cb_block(cx0 as u32, cy0 as u32, csize as u32);
        let cr_src = frame.cr_block(cx0 as u32, cy0 as u32, csize as u32);
        let cb_tu = prepare_tu(&cb_src, recon_cb, cx0, cy0, csize, qp);
        let cr_tu = prepare_tu(&cr_src, recon_cr, cx0, cy0, csize, qp);
        Some((cx0, cy0, csize, cb_tu, cr_tu))
    } else {
        None
    };

    // transform tree leaf: cbf_cb, cbf_cr, then cbf_luma, trafoDepth
    // always 0 since max_transform_hierarchy_depth_intra == 0.
    if let Some((_, _, _, cb_tu, cr_tu)) = &chroma {
        engine.encode_bin(cb_tu.cbf, &mut ctx.cbf_chroma[0]);
        engine.encode_bin(cr_tu.cbf, &mut ctx.cbf_chroma[0]);
    }
    let luma_cbf_ctx = if size == 4 { 1 } else { 0 };
    engine.encode_bin(luma_tu.cbf, &mut ctx.cbf_luma[luma_cbf_ctx]);

    if let Some((_, _, csize, cb_tu, cr_tu)) = &chroma {
        if cb_tu.cbf {
            encode_residual(engine, ctx, &cb_tu.levels, *csize, false);
        }
        if cr_tu.cbf {
            encode_residual(engine, ctx, &cr_tu.levels, *csize, false);
        }
    }
    if luma_tu.cbf {
        encode_residual(engine, ctx, &luma_tu.levels, size, true);
    }

    reconstruct_tu(recon_y, x0, y0, size, qp, &luma_tu);
    if let Some((cx0, cy0, csize, cb_tu, cr_tu)) = chroma {
        reconstruct_tu(recon_cb, cx0, cy0, csize, qp, &cb_tu);
        reconstruct_tu(recon_cr, cx0, cy0, csize, qp, &cr_tu);
    }
}

/// The coding-tree quadtree: recurse from a CTB down to minimum-CB-sized
/// leaves. There is no mode decision in this crate, so `split_cu_flag`
/// is always `true` wherever it's signaled at all — the recursion
/// always walks all the way to `MIN_CB_SIZE`. Picture boundaries that
/// fall inside a CTB (because the picture isn't an exact multiple of
/// `CTB_SIZE`) force an implicit split with no flag, per the standard's
/// rule for coding blocks that would otherwise extend outside the
/// picture; [`crate::EncoderController::encode`] only guarantees the
/// picture is an exact multiple of `MIN_CB_SIZE`, not of `CTB_SIZE`.
#[allow(clippy::too_many_arguments)]
fn encode_coding_quadtree(
    engine: &mut Engine,
    ctx: &mut ContextSet,
    frame: &Frame,
    recon_y: &mut PlaneRecon,
    recon_cb: &mut PlaneRecon,
    recon_cr: &mut PlaneRecon,
    qp: u8,
    monochrome: bool,
    x0: usize,
    y0: usize,
    size: usize,
    depth: usize,
    pic_width: usize,
    pic_height: usize,
) {
    if size > MIN_CB_SIZE {
        let out_of_bounds = x0 + size > pic_width || y0 + size > pic_height;
        if !out_of_bounds {
            engine.encode_bin(true, &mut ctx.split_cu_flag[depth.min(2)]);
        }
        let half = size / 2;
        for &(dx, dy) in &[(0usize, 0usize), (half, 0), (0, half), (half, half)] {
            let (cx, cy) = (x0 + dx, y0 + dy);
            if cx < pic_width && cy < pic_height {
                encode_coding_quadtree(
                    engine, ctx, frame, recon_y, recon_cb, recon_cr, qp, monochrome, cx, cy, half, depth + 1, pic_width, pic_height,
                );
            }
        }
    } else {
        encode_coding_unit(engine, ctx, frame, recon_y, recon_cb, recon_cr, qp, monochrome, x0, y0, size);
    }
}

/// Encode every CTB of one slice in raster order, terminating the slice
/// on the last one. Returns the CABAC engine's final flush: the bytes
/// already emitted, plus the tail `low` value and bit count the caller
/// must append (byte-aligned) to complete the slice segment data RBSP.
#[allow(clippy::too_many_arguments)]
pub fn encode_slice_data(
    engine: &mut Engine,
    ctx: &mut ContextSet,
    frame: &Frame,
    recon_y: &mut PlaneRecon,
    recon_cb: &mut PlaneRecon,
    recon_cr: &mut PlaneRecon,
    qp: u8,
) -> (Vec<u8>, u32, u8) {
    let monochrome = frame.monochrome();
    let pic_width = frame.width() as usize;
    let pic_height = frame.height() as usize;
    let ctbs_x = pic_width.div_ceil(CTB_SIZE);
    let ctbs_y = pic_height.div_ceil(CTB_SIZE);
    let total_ctbs = ctbs_x * ctbs_y;

    let mut ctb_idx = 0usize;
    for ctb_y in 0..ctbs_y {
        for ctb_x in 0..ctbs_x {
            let x0 = ctb_x * CTB_SIZE;
            let y0 = ctb_y * CTB_SIZE;
            encode_coding_quadtree(
                engine, ctx, frame, recon_y, recon_cb, recon_cr, qp, monochrome, x0, y0, CTB_SIZE, 0, pic_width, pic_height,
            );
            ctb_idx += 1;
            let is_last = ctb_idx == total_ctbs;
            if let Some(flushed) = engine.encode_terminate(is_last) {
                return flushed;
            }
        }
    }
    unreachable!("a slice with at least one CTB always terminates on its last CTB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    fn solid_frame(width: u32, height: u32, value: u8, data: &mut Vec<u8>) -> Plane<'_> {
        data.clear();
        data.resize((width * height) as usize, value);
        Plane::new(data, width as usize)
    }

    #[test]
    fn flat_mono_ctb_has_zero_luma_cbf_everywhere() {
        let mut ctx = ContextSet::init(26);
        let mut engine = Engine::new();
        let mut data = Vec::new();
        let y = solid_frame(16, 16, 128, &mut data);
        let frame = Frame::new_mono8(16, 16, 0, y).unwrap();
        let mut recon_y = PlaneRecon::new(16, 16);
        let mut recon_cb = PlaneRecon::new(1, 1);
        let mut recon_cr = PlaneRecon::new(1, 1);

        let (bytes, _tail_value, tail_bits) = encode_slice_data(&mut engine, &mut ctx, &frame, &mut recon_y, &mut recon_cb, &mut recon_cr, 26);
        assert!(!bytes.is_empty() || tail_bits > 0);
    }

    #[test]
    fn slice_header_aligns_for_cabac() {
        let mut bw = BitWriter::new();
        write_slice_header(&mut bw);
        assert!(bw.is_byte_aligned());
        assert!(!bw.is_empty());
    }

    #[test]
    fn quadtree_recursion_covers_every_minimum_coding_block() {
        let mut ctx = ContextSet::init(26);
        let mut engine = Engine::new();
        let mut y_data = Vec::new();
        let mut cb_data = Vec::new();
        let mut cr_data = Vec::new();
        let y = solid_frame(32, 32, 64, &mut y_data);
        cb_data.resize(16 * 16, 128);
        cr_data.resize(16 * 16, 128);
        let cb = Plane::new(&cb_data, 16);
        let cr = Plane::new(&cr_data, 16);
        let frame = Frame::new_yuv420p8(32, 32, 0, y, cb, cr).unwrap();
        let mut recon_y = PlaneRecon::new(32, 32);
        let mut recon_cb = PlaneRecon::new(16, 16);
        let mut recon_cr = PlaneRecon::new(16, 16);

        let (bytes, tail_value, tail_bits) =
            encode_slice_data(&mut engine, &mut ctx, &frame, &mut recon_y, &mut recon_cb, &mut recon_cr, 26);

        // A 32x32 CTB always splits down to 16 8x8 luma coding units;
        // the flat input still forces CABAC-coded decisions (split_cu,
        // part_mode, prediction flags) even with every cbf at zero, so
        // the slice must not be empty.
        assert!(!bytes.is_empty());

        // Re-running the identical frame must retrace precisely the
        // same reconstruction state, since context arrays and the
        // recon buffer are reset (not mutated cross-run) by the caller.
        recon_y.reset();
        recon_cb.reset();
        recon_cr.reset();
        let mut ctx2 = ContextSet::init(26);
        let mut engine2 = Engine::new();
        let (bytes2, tail_value2, tail_bits2) =
            encode_slice_data(&mut engine2, &mut ctx2, &frame, &mut recon_y, &mut recon_cb, &mut recon_cr, 26);
        assert_eq!(bytes, bytes2);
        assert_eq!(tail_value2, tail_value);
        assert_eq!(tail_bits2, tail_bits);
    }
}
