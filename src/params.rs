// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parameter set emission: VPS, SPS, and PPS, each built the same way —
//! a small struct of the fields this crate actually varies, a
//! `to_rbsp()` that walks a [`BitWriter`] field by field in bitstream
//! order, with every other syntax element a fixed, commented constant.

use alloc::vec::Vec;

use crate::bit_writer::BitWriter;

/// Coding-tree block size: every CTB is 32x32 luma samples.
pub const LOG2_CTB_SIZE: u32 = 5;
/// Smallest coding unit a `split_cu_flag` recursion can produce: 8x8.
/// Paired with always signaling `part_mode = 2Nx2N`, this keeps every
/// coding unit's one transform unit at 8x8 luma / 4x4 chroma, so the
/// standard's NxN-partition chroma-merge special case never arises.
pub const LOG2_MIN_CB_SIZE: u32 = 3;
/// `max_transform_hierarchy_depth_intra = 0`: a transform unit always
/// equals its coding unit's size, so `split_transform_flag` is never
/// signaled (`spec.md` §4.5, "Transform tree").
pub const MAX_TRANSFORM_HIERARCHY_DEPTH_INTRA: u32 = 0;

fn write_profile_tier_level(bw: &mut BitWriter) {
    bw.write_bits(0, 2); // general_profile_space
    bw.write_bit(false); // general_tier_flag
    bw.write_bits(1, 5); // general_profile_idc: Main
    for i in 0..32u32 {
        bw.write_bit(i == 1); // general_profile_compatibility_flag[i], bit 1 set for Main
    }
    bw.write_bit(true); // general_progressive_source_flag
    bw.write_bit(false); // general_interlaced_source_flag
    bw.write_bit(true); // general_non_packed_constraint_flag
    bw.write_bit(true); // general_frame_only_constraint_flag
    bw.write_bits(0, 31); // reserved constraint flags (top 31 of 44 reserved bits)
    bw.write_bits(0, 13); // remaining 13 reserved bits (31 + 13 = 44)
    bw.write_u8(120); // general_level_idc: level 4.0
}

/// Video parameter set.
pub struct Vps {
    pub video_parameter_set_id: u32,
    pub time_scale: u32,
    pub num_units_in_tick: u32,
}

impl Vps {
    pub fn new(time_scale: u32, num_units_in_tick: u32) -> Self {
        Self {
            video_parameter_set_id: 0,
            time_scale,
            num_units_in_tick,
        }
    }

    pub fn to_rbsp(&self) -> Vec<u8> {
        let mut bw = BitWriter::with_capacity(256);

        bw.write_bits(self.video_parameter_set_id, 4);
        bw.write_bit(true); // vps_base_layer_internal_flag
        bw.write_bit(true); // vps_base_layer_available_flag
        bw.write_bits(0, 6); // vps_max_layers_minus1
        bw.write_bits(0, 3); // vps_max_sub_layers_minus1
        bw.write_bit(true); // vps_temporal_id_nesting_flag
        bw.write_u16(0xFFFF); // vps_reserved_0xffff_16bits

        write_profile_tier_level(&mut bw);

        bw.write_bit(false); // vps_sub_layer_ordering_info_present_flag
        bw.write_ue(0); // vps_max_dec_pic_buffering_minus1[0]
        bw.write_ue(0); // vps_max_num_reorder_pics[0]
        bw.write_ue(0); // vps_max_latency_increase_plus1[0]

        bw.write_bits(0, 6); // vps_max_layer_id
        bw.write_ue(0); // vps_num_layer_sets_minus1

        bw.write_bit(true); // vps_timing_info_present_flag
        bw.write_u32(self.num_units_in_tick);
        bw.write_u32(self.time_scale);
        bw.write_bit(false); // vps_poc_proportional_to_timing_flag
        bw.write_ue(0); // vps_num_hrd_parameters

        bw.write_bit(false); // vps_extension_flag

        bw.flush_with_rbsp()
    }
}

/// Sequence parameter set.
pub struct Sps {
    pub seq_parameter_set_id: u32,
    pub monochrome: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
}

impl Sps {
    pub fn new(width: u32, height: u32, monochrome: bool) -> Self {
        Self {
            seq_parameter_set_id: 0,
            monochrome,
            pic_width_in_luma_samples: width,
            pic_height_in_luma_samples: height,
        }
    }

    pub fn to_rbsp(&self) -> Vec<u8> {
        let mut bw = BitWriter::with_capacity(256);

        bw.write_bits(0, 4); // sps_video_parameter_set_id
        bw.write_bits(0, 3); // sps_max_sub_layers_minus1
        bw.write_bit(false); // sps_temporal_id_nesting_flag

        write_profile_tier_level(&mut bw);

        bw.write_ue(self.seq_parameter_set_id);
        bw.write_ue(if self.monochrome { 0 } else { 1 }); // chroma_format_idc
        bw.write_ue(self.pic_width_in_luma_samples);
        bw.write_ue(self.pic_height_in_luma_samples);
        bw.write_bit(false); // conformance_window_flag
        bw.write_ue(0); // bit_depth_luma_minus8
        bw.write_ue(0); // bit_depth_chroma_minus8
        bw.write_ue(4); // log2_max_pic_order_cnt_lsb_minus4

        bw.write_bit(false); // sps_sub_layer_ordering_info_present_flag
        bw.write_ue(0); // sps_max_dec_pic_buffering_minus1[0]
        bw.write_ue(0); // sps_max_num_reorder_pics[0]
        bw.write_ue(0); // sps_max_latency_increase_plus1[0]

        bw.write_ue(LOG2_MIN_CB_SIZE - 3); // log2_min_luma_coding_block_size_minus3
        bw.write_ue(LOG2_CTB_SIZE - LOG2_MIN_CB_SIZE); // log2_diff_max_min_luma_coding_block_size
        bw.write_ue(LOG2_MIN_CB_SIZE - 2); // log2_min_luma_transform_block_size_minus2 (TU == CU)
        bw.write_ue(LOG2_CTB_SIZE - LOG2_MIN_CB_SIZE); // log2_diff_max_min_transform_block_size
        bw.write_ue(MAX_TRANSFORM_HIERARCHY_DEPTH_INTRA); // max_transform_hierarchy_depth_inter
        bw.write_ue(MAX_TRANSFORM_HIERARCHY_DEPTH_INTRA);

        bw.write_bit(false); // scaling_list_enabled_flag
        bw.write_bit(false); // amp_enabled_flag
        bw.write_bit(false); // sample_adaptive_offset_enabled_flag
        bw.write_bit(false); // pcm_enabled_flag
        bw.write_ue(0); // num_short_term_ref_pic_sets
        bw.write_bit(false); // long_term_ref_pics_present_flag
        bw.write_bit(false); // sps_temporal_mvp_enabled_flag
        bw.write_bit(false); // strong_intra_smoothing_enabled_flag
        bw.write_bit(false); // vui_parameters_present_flag
        bw.write_bit(false); // sps_extension_present_flag

        bw.flush_with_rbsp()
    }
}

/// Picture parameter set.
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub init_qp: i32,
}

impl Pps {
    pub fn new(qp: u8) -> Self {
        Self {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            init_qp: qp as i32 - 26,
        }
    }

    pub fn to_rbsp(&self) -> Vec<u8> {
        let mut bw = BitWriter::with_capacity(128);

        bw.write_ue(self.pic_parameter_set_id);
        bw.write_ue(self.seq_parameter_set_id);
        bw.write_bit(false); // dependent_slice_segments_enabled_flag
        bw.write_bit(false); // output_flag_present_flag
        bw.write_bits(0, 3); // num_extra_slice_header_bits
        bw.write_bit(false); // sign_data_hiding_enabled_flag
        bw.write_bit(false); // cabac_init_present_flag
        bw.write_ue(0); // num_ref_idx_l0_default_active_minus1
        bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
        bw.write_se(self.init_qp); // init_qp_minus26
        bw.write_bit(false); // constrained_intra_pred_flag
        bw.write_bit(false); // transform_skip_enabled_flag
        bw.write_bit(false); // cu_qp_delta_enabled_flag
        bw.write_se(0); // pps_cb_qp_offset
        bw.write_se(0); // pps_cr_qp_offset
        bw.write_bit(false); // pps_slice_chroma_qp_offsets_present_flag
        bw.write_bit(false); // weighted_pred_flag
        bw.write_bit(false); // weighted_bipred_flag
        bw.write_bit(false); // transquant_bypass_enabled_flag
        bw.write_bit(false); // tiles_enabled_flag
        bw.write_bit(false); // entropy_coding_sync_enabled_flag
                              // pps_loop_filter_across_slices_enabled_flag = 0: this crate never
                              // signals more than one slice per picture, and keeping it false
                              // means the slice header never needs the conditional
                              // slice_loop_filter_across_slices_enabled_flag bit.
        bw.write_bit(false);
        bw.write_bit(false); // deblocking_filter_control_present_flag
        bw.write_bit(false); // pps_scaling_list_data_present_flag
        bw.write_bit(false); // lists_modification_present_flag
        bw.write_ue(0); // log2_parallel_merge_level_minus2
        bw.write_bit(false); // slice_segment_header_extension_present_flag
        bw.write_bit(false); // pps_extension_present_flag

        bw.flush_with_rbsp()
    }
}
