// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! CABAC context state: a 6-bit probability state plus a most-probable-symbol
//! flag, initialized per slice from an 8-bit init value and the slice QP.

use super::tables::{TRANS_IDX_LPS, TRANS_IDX_MPS};

/// One adaptive probability model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Context {
    pub(crate) state: u8,
    pub(crate) mps: bool,
}

impl Context {
    /// Derive a context's initial state from its 8-bit init value and the
    /// slice QP, per the HEVC/H.264 context initialization formula.
    pub fn init(init_value: u8, qp: i32) -> Self {
        let init = init_value as i32;
        let slope = (init >> 4) * 5 - 45;
        let offset = ((init & 15) << 3) - 16;
        let pre_ctx_state = ((slope * qp) >> 4) + offset;
        let pre_ctx_state = pre_ctx_state.clamp(1, 126);

        if pre_ctx_state >= 64 {
            Context {
                state: (pre_ctx_state - 64) as u8,
                mps: true,
            }
        } else {
            Context {
                state: (63 - pre_ctx_state) as u8,
                mps: false,
            }
        }
    }

    #[inline]
    pub(crate) fn update_mps(&mut self) {
        self.state = TRANS_IDX_MPS[self.state as usize];
    }

    #[inline]
    pub(crate) fn update_lps(&mut self) {
        if self.state == 0 {
            self.mps = !self.mps;
        }
        self.state = TRANS_IDX_LPS[self.state as usize];
    }
}

/// Per-syntax-element 8-bit context init values.
///
/// The HEVC standard (Rec. ITU-T H.265, Annex 9) tabulates one init value
/// per context per slice-init-type (I/P/B). This crate only ever encodes
/// I slices, so only the I-slice column is needed. These values are
/// representative entries from the widely reproduced context-initialization
/// tables; see `DESIGN.md` ("Context init values") for provenance and the
/// isolation of this table from the rest of the engine.
pub mod init_values {
    pub const SPLIT_CU_FLAG: [u8; 3] = [139, 141, 157];
    pub const PART_MODE: u8 = 184;
    pub const PREV_INTRA_LUMA_PRED_FLAG: u8 = 184;
    pub const INTRA_CHROMA_PRED_MODE: u8 = 63;
    pub const CBF_LUMA: [u8; 5] = [111, 141, 141, 141, 141];
    pub const CBF_CHROMA: [u8; 5] = [94, 138, 182, 154, 154];
    pub const LAST_SIG_COEFF_X_PREFIX: [u8; 18] = [
        110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108, 123, 63,
    ];
    pub const LAST_SIG_COEFF_Y_PREFIX: [u8; 18] = [
        110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108, 123, 63,
    ];
    pub const CODED_SUB_BLOCK_FLAG: [u8; 4] = [91, 171, 134, 141];
    pub const SIG_COEFF_FLAG: [u8; 44] = [
        111, 111, 125, 110, 110, 94, 124, 108, 124, 107, 125, 141, 179, 153, 125, 107, 125, 141,
        179, 153, 125, 107, 125, 141, 179, 153, 125, 140, 139, 182, 182, 152, 136, 152, 136, 153,
        136, 139, 111, 136, 139, 111, 141, 111,
    ];
    pub const COEFF_ABS_LEVEL_GREATER1_FLAG: [u8; 24] = [
        140, 92, 137, 138, 140, 152, 138, 139, 153, 74, 149, 92, 139, 107, 122, 152, 140, 179,
        166, 182, 140, 227, 122, 197,
    ];
    pub const COEFF_ABS_LEVEL_GREATER2_FLAG: [u8; 6] = [138, 153, 136, 167, 152, 152];
}

/// Every context array the coding-tree and residual coder need, reinitialized
/// from [`init_values`] at the start of every slice (not merely every frame),
/// per the Context-model invariant.
pub struct ContextSet {
    pub split_cu_flag: [Context; 3],
    pub part_mode: Context,
    pub prev_intra_luma_pred_flag: Context,
    pub intra_chroma_pred_mode: Context,
    pub cbf_luma: [Context; 5],
    pub cbf_chroma: [Context; 5],
    pub last_sig_coeff_x_prefix: [Context; 18],
    pub last_sig_coeff_y_prefix: [Context; 18],
    pub coded_sub_block_flag: [Context; 4],
    pub sig_coeff_flag: [Context; 44],
    pub coeff_abs_level_greater1_flag: [Context; 24],
    pub coeff_abs_level_greater2_flag: [Context; 6],
}

impl ContextSet {
    pub fn init(qp: i32) -> Self {
        let c = |v: u8| Context::init(v, qp);
        let carr = |vs: &[u8]| -> Vec<Context> { vs.iter().map(|&v| c(v)).collect() };
        Self {
            split_cu_flag: array3(carr(&init_values::SPLIT_CU_FLAG)),
            part_mode: c(init_values::PART_MODE),
            prev_intra_luma_pred_flag: c(init_values::PREV_INTRA_LUMA_PRED_FLAG),
            intra_chroma_pred_mode: c(init_values::INTRA_CHROMA_PRED_MODE),
            cbf_luma: array5(carr(&init_values::CBF_LUMA)),
            cbf_chroma: array5(carr(&init_values::CBF_CHROMA)),
            last_sig_coeff_x_prefix: array18(carr(&init_values::LAST_SIG_COEFF_X_PREFIX)),
            last_sig_coeff_y_prefix: array18(carr(&init_values::LAST_SIG_COEFF_Y_PREFIX)),
            coded_sub_block_flag: array4(carr(&init_values::CODED_SUB_BLOCK_FLAG)),
            sig_coeff_flag: array44(carr(&init_values::SIG_COEFF_FLAG)),
            coeff_abs_level_greater1_flag: array24(carr(&init_values::COEFF_ABS_LEVEL_GREATER1_FLAG)),
            coeff_abs_level_greater2_flag: array6(carr(&init_values::COEFF_ABS_LEVEL_GREATER2_FLAG)),
        }
    }
}

use alloc::vec::Vec;

fn array3(v: Vec<Context>) -> [Context; 3] {
    v.try_into().unwrap()
}
fn array4(v: Vec<Context>) -> [Context; 4] {
    v.try_into().unwrap()
}
fn array5(v: Vec<Context>) -> [Context; 5] {
    v.try_into().unwrap()
}
fn array6(v: Vec<Context>) -> [Context; 6] {
    v.try_into().unwrap()
}
fn array18(v: Vec<Context>) -> [Context; 18] {
    v.try_into().unwrap()
}
fn array24(v: Vec<Context>) -> [Context; 24] {
    v.try_into().unwrap()
}
fn array44(v: Vec<Context>) -> [Context; 44] {
    v.try_into().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_set_init_builds_all_arrays() {
        let cs = ContextSet::init(26);
        assert_eq!(cs.split_cu_flag.len(), 3);
        assert_eq!(cs.sig_coeff_flag.len(), 44);
    }

    #[test]
    fn canonical_init_vector() {
        // Rec. ITU-T H.265: InitContext(154, 26) -> {state: 0, mps: 1}
        let ctx = Context::init(154, 26);
        assert_eq!(ctx.state, 0);
        assert!(ctx.mps);
    }

    #[test]
    fn init_always_in_range() {
        for init in 0u8..=255 {
            for qp in 0i32..=51 {
                let ctx = Context::init(init, qp);
                assert!(ctx.state <= 63);
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn init_state_in_range_proptest(init in 0u8..=255, qp in 0i32..=51) {
            let ctx = Context::init(init, qp);
            proptest::prop_assert!(ctx.state <= 63);
        }
    }
}
