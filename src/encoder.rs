// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! High-level encoder controller: turns a sequence of raw [Frame]s into a
//! sequence of Annex-B [Packet]s, owning every piece of state the syntax
//! layer below it needs reused rather than reallocated.

use alloc::vec::Vec;

use crate::bit_writer::BitWriter;
use crate::cabac::{context::ContextSet, Engine};
use crate::frame::Frame;
use crate::nal_unit::{NalUnit, NalUnitType};
use crate::params::{Pps, Sps, Vps};
use crate::predict::PlaneRecon;
use crate::slice::{encode_slice_data, write_slice_header};
use crate::{Config, Error, Extradata, Packet};

/// Turns validated [Config] + a stream of [Frame]s into Annex-B
/// [Packet]s. Every frame is coded as its own IDR slice — this crate
/// has no inter-prediction and no GOP structure, so every packet is a
/// keyframe and the context arrays reinitialize on every call, matching
/// the per-slice (not merely per-frame) reinitialization the syntax
/// layer's invariants require.
pub struct EncoderController {
    config: Config,
    pps_qp: u8,
    bit_writer: BitWriter,
    engine: Engine,
    ctx: ContextSet,
    recon_y: PlaneRecon,
    recon_cb: PlaneRecon,
    recon_cr: PlaneRecon,
}

impl EncoderController {
    /// Validate `config`, build the VPS/SPS/PPS once, and return their
    /// Annex-B concatenation alongside a ready controller.
    pub fn new(config: Config) -> Result<(Extradata, Self), Error> {
        config.validate()?;
        log::debug!(
            "initializing encoder: {}x{} qp={} monochrome={}",
            config.width,
            config.height,
            config.qp,
            config.monochrome
        );

        let vps = Vps::new(config.frame_rate_num, config.frame_rate_den);
        let sps = Sps::new(config.width, config.height, config.monochrome);
        let pps = Pps::new(config.qp);

        let vps_nal = NalUnit::new(NalUnitType::Vps, vps.to_rbsp());
        let sps_nal = NalUnit::new(NalUnitType::Sps, sps.to_rbsp());
        let pps_nal = NalUnit::new(NalUnitType::Pps, pps.to_rbsp());

        let mut extradata = Vec::new();
        extradata.extend_from_slice(&vps_nal.to_annex_b());
        extradata.extend_from_slice(&sps_nal.to_annex_b());
        extradata.extend_from_slice(&pps_nal.to_annex_b());

        let (chroma_width, chroma_height) = if config.monochrome {
            (1, 1)
        } else {
            (config.width as usize / 2, config.height as usize / 2)
        };

        let controller = Self {
            pps_qp: config.qp,
            bit_writer: BitWriter::new(),
            engine: Engine::new(),
            ctx: ContextSet::init(config.qp as i32 - 26),
            recon_y: PlaneRecon::new(config.width as usize, config.height as usize),
            recon_cb: PlaneRecon::new(chroma_width, chroma_height),
            recon_cr: PlaneRecon::new(chroma_width, chroma_height),
            config,
        };

        Ok((Extradata { data: extradata }, controller))
    }

    /// Encode one frame into one IDR-slice NAL unit, wrapped in its
    /// Annex-B packet. State mutated here (CABAC engine, context
    /// arrays, reconstruction buffers) is reset at entry, never carried
    /// over a failed call.
    pub fn encode(&mut self, frame: &Frame) -> Result<Packet, Error> {
        if frame.width() != self.config.width || frame.height() != self.config.height {
            return Err(Error::invalid_frame("frame dimensions do not match the configured encoder dimensions"));
        }
        if frame.monochrome() != self.config.monochrome {
            return Err(Error::invalid_frame("frame pixel format does not match the configured encoder format"));
        }
        log::trace!("encoding frame pts={}", frame.pts());

        self.ctx = ContextSet::init(self.pps_qp as i32 - 26);
        self.recon_y.reset();
        self.recon_cb.reset();
        self.recon_cr.reset();

        self.bit_writer = BitWriter::new();
        write_slice_header(&mut self.bit_writer);

        let (cabac_bytes, tail_value, tail_bits) = encode_slice_data(
            &mut self.engine,
            &mut self.ctx,
            frame,
            &mut self.recon_y,
            &mut self.recon_cb,
            &mut self.recon_cr,
            self.pps_qp,
        );

        self.bit_writer.append_bytes(&cabac_bytes);
        if tail_bits > 0 {
            self.bit_writer.write_bits(tail_value, tail_bits);
        }
        let rbsp = core::mem::take(&mut self.bit_writer).flush_with_rbsp();

        let nal = NalUnit::new(NalUnitType::IdrNLp, rbsp);

        Ok(Packet {
            data: nal.to_annex_b(),
            pts: frame.pts(),
            dts: frame.pts(),
            duration: 1,
            is_keyframe: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    fn gray_mono_config(width: u32, height: u32, qp: u8) -> Config {
        Config {
            width,
            height,
            monochrome: true,
            frame_rate_num: 30,
            frame_rate_den: 1,
            qp,
        }
    }

    #[test]
    fn extradata_contains_three_parameter_set_nal_units() {
        let (extradata, _enc) = EncoderController::new(gray_mono_config(16, 16, 26)).unwrap();
        // start codes mark each NAL; three parameter sets were emitted.
        let start_code_count = extradata.data.windows(4).filter(|w| *w == [0, 0, 0, 1]).count();
        assert_eq!(start_code_count, 3);
        assert_eq!(extradata.data[4] >> 1, 32); // VPS
    }

    #[test]
    fn solid_gray_frame_encodes_to_an_idr_packet() {
        let (_extradata, mut enc) = EncoderController::new(gray_mono_config(16, 16, 26)).unwrap();
        let data = alloc::vec![128u8; 16 * 16];
        let y = Plane::new(&data, 16);
        let frame = Frame::new_mono8(16, 16, 0, y).unwrap();
        let packet = enc.encode(&frame).unwrap();
        assert!(packet.is_keyframe);
        assert_eq!(&packet.data[0..4], &[0, 0, 0, 1]);
        assert_eq!(packet.data[4] >> 1, 20); // IDR_N_LP
    }

    #[test]
    fn reencoding_the_same_frame_is_byte_identical() {
        let (_extradata, mut enc) = EncoderController::new(gray_mono_config(16, 16, 26)).unwrap();
        let data = alloc::vec![90u8; 16 * 16];
        let y = Plane::new(&data, 16);
        let frame = Frame::new_mono8(16, 16, 0, y).unwrap();
        let first = enc.encode(&frame).unwrap();
        let second = enc.encode(&frame).unwrap();
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn mismatched_dimensions_are_rejected_without_panicking() {
        let (_extradata, mut enc) = EncoderController::new(gray_mono_config(16, 16, 26)).unwrap();
        let data = alloc::vec![0u8; 8 * 8];
        let y = Plane::new(&data, 8);
        let frame = Frame::new_mono8(8, 8, 0, y).unwrap();
        assert!(enc.encode(&frame).is_err());
    }
}
