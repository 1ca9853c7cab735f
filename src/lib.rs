// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! less High Efficiency Video Coding (H.265) encoding library
//!
//! This crate implements the core of an intra-only HEVC encoder: the
//! CABAC arithmetic coder, the HEVC syntax layer (parameter sets, slice
//! header, coding-tree and transform-tree recursion, residual coding),
//! and the integer transform/quantization pipeline feeding it. It is
//! deliberately narrow — one coding-tree-block size, one slice per
//! picture, 8-bit planar 4:2:0 or monochrome input, Planar-only intra
//! prediction — in exchange for a small, auditable implementation.
//! Pixel-format conversion, MP4 muxing, and file I/O are left to
//! callers; see [EncoderController] for the crate's only entry point.
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(feature = "backtrace", feature(error_generic_member_access))]
#![deny(unsafe_code)]

#[cfg(not(feature = "std"))]
extern crate core as std;

extern crate alloc;

#[cfg(feature = "backtrace")]
use std::backtrace::Backtrace;

mod bit_writer;
mod cabac;
mod encoder;
mod frame;
mod nal_unit;
mod params;
mod predict;
mod residual;
mod slice;
mod transform;

pub use encoder::EncoderController;
pub use frame::{Frame, PixelFormat, Plane};

// Error type ----------------------

/// An HEVC encoding error.
#[derive(Debug)]
pub enum Error {
    /// Rejected at [`EncoderController::new`]: bad dimensions, pixel
    /// format, frame rate, or QP.
    InvalidConfig {
        msg: &'static str,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// Rejected at [`EncoderController::encode`]: a frame that doesn't
    /// match the configured encoder, or has an inconsistent internal
    /// shape. Encoder state is untouched when this is returned.
    InvalidFrame {
        msg: &'static str,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
}

impl Error {
    pub(crate) fn invalid_config(msg: &'static str) -> Self {
        Error::InvalidConfig {
            msg,
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn invalid_frame(msg: &'static str) -> Self {
        Error::InvalidFrame {
            msg,
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        match self {
            Error::InvalidConfig {
                msg,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => {
                write!(f, "invalid encoder configuration: {msg}")
            }
            Error::InvalidFrame {
                msg,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => {
                write!(f, "invalid frame: {msg}")
            }
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

// Configuration -------------------

/// Encoder configuration, validated once at [`EncoderController::new`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub width: u32,
    pub height: u32,
    pub monochrome: bool,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    /// HEVC QP, `[0, 51]`.
    pub qp: u8,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_config("width and height must both be non-zero"));
        }
        if self.width % (slice::MIN_CB_SIZE as u32) != 0 || self.height % (slice::MIN_CB_SIZE as u32) != 0 {
            return Err(Error::invalid_config("width and height must be multiples of the minimum coding block size"));
        }
        if !self.monochrome && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(Error::invalid_config("4:2:0 frames require even width and height"));
        }
        if self.frame_rate_num == 0 || self.frame_rate_den == 0 {
            return Err(Error::invalid_config("frame rate numerator and denominator must both be non-zero"));
        }
        if self.qp > 51 {
            return Err(Error::invalid_config("qp must be in [0, 51]"));
        }
        Ok(())
    }
}

// Output types ---------------------

/// One encoded Annex-B access unit: every frame this encoder produces
/// is an IDR slice, so every [Packet] is a keyframe with `pts == dts`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: alloc::vec::Vec<u8>,
    pub pts: u64,
    pub dts: u64,
    /// Duration in timebase ticks; always one frame tick in this
    /// intra-only, constant-frame-rate encoder.
    pub duration: u64,
    pub is_keyframe: bool,
}

/// The concatenated Annex-B VPS+SPS+PPS, produced once by
/// [`EncoderController::new`] and handed to the container muxer ahead
/// of the first packet.
#[derive(Debug, Clone)]
pub struct Extradata {
    pub data: alloc::vec::Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_zero_dimensions() {
        let config = Config {
            width: 0,
            height: 16,
            monochrome: true,
            frame_rate_num: 30,
            frame_rate_den: 1,
            qp: 26,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_dimensions_not_a_multiple_of_the_minimum_coding_block() {
        let config = Config {
            width: 17,
            height: 16,
            monochrome: true,
            frame_rate_num: 30,
            frame_rate_den: 1,
            qp: 26,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_out_of_range_qp() {
        let config = Config {
            width: 16,
            height: 16,
            monochrome: true,
            frame_rate_num: 30,
            frame_rate_den: 1,
            qp: 52,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_accepts_a_reasonable_configuration() {
        let config = Config {
            width: 64,
            height: 32,
            monochrome: false,
            frame_rate_num: 25,
            frame_rate_den: 1,
            qp: 30,
        };
        assert!(config.validate().is_ok());
    }
}
