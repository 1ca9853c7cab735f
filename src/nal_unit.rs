// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Network Abstraction Layer (NAL) unit packaging: start-code
//! prepending, the HEVC two-byte NAL header, and emulation-prevention
//! byte insertion.

use alloc::vec;
use alloc::vec::Vec;

/// A single NAL unit: its type and an already-built RBSP payload. Use
/// [`NalUnit::to_annex_b`] to get the start-code-prefixed, header'd,
/// emulation-prevented bytes ready to append to a bitstream.
pub struct NalUnit {
    unit_type: NalUnitType,
    rbsp: Vec<u8>,
}

impl NalUnit {
    pub fn new(unit_type: NalUnitType, rbsp: Vec<u8>) -> Self {
        Self { unit_type, rbsp }
    }

    /// Prepend the 4-byte start code `00 00 00 01`, the 2-byte NAL
    /// header, and apply emulation prevention to the RBSP payload.
    pub fn to_annex_b(&self) -> Vec<u8> {
        let nal_type = self.unit_type.nal_unit_type();
        // forbidden_zero_bit=0, nal_unit_type (6 bits), nuh_layer_id=0 (6
        // bits), nuh_temporal_id_plus1=1 (3 bits).
        let header = [(nal_type << 1) & 0xFE, 0x01];

        let max_ebsp_size = calc_max_ebsp_size(self.rbsp.len());
        let mut ebsp = vec![0u8; max_ebsp_size];
        let ebsp_len = rbsp_to_ebsp(&self.rbsp, &mut ebsp);
        ebsp.truncate(ebsp_len);

        let mut out = Vec::with_capacity(4 + header.len() + ebsp.len());
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(&header);
        out.extend_from_slice(&ebsp);
        out
    }
}

/// Upper bound on EBSP size after emulation prevention: at most one
/// `0x03` inserted per two RBSP bytes.
#[inline]
fn calc_max_ebsp_size(rbsp_size: usize) -> usize {
    rbsp_size + rbsp_size.div_ceil(2)
}

/// Convert a Raw Byte Sequence Payload to an Encapsulated Byte Sequence
/// Payload: walk the payload tracking consecutive zero bytes, and
/// insert a `0x03` byte whenever a run of two zero bytes is about to be
/// followed by a byte `<= 0x03`.
pub(crate) fn rbsp_to_ebsp(rbsp_buf: &[u8], nal_buf: &mut [u8]) -> usize {
    let max_ebsp_size = calc_max_ebsp_size(rbsp_buf.len());
    assert!(nal_buf.len() >= max_ebsp_size);
    let mut dest_len = 0;
    let mut input_buf = rbsp_buf;

    while let Some(first_idx) = memchr::memchr(0x00, input_buf) {
        if first_idx + 1 < input_buf.len() {
            if input_buf[first_idx + 1] == 0x00 {
                if first_idx + 2 < input_buf.len() {
                    let pos3 = input_buf[first_idx + 2];
                    let src = &input_buf[..first_idx + 2];
                    nal_buf[dest_len..dest_len + src.len()].copy_from_slice(src);
                    dest_len += src.len();
                    if needs_protecting_in_pos3(pos3) {
                        nal_buf[dest_len] = 0x03;
                        dest_len += 1;
                    }
                    input_buf = &input_buf[src.len()..];
                } else {
                    break;
                }
            } else {
                let src = &input_buf[..first_idx + 1];
                nal_buf[dest_len..dest_len + src.len()].copy_from_slice(src);
                dest_len += src.len();
                input_buf = &input_buf[src.len()..];
            }
        } else {
            break;
        }
    }

    if !input_buf.is_empty() {
        nal_buf[dest_len..dest_len + input_buf.len()].copy_from_slice(input_buf);
        dest_len += input_buf.len();
    }

    dest_len
}

#[inline]
fn needs_protecting_in_pos3(byte: u8) -> bool {
    matches!(byte, 0x00..=0x03)
}

/// `nal_unit_type` values this crate emits. HEVC's NAL header carries
/// this in 6 bits; everything else (the many slice/RADL/RASL/suffix
/// types this crate never produces) is out of scope, hence
/// `#[non_exhaustive]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NalUnitType {
    /// Coded slice of an IDR picture, no leading pictures (NAL type 20).
    IdrNLp,
    /// Video parameter set (NAL type 32).
    Vps,
    /// Sequence parameter set (NAL type 33).
    Sps,
    /// Picture parameter set (NAL type 34).
    Pps,
}

impl NalUnitType {
    pub(crate) fn nal_unit_type(&self) -> u8 {
        match self {
            Self::IdrNLp => 20,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_byte() {
        assert!(needs_protecting_in_pos3(0x00));
        assert!(needs_protecting_in_pos3(0x01));
        assert!(needs_protecting_in_pos3(0x02));
        assert!(needs_protecting_in_pos3(0x03));
        assert!(!needs_protecting_in_pos3(0x04));
        for byte in 4..=255 {
            assert!(!needs_protecting_in_pos3(byte));
        }
    }

    fn contains_forbidden_sequence(buf: &[u8]) -> bool {
        buf.windows(3).any(|w| w[0] == 0 && w[1] == 0 && w[2] <= 0x03)
    }

    #[test]
    fn test_nal_encoding_roundtrip() {
        let test_vecs: Vec<Vec<u8>> = vec![
            vec![0x00],
            vec![0x00, 0x00],
            vec![0x00, 0x00, 0x00],
            vec![0x00, 0x00, 0x01],
            vec![0x00, 0x00, 0x02],
            vec![0x00, 0x00, 0x03],
            vec![0x00, 0x00, 0x04],
            vec![0x00, 0x00, 0x00, 0x00],
            vec![0x00, 0x00, 0x00, 0x01],
            vec![0x03, 0x03, 0x03, 0x03],
            vec![0x00, 0x00, 0x03, 0x00, 0x00, 0x00],
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07],
            vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        ];
        for orig in &test_vecs {
            let mut encoded = vec![0u8; calc_max_ebsp_size(orig.len())];
            let sz = rbsp_to_ebsp(orig, &mut encoded);
            encoded.truncate(sz);
            assert!(!contains_forbidden_sequence(&encoded), "forbidden sequence in {encoded:?} from {orig:?}");
        }
    }

    #[test]
    fn nal_header_encodes_type_and_fixed_fields() {
        let nal = NalUnit::new(NalUnitType::Vps, vec![0xAB]);
        let bytes = nal.to_annex_b();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(bytes[4], (32u8 << 1) & 0xFE);
        assert_eq!(bytes[5], 0x01);
    }

    proptest::proptest! {
        #[test]
        fn emulation_prevention_never_leaves_a_forbidden_sequence(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let mut encoded = vec![0u8; calc_max_ebsp_size(bytes.len())];
            let sz = rbsp_to_ebsp(&bytes, &mut encoded);
            encoded.truncate(sz);
            proptest::prop_assert!(!contains_forbidden_sequence(&encoded));
        }
    }
}
