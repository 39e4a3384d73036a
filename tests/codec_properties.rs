//! Property tests for the record codec: decoding must never panic on arbitrary
//! bytes, and `expand_comp` must match the reference base-8 exponent/mantissa
//! formula for every `u16` input, not just the hand-picked cases in the unit tests.

use pacct_shadow::codec::{AcctLayout, RECORD_SIZE, decode, expand_comp};
use proptest::prelude::*;

fn reference_expand(ct: u16) -> u64 {
    let exp = (ct >> 13) & 0x7;
    let val = u64::from(ct & 0x1fff);
    val << (3 * u32::from(exp))
}

proptest! {
    #[test]
    fn expand_comp_matches_reference_formula(ct: u16) {
        prop_assert_eq!(expand_comp(ct), reference_expand(ct));
    }

    #[test]
    fn expand_comp_never_exceeds_max_shift(ct: u16) {
        // exp maxes out at 7, val at 0x1fff: 0x1fff << 21 is the ceiling.
        prop_assert!(expand_comp(ct) <= (0x1fffu64 << 21));
    }

    #[test]
    fn decode_v2_never_panics_on_arbitrary_bytes(buf in prop::collection::vec(any::<u8>(), RECORD_SIZE)) {
        let _ = decode(&buf, AcctLayout::V2);
    }

    #[test]
    fn decode_v3_never_panics_on_arbitrary_bytes(buf in prop::collection::vec(any::<u8>(), RECORD_SIZE)) {
        let _ = decode(&buf, AcctLayout::V3);
    }

    #[test]
    fn detect_never_panics_on_arbitrary_short_or_long_buffers(buf in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = AcctLayout::detect(&buf);
    }

    #[test]
    fn detect_dispatches_purely_on_version_low_nibble(
        high_nibble in 0u8..16,
        rest in prop::collection::vec(any::<u8>(), RECORD_SIZE - 2),
    ) {
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[1] = (high_nibble << 4) | 2;
        buf[2..].copy_from_slice(&rest);
        prop_assert_eq!(AcctLayout::detect(&buf).unwrap(), AcctLayout::V2);

        buf[1] = (high_nibble << 4) | 3;
        prop_assert_eq!(AcctLayout::detect(&buf).unwrap(), AcctLayout::V3);
    }

    #[test]
    fn decode_v2_comm_is_never_longer_than_field_width(buf in prop::collection::vec(any::<u8>(), RECORD_SIZE)) {
        let rec = decode(&buf, AcctLayout::V2).unwrap();
        prop_assert!(rec.comm.len() <= 17);
        prop_assert_eq!(rec.pid, 0);
        prop_assert_eq!(rec.tgid, 0);
        prop_assert_eq!(rec.ppid, 0);
    }

    #[test]
    fn decode_v3_ties_tgid_to_pid(buf in prop::collection::vec(any::<u8>(), RECORD_SIZE)) {
        let rec = decode(&buf, AcctLayout::V3).unwrap();
        prop_assert_eq!(rec.pid, rec.tgid);
        prop_assert!(rec.comm.len() <= 16);
    }
}
