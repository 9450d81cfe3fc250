//! Wire format of the outgoing temperature frame.
//!
//! Compatibility-significant: consumers on the bus decode exactly this
//! layout. One data frame per acquisition cycle, standard 11-bit identifier,
//! 8 data bytes holding the two channel temperatures as little-endian IEEE
//! 754 singles. A NAN in either slot marks that channel's sensor as faulted.

/// Standard 11-bit identifier of the temperature frame.
pub const TEMPERATURE_FRAME_ID: u16 = 0x123;

/// Payload length in bytes: two `f32` values.
pub const PAYLOAD_LEN: usize = 8;

/// Encodes the per-channel temperatures into the frame payload.
///
/// Channel A occupies bytes 0..4, channel B bytes 4..8.
pub fn encode_payload(channel_a: f32, channel_b: f32) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..4].copy_from_slice(&channel_a.to_le_bytes());
    payload[4..].copy_from_slice(&channel_b.to_le_bytes());
    payload
}

/// Decodes a frame payload back into the two channel temperatures.
pub fn decode_payload(payload: &[u8; PAYLOAD_LEN]) -> (f32, f32) {
    let channel_a = f32::from_le_bytes(payload[..4].try_into().unwrap());
    let channel_b = f32::from_le_bytes(payload[4..].try_into().unwrap());
    (channel_a, channel_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntc::raw_to_celsius;
    use crate::RawSamplePair;

    fn sentinel_eq(left: f32, right: f32) -> bool {
        (left.is_nan() && right.is_nan()) || left == right
    }

    #[test]
    fn payload_round_trips() {
        let cases = [
            (21.5, -40.25),
            (f32::NAN, 85.0),
            (25.0, f32::NAN),
            (f32::NAN, f32::NAN),
        ];

        for (a, b) in cases {
            let (out_a, out_b) = decode_payload(&encode_payload(a, b));
            assert!(sentinel_eq(a, out_a));
            assert!(sentinel_eq(b, out_b));
        }
    }

    #[test]
    fn channel_order_and_byte_order() {
        let payload = encode_payload(1.0, -2.0);
        assert_eq!(&payload[..4], &1.0f32.to_le_bytes());
        assert_eq!(&payload[4..], &(-2.0f32).to_le_bytes());
    }

    #[test]
    fn midscale_cycle_produces_matching_finite_channels() {
        let samples = RawSamplePair::from([2048, 2048]);

        let temp_a = raw_to_celsius(samples.channel_a);
        let temp_b = raw_to_celsius(samples.channel_b);
        assert!(temp_a.is_finite());
        assert_eq!(temp_a.to_bits(), temp_b.to_bits());

        let payload = encode_payload(temp_a, temp_b);
        assert_eq!(payload.len(), PAYLOAD_LEN);
        assert_eq!(TEMPERATURE_FRAME_ID, 0x123);

        let (out_a, out_b) = decode_payload(&payload);
        assert_eq!(out_a.to_bits(), temp_a.to_bits());
        assert_eq!(out_b.to_bits(), temp_b.to_bits());
    }

    #[test]
    fn faulted_cycle_still_encodes() {
        // Shorted channel A, open-circuit channel B: both sentinels ride the
        // frame as payload, the cycle is not dropped.
        let samples = RawSamplePair::from([0, 4095]);

        let temp_a = raw_to_celsius(samples.channel_a);
        let temp_b = raw_to_celsius(samples.channel_b);
        assert!(temp_a.is_nan());
        assert!(temp_b.is_nan());

        let (out_a, out_b) = decode_payload(&encode_payload(temp_a, temp_b));
        assert!(out_a.is_nan());
        assert!(out_b.is_nan());
    }
}
