//! LiveLink Face (v6) frame decoding.
//!
//! A packet looks like this, all numbers big-endian:
//!
//! ```text
//! 0       version (u8) + device id length (u32) + device id (36 bytes)
//! 41      subject name length (i32)
//! 45      subject name
//! +0      frame time: frame number, sub frame, fps, denominator (4 x u32)
//! +16     channel count (u8), always DATA_LENGTH
//! +17     DATA_LENGTH x f32
//! ```
//!
//! Only the channel block is interpreted. The header, name and frame time are
//! skipped by offset.

use thiserror::Error;

/// Number of ARKit blendshapes carried by every frame.
pub const BLENDSHAPE_COUNT: usize = 52;
pub const HEAD_CHANNELS: usize = 3;
/// Yaw, pitch and roll for one eye.
pub const EYE_CHANNELS: usize = 3;

/// Channel count announced in the packet right before the float block.
pub const DATA_LENGTH: usize = BLENDSHAPE_COUNT + HEAD_CHANNELS + 2 * EYE_CHANNELS;

const NAME_LENGTH_OFFSET: usize = 41;
const NAME_OFFSET: usize = 45;
const FRAME_TIME_LEN: usize = 16;
const DEVICE_ID_LEN: usize = 36;
const VERSION: u8 = 6;

/// Smallest packet that can hold a one-byte subject name and a full
/// channel block.
pub const MIN_PACKET_LEN: usize = NAME_OFFSET + 1 + FRAME_TIME_LEN + 1 + DATA_LENGTH * 4;

const _: () = assert!(DATA_LENGTH == 61);
const _: () = assert!(MIN_PACKET_LEN == 307);
const _: () = assert!(1 + 4 + DEVICE_ID_LEN == NAME_LENGTH_OFFSET);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet too short: {len} bytes, need at least {}", MIN_PACKET_LEN)]
    TooShort { len: usize },
    #[error("unexpected channel count {0}, expected {}", DATA_LENGTH)]
    BadDataLength(u8),
    #[error("read at offset {offset} runs past the end of a {len}-byte packet")]
    Truncated { offset: usize, len: usize },
}

/// Blendshapes in the order consumers index them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Blendshape {
    BrowInnerUp = 0,
    BrowDownLeft,
    BrowDownRight,
    BrowOuterUpLeft,
    BrowOuterUpRight,
    EyeLookUpLeft,
    EyeLookUpRight,
    EyeLookDownLeft,
    EyeLookDownRight,
    EyeLookInLeft,
    EyeLookInRight,
    EyeLookOutLeft,
    EyeLookOutRight,
    EyeBlinkLeft,
    EyeBlinkRight,
    EyeSquintLeft,
    EyeSquintRight,
    EyeWideLeft,
    EyeWideRight,
    CheekPuff,
    CheekSquintLeft,
    CheekSquintRight,
    NoseSneerLeft,
    NoseSneerRight,
    JawOpen,
    JawForward,
    JawLeft,
    JawRight,
    MouthFunnel,
    MouthPucker,
    MouthLeft,
    MouthRight,
    MouthRollUpper,
    MouthRollLower,
    MouthShrugUpper,
    MouthShrugLower,
    MouthClose,
    MouthSmileLeft,
    MouthSmileRight,
    MouthFrownLeft,
    MouthFrownRight,
    MouthDimpleLeft,
    MouthDimpleRight,
    MouthUpperUpLeft,
    MouthUpperUpRight,
    MouthLowerDownLeft,
    MouthLowerDownRight,
    MouthPressLeft,
    MouthPressRight,
    MouthStretchLeft,
    MouthStretchRight,
    TongueOut,
}

impl Blendshape {
    /// Every blendshape, in consumer order.
    pub const ALL: [Blendshape; BLENDSHAPE_COUNT] = {
        let mut all = [Blendshape::BrowInnerUp; BLENDSHAPE_COUNT];
        let mut i = 0;
        while i < BLENDSHAPE_COUNT {
            all[WIRE_TO_CONSUMER[i]] = WIRE_ORDER[i];
            i += 1;
        }
        all
    };

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Blendshape::BrowInnerUp => "browInnerUp",
            Blendshape::BrowDownLeft => "browDown_L",
            Blendshape::BrowDownRight => "browDown_R",
            Blendshape::BrowOuterUpLeft => "browOuterUp_L",
            Blendshape::BrowOuterUpRight => "browOuterUp_R",
            Blendshape::EyeLookUpLeft => "eyeLookUp_L",
            Blendshape::EyeLookUpRight => "eyeLookUp_R",
            Blendshape::EyeLookDownLeft => "eyeLookDown_L",
            Blendshape::EyeLookDownRight => "eyeLookDown_R",
            Blendshape::EyeLookInLeft => "eyeLookIn_L",
            Blendshape::EyeLookInRight => "eyeLookIn_R",
            Blendshape::EyeLookOutLeft => "eyeLookOut_L",
            Blendshape::EyeLookOutRight => "eyeLookOut_R",
            Blendshape::EyeBlinkLeft => "eyeBlink_L",
            Blendshape::EyeBlinkRight => "eyeBlink_R",
            Blendshape::EyeSquintLeft => "eyeSquint_L",
            Blendshape::EyeSquintRight => "eyeSquint_R",
            Blendshape::EyeWideLeft => "eyeWide_L",
            Blendshape::EyeWideRight => "eyeWide_R",
            Blendshape::CheekPuff => "cheekPuff",
            Blendshape::CheekSquintLeft => "cheekSquint_L",
            Blendshape::CheekSquintRight => "cheekSquint_R",
            Blendshape::NoseSneerLeft => "noseSneer_L",
            Blendshape::NoseSneerRight => "noseSneer_R",
            Blendshape::JawOpen => "jawOpen",
            Blendshape::JawForward => "jawForward",
            Blendshape::JawLeft => "jawLeft",
            Blendshape::JawRight => "jawRight",
            Blendshape::MouthFunnel => "mouthFunnel",
            Blendshape::MouthPucker => "mouthPucker",
            Blendshape::MouthLeft => "mouthLeft",
            Blendshape::MouthRight => "mouthRight",
            Blendshape::MouthRollUpper => "mouthRollUpper",
            Blendshape::MouthRollLower => "mouthRollLower",
            Blendshape::MouthShrugUpper => "mouthShrugUpper",
            Blendshape::MouthShrugLower => "mouthShrugLower",
            Blendshape::MouthClose => "mouthClose",
            Blendshape::MouthSmileLeft => "mouthSmile_L",
            Blendshape::MouthSmileRight => "mouthSmile_R",
            Blendshape::MouthFrownLeft => "mouthFrown_L",
            Blendshape::MouthFrownRight => "mouthFrown_R",
            Blendshape::MouthDimpleLeft => "mouthDimple_L",
            Blendshape::MouthDimpleRight => "mouthDimple_R",
            Blendshape::MouthUpperUpLeft => "mouthUpperUp_L",
            Blendshape::MouthUpperUpRight => "mouthUpperUp_R",
            Blendshape::MouthLowerDownLeft => "mouthLowerDown_L",
            Blendshape::MouthLowerDownRight => "mouthLowerDown_R",
            Blendshape::MouthPressLeft => "mouthPress_L",
            Blendshape::MouthPressRight => "mouthPress_R",
            Blendshape::MouthStretchLeft => "mouthStretch_L",
            Blendshape::MouthStretchRight => "mouthStretch_R",
            Blendshape::TongueOut => "tongueOut",
        }
    }
}

impl TryFrom<usize> for Blendshape {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Blendshape::ALL.get(value).copied().ok_or(value)
    }
}

/// The order the capture client sends blendshapes in.
pub const WIRE_ORDER: [Blendshape; BLENDSHAPE_COUNT] = [
    Blendshape::EyeBlinkLeft,
    Blendshape::EyeLookDownLeft,
    Blendshape::EyeLookInLeft,
    Blendshape::EyeLookOutLeft,
    Blendshape::EyeLookUpLeft,
    Blendshape::EyeSquintLeft,
    Blendshape::EyeWideLeft,
    Blendshape::EyeBlinkRight,
    Blendshape::EyeLookDownRight,
    Blendshape::EyeLookInRight,
    Blendshape::EyeLookOutRight,
    Blendshape::EyeLookUpRight,
    Blendshape::EyeSquintRight,
    Blendshape::EyeWideRight,
    Blendshape::JawForward,
    Blendshape::JawLeft,
    Blendshape::JawRight,
    Blendshape::JawOpen,
    Blendshape::MouthClose,
    Blendshape::MouthFunnel,
    Blendshape::MouthPucker,
    Blendshape::MouthLeft,
    Blendshape::MouthRight,
    Blendshape::MouthSmileLeft,
    Blendshape::MouthSmileRight,
    Blendshape::MouthFrownLeft,
    Blendshape::MouthFrownRight,
    Blendshape::MouthDimpleLeft,
    Blendshape::MouthDimpleRight,
    Blendshape::MouthStretchLeft,
    Blendshape::MouthStretchRight,
    Blendshape::MouthRollLower,
    Blendshape::MouthRollUpper,
    Blendshape::MouthShrugLower,
    Blendshape::MouthShrugUpper,
    Blendshape::MouthPressLeft,
    Blendshape::MouthPressRight,
    Blendshape::MouthLowerDownLeft,
    Blendshape::MouthLowerDownRight,
    Blendshape::MouthUpperUpLeft,
    Blendshape::MouthUpperUpRight,
    Blendshape::BrowDownLeft,
    Blendshape::BrowDownRight,
    Blendshape::BrowInnerUp,
    Blendshape::BrowOuterUpLeft,
    Blendshape::BrowOuterUpRight,
    Blendshape::CheekPuff,
    Blendshape::CheekSquintLeft,
    Blendshape::CheekSquintRight,
    Blendshape::NoseSneerLeft,
    Blendshape::NoseSneerRight,
    Blendshape::TongueOut,
];

/// `WIRE_TO_CONSUMER[i]` is where the `i`th blendshape on the wire is stored.
pub const WIRE_TO_CONSUMER: [usize; BLENDSHAPE_COUNT] = {
    let mut table = [0; BLENDSHAPE_COUNT];
    let mut i = 0;
    while i < BLENDSHAPE_COUNT {
        table[i] = WIRE_ORDER[i] as usize;
        i += 1;
    }
    table
};

const fn is_permutation(table: &[usize; BLENDSHAPE_COUNT]) -> bool {
    let mut seen = [false; BLENDSHAPE_COUNT];
    let mut i = 0;
    while i < BLENDSHAPE_COUNT {
        let slot = table[i];
        if slot >= BLENDSHAPE_COUNT || seen[slot] {
            return false;
        }
        seen[slot] = true;
        i += 1;
    }
    true
}

const _: () = assert!(is_permutation(&WIRE_TO_CONSUMER));

/// One fully decoded capture frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    /// Indexed by [`Blendshape`].
    pub blendshapes: [f64; BLENDSHAPE_COUNT],
    pub head_rotation: [f64; 3],
    /// Horizontal, vertical.
    pub left_eye_rotation: [f64; 2],
    /// Horizontal, vertical.
    pub right_eye_rotation: [f64; 2],
}

impl DecodedFrame {
    pub const ZERO: DecodedFrame = DecodedFrame {
        blendshapes: [0.0; BLENDSHAPE_COUNT],
        head_rotation: [0.0; 3],
        left_eye_rotation: [0.0; 2],
        right_eye_rotation: [0.0; 2],
    };

    pub fn blendshape(&self, shape: Blendshape) -> f64 {
        self.blendshapes[shape.index()]
    }
}

impl Default for DecodedFrame {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Bounds-checked big-endian reader over a packet.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated {
            offset: self.pos,
            len: self.buf.len(),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos.checked_add(N).ok_or_else(|| self.truncated())?;
        let bytes = self.buf.get(self.pos..end).ok_or_else(|| self.truncated())?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.pos = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let [b] = self.take::<1>()?;
        Ok(b)
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take::<4>()?))
    }

    fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take::<4>()?)))
    }

    fn read_into(&mut self, out: &mut [f64]) -> Result<(), DecodeError> {
        for value in out.iter_mut() {
            *value = f64::from(self.read_f32()?);
        }
        Ok(())
    }
}

/// Decodes one datagram.
///
/// Nothing outside the returned frame is touched, so a failed decode can
/// simply be dropped by the caller.
pub fn decode(buf: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if buf.len() < MIN_PACKET_LEN {
        return Err(DecodeError::TooShort { len: buf.len() });
    }

    let mut reader = Reader::at(buf, NAME_LENGTH_OFFSET);
    let name_length = reader.read_i32()?;
    // A negative length would point back into the header.
    let name_length = usize::try_from(name_length).map_err(|_| DecodeError::Truncated {
        offset: NAME_LENGTH_OFFSET,
        len: buf.len(),
    })?;

    reader.skip(name_length)?;
    reader.skip(FRAME_TIME_LEN)?;

    let data_length = reader.read_u8()?;
    if usize::from(data_length) != DATA_LENGTH {
        return Err(DecodeError::BadDataLength(data_length));
    }

    let mut frame = DecodedFrame::ZERO;
    for &slot in WIRE_TO_CONSUMER.iter() {
        frame.blendshapes[slot] = f64::from(reader.read_f32()?);
    }
    reader.read_into(&mut frame.head_rotation)?;
    reader.read_into(&mut frame.left_eye_rotation)?;
    reader.read_f32()?; // left eye roll
    reader.read_into(&mut frame.right_eye_rotation)?;

    Ok(frame)
}

/// Builds a packet around a raw channel block, in wire order.
///
/// Used by simulators and tests; the device id and frame time are zeroed.
pub fn encode_channels(subject_name: &str, channels: &[f32; DATA_LENGTH]) -> Vec<u8> {
    let name = subject_name.as_bytes();
    let mut buf =
        Vec::with_capacity(NAME_OFFSET + name.len() + FRAME_TIME_LEN + 1 + DATA_LENGTH * 4);

    buf.push(VERSION);
    buf.extend_from_slice(&(DEVICE_ID_LEN as u32).to_be_bytes());
    buf.extend_from_slice(b"00000000-0000-0000-0000-000000000000");
    buf.extend_from_slice(&(name.len() as i32).to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&[0u8; FRAME_TIME_LEN]);
    buf.push(DATA_LENGTH as u8);
    for value in channels {
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf
}

/// Builds a packet that decodes back to `frame`, with zero eye roll.
pub fn encode(subject_name: &str, frame: &DecodedFrame) -> Vec<u8> {
    let mut channels = [0.0f32; DATA_LENGTH];
    for (wire, &slot) in WIRE_TO_CONSUMER.iter().enumerate() {
        channels[wire] = frame.blendshapes[slot] as f32;
    }
    let rest = &mut channels[BLENDSHAPE_COUNT..];
    for (dst, src) in rest[..3].iter_mut().zip(frame.head_rotation) {
        *dst = src as f32;
    }
    for (dst, src) in rest[3..5].iter_mut().zip(frame.left_eye_rotation) {
        *dst = src as f32;
    }
    for (dst, src) in rest[6..8].iter_mut().zip(frame.right_eye_rotation) {
        *dst = src as f32;
    }
    encode_channels(subject_name, &channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT_EYE_ROLL: usize = BLENDSHAPE_COUNT + 5;

    fn ascending() -> [f32; DATA_LENGTH] {
        let mut channels = [0.0f32; DATA_LENGTH];
        for (i, value) in channels.iter_mut().enumerate() {
            *value = i as f32;
        }
        channels
    }

    #[test]
    fn test_wire_order_matches_livelink_names() {
        assert_eq!(WIRE_ORDER[0], Blendshape::EyeBlinkLeft);
        assert_eq!(WIRE_ORDER[17], Blendshape::JawOpen);
        assert_eq!(WIRE_ORDER[43], Blendshape::BrowInnerUp);
        assert_eq!(WIRE_ORDER[51], Blendshape::TongueOut);
    }

    #[test]
    fn test_all_is_in_consumer_order() {
        for (i, shape) in Blendshape::ALL.iter().enumerate() {
            assert_eq!(shape.index(), i);
        }
        assert_eq!(Blendshape::try_from(24), Ok(Blendshape::JawOpen));
        assert_eq!(Blendshape::try_from(BLENDSHAPE_COUNT), Err(BLENDSHAPE_COUNT));
    }

    #[test]
    fn test_min_len_packet_has_one_byte_name() {
        let packet = encode_channels("a", &ascending());
        assert_eq!(packet.len(), MIN_PACKET_LEN);
        assert!(decode(&packet).is_ok());
    }

    #[test]
    fn test_too_short() {
        let packet = encode_channels("a", &ascending());
        assert_eq!(
            decode(&packet[..MIN_PACKET_LEN - 1]),
            Err(DecodeError::TooShort {
                len: MIN_PACKET_LEN - 1
            })
        );
        assert_eq!(decode(&[]), Err(DecodeError::TooShort { len: 0 }));
    }

    #[test]
    fn test_bad_data_length() {
        let mut packet = encode_channels("iPhone", &ascending());
        let count_offset = NAME_OFFSET + "iPhone".len() + FRAME_TIME_LEN;
        assert_eq!(packet[count_offset], 61);

        packet[count_offset] = 60;
        assert_eq!(decode(&packet), Err(DecodeError::BadDataLength(60)));
        packet[count_offset] = 0;
        assert_eq!(decode(&packet), Err(DecodeError::BadDataLength(0)));
    }

    #[test]
    fn test_name_length_past_end_is_truncated() {
        let mut packet = encode_channels("iPhone", &ascending());
        let len = packet.len();

        // Channel count byte itself lands past the end.
        packet[41..45].copy_from_slice(&(len as i32).to_be_bytes());
        assert!(matches!(decode(&packet), Err(DecodeError::Truncated { .. })));

        packet[41..45].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(decode(&packet), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_payload_past_end_is_truncated() {
        let mut packet = encode_channels("iPhone", &ascending());
        // Grow the declared name by 40 bytes and move the count byte with it,
        // so the count check passes but the float block overruns.
        let old_count = NAME_OFFSET + 6 + FRAME_TIME_LEN;
        packet[41..45].copy_from_slice(&46i32.to_be_bytes());
        packet[old_count + 40] = 61;

        match decode(&packet) {
            Err(DecodeError::Truncated { offset, len }) => {
                assert_eq!(len, packet.len());
                assert!(offset + 4 > len);
            }
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_name_length_is_truncated() {
        let mut packet = encode_channels("iPhone", &ascending());
        packet[41..45].copy_from_slice(&(-20i32).to_be_bytes());
        assert_eq!(
            decode(&packet),
            Err(DecodeError::Truncated {
                offset: NAME_LENGTH_OFFSET,
                len: packet.len()
            })
        );
    }

    #[test]
    fn test_ascending_channels_land_in_order() {
        let mut packet = encode_channels("ten_bytes_", &ascending());
        packet.resize(368, 0);
        assert_eq!(&packet[41..45], &10i32.to_be_bytes());

        let frame = decode(&packet).unwrap();
        for wire in 0..BLENDSHAPE_COUNT {
            assert_eq!(frame.blendshapes[WIRE_TO_CONSUMER[wire]], wire as f64);
        }
        assert_eq!(frame.head_rotation, [52.0, 53.0, 54.0]);
        assert_eq!(frame.left_eye_rotation, [55.0, 56.0]);
        assert_eq!(frame.right_eye_rotation, [58.0, 59.0]);
        assert_eq!(frame.blendshape(Blendshape::EyeBlinkLeft), 0.0);
        assert_eq!(frame.blendshape(Blendshape::BrowInnerUp), 43.0);
    }

    #[test]
    fn test_each_wire_slot_maps_to_exactly_one_output() {
        for wire in 0..BLENDSHAPE_COUNT {
            let mut channels = [0.0f32; DATA_LENGTH];
            channels[wire] = 1.0;
            let frame = decode(&encode_channels("probe", &channels)).unwrap();

            for (slot, value) in frame.blendshapes.iter().enumerate() {
                let expected = if slot == WIRE_TO_CONSUMER[wire] { 1.0 } else { 0.0 };
                assert_eq!(*value, expected, "wire {} slot {}", wire, slot);
            }
        }
    }

    #[test]
    fn test_left_eye_roll_is_ignored() {
        let base = ascending();
        let mut rolled = base;
        rolled[LEFT_EYE_ROLL] = -1234.5;

        assert_eq!(
            decode(&encode_channels("x", &base)),
            decode(&encode_channels("x", &rolled))
        );
    }

    #[test]
    fn test_decode_is_idempotent() {
        let packet = encode_channels("iPhone", &ascending());
        assert_eq!(decode(&packet), decode(&packet));
    }

    #[test]
    fn test_encode_round_trip() {
        let mut frame = DecodedFrame::ZERO;
        frame.blendshapes[Blendshape::JawOpen.index()] = 0.75;
        frame.blendshapes[Blendshape::MouthSmileRight.index()] = 0.25;
        frame.head_rotation = [0.1f32 as f64, -0.2f32 as f64, 0.3f32 as f64];
        frame.left_eye_rotation = [0.5, -0.5];
        frame.right_eye_rotation = [0.125, 0.0625];

        assert_eq!(decode(&encode("Neill", &frame)), Ok(frame));
    }
}
