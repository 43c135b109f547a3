use crate::hal::types::SampleFormat;

/// Decode one little-endian sample to a normalized f64
pub fn decode_sample(format: SampleFormat, bytes: &[u8]) -> f64 {
    match format {
        SampleFormat::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64 / 32768.0,
        SampleFormat::I24 => {
            let b0 = bytes[0] as i32;
            let b1 = bytes[1] as i32;
            let b2 = bytes[2] as i8 as i32; // Sign-extend the high byte
            let sample24 = (b2 << 16) | (b1 << 8) | b0;
            sample24 as f64 / 8388608.0 // 2^23
        }
        SampleFormat::I32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 2147483648.0 // 2^31
        }
        SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}

/// Encode a normalized f64 into one little-endian sample, clamping integer formats
pub fn encode_sample(format: SampleFormat, value: f64, out: &mut [u8]) {
    match format {
        SampleFormat::I16 => {
            let v = (value * 32768.0).clamp(-32768.0, 32767.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::I24 => {
            let v = (value * 8388608.0).clamp(-8388608.0, 8388607.0) as i32;
            out[0] = (v & 0xFF) as u8;
            out[1] = ((v >> 8) & 0xFF) as u8;
            out[2] = ((v >> 16) & 0xFF) as u8;
        }
        SampleFormat::I32 => {
            let v = (value * 2147483648.0).clamp(-2147483648.0, 2147483647.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
    }
}

/// Fill a buffer with digital silence. Every supported format is silent at zero.
pub fn fill_silence(_format: SampleFormat, data: &mut [u8]) {
    data.fill(0);
}

/// Scale every sample in place. Runs on the IO thread: no allocation.
pub fn apply_gain(format: SampleFormat, data: &mut [u8], gain: f32) {
    if gain == 1.0 {
        return;
    }
    if gain <= 0.0 {
        fill_silence(format, data);
        return;
    }

    let gain = gain as f64;
    for sample in data.chunks_exact_mut(format.bytes_per_sample()) {
        let value = decode_sample(format, sample);
        encode_sample(format, value * gain, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_round_values() {
        let mut buf = [0u8; 2];
        encode_sample(SampleFormat::I16, 0.5, &mut buf);
        assert_eq!(i16::from_le_bytes(buf), 16384);
        assert_eq!(decode_sample(SampleFormat::I16, &buf), 0.5);

        encode_sample(SampleFormat::I16, 2.0, &mut buf);
        assert_eq!(i16::from_le_bytes(buf), 32767); // clamped
    }

    #[test]
    fn test_i24_sign_extension() {
        let mut buf = [0u8; 3];
        encode_sample(SampleFormat::I24, -0.5, &mut buf);
        assert_eq!(buf, [0x00, 0x00, 0xC0]);
        assert_eq!(decode_sample(SampleFormat::I24, &buf), -0.5);
    }

    #[test]
    fn test_apply_gain_halves_pcm() {
        let mut data = Vec::new();
        for v in [16384i16, -16384, 8192, 0] {
            data.extend_from_slice(&v.to_le_bytes());
        }

        apply_gain(SampleFormat::I16, &mut data, 0.5);

        let samples: Vec<i16> = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![8192, -8192, 4096, 0]);
    }

    #[test]
    fn test_zero_gain_is_silence() {
        let mut data = vec![7u8; 6];
        apply_gain(SampleFormat::I24, &mut data, 0.0);
        assert!(data.iter().all(|&b| b == 0));

        let mut data = 0.25f32.to_le_bytes().to_vec();
        apply_gain(SampleFormat::F32, &mut data, 0.0);
        assert_eq!(data, vec![0, 0, 0, 0]);
    }
}
