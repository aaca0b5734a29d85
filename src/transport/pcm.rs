//! PCM helpers for microphone capture

/// Convert a float sample in `-1.0..=1.0` to 16-bit PCM, clamping overshoot
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Average interleaved frames of `channels` samples down to mono
///
/// A trailing partial frame is averaged over the samples it has.
pub fn downmix<T: Copy>(data: &[T], channels: usize, to_i16: impl Fn(T) -> i16) -> Vec<i16> {
    data.chunks(channels.max(1))
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(to_i16(s))).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}
