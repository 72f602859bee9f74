//! Rendering parameter tuples for the audio and video pipelines.
//!
//! A backend's parameters are immutable while it is running; changing them
//! incompatibly clears the render cache. The full tuple also participates in
//! conform-job identity, so two parameter sets that differ in any field are
//! distinct conform targets.

use crate::time::{FrameRate, RationalTime};
use serde::{Deserialize, Serialize};

/// Sample format for decoded/conformed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 16-bit integer
    S16,
    /// Signed 32-bit integer
    S32,
    /// Signed 64-bit integer
    S64,
    /// 32-bit float
    #[default]
    F32,
    /// 64-bit float
    F64,
}

impl SampleFormat {
    /// Size of one sample of this format in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::S64 | Self::F64 => 8,
        }
    }
}

/// Speaker arrangement of an audio stream or rendering target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
    FivePointOne,
    SevenPointOne,
}

impl ChannelLayout {
    /// Number of discrete channels in this layout.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::FivePointOne => 6,
            Self::SevenPointOne => 8,
        }
    }
}

/// Audio rendering parameters: the format every audio render and conform
/// must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioParams {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Output speaker layout
    pub channel_layout: ChannelLayout,
    /// Output sample format
    pub format: SampleFormat,
}

impl AudioParams {
    /// Create a new parameter tuple.
    pub fn new(sample_rate: u32, channel_layout: ChannelLayout, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_layout,
            format,
        }
    }

    /// True if the parameters describe a usable output format.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
    }

    /// Number of sample frames covering `time` at this sample rate,
    /// flooring partial samples.
    pub fn time_to_samples(&self, time: RationalTime) -> i64 {
        let r = time.as_rational() * num_rational::Rational64::new(self.sample_rate as i64, 1);
        r.floor().to_integer()
    }

    /// Byte count for `samples` sample frames across all channels.
    pub fn samples_to_bytes(&self, samples: i64) -> usize {
        samples as usize * self.channel_layout.channel_count() * self.format.bytes_per_sample()
    }

    /// Byte count covering `time` of interleaved audio in this format.
    pub fn time_to_bytes(&self, time: RationalTime) -> usize {
        self.samples_to_bytes(self.time_to_samples(time))
    }

    /// Duration of `samples` sample frames at this sample rate.
    pub fn samples_to_time(&self, samples: i64) -> RationalTime {
        RationalTime::new(samples, self.sample_rate as i64)
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::new(48000, ChannelLayout::Stereo, SampleFormat::F32)
    }
}

/// Video rendering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoParams {
    /// Full-resolution width
    pub width: u32,
    /// Full-resolution height
    pub height: u32,
    /// Output frame rate
    pub frame_rate: FrameRate,
    /// Preview resolution divider (1 = full, 2 = half, ...)
    pub divider: u32,
}

impl VideoParams {
    /// Create a new parameter tuple at full resolution.
    pub fn new(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            frame_rate,
            divider: 1,
        }
    }

    /// True if the parameters describe a usable output format.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.divider > 0 && self.frame_rate.numerator > 0
    }

    /// Width after applying the preview divider.
    pub fn effective_width(&self) -> u32 {
        self.width / self.divider
    }

    /// Height after applying the preview divider.
    pub fn effective_height(&self) -> u32 {
        self.height / self.divider
    }
}

impl Default for VideoParams {
    fn default() -> Self {
        Self::new(1920, 1080, FrameRate::FPS_24)
    }
}

/// Parameters for either pipeline, used where the media type is generic
/// (e.g. cache identity hashing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderParams {
    Audio(AudioParams),
    Video(VideoParams),
}

impl RenderParams {
    /// True if the parameters describe a usable output format.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Audio(p) => p.is_valid(),
            Self::Video(p) => p.is_valid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_time_to_bytes() {
        let params = AudioParams::new(48000, ChannelLayout::Stereo, SampleFormat::F32);
        // One second of stereo f32 at 48kHz
        assert_eq!(params.time_to_bytes(RationalTime::new(1, 1)), 48000 * 2 * 4);
        // Half a second
        assert_eq!(params.time_to_samples(RationalTime::new(1, 2)), 24000);
    }

    #[test]
    fn test_audio_samples_round_trip() {
        let params = AudioParams::default();
        let t = params.samples_to_time(12000);
        assert_eq!(params.time_to_samples(t), 12000);
    }

    #[test]
    fn test_video_divider() {
        let mut params = VideoParams::new(1920, 1080, FrameRate::FPS_24);
        assert_eq!(params.effective_width(), 1920);
        params.divider = 2;
        assert_eq!(params.effective_width(), 960);
        assert_eq!(params.effective_height(), 540);
    }

    #[test]
    fn test_params_validity() {
        assert!(AudioParams::default().is_valid());
        assert!(!AudioParams::new(0, ChannelLayout::Mono, SampleFormat::S16).is_valid());
        assert!(VideoParams::default().is_valid());
        let mut bad = VideoParams::default();
        bad.divider = 0;
        assert!(!bad.is_valid());
        assert!(RenderParams::Audio(AudioParams::default()).is_valid());
        assert!(!RenderParams::Video(bad).is_valid());
    }
}
