// surfrec/src/encoder/mod.rs
//
//! The hardware encoder interface and the configuration of an encode session.

use crate::circular_buffer::PacketFlags;
use crate::Error;

use std::time::Duration;

pub mod drain;
pub mod muxer;

pub use self::drain::{EncodeDrainLoop, EncoderCallback, EncoderHandle, EncoderState, SaveStatus};
pub use self::muxer::{ElementaryStreamMuxer, Muxer, MuxerFactory};

/// The container format metadata an encoder reports once, before its first payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub width: i32,
    pub height: i32,
    /// Codec-specific data (for H.264, the SPS and PPS), kept verbatim.
    pub codec_config: Vec<Vec<u8>>,
}

/// An encoded buffer borrowed from the encoder until it is released.
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    /// Identifies the buffer to `VideoEncoder::release_output`.
    pub index: usize,
    pub flags: PacketFlags,
    pub pts_us: i64,
    pub data: &'a [u8],
}

/// The result of polling the encoder's output queue.
#[derive(Debug)]
pub enum EncoderOutput<'a> {
    /// Nothing is ready yet.
    TryAgainLater,
    /// The output format is now known.
    FormatChanged(MediaFormat),
    /// An encoded buffer.
    Buffer(OutputBuffer<'a>),
}

/// A hardware video encoder that takes frames through an input surface and produces encoded
/// buffers through a polled output queue.
pub trait VideoEncoder: Send + 'static {
    /// The drawable the encoder reads its frames from.
    type InputSurface: Clone + Send;

    fn input_surface(&self) -> Self::InputSurface;

    /// Polls the output queue, waiting at most `timeout`.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput<'_>, Error>;

    /// Hands a buffer returned by `dequeue_output` back to the encoder.
    fn release_output(&mut self, index: usize) -> Result<(), Error>;

    /// Tells the encoder that no more frames will arrive through the input surface.
    fn signal_end_of_input_stream(&mut self) -> Result<(), Error>;

    /// Stops the encoder and frees its resources.
    fn stop(&mut self) -> Result<(), Error>;
}

/// Parameters of an encode session.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub mime: String,
    pub width: i32,
    pub height: i32,
    /// Bits per second.
    pub bit_rate: u32,
    pub frame_rate: u32,
    /// Seconds between keyframes.
    pub iframe_interval_sec: u32,
    /// Seconds of video the ring retains.
    pub desired_span_sec: u32,
    /// Capacity of the drain worker's mailbox.
    pub mailbox_capacity: usize,
    /// How long `start` waits for the worker to come up.
    pub ready_timeout: Duration,
    /// How long each poll of the output queue waits during regular drains.
    pub drain_timeout: Duration,
    /// How long the final drain waits for the end-of-stream buffer.
    pub end_of_stream_timeout: Duration,
    /// Report the buffered span to the callback every this many frames.
    pub status_interval_frames: u32,
}

impl Default for EncoderConfig {
    fn default() -> EncoderConfig {
        EncoderConfig {
            mime: "video/avc".to_owned(),
            width: 1280,
            height: 720,
            bit_rate: 6_000_000,
            frame_rate: 30,
            iframe_interval_sec: 1,
            desired_span_sec: 7,
            mailbox_capacity: 16,
            ready_timeout: Duration::from_secs(5),
            drain_timeout: Duration::ZERO,
            end_of_stream_timeout: Duration::from_secs(1),
            status_interval_frames: 10,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidConfiguration("width and height must be positive"));
        }
        if self.bit_rate == 0 || self.frame_rate == 0 {
            return Err(Error::InvalidConfiguration("bit rate and frame rate must be positive"));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::InvalidConfiguration("mailbox capacity must be positive"));
        }
        if self.bit_rate as u64 * self.desired_span_sec as u64 / 8 == 0 {
            return Err(Error::InvalidConfiguration("bit rate and span leave no room to buffer"));
        }
        if self.desired_span_sec < self.iframe_interval_sec * 2 {
            return Err(Error::SpanTooShort {
                span_sec: self.desired_span_sec,
                iframe_interval_sec: self.iframe_interval_sec,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::EncoderConfig;
    use crate::Error;

    #[test]
    fn span_must_cover_two_keyframe_intervals() {
        let config = EncoderConfig { desired_span_sec: 2, ..EncoderConfig::default() };
        config.validate().unwrap();

        let config = EncoderConfig { desired_span_sec: 3, iframe_interval_sec: 2, ..config };
        match config.validate() {
            Err(Error::SpanTooShort { span_sec: 3, iframe_interval_sec: 2 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = EncoderConfig { width: 0, ..EncoderConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
        let config = EncoderConfig { bit_rate: 0, ..EncoderConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn ring_must_hold_at_least_one_byte() {
        let config = EncoderConfig {
            bit_rate: 4,
            iframe_interval_sec: 0,
            desired_span_sec: 1,
            ..EncoderConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
        EncoderConfig { bit_rate: 8, ..config }.validate().unwrap();
    }
}
