// surfrec/src/encoder/drain.rs
//
//! The drain worker: pulls encoded buffers out of the encoder into the ring, and exports the
//! retained span on request.

use super::muxer::{Muxer, MuxerFactory};
use super::{EncoderConfig, EncoderOutput, MediaFormat, VideoEncoder};
use crate::circular_buffer::{CircularVideoBuffer, PacketFlags};
use crate::worker::{self, ReadyLatch};
use crate::Error;

use crossbeam_channel::{self as channel, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Outcome of a save request, reported through `EncoderCallback::file_save_complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    Success,
    /// The ring held no keyframe. Nothing was written.
    NoKeyframe,
    /// Writing the file failed. The partial file was removed.
    IoError,
    /// The muxer rejected the data. The partial file was removed.
    MuxerError,
}

impl SaveStatus {
    /// The integer status code delivered to callers.
    pub fn code(self) -> i32 {
        match self {
            SaveStatus::Success => 0,
            SaveStatus::NoKeyframe => 1,
            SaveStatus::IoError => 2,
            SaveStatus::MuxerError => 3,
        }
    }

    fn from_error(err: &Error) -> SaveStatus {
        match err {
            Error::Io(_) => SaveStatus::IoError,
            _ => SaveStatus::MuxerError,
        }
    }
}

/// Feedback from the drain worker. Called on the worker thread.
pub trait EncoderCallback: Send {
    /// A save request finished. Called exactly once per `save_video` call.
    fn file_save_complete(&mut self, status: SaveStatus);

    /// The span of video currently buffered, in microseconds.
    fn buffer_status(&mut self, total_time_usec: i64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Recording,
    /// Final flush before the session ends.
    Draining,
}

enum DrainMessage {
    FrameAvailableSoon(Sender<Result<(), Error>>),
    SaveVideo(PathBuf, Sender<Result<(), Error>>),
    Shutdown,
}

/// A cloneable handle for notifying the drain worker about new frames. Handed to the render
/// thread.
#[derive(Clone)]
pub struct EncoderHandle {
    mailbox: Sender<DrainMessage>,
}

impl EncoderHandle {
    /// Announces that a frame is about to be pushed into the encoder's input surface. Returns
    /// once everything the encoder has already produced is in the ring, so the encoder has room
    /// for the frame.
    pub fn frame_available_soon(&self) -> Result<(), Error> {
        worker::round_trip(&self.mailbox, DrainMessage::FrameAvailableSoon)
    }
}

/// Owns an encode session: the encoder, its ring and the worker thread that drains one into the
/// other.
pub struct EncodeDrainLoop<S> {
    handle: EncoderHandle,
    input_surface: S,
    state: Arc<Mutex<EncoderState>>,
    thread: Option<JoinHandle<Result<(), Error>>>,
}

impl<S> EncodeDrainLoop<S> {
    /// Opens the encoder with `open` and starts draining it. Blocks until the worker is ready.
    pub fn start<E, F>(
        config: EncoderConfig,
        open: F,
        muxers: Box<dyn MuxerFactory>,
        callback: Box<dyn EncoderCallback>,
    ) -> Result<EncodeDrainLoop<S>, Error>
    where
        E: VideoEncoder<InputSurface = S>,
        F: FnOnce(&EncoderConfig) -> Result<E, Error>,
    {
        config.validate()?;
        // The ring has to exist before the encoder is opened.
        let ring = CircularVideoBuffer::new(config.bit_rate, config.frame_rate, config.desired_span_sec)?;
        let encoder = open(&config)?;
        let input_surface = encoder.input_surface();

        let (mailbox, receiver) = channel::bounded(config.mailbox_capacity);
        let state = Arc::new(Mutex::new(EncoderState::Idle));
        let ready = Arc::new(ReadyLatch::new());
        let ready_timeout = config.ready_timeout;

        let worker_state = state.clone();
        let worker_ready = ready.clone();
        let thread = thread::Builder::new()
            .name("encoder drain".to_owned())
            .spawn(move || {
                let mut worker = DrainWorker {
                    config,
                    encoder,
                    ring,
                    format: None,
                    muxers,
                    callback,
                    frame_count: 0,
                    state: worker_state,
                };
                worker.set_state(EncoderState::Recording);
                worker_ready.signal(Ok(()));
                worker.run(receiver)
            })?;

        let handle = EncoderHandle { mailbox };
        if let Err(err) = ready.wait(ready_timeout) {
            drop(handle);
            match err {
                Error::WorkerStartTimeout => {
                    warn!("encoder drain worker did not start in time; detaching it")
                }
                _ => {
                    let _ = worker::join(thread);
                }
            }
            return Err(err);
        }

        info!("encoder drain started");
        Ok(EncodeDrainLoop { handle, input_surface, state, thread: Some(thread) })
    }

    /// The surface the render thread draws encoder frames into.
    pub fn input_surface(&self) -> &S {
        &self.input_surface
    }

    pub fn handle(&self) -> EncoderHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> EncoderState {
        *self.state.lock()
    }

    /// See `EncoderHandle::frame_available_soon`.
    pub fn frame_available_soon(&self) -> Result<(), Error> {
        self.handle.frame_available_soon()
    }

    /// Writes the retained span, starting at the oldest keyframe, to `path`.
    ///
    /// Returns `Error::NoKeyframeAvailable` if there is nothing to export; no file is created in
    /// that case. Otherwise returns as soon as the export has begun and reports the outcome
    /// through `EncoderCallback::file_save_complete`. Draining is paused while the file is
    /// written.
    pub fn save_video(&self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        worker::round_trip(&self.handle.mailbox, |reply| DrainMessage::SaveVideo(path, reply))
    }

    /// Drains the encoder to its end-of-stream buffer, stops it and joins the worker. A second
    /// call fails with `Error::AlreadyShutDown`.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        let thread = self.thread.take().ok_or(Error::AlreadyShutDown)?;
        // If the worker already quit, joining it reports why.
        let _ = self.handle.mailbox.send(DrainMessage::Shutdown);
        worker::join(thread)
    }
}

impl<S> Drop for EncodeDrainLoop<S> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.shutdown() {
                warn!("encoder drain shutdown failed: {}", err);
            }
        }
    }
}

struct DrainWorker<E: VideoEncoder> {
    config: EncoderConfig,
    encoder: E,
    ring: CircularVideoBuffer,
    // Captured from the first format change and immutable afterwards.
    format: Option<MediaFormat>,
    muxers: Box<dyn MuxerFactory>,
    callback: Box<dyn EncoderCallback>,
    frame_count: u32,
    state: Arc<Mutex<EncoderState>>,
}

impl<E: VideoEncoder> DrainWorker<E> {
    fn set_state(&self, state: EncoderState) {
        *self.state.lock() = state;
    }

    fn run(&mut self, receiver: Receiver<DrainMessage>) -> Result<(), Error> {
        let result = self.dispatch(&receiver);
        let finish = self.finish();
        self.set_state(EncoderState::Idle);
        result.and(finish)
    }

    fn dispatch(&mut self, receiver: &Receiver<DrainMessage>) -> Result<(), Error> {
        // A disconnected mailbox means every handle is gone; treat it as a shutdown request.
        while let Ok(message) = receiver.recv() {
            match message {
                DrainMessage::FrameAvailableSoon(reply) => {
                    let result = self.frame_available_soon();
                    let fatal = match result {
                        Err(ref err) if err.is_fatal() => Some(err.to_string()),
                        _ => None,
                    };
                    let _ = reply.send(result);
                    if let Some(message) = fatal {
                        return Err(Error::EncoderFailed(message));
                    }
                }
                DrainMessage::SaveVideo(path, reply) => self.save_video(&path, reply),
                DrainMessage::Shutdown => break,
            }
        }
        Ok(())
    }

    fn frame_available_soon(&mut self) -> Result<(), Error> {
        self.drain(false)?;

        self.frame_count += 1;
        if self.frame_count % self.config.status_interval_frames.max(1) == 0 {
            self.callback.buffer_status(self.ring.time_span_usec());
        }
        Ok(())
    }

    /// Moves everything the encoder has produced into the ring. With `until_end_of_stream` it
    /// keeps polling until the end-of-stream buffer arrives or the timeout runs out. Returns
    /// whether end-of-stream was seen.
    fn drain(&mut self, until_end_of_stream: bool) -> Result<bool, Error> {
        let deadline = Instant::now() + self.config.end_of_stream_timeout;
        let mut dropped = None;

        loop {
            match self.encoder.dequeue_output(self.config.drain_timeout)? {
                EncoderOutput::TryAgainLater => {
                    if !until_end_of_stream {
                        break;
                    }
                    if Instant::now() >= deadline {
                        warn!("no end-of-stream buffer from the encoder; giving up");
                        break;
                    }
                    thread::yield_now();
                }
                EncoderOutput::FormatChanged(format) => {
                    if self.format.is_some() {
                        warn!("encoder output format changed again; keeping the first one");
                        continue;
                    }
                    debug!("encoder output format: {:?}", format);
                    self.format = Some(format);
                }
                EncoderOutput::Buffer(buffer) => {
                    let index = buffer.index;
                    let flags = buffer.flags;
                    if flags.contains(PacketFlags::CODEC_CONFIG) {
                        // Already captured through the format change.
                        debug!("ignoring codec config buffer of {} bytes", buffer.data.len());
                    } else if !buffer.data.is_empty() {
                        if let Err(err) = self.ring.add(buffer.data, flags, buffer.pts_us) {
                            warn!("dropping encoded buffer: {}", err);
                            dropped = Some(err);
                        }
                    }
                    self.encoder.release_output(index)?;

                    if flags.contains(PacketFlags::END_OF_STREAM) {
                        if !until_end_of_stream {
                            warn!("unexpected end of stream from the encoder");
                        }
                        return dropped.map_or(Ok(true), Err);
                    }
                }
            }
        }

        dropped.map_or(Ok(false), Err)
    }

    fn save_video(&mut self, path: &Path, reply: Sender<Result<(), Error>>) {
        let (first, format) = match (self.ring.first_index(), self.format.clone()) {
            (Some(first), Some(format)) => (first, format),
            _ => {
                warn!("no keyframe to start {} from", path.display());
                let _ = reply.send(Err(Error::NoKeyframeAvailable));
                self.callback.file_save_complete(SaveStatus::NoKeyframe);
                return;
            }
        };
        let _ = reply.send(Ok(()));

        let status = match self.muxers.create(path) {
            // Nothing was written, so whatever is at `path` is left alone.
            Err(err) => {
                warn!("could not create {}: {}", path.display(), err);
                SaveStatus::from_error(&err)
            }
            Ok(muxer) => match self.write_span(muxer, first, &format) {
                Ok(()) => {
                    info!("saved {}", path.display());
                    SaveStatus::Success
                }
                Err(err) => {
                    warn!("saving {} failed: {}", path.display(), err);
                    if path.exists() {
                        if let Err(err) = fs::remove_file(path) {
                            warn!("failed to remove partial file {}: {}", path.display(), err);
                        }
                    }
                    SaveStatus::from_error(&err)
                }
            },
        };
        self.callback.file_save_complete(status);
    }

    fn write_span(
        &self,
        mut muxer: Box<dyn Muxer>,
        first: usize,
        format: &MediaFormat,
    ) -> Result<(), Error> {
        muxer.start(format)?;
        for chunk in self.ring.iter_from(first) {
            muxer.write_sample(&chunk.data, &chunk.info)?;
        }
        muxer.finish()
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.set_state(EncoderState::Draining);
        let result = self
            .encoder
            .signal_end_of_input_stream()
            .and_then(|()| self.drain(true).map(|_| ()));
        let stop = self.encoder.stop();
        debug!("encoder stopped with {} packets buffered", self.ring.len());
        result.and(stop)
    }
}
