// surfrec/src/render_thread.rs
//
//! The thread that owns the GPU context, pulls frames from a source and blits them to the
//! display and, while recording, to the encoder's input surface.

use crate::blit::FrameRenderer;
use crate::context::{ContextAttributes, GraphicsContext};
use crate::device::Device;
use crate::encoder::EncoderHandle;
use crate::frame_source::{FrameSource, SourceFrame, SurfaceCallback};
use crate::surface::SurfaceRole;
use crate::surface_manager::SurfaceManager;
use crate::worker::{self, ReadyLatch};
use crate::Error;

use crossbeam_channel::{self as channel, Receiver, Sender};
use euclid::default::Size2D;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives the "frame coming" notification that has to precede every frame pushed into the
/// encoder's input surface.
pub trait EncoderSink: Send {
    fn frame_available_soon(&self) -> Result<(), Error>;
}

impl EncoderSink for EncoderHandle {
    fn frame_available_soon(&self) -> Result<(), Error> {
        EncoderHandle::frame_available_soon(self)
    }
}

#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Attributes of the render thread's context. Recordable by default so the same config can
    /// back the encoder's input surface.
    pub context_attributes: ContextAttributes,
    pub mailbox_capacity: usize,
    /// How long `spawn` waits for the context and GL resources to be set up.
    pub ready_timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> RenderConfig {
        RenderConfig {
            context_attributes: ContextAttributes::recordable(),
            mailbox_capacity: 8,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        self.context_attributes.validate()?;
        if self.mailbox_capacity == 0 {
            return Err(Error::InvalidConfiguration("mailbox capacity must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Created,
    /// The context and GL resources exist; no display surface yet.
    Ready,
    Rendering,
    ShuttingDown,
    Terminated,
}

enum RenderMessage<W> {
    SurfaceCreated(W, Size2D<i32>),
    SurfaceChanged(Size2D<i32>),
    SurfaceDestroyed(Sender<Result<(), Error>>),
    FrameAvailable,
    StartRecording(W, Box<dyn EncoderSink>),
    StopRecording(Sender<Result<(), Error>>),
    Shutdown,
}

/// A cloneable handle for driving the render thread.
pub struct RenderHandle<W> {
    mailbox: Sender<RenderMessage<W>>,
}

impl<W> Clone for RenderHandle<W> {
    fn clone(&self) -> RenderHandle<W> {
        RenderHandle { mailbox: self.mailbox.clone() }
    }
}

impl<W> RenderHandle<W> {
    fn send(&self, message: RenderMessage<W>) -> Result<(), Error> {
        self.mailbox.send(message).map_err(|_| Error::WorkerUnavailable)
    }

    /// A new frame is waiting in the source.
    pub fn frame_available(&self) -> Result<(), Error> {
        self.send(RenderMessage::FrameAvailable)
    }

    /// Starts drawing every frame into `input_surface` as well, notifying `sink` before each
    /// one is pushed.
    pub fn start_recording(&self, input_surface: W, sink: Box<dyn EncoderSink>) -> Result<(), Error> {
        self.send(RenderMessage::StartRecording(input_surface, sink))
    }

    /// Stops recording. Returns once the encoder surface is gone.
    pub fn stop_recording(&self) -> Result<(), Error> {
        worker::round_trip(&self.mailbox, RenderMessage::StopRecording)
    }
}

impl<W> SurfaceCallback for RenderHandle<W> {
    type NativeWidget = W;

    fn on_available(&self, native_widget: W, size: Size2D<i32>) -> Result<(), Error> {
        self.send(RenderMessage::SurfaceCreated(native_widget, size))
    }

    fn on_size_changed(&self, size: Size2D<i32>) -> Result<(), Error> {
        self.send(RenderMessage::SurfaceChanged(size))
    }

    fn on_destroyed(&self) -> Result<(), Error> {
        worker::round_trip(&self.mailbox, RenderMessage::SurfaceDestroyed)
    }
}

pub struct RenderDispatchThread<D: Device> {
    handle: RenderHandle<D::NativeWidget>,
    state: Arc<Mutex<RenderState>>,
    thread: Option<JoinHandle<Result<(), Error>>>,
}

impl<D: Device> RenderDispatchThread<D> {
    /// Starts the thread, creates its context and runs `setup` on it with the context current
    /// to build the renderer and the frame source. Blocks until that is done.
    pub fn spawn<F, R, S>(device: D, config: RenderConfig, setup: F) -> Result<RenderDispatchThread<D>, Error>
    where
        F: FnOnce(&GraphicsContext<D>) -> Result<(R, S), Error> + Send + 'static,
        R: FrameRenderer + 'static,
        S: FrameSource + 'static,
    {
        config.validate()?;
        let (mailbox, receiver) = channel::bounded(config.mailbox_capacity);
        let state = Arc::new(Mutex::new(RenderState::Created));
        let ready = Arc::new(ReadyLatch::new());

        let worker_state = state.clone();
        let worker_ready = ready.clone();
        let ready_timeout = config.ready_timeout;
        let thread = thread::Builder::new().name("render dispatch".to_owned()).spawn(move || {
            let mut worker = match RenderWorker::new(device, &config, setup, worker_state) {
                Ok(worker) => worker,
                Err(err) => {
                    error!("render thread failed to start: {}", err);
                    worker_ready.signal(Err(err));
                    return Ok(());
                }
            };
            worker.set_state(RenderState::Ready);
            worker_ready.signal(Ok(()));
            worker.run(receiver)
        })?;

        let handle = RenderHandle { mailbox };
        if let Err(err) = ready.wait(ready_timeout) {
            drop(handle);
            match err {
                Error::WorkerStartTimeout => warn!("render thread did not start in time; detaching it"),
                _ => {
                    let _ = worker::join(thread);
                }
            }
            return Err(err);
        }

        info!("render thread ready");
        Ok(RenderDispatchThread { handle, state, thread: Some(thread) })
    }

    pub fn handle(&self) -> RenderHandle<D::NativeWidget> {
        self.handle.clone()
    }

    pub fn state(&self) -> RenderState {
        *self.state.lock()
    }

    /// Stops accepting frames, releases GL resources and the context, and joins the thread.
    /// Returns the error that terminated the thread, if any.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        let thread = self.thread.take().ok_or(Error::AlreadyShutDown)?;
        let _ = self.handle.mailbox.send(RenderMessage::Shutdown);
        worker::join(thread)
    }
}

impl<D: Device> Drop for RenderDispatchThread<D> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.shutdown() {
                warn!("render thread shutdown failed: {}", err);
            }
        }
    }
}

struct RenderWorker<D: Device, R, S> {
    surfaces: SurfaceManager<D>,
    renderer: R,
    source: S,
    sink: Option<Box<dyn EncoderSink>>,
    state: Arc<Mutex<RenderState>>,
}

impl<D, R, S> RenderWorker<D, R, S>
where
    D: Device,
    R: FrameRenderer,
    S: FrameSource,
{
    fn new<F>(
        device: D,
        config: &RenderConfig,
        setup: F,
        state: Arc<Mutex<RenderState>>,
    ) -> Result<RenderWorker<D, R, S>, Error>
    where
        F: FnOnce(&GraphicsContext<D>) -> Result<(R, S), Error>,
    {
        let mut surfaces = SurfaceManager::new(device, &config.context_attributes, None)?;
        let setup = surfaces.make_base_current().and_then(|()| setup(surfaces.context()));
        match setup {
            Ok((renderer, source)) => Ok(RenderWorker { surfaces, renderer, source, sink: None, state }),
            Err(err) => {
                if let Err(err) = surfaces.destroy() {
                    warn!("failed to destroy context after setup error: {}", err);
                }
                Err(err)
            }
        }
    }

    fn set_state(&self, state: RenderState) {
        debug!("render thread: {:?}", state);
        *self.state.lock() = state;
    }

    fn run(&mut self, receiver: Receiver<RenderMessage<D::NativeWidget>>) -> Result<(), Error> {
        let result = self.dispatch(&receiver);
        if let Err(ref err) = result {
            error!("render thread terminating: {}", err);
        }
        self.set_state(RenderState::ShuttingDown);
        let teardown = self.teardown();
        self.set_state(RenderState::Terminated);
        result.and(teardown)
    }

    fn dispatch(&mut self, receiver: &Receiver<RenderMessage<D::NativeWidget>>) -> Result<(), Error> {
        while let Ok(message) = receiver.recv() {
            match message {
                RenderMessage::SurfaceCreated(native_widget, size) => {
                    self.surface_created(native_widget, size)?
                }
                RenderMessage::SurfaceChanged(size) => self.surface_changed(size)?,
                RenderMessage::SurfaceDestroyed(reply) => {
                    let result = self.surfaces.detach(SurfaceRole::Display);
                    self.after_display_removed();
                    match result {
                        Err(err) if err.is_fatal() => {
                            let _ = reply.send(Err(Error::Failed));
                            return Err(err);
                        }
                        result => {
                            let _ = reply.send(result);
                        }
                    }
                }
                RenderMessage::FrameAvailable => self.draw_frame()?,
                RenderMessage::StartRecording(input_surface, sink) => {
                    self.start_recording(input_surface, sink)?
                }
                RenderMessage::StopRecording(reply) => {
                    let _ = reply.send(self.stop_recording());
                }
                RenderMessage::Shutdown => break,
            }
        }
        Ok(())
    }

    fn surface_created(&mut self, native_widget: D::NativeWidget, size: Size2D<i32>) -> Result<(), Error> {
        match self.surfaces.attach(SurfaceRole::Display, native_widget) {
            Ok(_) => {
                debug!("display surface available ({}x{})", size.width, size.height);
                self.set_state(RenderState::Rendering);
                Ok(())
            }
            Err(err) if err.is_surface_lost() => {
                warn!("display surface unusable: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn surface_changed(&mut self, size: Size2D<i32>) -> Result<(), Error> {
        if !self.surfaces.has(SurfaceRole::Display) {
            return Ok(());
        }
        match self.surfaces.resize(SurfaceRole::Display, size) {
            Ok(_) => Ok(()),
            Err(err) if err.is_surface_lost() => {
                warn!("display surface lost while resizing: {}", err);
                self.drop_surface(SurfaceRole::Display)
            }
            Err(err) => Err(err),
        }
    }

    fn after_display_removed(&self) {
        if !self.surfaces.has(SurfaceRole::Display) {
            self.set_state(RenderState::Ready);
        }
    }

    fn start_recording(&mut self, input_surface: D::NativeWidget, sink: Box<dyn EncoderSink>) -> Result<(), Error> {
        match self.surfaces.attach(SurfaceRole::Encoder, input_surface) {
            Ok(_) => {
                info!("recording started");
                self.sink = Some(sink);
                Ok(())
            }
            Err(err) if err.is_surface_lost() => {
                warn!("encoder surface unusable: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn stop_recording(&mut self) -> Result<(), Error> {
        self.sink = None;
        self.surfaces.detach(SurfaceRole::Encoder)
    }

    // Stops rendering to a drawable that went away.
    fn drop_surface(&mut self, role: SurfaceRole) -> Result<(), Error> {
        if role == SurfaceRole::Encoder {
            self.sink = None;
        }
        match self.surfaces.detach(role) {
            Ok(()) => {}
            Err(err) if err.is_surface_lost() => {}
            Err(err) => return Err(err),
        }
        self.after_display_removed();
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<(), Error> {
        // The source latches its texture with the context current.
        let has_display = self.surfaces.has(SurfaceRole::Display);
        if has_display {
            if let Err(err) = self.surfaces.make_current(SurfaceRole::Display) {
                return self.surface_error(SurfaceRole::Display, err);
            }
        } else {
            self.surfaces.make_base_current()?;
        }

        let frame = match self.source.acquire_frame()? {
            Some(frame) => frame,
            None => return Ok(()),
        };
        if frame.is_discardable() {
            debug!("discarding frame with a zero timestamp");
            return Ok(());
        }

        if has_display {
            self.draw_to(SurfaceRole::Display, &frame)?;
        }
        if self.sink.is_some() && self.surfaces.has(SurfaceRole::Encoder) {
            self.draw_to(SurfaceRole::Encoder, &frame)?;
        }
        Ok(())
    }

    fn draw_to(&mut self, role: SurfaceRole, frame: &SourceFrame) -> Result<(), Error> {
        if let Err(err) = self.surfaces.make_current(role) {
            return self.surface_error(role, err);
        }
        let viewport = self.surfaces.size(role).ok_or(Error::NoSuchSurface)?;
        self.renderer.draw_frame(frame, viewport)?;

        if role == SurfaceRole::Encoder {
            self.surfaces.set_presentation_time(role, frame.timestamp_ns)?;
            // Drain the encoder before pushing the frame, or it may block on a full queue.
            if let Some(ref sink) = self.sink {
                match sink.frame_available_soon() {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => {
                        error!("encoder failed, stopping recording: {}", err);
                        return self.drop_surface(role);
                    }
                    Err(err) => warn!("encoder drain: {}", err),
                }
            }
        }

        match self.surfaces.swap(role) {
            Ok(true) => Ok(()),
            Ok(false) => self.drop_surface(role),
            Err(err) => self.surface_error(role, err),
        }
    }

    fn surface_error(&mut self, role: SurfaceRole, err: Error) -> Result<(), Error> {
        if err.is_surface_lost() {
            warn!("{} surface lost: {}", role, err);
            self.drop_surface(role)
        } else {
            Err(err)
        }
    }

    fn teardown(&mut self) -> Result<(), Error> {
        self.sink = None;
        // GL objects go first, while the context can still be made current.
        match self.surfaces.make_base_current() {
            Ok(()) => {
                self.renderer.release();
                self.source.release();
            }
            Err(err) => warn!("could not bind the context to release GL resources: {}", err),
        }
        let result = self.surfaces.destroy();
        info!("render thread terminated");
        result
    }
}
