// surfrec/src/context.rs
//
//! Contexts and the attributes used to create them.

use crate::device::Device;
use crate::surface::{SurfaceID, SurfaceType};
use crate::Error;

use bitflags::bitflags;
use euclid::default::Size2D;
use fnv::FnvHashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use std::thread::{self, ThreadId};

/// Unique identifier of a context, allocated from a process-wide counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextID(pub u64);

static NEXT_CONTEXT_ID: Mutex<ContextID> = Mutex::new(ContextID(0));

impl ContextID {
    pub(crate) fn next() -> ContextID {
        let mut next = NEXT_CONTEXT_ID.lock();
        let id = *next;
        next.0 += 1;
        id
    }
}

/// Describes the OpenGL ES version that is requested when a context is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GLVersion {
    pub major: u8,
    pub minor: u8,
}

impl GLVersion {
    #[inline]
    pub fn new(major: u8, minor: u8) -> GLVersion {
        GLVersion { major, minor }
    }
}

/// Color buffer layouts the config chooser knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceColorSpec {
    Rgba8888,
    Rgb888,
    Rgb565,
}

impl SurfaceColorSpec {
    /// Red, green, blue and alpha sizes in bits.
    pub fn channel_sizes(self) -> [i32; 4] {
        match self {
            SurfaceColorSpec::Rgba8888 => [8, 8, 8, 8],
            SurfaceColorSpec::Rgb888 => [8, 8, 8, 0],
            SurfaceColorSpec::Rgb565 => [5, 6, 5, 0],
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ContextAttributeFlags: u8 {
        /// Request a 16-bit depth buffer.
        const DEPTH      = 0x01;
        /// Request an 8-bit stencil buffer.
        const STENCIL    = 0x02;
        /// The context renders into a surface that feeds a video encoder.
        const RECORDABLE = 0x04;
    }
}

/// Attributes used to choose a config and create a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextAttributes {
    pub version: GLVersion,
    pub color: SurfaceColorSpec,
    pub flags: ContextAttributeFlags,
}

impl Default for ContextAttributes {
    fn default() -> ContextAttributes {
        ContextAttributes {
            version: GLVersion::new(2, 0),
            color: SurfaceColorSpec::Rgba8888,
            flags: ContextAttributeFlags::empty(),
        }
    }
}

impl ContextAttributes {
    /// Attributes for a context that draws into an encoder input surface.
    pub fn recordable() -> ContextAttributes {
        ContextAttributes {
            flags: ContextAttributeFlags::RECORDABLE,
            ..ContextAttributes::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self.version.major {
            2 | 3 => Ok(()),
            _ => Err(Error::InvalidConfiguration("only OpenGL ES 2 and 3 are supported")),
        }
    }

    /// Bit sizes for depth and stencil.
    pub(crate) fn depth_stencil_sizes(&self) -> (i32, i32) {
        let depth = if self.flags.contains(ContextAttributeFlags::DEPTH) { 16 } else { 0 };
        let stencil = if self.flags.contains(ContextAttributeFlags::STENCIL) { 8 } else { 0 };
        (depth, stencil)
    }
}

struct ContextState<D: Device> {
    // `None` once destroyed.
    context: Option<D::Context>,
    surfaces: FnvHashMap<SurfaceID, D::Surface>,
    holder: Option<ThreadId>,
    bound_surface: Option<SurfaceID>,
}

/// A GPU context together with the surfaces created for it.
///
/// At most one thread has the context current at a time. A thread that wants to bind it while
/// another thread holds it gets `Error::ContextHeldByOtherThread`; the holder has to call
/// `release()` first.
pub struct GraphicsContext<D: Device> {
    device: D,
    id: ContextID,
    shared_with: Option<ContextID>,
    state: Mutex<ContextState<D>>,
}

impl<D: Device> GraphicsContext<D> {
    /// Creates a context, optionally sharing its texture namespace with `share_with`.
    pub fn new(
        device: D,
        attributes: &ContextAttributes,
        share_with: Option<&GraphicsContext<D>>,
    ) -> Result<GraphicsContext<D>, Error> {
        attributes.validate()?;

        let context = match share_with {
            None => device.create_context(attributes, None)?,
            Some(peer) => {
                let peer_state = peer.state.lock();
                let peer_context = peer_state.context.as_ref().ok_or(Error::ContextDestroyed)?;
                device.create_context(attributes, Some(peer_context))?
            }
        };

        let id = device.context_id(&context);
        debug!("created context {:?} (shared with {:?})", id, share_with.map(|peer| peer.id));
        Ok(GraphicsContext {
            id,
            shared_with: share_with.map(|peer| peer.id),
            state: Mutex::new(ContextState {
                context: Some(context),
                surfaces: FnvHashMap::default(),
                holder: None,
                bound_surface: None,
            }),
            device,
        })
    }

    #[inline]
    pub fn id(&self) -> ContextID {
        self.id
    }

    #[inline]
    pub fn shared_with(&self) -> Option<ContextID> {
        self.shared_with
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Creates a window surface for a native drawing target.
    pub fn create_window_surface(&self, native_widget: D::NativeWidget) -> Result<SurfaceID, Error> {
        self.create_surface(SurfaceType::Widget { native_widget })
    }

    /// Creates an offscreen surface.
    pub fn create_offscreen_surface(&self, size: Size2D<i32>) -> Result<SurfaceID, Error> {
        self.create_surface(SurfaceType::Generic { size })
    }

    fn create_surface(&self, surface_type: SurfaceType<D::NativeWidget>) -> Result<SurfaceID, Error> {
        let mut state = self.state.lock();
        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        let surface = self.device.create_surface(context, surface_type)?;
        let surface_id = self.device.surface_id(&surface);
        state.surfaces.insert(surface_id, surface);
        Ok(surface_id)
    }

    /// Destroys a surface. If it is bound on the calling thread the context is released first.
    pub fn destroy_surface(&self, surface_id: SurfaceID) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.destroy_surface_locked(&mut state, surface_id)
    }

    fn destroy_surface_locked(
        &self,
        state: &mut ContextState<D>,
        surface_id: SurfaceID,
    ) -> Result<(), Error> {
        if !state.surfaces.contains_key(&surface_id) {
            return Err(Error::NoSuchSurface);
        }
        if state.bound_surface == Some(surface_id) {
            match state.holder {
                Some(holder) if holder != thread::current().id() => {
                    return Err(Error::ContextHeldByOtherThread)
                }
                Some(_) => {
                    self.device.make_no_context_current()?;
                    state.holder = None;
                }
                None => {}
            }
            state.bound_surface = None;
        }

        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        let mut surface = match state.surfaces.remove(&surface_id) {
            Some(surface) => surface,
            None => return Err(Error::NoSuchSurface),
        };
        self.device.destroy_surface(context, &mut surface)
    }

    /// Replaces a surface with a new one for the same (or a new) native target. Surfaces are
    /// never resized in place. If the old surface was current on this thread, the new one is
    /// made current in its place.
    pub fn recreate_surface(
        &self,
        surface_id: SurfaceID,
        native_widget: D::NativeWidget,
    ) -> Result<SurfaceID, Error> {
        let mut state = self.state.lock();
        let rebind = state.bound_surface == Some(surface_id)
            && state.holder == Some(thread::current().id());
        self.destroy_surface_locked(&mut state, surface_id)?;

        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        let mut surface = self
            .device
            .create_surface(context, SurfaceType::Widget { native_widget })?;
        let new_id = self.device.surface_id(&surface);
        if rebind {
            if let Err(err) = self.device.make_context_current(context, Some(&surface)) {
                if let Err(destroy_err) = self.device.destroy_surface(context, &mut surface) {
                    warn!("failed to destroy surface {}: {}", new_id, destroy_err);
                }
                return Err(err);
            }
            state.holder = Some(thread::current().id());
            state.bound_surface = Some(new_id);
        }
        state.surfaces.insert(new_id, surface);
        debug!("recreated surface {} as {}", surface_id, new_id);
        Ok(new_id)
    }

    /// Binds the context and `surface` to the calling thread. With `None` the context is bound
    /// without a drawable.
    pub fn make_current(&self, surface_id: Option<SurfaceID>) -> Result<(), Error> {
        let mut state = self.state.lock();
        let this_thread = thread::current().id();
        match state.holder {
            Some(holder) if holder != this_thread => return Err(Error::ContextHeldByOtherThread),
            _ => {}
        }

        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        let surface = match surface_id {
            None => None,
            Some(surface_id) => Some(state.surfaces.get(&surface_id).ok_or(Error::NoSuchSurface)?),
        };
        self.device.make_context_current(context, surface)?;
        state.holder = Some(this_thread);
        state.bound_surface = surface_id;
        Ok(())
    }

    /// Unbinds the context from the calling thread without destroying it. Does nothing if the
    /// context is not current anywhere.
    pub fn release(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        match state.holder {
            None => Ok(()),
            Some(holder) if holder != thread::current().id() => Err(Error::ContextHeldByOtherThread),
            Some(_) => {
                self.device.make_no_context_current()?;
                state.holder = None;
                state.bound_surface = None;
                Ok(())
            }
        }
    }

    /// Returns true if the calling thread has this context current.
    pub fn is_current(&self) -> bool {
        self.state.lock().holder == Some(thread::current().id())
    }

    /// The surface bound by the last `make_current`, if any.
    pub fn bound_surface(&self) -> Option<SurfaceID> {
        self.state.lock().bound_surface
    }

    /// Presents the back buffer of `surface`. Returns `Ok(false)` if the drawable has gone away;
    /// the caller should stop rendering to it.
    pub fn swap_buffers(&self, surface_id: SurfaceID) -> Result<bool, Error> {
        let state = self.state.lock();
        let (context, surface) = self.current_surface(&state, surface_id)?;
        match self.device.present_surface(context, surface) {
            Ok(()) => Ok(true),
            Err(err) if err.is_surface_lost() => {
                warn!("surface {} lost while presenting: {}", surface_id, err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Sets the timestamp the consumer of `surface` sees for the next presented frame.
    pub fn set_presentation_time(&self, surface_id: SurfaceID, timestamp_ns: i64) -> Result<(), Error> {
        let state = self.state.lock();
        let (context, surface) = self.current_surface(&state, surface_id)?;
        self.device.set_presentation_time(context, surface, timestamp_ns)
    }

    fn current_surface<'a>(
        &self,
        state: &'a ContextState<D>,
        surface_id: SurfaceID,
    ) -> Result<(&'a D::Context, &'a D::Surface), Error> {
        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        if state.holder != Some(thread::current().id()) {
            return Err(Error::ContextNotCurrent);
        }
        let surface = state.surfaces.get(&surface_id).ok_or(Error::NoSuchSurface)?;
        Ok((context, surface))
    }

    pub fn surface_size(&self, surface_id: SurfaceID) -> Result<Size2D<i32>, Error> {
        let state = self.state.lock();
        let surface = state.surfaces.get(&surface_id).ok_or(Error::NoSuchSurface)?;
        Ok(self.device.surface_size(surface))
    }

    pub fn surface_count(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    /// Loads the GL function table. The context has to be current on the calling thread.
    pub fn load_gl(&self) -> Result<glow::Context, Error> {
        let state = self.state.lock();
        let context = state.context.as_ref().ok_or(Error::ContextDestroyed)?;
        if state.holder != Some(thread::current().id()) {
            return Err(Error::ContextNotCurrent);
        }
        unsafe {
            Ok(glow::Context::from_loader_function(|symbol_name| {
                self.device.get_proc_address(context, symbol_name)
            }))
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().context.is_none()
    }

    /// Releases all surfaces and then the context itself. Calling this again is a no-op.
    ///
    /// A context still current on another thread is destroyed as well; that thread can no longer
    /// use it. Errors from the device are reported after everything has been torn down.
    pub fn destroy(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.context.is_none() {
            return Ok(());
        }

        let mut result = Ok(());
        match state.holder {
            // A holder that exited without releasing never will. EGL defers destroying a context
            // that is still current elsewhere until it is unbound there.
            Some(holder) if holder != thread::current().id() => {
                warn!("destroying context {:?} while {:?} still has it current", self.id, holder);
            }
            Some(_) => {
                if let Err(err) = self.device.make_no_context_current() {
                    warn!("failed to release context {:?}: {}", self.id, err);
                    result = Err(err);
                }
            }
            None => {}
        }
        state.holder = None;
        state.bound_surface = None;

        // Keep going after a failure so nothing is left alive.
        let surfaces: Vec<_> = state.surfaces.drain().collect();
        if let Some(ref context) = state.context {
            for (surface_id, mut surface) in surfaces {
                if let Err(err) = self.device.destroy_surface(context, &mut surface) {
                    warn!("failed to destroy surface {}: {}", surface_id, err);
                    result = result.and(Err(err));
                }
            }
        }

        if let Some(mut context) = state.context.take() {
            if let Err(err) = self.device.destroy_context(&mut context) {
                result = result.and(Err(err));
            }
        }
        debug!("destroyed context {:?}", self.id);
        result
    }
}

impl<D: Device> Drop for GraphicsContext<D> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            warn!("failed to destroy context {:?} on drop: {}", self.id, err);
        }
    }
}
