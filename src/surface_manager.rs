// surfrec/src/surface_manager.rs
//
//! Multiplexes the display and encoder drawables onto one context.

use crate::context::{ContextAttributes, GraphicsContext};
use crate::device::Device;
use crate::surface::{SurfaceID, SurfaceRole};
use crate::Error;

use euclid::default::Size2D;
use fnv::FnvHashMap;
use log::{debug, warn};

// Size of the offscreen surface that keeps the context bindable while no window exists.
const BASE_SURFACE_SIZE: i32 = 1;

struct SurfaceSlot<W> {
    id: SurfaceID,
    native_widget: W,
    size: Size2D<i32>,
    // Applied right before the next swap.
    pending_presentation_time: Option<i64>,
}

/// Owns one context plus a drawable per `SurfaceRole`. All methods must be called from the
/// thread that uses the context.
pub struct SurfaceManager<D: Device> {
    context: GraphicsContext<D>,
    base_surface: SurfaceID,
    slots: FnvHashMap<SurfaceRole, SurfaceSlot<D::NativeWidget>>,
}

impl<D: Device> SurfaceManager<D> {
    /// Creates the context and its offscreen base surface.
    pub fn new(
        device: D,
        attributes: &ContextAttributes,
        share_with: Option<&GraphicsContext<D>>,
    ) -> Result<SurfaceManager<D>, Error> {
        let context = GraphicsContext::new(device, attributes, share_with)?;
        let base_surface =
            context.create_offscreen_surface(Size2D::new(BASE_SURFACE_SIZE, BASE_SURFACE_SIZE))?;
        Ok(SurfaceManager { context, base_surface, slots: FnvHashMap::default() })
    }

    #[inline]
    pub fn context(&self) -> &GraphicsContext<D> {
        &self.context
    }

    /// Binds the context to the offscreen base surface.
    pub fn make_base_current(&self) -> Result<(), Error> {
        self.context.make_current(Some(self.base_surface))
    }

    /// Creates the drawable for `role`, replacing any existing one.
    pub fn attach(&mut self, role: SurfaceRole, native_widget: D::NativeWidget) -> Result<SurfaceID, Error> {
        if self.slots.contains_key(&role) {
            self.detach(role)?;
        }
        let id = self.context.create_window_surface(native_widget.clone())?;
        let size = self.context.surface_size(id)?;
        debug!("attached {} surface {} ({}x{})", role, id, size.width, size.height);
        self.slots.insert(
            role,
            SurfaceSlot { id, native_widget, size, pending_presentation_time: None },
        );
        Ok(id)
    }

    /// Destroys the drawable for `role`. If it was current, the base surface takes its place.
    pub fn detach(&mut self, role: SurfaceRole) -> Result<(), Error> {
        let slot = match self.slots.remove(&role) {
            Some(slot) => slot,
            None => return Ok(()),
        };
        let was_current = self.context.is_current() && self.context.bound_surface() == Some(slot.id);
        self.context.destroy_surface(slot.id)?;
        if was_current {
            self.make_base_current()?;
        }
        debug!("detached {} surface {}", role, slot.id);
        Ok(())
    }

    /// Replaces the drawable for `role` with a new one for the same native target. The viewport
    /// follows the size of the new drawable, which may differ from the `size` the window reported.
    pub fn resize(&mut self, role: SurfaceRole, size: Size2D<i32>) -> Result<SurfaceID, Error> {
        let slot = self.slots.get_mut(&role).ok_or(Error::NoSuchSurface)?;
        let id = self.context.recreate_surface(slot.id, slot.native_widget.clone())?;
        slot.id = id;
        slot.size = self.context.surface_size(id)?;
        slot.pending_presentation_time = None;
        if slot.size != size {
            debug!(
                "{} surface {} is {}x{}, window reported {}x{}",
                role, id, slot.size.width, slot.size.height, size.width, size.height
            );
        }
        Ok(id)
    }

    #[inline]
    pub fn has(&self, role: SurfaceRole) -> bool {
        self.slots.contains_key(&role)
    }

    pub fn surface_id(&self, role: SurfaceRole) -> Option<SurfaceID> {
        self.slots.get(&role).map(|slot| slot.id)
    }

    pub fn size(&self, role: SurfaceRole) -> Option<Size2D<i32>> {
        self.slots.get(&role).map(|slot| slot.size)
    }

    /// Binds the context to the drawable for `role`.
    pub fn make_current(&self, role: SurfaceRole) -> Result<(), Error> {
        let slot = self.slots.get(&role).ok_or(Error::NoSuchSurface)?;
        self.context.make_current(Some(slot.id))
    }

    /// Stamps the next frame presented on `role`, in nanoseconds.
    pub fn set_presentation_time(&mut self, role: SurfaceRole, timestamp_ns: i64) -> Result<(), Error> {
        let slot = self.slots.get_mut(&role).ok_or(Error::NoSuchSurface)?;
        slot.pending_presentation_time = Some(timestamp_ns);
        Ok(())
    }

    /// Presents the drawable for `role`. Returns `Ok(false)` if it has gone away.
    pub fn swap(&mut self, role: SurfaceRole) -> Result<bool, Error> {
        let slot = self.slots.get_mut(&role).ok_or(Error::NoSuchSurface)?;
        if let Some(timestamp_ns) = slot.pending_presentation_time.take() {
            match self.context.set_presentation_time(slot.id, timestamp_ns) {
                Ok(()) => {}
                Err(err) if err.is_surface_lost() => {
                    warn!("{} surface lost while stamping: {}", role, err);
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }
        self.context.swap_buffers(slot.id)
    }

    /// Unbinds the context from the calling thread.
    pub fn release(&self) -> Result<(), Error> {
        self.context.release()
    }

    /// Destroys every drawable and the context. Calling this again does nothing.
    pub fn destroy(&mut self) -> Result<(), Error> {
        self.slots.clear();
        self.context.destroy()
    }
}
