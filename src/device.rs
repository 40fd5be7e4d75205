// surfrec/src/device.rs
//
//! The abstract interface that backends implement.

use crate::context::{ContextAttributes, ContextID};
use crate::surface::{SurfaceID, SurfaceType};
use crate::Error;

use euclid::default::Size2D;
use std::os::raw::c_void;

/// A thread-safe handle to a display connection, from which contexts and surfaces are created.
///
/// All methods take `&self`: a device can be cloned freely and shared between the threads that
/// own its contexts. Native objects are returned by value and must be handed back to the
/// `destroy_*` methods; dropping them without doing so leaks them.
pub trait Device: Clone + Send + Sync + 'static {
    /// The native context type.
    type Context: Send;
    /// The native surface type.
    type Surface: Send;
    /// A native drawing target: a window or an encoder input surface.
    type NativeWidget: Clone + Send;

    /// Creates a new context, optionally sharing textures and buffers with `share_with`.
    fn create_context(
        &self,
        attributes: &ContextAttributes,
        share_with: Option<&Self::Context>,
    ) -> Result<Self::Context, Error>;

    /// Destroys a context. Its surfaces must already have been destroyed.
    fn destroy_context(&self, context: &mut Self::Context) -> Result<(), Error>;

    /// Returns the unique ID of a context.
    fn context_id(&self, context: &Self::Context) -> ContextID;

    /// Creates a surface compatible with `context`.
    fn create_surface(
        &self,
        context: &Self::Context,
        surface_type: SurfaceType<Self::NativeWidget>,
    ) -> Result<Self::Surface, Error>;

    /// Destroys a surface.
    fn destroy_surface(
        &self,
        context: &Self::Context,
        surface: &mut Self::Surface,
    ) -> Result<(), Error>;

    /// Returns the ID of a surface.
    fn surface_id(&self, surface: &Self::Surface) -> SurfaceID;

    /// Returns the size of a surface, in device pixels.
    fn surface_size(&self, surface: &Self::Surface) -> Size2D<i32>;

    /// Binds `context` to the calling thread, drawing to and reading from `surface`. A context
    /// with no surface is bound surfaceless.
    fn make_context_current(
        &self,
        context: &Self::Context,
        surface: Option<&Self::Surface>,
    ) -> Result<(), Error>;

    /// Unbinds whatever context is current on the calling thread.
    fn make_no_context_current(&self) -> Result<(), Error>;

    /// Displays the back buffer of `surface`.
    fn present_surface(&self, context: &Self::Context, surface: &Self::Surface)
        -> Result<(), Error>;

    /// Sets the timestamp, in nanoseconds, that the consumer of `surface` receives with the
    /// next presented frame.
    fn set_presentation_time(
        &self,
        context: &Self::Context,
        surface: &Self::Surface,
        timestamp_ns: i64,
    ) -> Result<(), Error>;

    /// Looks up a GL function. Used to load `glow`.
    fn get_proc_address(&self, context: &Self::Context, symbol_name: &str) -> *const c_void;
}
