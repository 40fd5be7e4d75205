// surfrec/src/frame_source.rs
//
//! Producers of frames and the callbacks their drivers deliver.

use crate::Error;

use euclid::default::Size2D;

/// A texture ready to be drawn, as delivered by a camera or a decoder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceFrame {
    /// GL texture name, valid in the render thread's context.
    pub texture: u32,
    /// Column-major 4x4 matrix applied to texture coordinates.
    pub transform: [f32; 16],
    /// Presentation timestamp in nanoseconds. Non-decreasing within a session.
    pub timestamp_ns: i64,
}

impl SourceFrame {
    /// Some producers emit a frame stamped exactly 0 after a power-state transition. Such frames
    /// must be dropped.
    #[inline]
    pub fn is_discardable(&self) -> bool {
        self.timestamp_ns == 0
    }
}

/// A producer of textures, owned by the render thread. Its methods are called with the render
/// thread's context current.
pub trait FrameSource {
    /// Latches the newest frame, or returns `None` if nothing new has arrived.
    fn acquire_frame(&mut self) -> Result<Option<SourceFrame>, Error>;

    /// Frees the producer's GL resources. Called before the context is released.
    fn release(&mut self);
}

/// Notifications from whatever drives a native drawing target, such as a view hierarchy.
pub trait SurfaceCallback {
    type NativeWidget;

    /// The target exists and can be rendered to.
    fn on_available(&self, native_widget: Self::NativeWidget, size: Size2D<i32>) -> Result<(), Error>;

    /// The target changed size.
    fn on_size_changed(&self, size: Size2D<i32>) -> Result<(), Error>;

    /// The target is about to go away. When this returns, nothing touches it any more.
    fn on_destroyed(&self) -> Result<(), Error>;
}
