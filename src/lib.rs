// surfrec/src/lib.rs
//
//! GPU context and surface lifecycle management for recording a video stream while it is shown.
//!
//! A render thread owns one OpenGL ES context and draws every incoming frame twice: once to the
//! display surface and once to the input surface of a hardware video encoder. A drain worker
//! pulls encoded packets out of the encoder into a fixed-size circular buffer, which keeps the
//! last few seconds of video and can write them to a file on request, starting at a keyframe.
//!
//! Platform access goes through the `Device` trait. The EGL backend in `platform::egl` loads
//! `libEGL` at runtime.

pub mod platform;
#[cfg(egl_dlopen)]
pub use platform::default::device::Device as EglDevice;
#[cfg(egl_dlopen)]
pub use platform::default::surface::NativeWidget;

pub mod error;
pub use crate::error::{Error, WindowingApiError};

pub mod context;
pub use crate::context::{
    ContextAttributeFlags, ContextAttributes, ContextID, GLVersion, GraphicsContext,
    SurfaceColorSpec,
};

pub mod device;
pub use crate::device::Device;

pub mod surface;
pub use crate::surface::{SurfaceID, SurfaceRole, SurfaceType};

pub mod surface_manager;
pub use crate::surface_manager::SurfaceManager;

pub mod blit;
pub mod gl_utils;

pub mod frame_source;
pub use crate::frame_source::{FrameSource, SourceFrame, SurfaceCallback};

pub mod circular_buffer;
pub use crate::circular_buffer::{Chunk, CircularVideoBuffer, PacketFlags, PacketInfo};

pub mod encoder;
pub use crate::encoder::{EncodeDrainLoop, EncoderCallback, EncoderConfig, SaveStatus};

pub mod render_thread;
pub use crate::render_thread::{RenderConfig, RenderDispatchThread, RenderHandle, RenderState};

pub mod pacing;

mod worker;

#[cfg(egl_dlopen)]
#[allow(non_camel_case_types)]
mod egl {
    use std::os::raw::{c_long, c_void};
    pub type khronos_utime_nanoseconds_t = khronos_uint64_t;
    pub type khronos_uint64_t = u64;
    pub type khronos_ssize_t = c_long;
    pub type EGLint = i32;
    pub type EGLNativeDisplayType = *const c_void;
    pub type EGLNativePixmapType = *const c_void;
    pub type EGLNativeWindowType = *const c_void;
    pub type NativeDisplayType = EGLNativeDisplayType;
    pub type NativePixmapType = EGLNativePixmapType;
    pub type NativeWindowType = EGLNativeWindowType;
    include!(concat!(env!("OUT_DIR"), "/egl_bindings.rs"));
}
