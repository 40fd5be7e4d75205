// surfrec/src/platform/egl/mod.rs
//
//! The EGL backend, used on Android and on Linux desktops that ship `libEGL`.
//!
//! `libEGL` is opened with `dlopen` the first time a `Device` is created, so the crate links
//! without it and reports `Error::NoGLLibraryFound` at runtime instead.

pub mod context;
pub mod device;
pub mod surface;

mod error;

pub use self::context::Context;
pub use self::device::Device;
pub use self::surface::{NativeWidget, Surface};
