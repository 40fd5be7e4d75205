// surfrec/src/platform/mod.rs
//
//! Platform-specific backends.

#[cfg(egl_dlopen)]
pub mod egl;

#[cfg(egl_dlopen)]
pub use self::egl as default;
