// surfrec/src/platform/egl/surface.rs
//
//! EGL window and pbuffer surfaces.

use super::context::Context;
use super::device::EGL_FUNCTIONS;
use super::error::ToWindowingApiError;
use crate::egl;
use crate::egl::types::{EGLDisplay, EGLSurface, EGLint};
use crate::surface::SurfaceID;
use crate::Error;

use euclid::default::Size2D;
use std::fmt::{self, Debug, Formatter};
use std::os::raw::c_void;
use std::thread;

/// A drawable target owned by one context.
pub struct Surface {
    pub(crate) egl_surface: EGLSurface,
    pub(crate) size: Size2D<i32>,
}

unsafe impl Send for Surface {}

impl Debug for Surface {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Surface({:x})", self.id().0)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if self.egl_surface != egl::NO_SURFACE && !thread::panicking() {
            panic!("Should have destroyed the surface first with `destroy_surface()`!")
        }
    }
}

/// A native drawing target: an `ANativeWindow` on Android, or an X11 window elsewhere. The
/// input surface of a hardware encoder is an `ANativeWindow` too.
#[derive(Clone)]
pub struct NativeWidget {
    pub(crate) native_window: egl::types::EGLNativeWindowType,
}

unsafe impl Send for NativeWidget {}

impl NativeWidget {
    /// Wraps a raw native window.
    ///
    /// # Safety
    ///
    /// `native_window` must stay valid until every surface created for it has been destroyed.
    #[inline]
    pub unsafe fn from_native_window(native_window: *mut c_void) -> NativeWidget {
        NativeWidget { native_window: native_window as egl::types::EGLNativeWindowType }
    }

    /// Builds a native widget from a `raw-window-handle` window handle.
    #[cfg(feature = "sm-raw-window-handle-06")]
    pub fn from_window_handle(handle: rwh_06::WindowHandle) -> Result<NativeWidget, Error> {
        use rwh_06::RawWindowHandle::{AndroidNdk, Xlib};

        match handle.as_raw() {
            AndroidNdk(handle) => Ok(NativeWidget {
                native_window: handle.a_native_window.as_ptr() as egl::types::EGLNativeWindowType,
            }),
            Xlib(handle) => Ok(NativeWidget {
                native_window: handle.window as usize as egl::types::EGLNativeWindowType,
            }),
            _ => Err(Error::IncompatibleNativeWidget),
        }
    }
}

impl Surface {
    #[inline]
    pub fn id(&self) -> SurfaceID {
        SurfaceID(self.egl_surface as usize)
    }

    #[inline]
    pub fn size(&self) -> Size2D<i32> {
        self.size
    }

    pub(crate) unsafe fn destroy(&mut self, egl_display: EGLDisplay) -> Result<(), Error> {
        if self.egl_surface == egl::NO_SURFACE {
            return Ok(());
        }
        EGL_FUNCTIONS.with(|egl| {
            let result = egl.DestroySurface(egl_display, self.egl_surface);
            self.egl_surface = egl::NO_SURFACE;
            if result == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::SurfaceDestructionFailed(err));
            }
            Ok(())
        })
    }
}

pub(crate) unsafe fn create_window_surface(
    egl_display: EGLDisplay,
    context: &Context,
    native_widget: &NativeWidget,
) -> Result<Surface, Error> {
    if native_widget.native_window.is_null() {
        return Err(Error::IncompatibleNativeWidget);
    }

    EGL_FUNCTIONS.with(|egl| {
        let window_surface_attributes = [egl::NONE as EGLint, 0, 0, 0];
        let egl_surface = egl.CreateWindowSurface(
            egl_display,
            context.egl_config,
            native_widget.native_window,
            window_surface_attributes.as_ptr(),
        );
        if egl_surface == egl::NO_SURFACE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::SurfaceCreationFailed(err));
        }

        let size = query_surface_size(egl_display, egl_surface);
        Ok(Surface { egl_surface, size })
    })
}

pub(crate) unsafe fn create_pbuffer_surface(
    egl_display: EGLDisplay,
    context: &Context,
    size: Size2D<i32>,
) -> Result<Surface, Error> {
    let pbuffer_attributes = [
        egl::WIDTH as EGLint,   size.width,
        egl::HEIGHT as EGLint,  size.height,
        egl::NONE as EGLint,    0,
        0,                      0,
    ];

    EGL_FUNCTIONS.with(|egl| {
        let egl_surface =
            egl.CreatePbufferSurface(egl_display, context.egl_config, pbuffer_attributes.as_ptr());
        if egl_surface == egl::NO_SURFACE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::SurfaceCreationFailed(err));
        }
        Ok(Surface { egl_surface, size })
    })
}

unsafe fn query_surface_size(egl_display: EGLDisplay, egl_surface: EGLSurface) -> Size2D<i32> {
    EGL_FUNCTIONS.with(|egl| {
        let (mut width, mut height) = (0, 0);
        egl.QuerySurface(egl_display, egl_surface, egl::WIDTH as EGLint, &mut width);
        egl.QuerySurface(egl_display, egl_surface, egl::HEIGHT as EGLint, &mut height);
        Size2D::new(width, height)
    })
}
