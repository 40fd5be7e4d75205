// surfrec/src/platform/egl/device.rs
//
//! A thread-safe handle to an EGL display.

use super::context::{self, Context};
use super::error::ToWindowingApiError;
use super::surface::{self, NativeWidget, Surface};
use crate::context::{ContextAttributes, ContextID};
use crate::egl;
use crate::egl::types::{EGLBoolean, EGLDisplay, EGLSurface};
use crate::egl::Egl;
use crate::surface::{SurfaceID, SurfaceType};
use crate::Error;

use euclid::default::Size2D;
use libc::{dlopen, dlsym, RTLD_LAZY};
use log::{debug, info};
use std::ffi::{CStr, CString};
use std::mem;
use std::os::raw::c_void;
use std::ptr;
use std::sync::{Arc, LazyLock};

thread_local! {
    pub static EGL_FUNCTIONS: Egl = Egl::load_with(get_proc_address);
}

static EGL_LIBRARY: LazyLock<EGLLibraryWrapper> = LazyLock::new(|| {
    for soname in [c"libEGL.so.1".as_ptr(), c"libEGL.so".as_ptr()] {
        unsafe {
            let handle = dlopen(soname as *const _, RTLD_LAZY);
            if !handle.is_null() {
                return EGLLibraryWrapper(handle);
            }
        }
    }
    EGLLibraryWrapper(ptr::null_mut())
});

struct EGLLibraryWrapper(*mut c_void);

unsafe impl Send for EGLLibraryWrapper {}
unsafe impl Sync for EGLLibraryWrapper {}

fn get_proc_address(symbol_name: &str) -> *const c_void {
    if EGL_LIBRARY.0.is_null() {
        return ptr::null();
    }
    let symbol_name = match CString::new(symbol_name) {
        Ok(symbol_name) => symbol_name,
        Err(_) => return ptr::null(),
    };
    unsafe { dlsym(EGL_LIBRARY.0, symbol_name.as_ptr()).cast_const() }
}

pub(crate) unsafe fn lookup_egl_extension(name: &CStr) -> *mut c_void {
    EGL_FUNCTIONS.with(|egl| mem::transmute(egl.GetProcAddress(name.as_ptr())))
}

// `eglPresentationTimeANDROID`.
type PresentationTimeFn = unsafe extern "C" fn(EGLDisplay, EGLSurface, i64) -> EGLBoolean;

struct DisplayHandle {
    egl_display: EGLDisplay,
    presentation_time: Option<PresentationTimeFn>,
}

unsafe impl Send for DisplayHandle {}
unsafe impl Sync for DisplayHandle {}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        EGL_FUNCTIONS.with(|egl| unsafe {
            egl.Terminate(self.egl_display);
        });
    }
}

/// A handle to an initialized EGL display. Cloning is cheap; the display is terminated when the
/// last clone goes away.
#[derive(Clone)]
pub struct Device {
    display: Arc<DisplayHandle>,
}

impl Device {
    /// Opens the default display.
    pub fn new() -> Result<Device, Error> {
        unsafe { Device::from_native_display(ptr::null()) }
    }

    /// Opens and initializes the display for a native display connection.
    ///
    /// # Safety
    ///
    /// `native_display` must be null or a live native display connection that outlives the
    /// device.
    pub unsafe fn from_native_display(
        native_display: egl::types::EGLNativeDisplayType,
    ) -> Result<Device, Error> {
        if EGL_LIBRARY.0.is_null() {
            return Err(Error::NoGLLibraryFound);
        }

        EGL_FUNCTIONS.with(|egl| {
            let egl_display = egl.GetDisplay(native_display);
            if egl_display == egl::NO_DISPLAY {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::DisplayInitializationFailed(err));
            }

            let (mut major, mut minor) = (0, 0);
            if egl.Initialize(egl_display, &mut major, &mut minor) == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::DisplayInitializationFailed(err));
            }
            info!("initialized EGL {}.{}", major, minor);

            let presentation_time = lookup_egl_extension(c"eglPresentationTimeANDROID");
            let presentation_time = if presentation_time.is_null() {
                debug!("eglPresentationTimeANDROID is unavailable");
                None
            } else {
                Some(mem::transmute::<*mut c_void, PresentationTimeFn>(presentation_time))
            };

            Ok(Device { display: Arc::new(DisplayHandle { egl_display, presentation_time }) })
        })
    }

    #[inline]
    pub(crate) fn egl_display(&self) -> EGLDisplay {
        self.display.egl_display
    }
}

impl crate::Device for Device {
    type Context = Context;
    type Surface = Surface;
    type NativeWidget = NativeWidget;

    fn create_context(
        &self,
        attributes: &ContextAttributes,
        share_with: Option<&Context>,
    ) -> Result<Context, Error> {
        unsafe { context::create_context(self.egl_display(), attributes, share_with) }
    }

    fn destroy_context(&self, context: &mut Context) -> Result<(), Error> {
        unsafe { context::destroy_context(self.egl_display(), context) }
    }

    #[inline]
    fn context_id(&self, context: &Context) -> ContextID {
        context.id
    }

    fn create_surface(
        &self,
        context: &Context,
        surface_type: SurfaceType<NativeWidget>,
    ) -> Result<Surface, Error> {
        unsafe {
            match surface_type {
                SurfaceType::Generic { size } => {
                    surface::create_pbuffer_surface(self.egl_display(), context, size)
                }
                SurfaceType::Widget { native_widget } => {
                    surface::create_window_surface(self.egl_display(), context, &native_widget)
                }
            }
        }
    }

    fn destroy_surface(&self, _: &Context, surface: &mut Surface) -> Result<(), Error> {
        unsafe { surface.destroy(self.egl_display()) }
    }

    #[inline]
    fn surface_id(&self, surface: &Surface) -> SurfaceID {
        surface.id()
    }

    #[inline]
    fn surface_size(&self, surface: &Surface) -> Size2D<i32> {
        surface.size
    }

    fn make_context_current(&self, context: &Context, surface: Option<&Surface>) -> Result<(), Error> {
        let egl_surface = surface.map_or(egl::NO_SURFACE, |surface| surface.egl_surface);
        EGL_FUNCTIONS.with(|egl| unsafe {
            let result =
                egl.MakeCurrent(self.egl_display(), egl_surface, egl_surface, context.egl_context);
            if result == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::MakeCurrentFailed(err));
            }
            Ok(())
        })
    }

    fn make_no_context_current(&self) -> Result<(), Error> {
        unsafe { context::make_no_context_current(self.egl_display()) }
    }

    fn present_surface(&self, _: &Context, surface: &Surface) -> Result<(), Error> {
        EGL_FUNCTIONS.with(|egl| unsafe {
            if egl.SwapBuffers(self.egl_display(), surface.egl_surface) == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::PresentFailed(err));
            }
            Ok(())
        })
    }

    fn set_presentation_time(
        &self,
        _: &Context,
        surface: &Surface,
        timestamp_ns: i64,
    ) -> Result<(), Error> {
        // Consumers other than Android's encoder input surfaces ignore the timestamp anyway.
        let presentation_time = match self.display.presentation_time {
            Some(presentation_time) => presentation_time,
            None => return Ok(()),
        };
        unsafe {
            if presentation_time(self.egl_display(), surface.egl_surface, timestamp_ns) == egl::FALSE
            {
                let err = EGL_FUNCTIONS.with(|egl| egl.GetError().to_windowing_api_error());
                return Err(Error::PresentationTimeFailed(err));
            }
        }
        Ok(())
    }

    fn get_proc_address(&self, _: &Context, symbol_name: &str) -> *const c_void {
        context::get_proc_address(symbol_name)
    }
}
