// surfrec/src/platform/egl/context.rs
//
//! EGL contexts and config selection.

use super::device::EGL_FUNCTIONS;
use super::error::ToWindowingApiError;
use crate::context::{ContextAttributeFlags, ContextAttributes, ContextID};
use crate::egl;
use crate::egl::types::{EGLConfig, EGLContext, EGLDisplay, EGLint};
use crate::Error;

use log::debug;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::ptr;

/// `EGL_RECORDABLE_ANDROID`: the config can render into a surface consumed by a video encoder.
const EGL_RECORDABLE_ANDROID: EGLint = 0x3142;

/// An EGL rendering context.
pub struct Context {
    pub(crate) egl_context: EGLContext,
    pub(crate) egl_config: EGLConfig,
    pub(crate) id: ContextID,
}

unsafe impl Send for Context {}

impl Context {
    #[inline]
    pub fn id(&self) -> ContextID {
        self.id
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.egl_context == egl::NO_CONTEXT
    }
}

impl Drop for Context {
    #[inline]
    fn drop(&mut self) {
        if !self.is_destroyed() && !std::thread::panicking() {
            panic!("Contexts must be destroyed explicitly with `destroy_context`!")
        }
    }
}

// The attribute list passed to `eglChooseConfig`.
fn config_attributes(attributes: &ContextAttributes) -> Vec<EGLint> {
    let [red, green, blue, alpha] = attributes.color.channel_sizes();
    let (depth, stencil) = attributes.depth_stencil_sizes();
    let renderable_type = if attributes.version.major >= 3 {
        egl::OPENGL_ES3_BIT as EGLint
    } else {
        egl::OPENGL_ES2_BIT as EGLint
    };

    let mut config_attributes = vec![
        egl::RED_SIZE as EGLint,        red,
        egl::GREEN_SIZE as EGLint,      green,
        egl::BLUE_SIZE as EGLint,       blue,
        egl::ALPHA_SIZE as EGLint,      alpha,
        egl::DEPTH_SIZE as EGLint,      depth,
        egl::STENCIL_SIZE as EGLint,    stencil,
        egl::RENDERABLE_TYPE as EGLint, renderable_type,
        egl::SURFACE_TYPE as EGLint,    (egl::WINDOW_BIT | egl::PBUFFER_BIT) as EGLint,
    ];
    if attributes.flags.contains(ContextAttributeFlags::RECORDABLE) {
        config_attributes.extend_from_slice(&[EGL_RECORDABLE_ANDROID, 1]);
    }
    config_attributes.extend_from_slice(&[egl::NONE as EGLint, 0, 0, 0]);
    config_attributes
}

/// Channel sizes of one candidate config, in the order red, green, blue, alpha, depth, stencil.
pub(crate) type ConfigSizes = [EGLint; 6];

/// Picks the candidate whose color sizes match exactly and whose alpha, depth and stencil sizes
/// are at least the requested ones. Falls back to the first candidate.
pub(crate) fn pick_config(attributes: &ContextAttributes, candidates: &[ConfigSizes]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let [red, green, blue, alpha] = attributes.color.channel_sizes();
    let (depth, stencil) = attributes.depth_stencil_sizes();
    let index = candidates.iter().position(|sizes| {
        sizes[0] == red
            && sizes[1] == green
            && sizes[2] == blue
            && sizes[3] >= alpha
            && sizes[4] >= depth
            && sizes[5] >= stencil
    });
    Some(index.unwrap_or(0))
}

pub(crate) unsafe fn choose_config(
    egl_display: EGLDisplay,
    attributes: &ContextAttributes,
) -> Result<EGLConfig, Error> {
    let requested_config_attributes = config_attributes(attributes);

    EGL_FUNCTIONS.with(|egl| {
        // See how many applicable configs there are.
        let mut config_count = 0;
        let result = egl.ChooseConfig(
            egl_display,
            requested_config_attributes.as_ptr(),
            ptr::null_mut(),
            0,
            &mut config_count,
        );
        if result == egl::FALSE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::PixelFormatSelectionFailed(err));
        }
        if config_count == 0 {
            return Err(Error::NoPixelFormatFound);
        }

        // Enumerate all those configs.
        let mut configs = vec![ptr::null(); config_count as usize];
        let mut real_config_count = config_count;
        let result = egl.ChooseConfig(
            egl_display,
            requested_config_attributes.as_ptr(),
            configs.as_mut_ptr(),
            config_count,
            &mut real_config_count,
        );
        if result == egl::FALSE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::PixelFormatSelectionFailed(err));
        }
        configs.truncate(real_config_count as usize);

        let candidates: Vec<ConfigSizes> = configs
            .iter()
            .map(|&egl_config| {
                [
                    egl::RED_SIZE,
                    egl::GREEN_SIZE,
                    egl::BLUE_SIZE,
                    egl::ALPHA_SIZE,
                    egl::DEPTH_SIZE,
                    egl::STENCIL_SIZE,
                ]
                .map(|attr| get_config_attr(egl_display, egl_config, attr as EGLint))
            })
            .collect();

        match pick_config(attributes, &candidates) {
            None => Err(Error::NoPixelFormatFound),
            Some(index) => {
                debug!("chose EGL config {} of {}: {:?}", index, candidates.len(), candidates[index]);
                Ok(configs[index])
            }
        }
    })
}

pub(crate) unsafe fn create_context(
    egl_display: EGLDisplay,
    attributes: &ContextAttributes,
    share_with: Option<&Context>,
) -> Result<Context, Error> {
    let egl_config = choose_config(egl_display, attributes)?;
    let shared_egl_context = match share_with {
        Some(context) if context.is_destroyed() => return Err(Error::ContextDestroyed),
        Some(context) => context.egl_context,
        None => egl::NO_CONTEXT,
    };

    // Include some extra zeroes to work around broken implementations.
    let egl_context_attributes = [
        egl::CONTEXT_CLIENT_VERSION as EGLint, attributes.version.major as EGLint,
        egl::NONE as EGLint, 0,
        0, 0,
    ];

    EGL_FUNCTIONS.with(|egl| {
        let egl_context = egl.CreateContext(
            egl_display,
            egl_config,
            shared_egl_context,
            egl_context_attributes.as_ptr(),
        );
        if egl_context == egl::NO_CONTEXT {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::ContextCreationFailed(err));
        }

        Ok(Context { egl_context, egl_config, id: ContextID::next() })
    })
}

pub(crate) unsafe fn destroy_context(egl_display: EGLDisplay, context: &mut Context) -> Result<(), Error> {
    if context.is_destroyed() {
        return Ok(());
    }

    EGL_FUNCTIONS.with(|egl| {
        let result = egl.DestroyContext(egl_display, context.egl_context);
        context.egl_context = egl::NO_CONTEXT;
        if result == egl::FALSE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::ContextDestructionFailed(err));
        }
        Ok(())
    })
}

pub(crate) unsafe fn make_no_context_current(egl_display: EGLDisplay) -> Result<(), Error> {
    EGL_FUNCTIONS.with(|egl| {
        let result = egl.MakeCurrent(egl_display, egl::NO_SURFACE, egl::NO_SURFACE, egl::NO_CONTEXT);
        if result == egl::FALSE {
            let err = egl.GetError().to_windowing_api_error();
            return Err(Error::MakeCurrentFailed(err));
        }
        // Hand the thread's state back to the driver, as required before another thread binds.
        egl.ReleaseThread();
        Ok(())
    })
}

pub(crate) unsafe fn get_config_attr(
    egl_display: EGLDisplay,
    egl_config: EGLConfig,
    attr: EGLint,
) -> EGLint {
    EGL_FUNCTIONS.with(|egl| {
        let mut value = 0;
        if egl.GetConfigAttrib(egl_display, egl_config, attr, &mut value) == egl::FALSE {
            return 0;
        }
        value
    })
}

pub(crate) fn get_proc_address(symbol_name: &str) -> *const c_void {
    let symbol_name = match CString::new(symbol_name) {
        Ok(symbol_name) => symbol_name,
        Err(_) => return ptr::null(),
    };
    EGL_FUNCTIONS.with(|egl| unsafe {
        egl.GetProcAddress(symbol_name.as_ptr() as *const u8 as *const c_char) as *const c_void
    })
}

#[cfg(test)]
mod test {
    use super::{config_attributes, pick_config, EGL_RECORDABLE_ANDROID};
    use crate::context::{ContextAttributeFlags, ContextAttributes, SurfaceColorSpec};
    use crate::egl;
    use crate::egl::types::EGLint;

    #[test]
    fn exact_color_match_wins_over_first_candidate() {
        let attributes = ContextAttributes {
            color: SurfaceColorSpec::Rgb565,
            flags: ContextAttributeFlags::DEPTH,
            ..ContextAttributes::default()
        };
        let candidates = [[8, 8, 8, 8, 24, 8], [5, 6, 5, 0, 0, 0], [5, 6, 5, 0, 16, 0]];
        assert_eq!(pick_config(&attributes, &candidates), Some(2));
    }

    #[test]
    fn falls_back_to_first_candidate() {
        let attributes = ContextAttributes::default();
        let candidates = [[5, 6, 5, 0, 0, 0], [10, 10, 10, 2, 0, 0]];
        assert_eq!(pick_config(&attributes, &candidates), Some(0));
        assert_eq!(pick_config(&attributes, &[]), None);
    }

    #[test]
    fn recordable_contexts_request_the_android_bit() {
        let attributes = config_attributes(&ContextAttributes::recordable());
        let pairs: Vec<_> = attributes.chunks(2).collect();
        assert!(pairs.contains(&&[EGL_RECORDABLE_ANDROID, 1][..]));
        assert!(pairs.contains(&&[egl::RENDERABLE_TYPE as EGLint, egl::OPENGL_ES2_BIT as EGLint][..]));

        let attributes = config_attributes(&ContextAttributes::default());
        assert!(!attributes.chunks(2).any(|pair| pair[0] == EGL_RECORDABLE_ANDROID));
    }
}
