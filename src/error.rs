// surfrec/src/error.rs
//
//! Various errors that methods can produce.

use std::io;

/// The crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The method failed for a miscellaneous reason.
    #[error("operation failed")]
    Failed,
    /// The system EGL library couldn't be located.
    #[error("no EGL library found")]
    NoGLLibraryFound,
    /// The system couldn't choose a pixel format matching the requested attributes.
    #[error("no pixel format found")]
    NoPixelFormatFound,
    /// Choosing a pixel format failed.
    #[error("pixel format selection failed: {0:?}")]
    PixelFormatSelectionFailed(WindowingApiError),
    /// The display connection couldn't be initialized.
    #[error("display initialization failed: {0:?}")]
    DisplayInitializationFailed(WindowingApiError),
    /// The system couldn't create a context.
    #[error("context creation failed: {0:?}")]
    ContextCreationFailed(WindowingApiError),
    /// The system couldn't destroy the context.
    #[error("context destruction failed: {0:?}")]
    ContextDestructionFailed(WindowingApiError),
    /// The context has already been destroyed.
    #[error("context has been destroyed")]
    ContextDestroyed,
    /// The context asked to share with belongs to a different device.
    #[error("shared context belongs to a different device")]
    IncompatibleSharedContext,
    /// The system couldn't make the context current or not current.
    #[error("make current failed: {0:?}")]
    MakeCurrentFailed(WindowingApiError),
    /// Another thread holds the context current; it has to `release()` it first.
    #[error("context is current on another thread")]
    ContextHeldByOtherThread,
    /// The operation needs the context to be current on the calling thread.
    #[error("context is not current on this thread")]
    ContextNotCurrent,
    /// The system couldn't create a surface.
    #[error("surface creation failed: {0:?}")]
    SurfaceCreationFailed(WindowingApiError),
    /// The system couldn't destroy a surface.
    #[error("surface destruction failed: {0:?}")]
    SurfaceDestructionFailed(WindowingApiError),
    /// No live surface with the given ID belongs to this context.
    #[error("no such surface")]
    NoSuchSurface,
    /// Presenting a surface (swapping buffers) failed.
    #[error("present failed: {0:?}")]
    PresentFailed(WindowingApiError),
    /// Setting the presentation timestamp of a surface failed.
    #[error("setting the presentation time failed: {0:?}")]
    PresentationTimeFailed(WindowingApiError),
    /// The native widget isn't usable on this platform.
    #[error("incompatible native widget")]
    IncompatibleNativeWidget,
    /// A GL call reported an error.
    #[error("GL error 0x{code:04x} after {operation}")]
    GraphicsError {
        /// The value returned by `glGetError`.
        code: u32,
        /// The operation that was being performed.
        operation: &'static str,
    },
    /// A shader failed to compile.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),
    /// A program failed to link.
    #[error("program link failed: {0}")]
    ProgramLinkFailed(String),
    /// A packet can never fit in the ring, even after evicting everything.
    #[error("packet of {size} bytes exceeds the buffer capacity of {capacity} bytes")]
    PacketTooLarge {
        /// The size of the rejected payload.
        size: usize,
        /// The byte capacity of the ring.
        capacity: usize,
    },
    /// The ring holds no keyframe, so there is nothing that can be exported cleanly.
    #[error("no keyframe available")]
    NoKeyframeAvailable,
    /// The buffered span doesn't cover two keyframe intervals.
    #[error("desired span of {span_sec} s is shorter than two i-frame intervals of {iframe_interval_sec} s")]
    SpanTooShort {
        /// The requested buffered span in seconds.
        span_sec: u32,
        /// The keyframe interval in seconds.
        iframe_interval_sec: u32,
    },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// The hardware encoder reported a failure.
    #[error("encoder failed: {0}")]
    EncoderFailed(String),
    /// The muxer rejected a sample or failed to finish.
    #[error("muxer failed: {0}")]
    MuxerFailed(String),
    /// Writing the output failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The worker thread is gone.
    #[error("worker thread is unavailable")]
    WorkerUnavailable,
    /// The worker thread didn't signal readiness in time.
    #[error("worker thread did not become ready in time")]
    WorkerStartTimeout,
    /// `shutdown()` was called twice.
    #[error("already shut down")]
    AlreadyShutDown,
    /// The worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl Error {
    /// Returns true if the error means the drawable target has disappeared, for example because
    /// the consumer side of a window tore it down. Callers stop rendering to that surface instead
    /// of failing.
    pub fn is_surface_lost(&self) -> bool {
        match *self {
            Error::PresentFailed(err)
            | Error::MakeCurrentFailed(err)
            | Error::PresentationTimeFailed(err)
            | Error::SurfaceCreationFailed(err) => err.is_surface_lost(),
            Error::NoSuchSurface => true,
            _ => false,
        }
    }

    /// Returns true if the error indicates a bug or an unusable GPU state, which terminates the
    /// worker that hit it.
    pub fn is_fatal(&self) -> bool {
        match *self {
            Error::PacketTooLarge { .. }
            | Error::NoKeyframeAvailable
            | Error::Io(_)
            | Error::MuxerFailed(_) => false,
            _ => !self.is_surface_lost(),
        }
    }
}

/// Abstraction of the errors that EGL returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowingApiError {
    /// Miscellaneous error.
    Failed,
    /// EGL is not initialized, or could not be initialized, for the specified EGL display
    /// connection.
    NotInitialized,
    /// EGL cannot access a requested resource (for example a context is bound in another
    /// thread).
    BadAccess,
    /// EGL failed to allocate resources for the requested operation.
    BadAlloc,
    /// An unrecognized attribute or attribute value was passed in the attribute list.
    BadAttribute,
    /// An EGLConfig argument does not name a valid EGL frame buffer configuration.
    BadConfig,
    /// An EGLContext argument does not name a valid EGL rendering context.
    BadContext,
    /// The current surface of the calling thread is a window, pixel buffer or pixmap that is no
    /// longer valid.
    BadCurrentSurface,
    /// An EGLDisplay argument does not name a valid EGL display connection.
    BadDisplay,
    /// Arguments are inconsistent (for example, a valid context requires buffers not supplied by
    /// a valid surface).
    BadMatch,
    /// A NativePixmapType argument does not refer to a valid native pixmap.
    BadNativePixmap,
    /// A NativeWindowType argument does not refer to a valid native window.
    BadNativeWindow,
    /// One or more argument values are invalid.
    BadParameter,
    /// An EGLSurface argument does not name a valid surface (window, pixel buffer or pixmap)
    /// configured for GL rendering.
    BadSurface,
    /// A power management event has occurred. The application must destroy all contexts and
    /// reinitialise OpenGL ES state and objects to continue rendering.
    ContextLost,
}

impl WindowingApiError {
    /// The drawable went away underneath us.
    pub fn is_surface_lost(self) -> bool {
        matches!(
            self,
            WindowingApiError::BadSurface
                | WindowingApiError::BadNativeWindow
                | WindowingApiError::BadCurrentSurface
        )
    }
}

#[cfg(test)]
mod test {
    use super::{Error, WindowingApiError};

    #[test]
    fn surface_loss_is_not_fatal() {
        let err = Error::PresentFailed(WindowingApiError::BadSurface);
        assert!(err.is_surface_lost());
        assert!(!err.is_fatal());

        let err = Error::PresentFailed(WindowingApiError::BadAlloc);
        assert!(!err.is_surface_lost());
        assert!(err.is_fatal());
    }

    #[test]
    fn resource_exhaustion_is_recoverable() {
        assert!(!Error::NoKeyframeAvailable.is_fatal());
        assert!(!Error::PacketTooLarge { size: 10, capacity: 5 }.is_fatal());
        assert!(Error::ContextHeldByOtherThread.is_fatal());
        assert!(Error::GraphicsError { code: 0x502, operation: "draw" }.is_fatal());
    }

    #[test]
    fn display_names_the_operation() {
        let err = Error::GraphicsError { code: 0x502, operation: "glDrawArrays" };
        assert_eq!(err.to_string(), "GL error 0x0502 after glDrawArrays");
    }
}
