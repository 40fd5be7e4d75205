// surfrec/src/surface.rs
//
//! Information related to drawable surfaces.

use euclid::default::Size2D;
use std::fmt::{self, Display, Formatter};

/// Identifies a live surface. Unique among the surfaces of one device while they are alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceID(pub usize);

impl Display for SurfaceID {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", *self)
    }
}

/// Information needed to create a surface.
#[derive(Clone)]
pub enum SurfaceType<W> {
    /// An offscreen surface (pbuffer) with the given size.
    Generic {
        /// The size of the surface, in device pixels.
        size: Size2D<i32>,
    },
    /// A surface bound to a native drawing target: a window for preview, or the input surface of
    /// a hardware encoder.
    Widget {
        /// The native target.
        native_widget: W,
    },
}

/// The slots a `SurfaceManager` multiplexes onto its single context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    /// The on-screen preview.
    Display,
    /// The input surface of the hardware encoder.
    Encoder,
}

impl Display for SurfaceRole {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            SurfaceRole::Display => f.write_str("display"),
            SurfaceRole::Encoder => f.write_str("encoder"),
        }
    }
}
