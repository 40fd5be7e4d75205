// surfrec/src/blit.rs
//
//! Copies a source texture onto whatever surface is current by drawing a full-viewport quad.

use crate::frame_source::SourceFrame;
use crate::gl_utils::{self, Buffer, Program, Shader, ShaderKind};
use crate::Error;

use euclid::default::Size2D;
use glow::{HasContext, NativeTexture, NativeUniformLocation};
use log::debug;
use std::num::NonZeroU32;

/// `GL_TEXTURE_EXTERNAL_OES`, the target camera and decoder textures are bound to.
pub const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Column-major identity.
pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Multiplies two column-major 4x4 matrices.
pub fn multiply_matrices(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut result = [0.0; 16];
    for column in 0..4 {
        for row in 0..4 {
            result[column * 4 + row] =
                (0..4).map(|k| a[k * 4 + row] * b[column * 4 + k]).sum();
        }
    }
    result
}

/// A texture transform that mirrors the image vertically.
pub fn flip_vertical_matrix() -> [f32; 16] {
    let mut matrix = IDENTITY_MATRIX;
    matrix[5] = -1.0;
    matrix[13] = 1.0;
    matrix
}

/// The texture target a blit samples from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureTarget {
    Texture2D,
    External,
}

impl TextureTarget {
    pub fn to_gl(self) -> u32 {
        match self {
            TextureTarget::Texture2D => glow::TEXTURE_2D,
            TextureTarget::External => TEXTURE_EXTERNAL_OES,
        }
    }

    fn fragment_shader(self) -> &'static str {
        match self {
            TextureTarget::Texture2D => FRAGMENT_SHADER_2D,
            TextureTarget::External => FRAGMENT_SHADER_EXTERNAL,
        }
    }
}

/// Draws frames onto the current surface. Lives on the render thread.
pub trait FrameRenderer {
    fn draw_frame(&mut self, frame: &SourceFrame, viewport: Size2D<i32>) -> Result<(), Error>;

    /// Frees GL resources. Called with the context still current.
    fn release(&mut self);
}

static VERTEX_SHADER: &str = "\
uniform mat4 uMVPMatrix;
uniform mat4 uTexMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 vTextureCoord;
void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = (uTexMatrix * aTextureCoord).xy;
}
";

static FRAGMENT_SHADER_2D: &str = "\
precision mediump float;
varying vec2 vTextureCoord;
uniform sampler2D sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

static FRAGMENT_SHADER_EXTERNAL: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

// Interleaved x, y, s, t for a triangle strip covering the viewport.
static FULL_RECTANGLE: [f32; 16] = [
    -1.0, -1.0,     0.0, 0.0,
     1.0, -1.0,     1.0, 0.0,
    -1.0,  1.0,     0.0, 1.0,
     1.0,  1.0,     1.0, 1.0,
];

const VERTEX_STRIDE: i32 = 4 * 4;
const TEX_COORD_OFFSET: i32 = 2 * 4;

struct BlitResources {
    program: Program,
    quad: Buffer,
    position_attribute: u32,
    tex_coord_attribute: u32,
    mvp_uniform: Option<NativeUniformLocation>,
    tex_matrix_uniform: Option<NativeUniformLocation>,
}

/// The shader program and unit quad used to copy a texture. Built once and reused for every
/// draw.
pub struct FullScreenBlit {
    gl: glow::Context,
    target: TextureTarget,
    // `None` once released.
    resources: Option<BlitResources>,
}

impl FullScreenBlit {
    /// Compiles the program. The context `gl` was loaded from must be current.
    pub fn new(gl: glow::Context, target: TextureTarget) -> Result<FullScreenBlit, Error> {
        let vertex_shader = Shader::new(&gl, ShaderKind::Vertex, VERTEX_SHADER)?;
        let fragment_shader = match Shader::new(&gl, ShaderKind::Fragment, target.fragment_shader()) {
            Ok(shader) => shader,
            Err(err) => {
                vertex_shader.destroy(&gl);
                return Err(err);
            }
        };
        let program = Program::new(&gl, vertex_shader, fragment_shader)?;

        unsafe {
            let position_attribute = gl.get_attrib_location(program.object, "aPosition");
            let tex_coord_attribute = gl.get_attrib_location(program.object, "aTextureCoord");
            let (position_attribute, tex_coord_attribute) =
                match (position_attribute, tex_coord_attribute) {
                    (Some(position), Some(tex_coord)) => (position, tex_coord),
                    _ => {
                        program.destroy(&gl);
                        return Err(Error::ProgramLinkFailed("missing vertex attributes".to_owned()));
                    }
                };
            let mvp_uniform = gl.get_uniform_location(program.object, "uMVPMatrix");
            let tex_matrix_uniform = gl.get_uniform_location(program.object, "uTexMatrix");

            let quad = match Buffer::from_f32_data(&gl, &FULL_RECTANGLE) {
                Ok(quad) => quad,
                Err(err) => {
                    program.destroy(&gl);
                    return Err(err);
                }
            };

            debug!("created {:?} blit program", target);
            Ok(FullScreenBlit {
                target,
                resources: Some(BlitResources {
                    program,
                    quad,
                    position_attribute,
                    tex_coord_attribute,
                    mvp_uniform,
                    tex_matrix_uniform,
                }),
                gl,
            })
        }
    }

    #[inline]
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Creates a texture object suitable for this blit's target, e.g. to hand to a camera.
    pub fn create_texture_object(&self) -> Result<u32, Error> {
        let gl = &self.gl;
        let target = self.target.to_gl();
        unsafe {
            let texture = gl.create_texture().map_err(|_| Error::GraphicsError {
                code: gl.get_error(),
                operation: "glGenTextures",
            })?;
            gl.bind_texture(target, Some(texture));
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(target, None);
            gl_utils::check_gl_error(gl, "glTexParameter")?;
            Ok(texture.0.get())
        }
    }

    /// Draws `texture` over the whole viewport of the current surface, sampling through
    /// `tex_matrix`.
    pub fn draw(&self, texture: u32, tex_matrix: &[f32; 16], viewport: Size2D<i32>) -> Result<(), Error> {
        let resources = self.resources.as_ref().ok_or(Error::ContextDestroyed)?;
        let gl = &self.gl;
        let target = self.target.to_gl();

        unsafe {
            gl.viewport(0, 0, viewport.width, viewport.height);
            gl.use_program(Some(resources.program.object));
            gl_utils::check_gl_error(gl, "glUseProgram")?;

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(target, NonZeroU32::new(texture).map(NativeTexture));

            gl.uniform_matrix_4_f32_slice(resources.mvp_uniform.as_ref(), false, &IDENTITY_MATRIX);
            gl.uniform_matrix_4_f32_slice(resources.tex_matrix_uniform.as_ref(), false, tex_matrix);
            gl_utils::check_gl_error(gl, "glUniformMatrix4fv")?;

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(resources.quad.object));
            gl.enable_vertex_attrib_array(resources.position_attribute);
            gl.vertex_attrib_pointer_f32(
                resources.position_attribute,
                2,
                glow::FLOAT,
                false,
                VERTEX_STRIDE,
                0,
            );
            gl.enable_vertex_attrib_array(resources.tex_coord_attribute);
            gl.vertex_attrib_pointer_f32(
                resources.tex_coord_attribute,
                2,
                glow::FLOAT,
                false,
                VERTEX_STRIDE,
                TEX_COORD_OFFSET,
            );
            gl_utils::check_gl_error(gl, "glVertexAttribPointer")?;

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl_utils::check_gl_error(gl, "glDrawArrays")?;

            gl.disable_vertex_attrib_array(resources.position_attribute);
            gl.disable_vertex_attrib_array(resources.tex_coord_attribute);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(target, None);
            gl.use_program(None);
        }
        Ok(())
    }
}

impl FrameRenderer for FullScreenBlit {
    fn draw_frame(&mut self, frame: &SourceFrame, viewport: Size2D<i32>) -> Result<(), Error> {
        self.draw(frame.texture, &frame.transform, viewport)
    }

    fn release(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.program.destroy(&self.gl);
            resources.quad.destroy(&self.gl);
            debug!("released blit program");
        }
    }
}
