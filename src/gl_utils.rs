// surfrec/src/gl_utils.rs
//
//! OpenGL ES wrappers used by the blit pass.

use crate::Error;

use glow::{HasContext, NativeBuffer, NativeProgram, NativeShader};
use log::error;

/// Returns `Error::GraphicsError` if GL has recorded an error since the last check.
pub fn check_gl_error(gl: &glow::Context, operation: &'static str) -> Result<(), Error> {
    let code = unsafe { gl.get_error() };
    if code == glow::NO_ERROR {
        Ok(())
    } else {
        error!("{}: glError 0x{:x}", operation, code);
        Err(Error::GraphicsError { code, operation })
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    fn to_gl(self) -> u32 {
        match self {
            ShaderKind::Vertex => glow::VERTEX_SHADER,
            ShaderKind::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

pub struct Shader {
    object: NativeShader,
}

impl Shader {
    pub fn new(gl: &glow::Context, kind: ShaderKind, source: &str) -> Result<Shader, Error> {
        unsafe {
            let shader = gl.create_shader(kind.to_gl()).map_err(Error::ShaderCompilationFailed)?;
            check_gl_error(gl, "glCreateShader")?;
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let info_log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                error!("could not compile {:?} shader:\n{}", kind, info_log);
                return Err(Error::ShaderCompilationFailed(info_log));
            }
            Ok(Shader { object: shader })
        }
    }

    pub fn destroy(self, gl: &glow::Context) {
        unsafe { gl.delete_shader(self.object) }
    }
}

pub struct Program {
    pub object: NativeProgram,
    vertex_shader: Shader,
    fragment_shader: Shader,
}

impl Program {
    pub fn new(
        gl: &glow::Context,
        vertex_shader: Shader,
        fragment_shader: Shader,
    ) -> Result<Program, Error> {
        unsafe {
            let program = match gl.create_program() {
                Ok(program) => program,
                Err(message) => {
                    vertex_shader.destroy(gl);
                    fragment_shader.destroy(gl);
                    return Err(Error::ProgramLinkFailed(message));
                }
            };
            gl.attach_shader(program, vertex_shader.object);
            gl.attach_shader(program, fragment_shader.object);
            gl.link_program(program);
            if !gl.get_program_link_status(program) {
                let info_log = gl.get_program_info_log(program);
                error!("could not link program:\n{}", info_log);
                gl.delete_program(program);
                vertex_shader.destroy(gl);
                fragment_shader.destroy(gl);
                return Err(Error::ProgramLinkFailed(info_log));
            }
            Ok(Program { object: program, vertex_shader, fragment_shader })
        }
    }

    pub fn destroy(self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.object);
        }
        self.vertex_shader.destroy(gl);
        self.fragment_shader.destroy(gl);
    }
}

pub struct Buffer {
    pub object: NativeBuffer,
}

impl Buffer {
    /// Uploads static vertex data.
    pub fn from_f32_data(gl: &glow::Context, data: &[f32]) -> Result<Buffer, Error> {
        let bytes: Vec<u8> = data.iter().flat_map(|value| value.to_ne_bytes()).collect();
        unsafe {
            let buffer = gl
                .create_buffer()
                .map_err(|_| Error::GraphicsError { code: gl.get_error(), operation: "glGenBuffers" })?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            check_gl_error(gl, "glBufferData")?;
            Ok(Buffer { object: buffer })
        }
    }

    pub fn destroy(self, gl: &glow::Context) {
        unsafe { gl.delete_buffer(self.object) }
    }
}
