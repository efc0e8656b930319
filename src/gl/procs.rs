// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The loaded entry-point table.

Entry points are resolved by name through a loader callback the embedder
supplies (wrapping `wglGetProcAddress`, `glXGetProcAddress`, `eglGetProcAddress`
or a dlopened libGL).  Every slot is optional at load time; [`ProcTable::validate`]
checks the subset the backend cannot run without, and the remaining slots gate
capability flags instead of being required.
*/

use crate::error::Error;
use std::ffi::{c_char, c_float, c_int, c_uchar, c_uint, c_void};

pub(crate) type GLenum = c_uint;
pub(crate) type GLuint = c_uint;
pub(crate) type GLint = c_int;
pub(crate) type GLsizei = c_int;
pub(crate) type GLboolean = c_uchar;
pub(crate) type GLfloat = c_float;
pub(crate) type GLintptr = isize;
pub(crate) type GLsizeiptr = isize;
pub(crate) type GLbitfield = c_uint;
pub(crate) type GLchar = c_char;

fn load_one<F>(loader: &mut dyn FnMut(&str) -> *const c_void, name: &str) -> Option<F> {
    let ptr = loader(name);
    if ptr.is_null() {
        None
    } else {
        //fn pointers and data pointers are the same size on every supported target
        Some(unsafe { std::mem::transmute_copy::<*const c_void, F>(&ptr) })
    }
}

macro_rules! proc_table {
    (
        required { $($rname:ident: fn($($rarg:ty),* $(,)?) $(-> $rret:ty)?;)* }
        optional { $($oname:ident: fn($($oarg:ty),* $(,)?) $(-> $oret:ty)?;)* }
    ) => {
        #[allow(non_snake_case)]
        pub(crate) struct ProcTable {
            $(pub $rname: Option<unsafe extern "system" fn($($rarg),*) $(-> $rret)?>,)*
            $(pub $oname: Option<unsafe extern "system" fn($($oarg),*) $(-> $oret)?>,)*
        }

        impl ProcTable {
            pub fn load(loader: &mut dyn FnMut(&str) -> *const c_void) -> ProcTable {
                ProcTable {
                    $($rname: load_one(loader, concat!("gl", stringify!($rname))),)*
                    $($oname: load_one(loader, concat!("gl", stringify!($oname))),)*
                }
            }

            /// Checks that every entry point the backend cannot run without
            /// actually loaded.
            pub fn validate(&self) -> Result<(), Error> {
                $(
                    if self.$rname.is_none() {
                        return Err(Error::MissingEntryPoint {
                            name: concat!("gl", stringify!($rname)),
                        });
                    }
                )*
                Ok(())
            }
        }
    };
}

proc_table! {
    required {
        GetError: fn() -> GLenum;
        PixelStorei: fn(GLenum, GLint);
        Flush: fn();
        Finish: fn();

        GenBuffers: fn(GLsizei, *mut GLuint);
        DeleteBuffers: fn(GLsizei, *const GLuint);
        BindBuffer: fn(GLenum, GLuint);
        BufferData: fn(GLenum, GLsizeiptr, *const c_void, GLenum);
        BufferSubData: fn(GLenum, GLintptr, GLsizeiptr, *const c_void);
        GetBufferSubData: fn(GLenum, GLintptr, GLsizeiptr, *mut c_void);
        MapBufferRange: fn(GLenum, GLintptr, GLsizeiptr, GLbitfield) -> *mut c_void;
        UnmapBuffer: fn(GLenum) -> GLboolean;
        BindBufferRange: fn(GLenum, GLuint, GLuint, GLintptr, GLsizeiptr);

        GenTextures: fn(GLsizei, *mut GLuint);
        DeleteTextures: fn(GLsizei, *const GLuint);
        BindTexture: fn(GLenum, GLuint);
        ActiveTexture: fn(GLenum);
        TexImage2D: fn(GLenum, GLint, GLint, GLsizei, GLsizei, GLint, GLenum, GLenum, *const c_void);
        TexImage3D: fn(GLenum, GLint, GLint, GLsizei, GLsizei, GLsizei, GLint, GLenum, GLenum, *const c_void);
        TexSubImage2D: fn(GLenum, GLint, GLint, GLint, GLsizei, GLsizei, GLenum, GLenum, *const c_void);
        TexSubImage3D: fn(GLenum, GLint, GLint, GLint, GLint, GLsizei, GLsizei, GLsizei, GLenum, GLenum, *const c_void);
        TexParameteri: fn(GLenum, GLenum, GLint);
        GenerateMipmap: fn(GLenum);
        ReadPixels: fn(GLint, GLint, GLsizei, GLsizei, GLenum, GLenum, *mut c_void);

        GenSamplers: fn(GLsizei, *mut GLuint);
        DeleteSamplers: fn(GLsizei, *const GLuint);
        SamplerParameteri: fn(GLuint, GLenum, GLint);
        BindSampler: fn(GLuint, GLuint);

        GenFramebuffers: fn(GLsizei, *mut GLuint);
        DeleteFramebuffers: fn(GLsizei, *const GLuint);
        BindFramebuffer: fn(GLenum, GLuint);
        FramebufferTexture2D: fn(GLenum, GLenum, GLenum, GLuint, GLint);
        CheckFramebufferStatus: fn(GLenum) -> GLenum;
        DrawBuffers: fn(GLsizei, *const GLenum);

        CreateShader: fn(GLenum) -> GLuint;
        DeleteShader: fn(GLuint);
        ShaderSource: fn(GLuint, GLsizei, *const *const GLchar, *const GLint);
        CompileShader: fn(GLuint);
        GetShaderiv: fn(GLuint, GLenum, *mut GLint);
        GetShaderInfoLog: fn(GLuint, GLsizei, *mut GLsizei, *mut GLchar);
        CreateProgram: fn() -> GLuint;
        DeleteProgram: fn(GLuint);
        AttachShader: fn(GLuint, GLuint);
        LinkProgram: fn(GLuint);
        GetProgramiv: fn(GLuint, GLenum, *mut GLint);
        GetProgramInfoLog: fn(GLuint, GLsizei, *mut GLsizei, *mut GLchar);
        UseProgram: fn(GLuint);

        GenVertexArrays: fn(GLsizei, *mut GLuint);
        BindVertexArray: fn(GLuint);
        BindVertexBuffer: fn(GLuint, GLuint, GLintptr, GLsizei);

        Viewport: fn(GLint, GLint, GLsizei, GLsizei);
        Scissor: fn(GLint, GLint, GLsizei, GLsizei);
        ClearBufferfv: fn(GLenum, GLint, *const GLfloat);
        ClearBufferfi: fn(GLenum, GLint, GLfloat, GLint);
        DrawArraysInstanced: fn(GLenum, GLint, GLsizei, GLsizei);
        DrawElementsInstancedBaseVertex: fn(GLenum, GLsizei, GLenum, *const c_void, GLsizei, GLint);
    }
    optional {
        CopyBufferSubData: fn(GLenum, GLenum, GLintptr, GLintptr, GLsizeiptr);
        CopyImageSubData: fn(GLuint, GLenum, GLint, GLint, GLint, GLint, GLuint, GLenum, GLint, GLint, GLint, GLint, GLsizei, GLsizei, GLsizei);
        BlitFramebuffer: fn(GLint, GLint, GLint, GLint, GLint, GLint, GLint, GLint, GLbitfield, GLenum);
        TexStorage2D: fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei);
        TexStorage3D: fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei, GLsizei);
        GetTextureSubImage: fn(GLuint, GLint, GLint, GLint, GLint, GLsizei, GLsizei, GLsizei, GLenum, GLenum, GLsizei, *mut c_void);
        FramebufferTextureLayer: fn(GLenum, GLenum, GLuint, GLint, GLint);
        DispatchCompute: fn(GLuint, GLuint, GLuint);
        BindImageTexture: fn(GLuint, GLuint, GLint, GLboolean, GLint, GLenum, GLenum);
        ObjectLabel: fn(GLenum, GLuint, GLsizei, *const GLchar);
        PushDebugGroup: fn(GLenum, GLuint, GLsizei, *const GLchar);
        PopDebugGroup: fn();
        DebugMessageInsert: fn(GLenum, GLenum, GLuint, GLenum, GLsizei, *const GLchar);
        DrawArraysInstancedBaseInstance: fn(GLenum, GLint, GLsizei, GLsizei, GLuint);
        DrawElementsInstancedBaseVertexBaseInstance: fn(GLenum, GLsizei, GLenum, *const c_void, GLsizei, GLint, GLuint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reports_the_first_missing_required_entry() {
        let mut loader = |_: &str| std::ptr::null::<c_void>();
        let table = ProcTable::load(&mut loader);
        match table.validate() {
            Err(Error::MissingEntryPoint { name }) => assert_eq!(name, "glGetError"),
            other => panic!("expected MissingEntryPoint, got {other:?}"),
        }
    }

    #[test]
    fn loader_receives_gl_prefixed_names() {
        let mut seen = Vec::new();
        let mut loader = |name: &str| {
            seen.push(name.to_string());
            std::ptr::null::<c_void>()
        };
        ProcTable::load(&mut loader);
        assert!(seen.iter().all(|n| n.starts_with("gl")));
        assert!(seen.contains(&"glGenBuffers".to_string()));
        assert!(seen.contains(&"glCopyImageSubData".to_string()));
    }
}
