// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Error taxonomy for the command core.

Three families:

1.  Native call failures, detected via the backend error flag immediately after a
    call (debug builds only).  These carry the raw native error code and the name
    of the failing operation.
2.  Protocol violations (mapping mode mismatch, using a disposed resource, and so
    on).  These are raised synchronously on the calling thread where detected.
3.  Execution-thread faults.  Errors raised while the execution thread processes
    a work item are captured and surfaced to the next thread that performs a
    blocking call; if several accumulate they arrive as one [`Error::Aggregate`].
*/

use crate::backend::MapMode;
use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The native error flag was set after a call.  Only raised in debug builds.
    Native { code: u32, context: &'static str },
    /// A required entry point was absent from the loaded function table.
    MissingEntryPoint { name: &'static str },
    /// The resource is already mapped with a different mode.
    MapModeMismatch { existing: MapMode, requested: MapMode },
    /// Unmap was called on a resource that is not mapped.
    NotMapped,
    /// The resource is currently mapped and cannot be updated through the queue.
    ResourceMapped,
    /// A resource was used after its dispose was requested.
    ResourceDisposed { label: String },
    /// A write or copy fell outside the bounds of the destination resource.
    OutOfBounds {
        offset: u64,
        len: u64,
        capacity: u64,
        context: &'static str,
    },
    /// Shader compilation or program link failed; the native log is attached.
    ShaderCompile { log: String },
    /// The command list was submitted in a state that cannot be replayed.
    InvalidCommandList { reason: &'static str },
    /// A resource set did not match its layout.
    InvalidResourceSet { reason: String },
    /// The operation requires a capability the backend did not report.
    UnsupportedOperation { context: &'static str },
    /// The execution thread is gone; the device was terminated.
    DeviceTerminated,
    /// The execution thread could not be spawned.
    ThreadSpawn(std::io::Error),
    /// Multiple execution-thread faults accumulated before a synchronization
    /// point; all of them are surfaced together.
    Aggregate(Vec<Error>),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Native { code, context } => {
                write!(f, "native error {code:#x} after {context}")
            }
            Error::MissingEntryPoint { name } => {
                write!(f, "required entry point {name} was not loaded")
            }
            Error::MapModeMismatch {
                existing,
                requested,
            } => write!(
                f,
                "resource is already mapped as {existing:?}; cannot also map as {requested:?}"
            ),
            Error::NotMapped => write!(f, "resource is not mapped"),
            Error::ResourceMapped => write!(f, "resource is mapped and cannot be updated"),
            Error::ResourceDisposed { label } => {
                write!(f, "resource '{label}' was used after dispose")
            }
            Error::OutOfBounds {
                offset,
                len,
                capacity,
                context,
            } => write!(
                f,
                "{context}: range {offset}..{} exceeds capacity {capacity}",
                offset + len
            ),
            Error::ShaderCompile { log } => write!(f, "shader compile/link failed: {log}"),
            Error::InvalidCommandList { reason } => write!(f, "invalid command list: {reason}"),
            Error::InvalidResourceSet { reason } => write!(f, "invalid resource set: {reason}"),
            Error::UnsupportedOperation { context } => {
                write!(f, "backend does not support {context}")
            }
            Error::DeviceTerminated => write!(f, "device was terminated"),
            Error::ThreadSpawn(e) => write!(f, "failed to spawn the execution thread: {e}"),
            Error::Aggregate(errors) => {
                write!(f, "{} execution-thread fault(s):", errors.len())?;
                for e in errors {
                    write!(f, " [{e}]")?;
                }
                Ok(())
            }
        }
    }
}

impl Error {
    /// Collapses a drained fault list into a single error.
    ///
    /// One fault passes through unchanged; several become [`Error::Aggregate`].
    /// Must not be called with an empty list.
    pub(crate) fn aggregate(mut errors: Vec<Error>) -> Error {
        debug_assert!(!errors.is_empty());
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Error::Aggregate(errors)
        }
    }
}
