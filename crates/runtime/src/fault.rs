//! The single fatal-error channel for in-script errors (§5, §7), plus the
//! separate hand-rolled `HostError` type for embedding-API misuse.
//!
//! Every opcode handler in [`crate::interp`] that can fail returns
//! `Result<_, Fault>`; there is exactly one way for a running script to
//! fail, a single-channel shape rather than a per-opcode error enum per
//! failure mode. `ensure` (§5) is the in-script primitive that raises one.

use std::fmt;

/// A runtime fault: what went wrong, where, and the coroutine call stack at
/// the point of failure (innermost frame first), assembled by
/// [`crate::interp::Interp::run_coroutine`] as the fault unwinds.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub ip: u32,
    pub trace: Vec<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>, ip: u32) -> Self {
        Fault {
            message: message.into(),
            ip,
            trace: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame_desc: impl Into<String>) -> Self {
        self.trace.push(frame_desc.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ip {})", self.message, self.ip)?;
        for frame in &self.trace {
            write!(f, "\n  at {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}

/// Misuse of the host embedding API ([`crate::host`]) — a programming error
/// in the *embedding* Rust code, not a script fault, so it's kept separate
/// from [`Fault`] rather than folded into the same channel.
#[derive(Debug)]
pub enum HostError {
    /// `pop`/`pick`/`top` referenced a slot beyond the exchange stack.
    StackUnderflow { requested: usize, depth: usize },
    /// A `to_*`/`is_*` accessor was used against a value of the wrong type.
    TypeMismatch { expected: &'static str, found: &'static str },
    /// A native callback was registered under a name that's already bound
    /// in the core scope.
    DuplicateNative { name: String },
    /// Compiling the supplied source failed.
    Compile(weft_compiler::error::CompileError),
    /// Running the compiled module faulted.
    Runtime(Fault),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::StackUnderflow { requested, depth } => write!(
                f,
                "exchange stack underflow: requested index {requested}, depth is {depth}"
            ),
            HostError::TypeMismatch { expected, found } => {
                write!(f, "expected a {expected} value, found {found}")
            }
            HostError::DuplicateNative { name } => {
                write!(f, "native function '{name}' is already registered")
            }
            HostError::Compile(e) => write!(f, "{e}"),
            HostError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<weft_compiler::error::CompileError> for HostError {
    fn from(e: weft_compiler::error::CompileError) -> Self {
        HostError::Compile(e)
    }
}

impl From<Fault> for HostError {
    fn from(e: Fault) -> Self {
        HostError::Runtime(e)
    }
}
