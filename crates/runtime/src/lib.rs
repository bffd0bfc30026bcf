//! Weft Runtime: the stack-based VM, coroutine scheduler, operator-meta
//! dispatch, failure channel, and host embedding API (§4.4–§4.9, §5, §6).
//!
//! [`Vm`] owns everything a running script needs — the heap, the compiled
//! module, the two scope tables, and the native-callback table — and drives
//! execution through [`Interp`], which is re-created per [`Vm::run`]/
//! [`Vm::call_value_sync`] call rather than stored, since it only ever
//! borrows the `Vm` for the duration of one dispatch loop.

pub mod corelib;
pub mod fault;
pub mod host;
pub mod interp;
pub mod meta;
pub mod vm;

pub use fault::{Fault, HostError};
pub use interp::{Interp, StepOutcome};
pub use vm::{NativeFn, Vm};
