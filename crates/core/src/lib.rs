//! Weft Core: the value model, pool allocator & collector, and ordered
//! containers shared by the compiler and the runtime.
//!
//! # Modules
//!
//! - [`value`]: the tagged `Value` union and its total order/equality rules
//! - [`interner`]: two-region ("old"/"young") string interning
//! - [`pool`]: the generic mark-and-sweep object pool
//! - [`container`]: ordered vector and ordered-key map, built over `Vec<Value>`
//! - [`coroutine`]: the coroutine state record (stacks, frames, loop stack)
//! - [`closure`]: escaping-closure environment capture (§9)
//! - [`heap`]: the four typed pools plus the collector that walks them

pub mod closure;
pub mod container;
pub mod coroutine;
pub mod heap;
pub mod interner;
pub mod pool;
pub mod value;

pub use closure::ClosureObj;
pub use container::{VMap, VVector};
pub use coroutine::{Coroutine, CoroState, Env, Frame, LocalBinding, LoopFrame, LoopKind};
pub use heap::{CollectStats, Heap, Userdata};
pub use interner::{Interner, Sym};
pub use pool::Pool;
pub use value::{value_cmp, value_eq, Handle, NativeFnId, SubEntry, Value};
