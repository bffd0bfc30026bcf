//! Escaping closures (§9 design note: "an explicit environment record per
//! invocation, accepting that truly escaping closures need heap
//! promotion").
//!
//! Most nested function values never outlive the invocation that created
//! them, so they stay a plain [`crate::value::Value::Sub`] resolved against
//! the still-live caller frame. A [`ClosureObj`] is only built for a nested
//! function whose own lexical-ancestor list is non-empty *and* which is
//! being returned (or otherwise escapes its defining call) — at that point
//! the defining frame's own [`crate::coroutine::Env`] handles need to be
//! kept alive past that frame's return, by value-snapshot reference rather
//! than by re-walking a call stack that may no longer contain them.

use crate::coroutine::Env;
use crate::value::SubEntry;

/// A function value plus the lexical-ancestor environments it captured at
/// the moment it was created. Captures are by `Rc` clone of each ancestor's
/// environment, not a deep copy: mutations a still-live enclosing
/// invocation makes to its own locals remain visible to a closure created
/// from it, but nothing in this language ever writes back *into* a
/// captured environment from inside the closure (§4.6 `Assign`/`Assignl`
/// only ever target the current frame or globals), so this is read-only
/// sharing, not reference-capturing mutation.
#[derive(Clone, Debug)]
pub struct ClosureObj {
    pub entry: SubEntry,
    pub captured: Vec<(u32, Env)>,
}
