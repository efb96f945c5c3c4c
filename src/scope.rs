//! Thread-local scope tracking and task identity.
//!
//! The `scope_indent` and `scope_elapsed` decorators read a per-thread
//! stack of entry instants maintained by `scope()` guards. Elapsed time is
//! measured from the innermost enclosing scope's entry; indentation is the
//! stack depth.

use std::cell::{Cell, RefCell};
use std::time::Instant;

thread_local! {
    static SCOPES: RefCell<Vec<Instant>> = const { RefCell::new(Vec::new()) };
    static TASK_ID: Cell<u64> = const { Cell::new(0) };
}

/// Enter a scope on the current thread. The scope ends when the guard is
/// dropped.
pub fn scope() -> ScopeGuard {
    SCOPES.with(|s| s.borrow_mut().push(Instant::now()));
    ScopeGuard { _not_send: std::marker::PhantomData }
}

/// Guard returned by [`scope`]; pops the scope stack on drop.
pub struct ScopeGuard {
    // Scopes are per-thread; the guard must be dropped where it was taken.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Depth and elapsed nanoseconds of the innermost scope, if any.
pub(crate) fn current_scope() -> Option<(u16, u64)> {
    SCOPES.with(|s| {
        let stack = s.borrow();
        stack.last().map(|entered| {
            let depth = stack.len().min(u16::MAX as usize) as u16;
            (depth, entered.elapsed().as_nanos() as u64)
        })
    })
}

/// A stable per-thread identifier, computed once per thread by hashing the
/// opaque thread id. Collisions are possible and harmless; the value only
/// labels output.
pub(crate) fn task_id() -> u64 {
    TASK_ID.with(|cached| {
        let id = cached.get();
        if id != 0 {
            return id;
        }
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        let id = hasher.finish() | 1;
        cached.set(id);
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_depth_and_elapsed() {
        assert_eq!(current_scope(), None);
        {
            let _outer = scope();
            let (depth, _) = current_scope().unwrap();
            assert_eq!(depth, 1);
            {
                let _inner = scope();
                let (depth, elapsed) = current_scope().unwrap();
                assert_eq!(depth, 2);
                assert!(elapsed < 1_000_000_000);
            }
            let (depth, _) = current_scope().unwrap();
            assert_eq!(depth, 1);
        }
        assert_eq!(current_scope(), None);
    }

    #[test]
    fn test_task_id_stable_per_thread() {
        let a = task_id();
        let b = task_id();
        assert_eq!(a, b);
        assert_ne!(a, 0);

        let other = std::thread::spawn(task_id).join().unwrap();
        assert_ne!(other, 0);
    }
}
