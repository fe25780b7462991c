//! Process-wide scoped flags governing the change-propagation discipline.
//!
//! Both flags are re-entrant counters rather than plain booleans: entering a
//! nested scope increments the counter, and leaving it decrements, so that
//! the outer scope's intent survives a nested scope's exit.

use std::sync::atomic::{AtomicUsize, Ordering};

static SUPPRESSION_DEPTH: AtomicUsize = AtomicUsize::new(0);
static GRAD_FN_GATE_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// True while any `suppress_variable_notifications` scope is active on this
/// process. Mutations performed while suppressed update local state only and
/// never emit an outbound RPC.
pub fn is_suppressed() -> bool {
    SUPPRESSION_DEPTH.load(Ordering::Acquire) > 0
}

/// True while any `allow_grad_fn_assignment` scope is active. Assigning
/// `grad_fn` outside this scope is an `InvariantError`.
pub fn grad_fn_assignment_allowed() -> bool {
    GRAD_FN_GATE_DEPTH.load(Ordering::Acquire) > 0
}

/// RAII guard restoring the previous depth on drop.
#[must_use]
pub struct ScopeGuard(&'static AtomicUsize);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Enter a scope in which local mutations are not forwarded to the server.
/// Nested calls compose: the flag stays set until every nested guard drops.
pub fn suppress_variable_notifications() -> ScopeGuard {
    SUPPRESSION_DEPTH.fetch_add(1, Ordering::AcqRel);
    ScopeGuard(&SUPPRESSION_DEPTH)
}

/// Enter a scope in which assigning `grad_fn` on a Variable is permitted.
/// Only server-originated code paths (inbound handlers, decoder) hold this
/// guard.
pub fn allow_grad_fn_assignment() -> ScopeGuard {
    GRAD_FN_GATE_DEPTH.fetch_add(1, Ordering::AcqRel);
    ScopeGuard(&GRAD_FN_GATE_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The flags are process-wide statics; serialize tests that touch them
    // so they don't observe each other's depth changes.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn suppression_is_reentrant() {
        let _guard = TEST_LOCK.lock().unwrap();
        assert!(!is_suppressed());
        let outer = suppress_variable_notifications();
        assert!(is_suppressed());
        {
            let inner = suppress_variable_notifications();
            assert!(is_suppressed());
            drop(inner);
        }
        assert!(is_suppressed(), "outer scope must still hold the flag");
        drop(outer);
        assert!(!is_suppressed());
    }

    #[test]
    fn grad_fn_gate_is_reentrant() {
        let _guard = TEST_LOCK.lock().unwrap();
        assert!(!grad_fn_assignment_allowed());
        let g = allow_grad_fn_assignment();
        assert!(grad_fn_assignment_allowed());
        drop(g);
        assert!(!grad_fn_assignment_allowed());
    }
}
