//! Per-thread heap meter and container registry.
//!
//! Every learner-visible allocation is charged here before it is made, so
//! an invocation that tries to exceed its ceiling fails with
//! [`EvalError::MemoryExceeded`] instead of growing the host process.
//! Containers also register a weak handle so that [`HeapSession`] can break
//! reference cycles when the invocation ends.
//!
//! Native walks over values (rendering, comparison, hashing, conversion)
//! never pass through the evaluator's step loop, so they report their work
//! through [`visit`], which observes the session's interrupt flag.

use crate::error::{EvalError, EvalResult};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flat per-object cost added to every charged allocation.
pub(crate) const OBJECT_OVERHEAD: usize = 48;

const FIRST_COMPACTION: usize = 4096;

/// Visits between two reads of the interrupt flag.
const POLL_INTERVAL: u32 = 1024;

#[derive(Debug, Clone, Copy)]
struct Meter {
    live: usize,
    peak: usize,
    limit: usize,
    active: bool,
}

impl Meter {
    const IDLE: Meter = Meter {
        live: 0,
        peak: 0,
        limit: usize::MAX,
        active: false,
    };
}

thread_local! {
    static METER: Cell<Meter> = const { Cell::new(Meter::IDLE) };
    static TRACKED: RefCell<Registry> = RefCell::new(Registry::new());
    static INTERRUPT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
    static VISITS: Cell<u32> = const { Cell::new(0) };
}

/// A container whose contents can be dropped in place to break cycles.
pub(crate) trait Reclaim {
    fn reclaim(&self);
}

struct Registry {
    objects: Vec<Weak<dyn Reclaim>>,
    compact_at: usize,
}

impl Registry {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
            compact_at: FIRST_COMPACTION,
        }
    }
}

// ── Metering ──────────────────────────────────────────────────────────────────

/// Account for `bytes` about to be allocated.
pub fn charge(bytes: usize) -> EvalResult<()> {
    METER.with(|cell| {
        let mut meter = cell.get();
        let next = meter.live.saturating_add(bytes);
        if next > meter.limit {
            return Err(EvalError::MemoryExceeded { limit: meter.limit });
        }
        meter.live = next;
        meter.peak = meter.peak.max(next);
        cell.set(meter);
        Ok(())
    })
}

/// Fail if `bytes` more would not fit, without charging them.
pub fn ensure_available(bytes: usize) -> EvalResult<()> {
    METER.with(|cell| {
        let meter = cell.get();
        if meter.live.saturating_add(bytes) > meter.limit {
            Err(EvalError::MemoryExceeded { limit: meter.limit })
        } else {
            Ok(())
        }
    })
}

pub fn release(bytes: usize) {
    METER.with(|cell| {
        let mut meter = cell.get();
        meter.live = meter.live.saturating_sub(bytes);
        cell.set(meter);
    });
}

pub fn live_bytes() -> usize {
    METER.with(|cell| cell.get().live)
}

pub fn peak_bytes() -> usize {
    METER.with(|cell| cell.get().peak)
}

// ── Interrupt Watch ───────────────────────────────────────────────────────────

/// Count one node of a native value walk.
///
/// Fails with [`EvalError::Interrupted`] once the watched flag is raised.
/// Threads without a watched session never fail here.
pub fn visit() -> EvalResult<()> {
    let n = VISITS.with(|cell| {
        let n = cell.get().wrapping_add(1);
        cell.set(n);
        n
    });
    if n % POLL_INTERVAL != 0 {
        return Ok(());
    }
    let raised = INTERRUPT.with(|flag| {
        flag.borrow()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    });
    if raised {
        Err(EvalError::Interrupted)
    } else {
        Ok(())
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub(crate) fn track(object: Weak<dyn Reclaim>) {
    if !METER.with(|cell| cell.get().active) {
        return;
    }
    TRACKED.with(|registry| {
        let mut registry = registry.borrow_mut();
        registry.objects.push(object);
        if registry.objects.len() >= registry.compact_at {
            registry.objects.retain(|w| w.strong_count() > 0);
            registry.compact_at = (registry.objects.len() * 2).max(FIRST_COMPACTION);
        }
    });
}

fn teardown() {
    let objects = TRACKED.with(|registry| std::mem::take(&mut registry.borrow_mut().objects));
    for object in &objects {
        if let Some(object) = object.upgrade() {
            object.reclaim();
        }
    }
    drop(objects);
    TRACKED.with(|registry| *registry.borrow_mut() = Registry::new());
    INTERRUPT.with(|flag| *flag.borrow_mut() = None);
    VISITS.with(|cell| cell.set(0));
    METER.with(|cell| cell.set(Meter::IDLE));
}

/// Scope of one metered invocation on the current thread.
///
/// Dropping the session empties every container created during it, which
/// frees anything still held alive by a reference cycle, then resets the
/// meter.
pub struct HeapSession {
    _thread_bound: PhantomData<*const ()>,
}

impl HeapSession {
    pub fn begin(limit: usize) -> Self {
        METER.with(|cell| {
            cell.set(Meter {
                live: 0,
                peak: 0,
                limit,
                active: true,
            })
        });
        Self {
            _thread_bound: PhantomData,
        }
    }

    /// Make [`visit`] observe `interrupt` until the session ends.
    pub fn watching(self, interrupt: Arc<AtomicBool>) -> Self {
        INTERRUPT.with(|flag| *flag.borrow_mut() = Some(interrupt));
        VISITS.with(|cell| cell.set(0));
        self
    }
}

impl Drop for HeapSession {
    fn drop(&mut self) {
        teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_respects_limit() {
        let _session = HeapSession::begin(100);
        assert!(charge(60).is_ok());
        assert_eq!(charge(50), Err(EvalError::MemoryExceeded { limit: 100 }));
        assert_eq!(live_bytes(), 60);
        release(60);
        assert!(charge(100).is_ok());
        assert_eq!(peak_bytes(), 100);
    }

    #[test]
    fn test_idle_thread_is_unlimited() {
        assert!(charge(usize::MAX / 2).is_ok());
        release(usize::MAX / 2);
        assert!(ensure_available(1 << 40).is_ok());
    }

    #[test]
    fn test_visit_fails_once_interrupted() {
        let flag = Arc::new(AtomicBool::new(false));
        let _session = HeapSession::begin(100).watching(Arc::clone(&flag));
        for _ in 0..POLL_INTERVAL * 2 {
            assert!(visit().is_ok());
        }
        flag.store(true, Ordering::Relaxed);
        let stopped = (0..POLL_INTERVAL).map(|_| visit()).any(|r| r.is_err());
        assert!(stopped);
    }

    #[test]
    fn test_unwatched_visits_never_fail() {
        {
            let flag = Arc::new(AtomicBool::new(true));
            let _session = HeapSession::begin(100).watching(flag);
        }
        for _ in 0..POLL_INTERVAL * 2 {
            assert!(visit().is_ok());
        }
    }

    #[test]
    fn test_session_end_resets_meter() {
        {
            let _session = HeapSession::begin(10);
            assert!(charge(10).is_ok());
        }
        assert_eq!(live_bytes(), 0);
        assert!(charge(1000).is_ok());
        release(1000);
    }
}
