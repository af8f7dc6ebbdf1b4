use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::{Decompiler, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchProgress {
    pub launched: usize,
    pub total: usize,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub offset: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub launched: usize,
    pub failures: Vec<TaskFailure>,
    /// Highest number of tasks observed running at once.
    pub peak_outstanding: usize,
}

#[derive(Debug, Default)]
struct GateState {
    outstanding: usize,
    peak: usize,
}

/// Counting admission gate. `acquire` blocks while `limit` permits are out,
/// `wait_idle` blocks until none are.
#[derive(Debug)]
struct Gate {
    limit: usize,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn new(limit: NonZeroUsize) -> Self {
        Self {
            limit: limit.get(),
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut state = self.state.lock();
        while state.outstanding >= self.limit {
            self.changed.wait(&mut state);
        }
        state.outstanding += 1;
        state.peak = state.peak.max(state.outstanding);
        Permit { gate: self }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        drop(state);
        self.changed.notify_all();
    }

    fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.changed.wait(&mut state);
        }
    }

    fn peak(&self) -> usize {
        self.state.lock().peak
    }
}

/// Held by a running task; gives the slot back when dropped, including
/// during unwinding.
struct Permit<'g> {
    gate: &'g Gate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Runs `target.decompile_function` once per entry of `offsets`, at most
/// `jobs` at a time, each on its own thread.
///
/// Launch order follows `offsets`; completion order is unspecified. Returns
/// only after every launched task has finished. A task that fails or panics is
/// recorded in the report and does not affect the others.
pub fn dispatch<D: Decompiler + ?Sized>(
    image: &[u8],
    offsets: &[u32],
    target: &D,
    jobs: NonZeroUsize,
    mut on_launch: impl FnMut(DispatchProgress),
) -> DispatchReport {
    let gate = Gate::new(jobs);
    let failures = Mutex::new(Vec::new());
    let total = offsets.len();
    let mut launched = 0;

    thread::scope(|scope| {
        for &offset in offsets {
            let permit = gate.acquire();
            let failures = &failures;
            let spawned = thread::Builder::new()
                .name(format!("decompile-{offset:x}"))
                .spawn_scoped(scope, move || {
                    let _permit = permit;
                    if let Err(message) = run_task(image, offset, target) {
                        warn!("function 0x{offset:x}: {message}");
                        failures.lock().push(TaskFailure { offset, message });
                    }
                });

            if let Err(e) = spawned {
                // the closure, and with it the permit, was dropped
                warn!("function 0x{offset:x}: failed to spawn task: {e}");
                failures.lock().push(TaskFailure {
                    offset,
                    message: format!("failed to spawn task: {e}"),
                });
            }

            launched += 1;
            debug!("launched {launched}/{total}");
            on_launch(DispatchProgress { launched, total, offset });
        }

        gate.wait_idle();
    });

    let mut failures = failures.into_inner();
    failures.sort_by_key(|f| f.offset);
    DispatchReport {
        launched,
        failures,
        peak_outstanding: gate.peak(),
    }
}

fn run_task<D: Decompiler + ?Sized>(image: &[u8], offset: u32, target: &D) -> Result<(), String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut r = Reader::at(image, offset as usize)?;
        target.decompile_function(&mut r, offset)
    }));
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
