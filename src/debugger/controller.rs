// Vesper Time-Travel Controller
// Runs a VM on a worker thread that parks before every instruction,
// recording a snapshot each time, so execution can be stepped and rewound

use crate::compiler::CompiledProgram;
use crate::error::{ErrorKind, VesperError, VesperResult};
use crate::vm::{Vm, VmConfig, VmState};
use parking_lot::{Condvar, Mutex};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// History and run status shared with the worker
#[derive(Default)]
struct History {
    snapshots: Vec<Arc<VmState>>,
    cursor: usize,
    done: bool,
    error: Option<VesperError>,
    /// Instructions the worker may still execute without asking
    permits: usize,
    aborted: bool,
}

impl History {
    fn current(&self) -> Arc<VmState> {
        self.snapshots[self.cursor].clone()
    }

    fn record(&mut self, snapshot: VmState) {
        self.snapshots.push(Arc::new(snapshot));
        self.cursor = self.snapshots.len() - 1;
    }
}

#[derive(Default)]
struct Shared {
    history: Mutex<History>,
    changed: Condvar,
}

impl Shared {
    /// Step hook body: record, then park until granted one instruction
    fn pause(&self, snapshot: VmState) -> ControlFlow<()> {
        let mut history = self.history.lock();
        if history.aborted {
            return ControlFlow::Break(());
        }
        history.record(snapshot);
        self.changed.notify_all();

        while history.permits == 0 && !history.aborted {
            self.changed.wait(&mut history);
        }
        if history.aborted {
            return ControlFlow::Break(());
        }
        history.permits -= 1;
        ControlFlow::Continue(())
    }

    fn finish(&self, snapshot: VmState, error: Option<VesperError>) {
        let mut history = self.history.lock();
        history.record(snapshot);
        history.done = true;
        history.error = error;
        self.changed.notify_all();
    }
}

/// Steps a program forward and back through recorded snapshots
pub struct Controller {
    program: Arc<CompiledProgram>,
    config: VmConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(program: impl Into<Arc<CompiledProgram>>) -> VesperResult<Self> {
        Self::with_config(program, VmConfig::default())
    }

    /// Start the VM and wait until it is parked before its first instruction
    pub fn with_config(
        program: impl Into<Arc<CompiledProgram>>,
        config: VmConfig,
    ) -> VesperResult<Self> {
        let mut controller = Self {
            program: program.into(),
            config,
            shared: Arc::new(Shared::default()),
            worker: None,
        };
        controller.start()?;
        Ok(controller)
    }

    fn start(&mut self) -> VesperResult<()> {
        let shared = Arc::new(Shared::default());
        let program = self.program.clone();
        let config = self.config;
        let worker_shared = shared.clone();

        let handle = thread::Builder::new()
            .name("vesper-vm".to_string())
            .spawn(move || {
                let mut vm = Vm::with_config(program, config);
                let hook_shared = worker_shared.clone();
                vm.set_on_step(move |vm| hook_shared.pause(vm.state()));

                let result = vm.run_program();
                vm.clear_on_step();
                if let Err(err) = &result {
                    tracing::debug!(error = %err, "vm run failed");
                }
                worker_shared.finish(vm.state(), result.err());
            })
            .map_err(|err| {
                VesperError::new(
                    ErrorKind::RuntimeError,
                    format!("failed to start vm thread: {}", err),
                )
            })?;

        {
            let mut history = shared.history.lock();
            while history.snapshots.is_empty() {
                shared.changed.wait(&mut history);
            }
        }
        tracing::debug!("controller started");

        self.shared = shared;
        self.worker = Some(handle);
        Ok(())
    }

    /// Advance one snapshot. Replays recorded history when the cursor trails
    /// the frontier; otherwise runs exactly one instruction.
    pub fn step_forward(&mut self) -> Arc<VmState> {
        let shared = &self.shared;
        let mut history = shared.history.lock();
        if history.cursor + 1 < history.snapshots.len() {
            history.cursor += 1;
            return history.current();
        }
        if history.done {
            return history.current();
        }

        let frontier = history.snapshots.len();
        history.permits += 1;
        shared.changed.notify_all();
        while history.snapshots.len() == frontier && !history.done {
            shared.changed.wait(&mut history);
        }
        tracing::debug!(position = history.cursor, "stepped forward");
        history.current()
    }

    /// Move back one snapshot; never executes anything
    pub fn step_back(&mut self) -> Arc<VmState> {
        let mut history = self.shared.history.lock();
        history.cursor = history.cursor.saturating_sub(1);
        history.current()
    }

    /// Run to completion, recording every instruction on the way
    pub fn continue_(&mut self) -> Arc<VmState> {
        let shared = &self.shared;
        let mut history = shared.history.lock();
        if !history.done {
            history.permits = usize::MAX;
            shared.changed.notify_all();
            while !history.done {
                shared.changed.wait(&mut history);
            }
        }
        history.cursor = history.snapshots.len() - 1;
        tracing::debug!(snapshots = history.snapshots.len(), "continued to end");
        history.current()
    }

    /// Discard the VM and its history and start over on the same program
    pub fn reset(&mut self) -> VesperResult<()> {
        self.shutdown();
        tracing::debug!("controller reset");
        self.start()
    }

    pub fn current(&self) -> Arc<VmState> {
        self.shared.history.lock().current()
    }

    pub fn snapshot(&self, index: usize) -> Option<Arc<VmState>> {
        self.shared.history.lock().snapshots.get(index).cloned()
    }

    /// (cursor, number of recorded snapshots)
    pub fn position(&self) -> (usize, usize) {
        let history = self.shared.history.lock();
        (history.cursor, history.snapshots.len())
    }

    pub fn history_len(&self) -> usize {
        self.shared.history.lock().snapshots.len()
    }

    /// The VM has run to completion or failed
    pub fn is_done(&self) -> bool {
        self.shared.history.lock().done
    }

    /// Fault that ended the run, if any
    pub fn error(&self) -> Option<VesperError> {
        self.shared.history.lock().error.clone()
    }

    pub fn program(&self) -> &Arc<CompiledProgram> {
        &self.program
    }

    /// Halt a parked worker and wait for its thread to exit
    fn shutdown(&mut self) {
        {
            let mut history = self.shared.history.lock();
            history.aborted = true;
            self.shared.changed.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("vm thread panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
