//! Pregel-style superstep engine.
//!
//! Execution proceeds in numbered supersteps. Each one:
//!
//! 1. **Plans** - [`algo::prepare_next_tasks`] enumerates Pull tasks
//!    (trigger channels past the node's seen versions) and Push tasks
//!    (pending sends from the previous step).
//! 2. **Executes** - tasks run concurrently under a bounded pool; each
//!    settlement persists its writes as pending writes immediately.
//! 3. **Commits** - [`algo::apply_writes`] merges every write in one
//!    deterministic pass, advances channel versions, and the loop persists
//!    an immutable checkpoint before emitting the step's `values` event.
//!
//! The run ends when a step plans no tasks and no sends are pending.
//! Cycles are fine; the recursion limit bounds runaway graphs. Interrupts
//! (static or dynamic) pause the run between plan and commit so that a
//! later run can pick up exactly where it stopped.

pub mod algo;
pub mod io;
pub mod loop_;
pub mod task;

pub use loop_::{LoopStatus, PregelLoop, RunOutcome};
pub use task::{ExecutableTask, TaskWrites};
