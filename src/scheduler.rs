//! Priority-weighted round-robin scheduler.
//!
//! The sort direction below is deliberately preserved rather than "fixed":
//! it sorts ascending by priority, so *lower*-priority tasks are dispatched
//! first. This reads like an inverted comparison, but the observed
//! behavior is kept rather than silently corrected — see `DESIGN.md`.

use std::collections::VecDeque;

pub const KERNEL_PID: u8 = 0;
pub const KERNEL_PRIORITY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub pid: u8,
    pub priority: u8,
    pub program_counter: u32,
    pub time_slice: u32,
    pub time_running: u32,
    pub halted: bool,
}

impl Task {
    fn new(pid: u8, priority: u8, program_counter: u32) -> Self {
        Self {
            pid,
            priority,
            program_counter,
            time_slice: 1,
            time_running: 0,
            halted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumOutcome {
    /// The running task used its whole slice; it rotates to the tail.
    SliceExhausted,
    /// The running task halted and was removed.
    TaskHalted,
    /// The running task yielded voluntarily; it moves to the head.
    Yielded,
    /// The running task stays at the head; it hasn't used its whole slice.
    Running,
    /// Nothing to run: the task queue is empty.
    Idle,
}

/// Drives a bounded set of [`Task`]s one instruction at a time. Holds no
/// interpreter state itself — callers single-step their own `CpuState` and
/// report back via [`Scheduler::record_step`].
pub struct Scheduler {
    tasks: VecDeque<Task>,
    next_pid: u8,
    time_slot: u32,
}

impl Scheduler {
    pub fn new(time_slot: u32) -> Self {
        let mut tasks = VecDeque::new();
        tasks.push_back(Task::new(KERNEL_PID, KERNEL_PRIORITY, 0));
        let mut scheduler = Self {
            tasks,
            next_pid: KERNEL_PID + 1,
            time_slot,
        };
        scheduler.rebalance();
        scheduler
    }

    /// Allocates a PID, records `entry` as the new task's starting program
    /// counter, priority defaulted to 1. Copying
    /// the program bytes into memory is the caller's job (the scheduler
    /// doesn't own a `MemoryBus`).
    ///
    /// Rebalances immediately: the ordering and time slices established
    /// here hold until the task set changes again, not re-derived on every
    /// tick (a resort on every tick would make the ascending priority sort
    /// dominate the rotation below and starve higher-priority tasks
    /// entirely).
    pub fn create_task(&mut self, entry: u32) -> u8 {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1);
        self.tasks.push_back(Task::new(pid, 1, entry));
        self.rebalance();
        pid
    }

    pub fn kill_task(&mut self, pid: u8) {
        self.tasks.retain(|t| t.pid != pid);
        self.rebalance();
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Recomputes every task's `time_slice` from its share of total
    /// priority, then stable-sorts ascending by priority.
    fn rebalance(&mut self) {
        let total: u32 = self.tasks.iter().map(|t| t.priority as u32).sum();
        if total == 0 {
            return;
        }
        for task in self.tasks.iter_mut() {
            let share = (task.priority as u32 * self.time_slot) / total;
            task.time_slice = share.max(1);
        }
        // VecDeque has no in-place stable sort; round-trip through a Vec.
        let mut as_vec: Vec<Task> = self.tasks.drain(..).collect();
        as_vec.sort_by_key(|t| t.priority);
        self.tasks = as_vec.into();
    }

    /// Returns the task that should run next. Ordering reflects the last
    /// rebalance (on construction or the last task-set change), not a
    /// fresh resort: rotation between rebalances is purely `record_step`'s
    /// push-front/push-back bookkeeping.
    pub fn head(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Task> {
        self.tasks.front_mut()
    }

    /// Call after single-stepping the head task's interpreter once.
    /// `halted` reflects whether that step halted the task; `yielded`
    /// reflects a cooperative yield (e.g. a syscall opcode, out of this
    /// core's scope but left as a hook for callers).
    pub fn record_step(&mut self, halted: bool, yielded: bool) -> QuantumOutcome {
        let Some(mut task) = self.tasks.pop_front() else {
            return QuantumOutcome::Idle;
        };

        if halted {
            return QuantumOutcome::TaskHalted;
        }

        task.time_running += 1;

        if yielded {
            task.time_running = 0;
            self.tasks.push_front(task);
            return QuantumOutcome::Yielded;
        }

        if task.time_running >= task.time_slice {
            task.time_running = 0;
            self.tasks.push_back(task);
            QuantumOutcome::SliceExhausted
        } else {
            self.tasks.push_front(task);
            QuantumOutcome::Running
        }
    }
}
