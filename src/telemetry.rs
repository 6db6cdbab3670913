use crate::machine::{Opcode, RegisterSnapshot, VirtualMachine};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_DEPTH: usize = 10;

/// last few executed opcodes, newest tick first
#[derive(Debug, Clone)]
pub struct InstructionHistory {
    entries: VecDeque<Opcode>,
    depth: usize,
}

impl InstructionHistory {
    pub fn new(depth: usize) -> Self {
        InstructionHistory {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Put a tick's opcodes in front of the older entries, keeping their
    /// execution order, then cut back to `depth`. A batch longer than
    /// `depth` keeps its first `depth` opcodes.
    pub fn record(&mut self, executed: &[Opcode]) {
        let batch = &executed[..executed.len().min(self.depth)];
        for &op in batch.iter().rev() {
            self.entries.push_front(op);
        }
        self.entries.truncate(self.depth);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn iter(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.entries.iter().copied()
    }
}

/// Read-only observer of the machine for the debug panel. Nothing in the
/// drive loop reads back from here.
#[derive(Debug, Clone)]
pub struct TelemetrySampler {
    history: InstructionHistory,
    snapshot: Option<RegisterSnapshot>,
}

impl TelemetrySampler {
    pub fn new(depth: usize) -> Self {
        TelemetrySampler {
            history: InstructionHistory::new(depth),
            snapshot: None,
        }
    }

    /// called once per tick after stepping; the previous snapshot is replaced
    pub fn sample(&mut self, machine: &impl VirtualMachine, executed: &[Opcode]) {
        self.history.record(executed);
        self.snapshot = Some(machine.registers());
    }

    /// drop everything from the previous session
    pub fn reset(&mut self) {
        self.history.clear();
        self.snapshot = None;
    }

    pub fn history(&self) -> &InstructionHistory {
        &self.history
    }

    pub fn snapshot(&self) -> Option<&RegisterSnapshot> {
        self.snapshot.as_ref()
    }
}
