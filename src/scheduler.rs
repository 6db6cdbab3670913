//! # scheduler
//!
//! Turns wall-clock time into work for the machine. Every tick:
//!
//!  1. elapsed = now - previous; nothing happens unless that is positive
//!  2. the machine's timers are advanced by elapsed, once
//!  3. floor(elapsed * rate / 1000) instructions are stepped
//!  4. now becomes the new previous
//!
//! The fractional cycle left over in (3) is normally thrown away, so a loop
//! running at low or uneven frame rates executes slightly fewer cycles than
//! the target over time. `carry_remainder` keeps it instead.
use crate::error::ExecutionFault;
use crate::machine::{Opcode, VirtualMachine};

pub const DEFAULT_CYCLES_PER_SECOND: f64 = 700.0;

/// Per-session timing state. Lives on the session, so a new session always
/// starts without a baseline.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    previous: Option<f64>,
    remainder: f64,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }
}

/// what a tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub elapsed_ms: f64,
    pub cycles: u64,
}

impl TickReport {
    /// false for the baseline tick and for non-positive elapsed time
    pub fn ran(&self) -> bool {
        self.elapsed_ms > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct CycleScheduler {
    cycles_per_second: f64,
    carry_remainder: bool,
}

impl CycleScheduler {
    pub fn new(cycles_per_second: f64, carry_remainder: bool) -> Self {
        CycleScheduler {
            cycles_per_second,
            carry_remainder,
        }
    }

    pub fn cycles_per_second(&self) -> f64 {
        self.cycles_per_second
    }

    /// instruction budget for `elapsed_ms`, updating the carried remainder
    /// when carrying is on
    pub fn budget(&self, clock: &mut TickClock, elapsed_ms: f64) -> u64 {
        let exact = elapsed_ms * self.cycles_per_second / 1000.0;
        if !self.carry_remainder {
            return exact.floor() as u64;
        }
        let total = exact + clock.remainder;
        let whole = total.floor();
        clock.remainder = total - whole;
        whole as u64
    }

    /// Run one tick. Opcodes are appended to `executed`, which the caller
    /// clears. On a fault, stepping stops for this tick and the opcodes that
    /// did execute stay in `executed`.
    pub fn tick(
        &self,
        clock: &mut TickClock,
        machine: &mut impl VirtualMachine,
        now: f64,
        executed: &mut Vec<Opcode>,
    ) -> Result<TickReport, ExecutionFault> {
        let previous = clock.previous.replace(now);
        let elapsed_ms = match previous {
            Some(previous) => now - previous,
            None => 0.0,
        };
        // NB. also rejects NaN
        if !(elapsed_ms > 0.0) {
            return Ok(TickReport {
                elapsed_ms: 0.0,
                cycles: 0,
            });
        }

        machine.advance_timers(elapsed_ms);

        let cycles = self.budget(clock, elapsed_ms);
        for completed in 0..cycles {
            match machine.step() {
                Ok(op) => executed.push(op),
                Err(mut fault) => {
                    fault.completed = completed;
                    return Err(fault);
                }
            }
        }
        tracing::trace!(elapsed_ms, cycles, "tick");
        Ok(TickReport { elapsed_ms, cycles })
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        CycleScheduler::new(DEFAULT_CYCLES_PER_SECOND, false)
    }
}
