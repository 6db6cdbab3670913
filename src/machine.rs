//! # machine
//!
//! The capability surface this crate needs from a CHIP-8-class interpreter.
//! The interpreter itself (decode, execute, registers, stack, memory, timers)
//! lives on the other side of this trait; the drive layer never looks inside.
//!
//! Destroying an instance is `Drop`. A `FrameBufferView` borrows the machine,
//! so it cannot outlive the instance that backs it, and it has to be fetched
//! again after every `&mut` call that might move the backing memory.
use crate::error::{DriveError, ExecutionFault, LoadError};
use crate::keypad::KeySymbol;

/// one executed instruction word
pub type Opcode = u16;

/// A stepped virtual machine with a 16-key keypad, a monochrome display and
/// a tone flag.
pub trait VirtualMachine {
    /// resolve `name` and load it as the running program
    fn load_program(&mut self, name: &str) -> Result<(), LoadError>;

    /// set one keypad symbol; the machine applies it on its next step
    fn set_key(&mut self, key: KeySymbol, pressed: bool);

    /// count the delay and sound timers down by `elapsed_ms`
    fn advance_timers(&mut self, elapsed_ms: f64);

    /// execute a single instruction and return its opcode. `completed` of the
    /// returned fault is filled in by the caller.
    fn step(&mut self) -> Result<Opcode, ExecutionFault>;

    /// is the sound timer currently running
    fn is_sound_active(&self) -> bool;

    /// borrow the current display memory
    fn framebuffer(&self) -> FrameBufferView<'_>;

    /// copy out the register file
    fn registers(&self) -> RegisterSnapshot;
}

/// Creates machine instances. Each call returns an independent, freshly reset
/// instance.
pub trait MachineFactory {
    type Machine: VirtualMachine;

    fn create(&mut self) -> Result<Self::Machine, DriveError>;
}

/// read-only view of `width * height` display cells, one byte per cell,
/// non-zero meaning lit
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferView<'a> {
    cells: &'a [u8],
    width: usize,
    height: usize,
}

impl<'a> FrameBufferView<'a> {
    /// `None` when `cells` does not hold exactly `width * height` bytes
    pub fn new(cells: &'a [u8], width: usize, height: usize) -> Option<Self> {
        if width.checked_mul(height)? != cells.len() {
            return None;
        }
        Some(FrameBufferView {
            cells,
            width,
            height,
        })
    }

    pub fn empty() -> Self {
        FrameBufferView {
            cells: &[],
            width: 0,
            height: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &'a [u8] {
        self.cells
    }
}

/// point-in-time copy of the register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub v: [u8; 16],
    pub i: u16,
    pub program_counter: u16,
    pub stack_pointer: u16,
    pub delay_timer: u8,
    pub sound_timer: u8,
}
