//! test doubles shared by the unit tests
use crate::display::{Display, DummyDisplay, PixelSurface};
use crate::error::{AudioError, DriveError, ExecutionFault, FaultKind, LoadError, LoadFailure};
use crate::keypad::KeySymbol;
use crate::machine::{FrameBufferView, MachineFactory, Opcode, RegisterSnapshot, VirtualMachine};
use crate::sound::{DeviceOpener, ToneDevice};
use crate::telemetry::TelemetrySampler;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::time::Duration;

pub const TEST_WIDTH: usize = 8;
pub const TEST_HEIGHT: usize = 4;

/// in-memory machine whose behaviour the test sets up by hand
pub struct ScriptedMachine {
    pub id: usize,
    pub keypad: [bool; 16],
    pub key_log: Vec<(u8, bool)>,
    pub timer_calls: Vec<f64>,
    /// steps attempted, including one that faulted
    pub steps: u64,
    /// the step with this index faults
    pub fault_at: Option<(u64, FaultKind)>,
    pub sound_active: bool,
    pub cells: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub registers: RegisterSnapshot,
    pub loaded: Option<String>,
    /// program names that fail to load
    pub missing: Vec<String>,
    /// every timer, step, framebuffer and sound call, in the order made
    pub calls: RefCell<Vec<MachineCall>>,
    events: Option<Rc<RefCell<Vec<MachineEvent>>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineCall {
    Timers(f64),
    Step,
    Framebuffer,
    Sound,
}

impl ScriptedMachine {
    pub fn new() -> Self {
        ScriptedMachine {
            id: 0,
            keypad: [false; 16],
            key_log: Vec::new(),
            timer_calls: Vec::new(),
            steps: 0,
            fault_at: None,
            sound_active: false,
            cells: vec![0; TEST_WIDTH * TEST_HEIGHT],
            width: TEST_WIDTH,
            height: TEST_HEIGHT,
            registers: RegisterSnapshot::default(),
            loaded: None,
            missing: Vec::new(),
            calls: RefCell::new(Vec::new()),
            events: None,
        }
    }

    fn log(&self, event: MachineEvent) {
        if let Some(events) = &self.events {
            events.borrow_mut().push(event);
        }
    }
}

impl VirtualMachine for ScriptedMachine {
    fn load_program(&mut self, name: &str) -> Result<(), LoadError> {
        if self.missing.iter().any(|m| m == name) {
            return Err(LoadError {
                name: name.to_string(),
                reason: LoadFailure::NotFound,
            });
        }
        self.loaded = Some(name.to_string());
        self.log(MachineEvent::Loaded(self.id, name.to_string()));
        Ok(())
    }

    fn set_key(&mut self, key: KeySymbol, pressed: bool) {
        self.keypad[key.index() as usize] = pressed;
        self.key_log.push((key.index(), pressed));
    }

    fn advance_timers(&mut self, elapsed_ms: f64) {
        self.timer_calls.push(elapsed_ms);
        self.calls.borrow_mut().push(MachineCall::Timers(elapsed_ms));
    }

    fn step(&mut self) -> Result<Opcode, ExecutionFault> {
        let index = self.steps;
        self.steps += 1;
        self.calls.borrow_mut().push(MachineCall::Step);
        match self.fault_at {
            Some((at, kind)) if at == index => Err(ExecutionFault {
                kind,
                opcode: None,
                completed: 0,
            }),
            _ => Ok(0x1000 | (index as u16 & 0x0fff)),
        }
    }

    fn is_sound_active(&self) -> bool {
        self.calls.borrow_mut().push(MachineCall::Sound);
        self.sound_active
    }

    fn framebuffer(&self) -> FrameBufferView<'_> {
        self.calls.borrow_mut().push(MachineCall::Framebuffer);
        FrameBufferView::new(&self.cells, self.width, self.height)
            .unwrap_or_else(FrameBufferView::empty)
    }

    fn registers(&self) -> RegisterSnapshot {
        self.registers
    }
}

impl Drop for ScriptedMachine {
    fn drop(&mut self) {
        self.log(MachineEvent::Destroyed(self.id));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    Created(usize),
    Loaded(usize, String),
    Destroyed(usize),
}

/// hands out numbered `ScriptedMachine`s and logs their lifetimes
pub struct RecordingFactory {
    pub events: Rc<RefCell<Vec<MachineEvent>>>,
    pub missing: Vec<String>,
    pub fail_create: bool,
    next_id: usize,
}

impl RecordingFactory {
    pub fn new() -> Self {
        RecordingFactory {
            events: Rc::new(RefCell::new(Vec::new())),
            missing: Vec::new(),
            fail_create: false,
            next_id: 1,
        }
    }
}

/// ids of machines created and not yet destroyed
pub fn live_machines(events: &RefCell<Vec<MachineEvent>>) -> Vec<usize> {
    let mut live = Vec::new();
    for e in events.borrow().iter() {
        match e {
            MachineEvent::Created(id) => live.push(*id),
            MachineEvent::Destroyed(id) => live.retain(|l| l != id),
            MachineEvent::Loaded(..) => {}
        }
    }
    live
}

impl MachineFactory for RecordingFactory {
    type Machine = ScriptedMachine;

    fn create(&mut self) -> Result<ScriptedMachine, DriveError> {
        if self.fail_create {
            return Err(DriveError::Create("refused".into()));
        }
        let mut m = ScriptedMachine::new();
        m.id = self.next_id;
        m.missing = self.missing.clone();
        m.events = Some(Rc::clone(&self.events));
        self.next_id += 1;
        m.log(MachineEvent::Created(m.id));
        Ok(m)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToneCall {
    Ramp(f32, Duration),
    Silence,
}

struct RecordingTone {
    log: Rc<RefCell<Vec<ToneCall>>>,
}

impl ToneDevice for RecordingTone {
    fn ramp_to(&mut self, level: f32, time_constant: Duration) -> Result<(), AudioError> {
        self.log.borrow_mut().push(ToneCall::Ramp(level, time_constant));
        Ok(())
    }

    fn silence(&mut self) -> Result<(), AudioError> {
        self.log.borrow_mut().push(ToneCall::Silence);
        Ok(())
    }
}

/// opener for a tone device that records its calls, plus a count of opens
pub fn recording_opener() -> (DeviceOpener, Rc<RefCell<Vec<ToneCall>>>, Rc<Cell<usize>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let opens = Rc::new(Cell::new(0));
    let (l, o) = (Rc::clone(&log), Rc::clone(&opens));
    let opener: DeviceOpener = Box::new(move || {
        o.set(o.get() + 1);
        Ok(Box::new(RecordingTone { log: Rc::clone(&l) }) as Box<dyn ToneDevice>)
    });
    (opener, log, opens)
}

/// display whose frames the test can still look at after handing it over
#[derive(Clone)]
pub struct SharedDisplay(pub Rc<RefCell<DummyDisplay>>);

impl SharedDisplay {
    pub fn new() -> Self {
        SharedDisplay(Rc::new(RefCell::new(DummyDisplay::new())))
    }

    pub fn frames(&self) -> usize {
        self.0.borrow().frames
    }

    pub fn last(&self) -> Vec<u8> {
        self.0.borrow().last.clone()
    }
}

impl Display for SharedDisplay {
    fn present(
        &mut self,
        surface: &PixelSurface,
        telemetry: Option<&TelemetrySampler>,
    ) -> Result<(), io::Error> {
        self.0.borrow_mut().present(surface, telemetry)
    }
}
