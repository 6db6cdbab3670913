//! # session
//!
//! Owns the one live machine and everything that only makes sense while it
//! lives: its pixel surface, its tick clock, the scratch list of opcodes a
//! tick executed. Starting, switching, pausing and faulting all go through
//! the same teardown: cancel the outstanding frame, then drop the machine.
//! Only after that may a new machine be created, so a frame callback can
//! never land on a machine other than the one that asked for it.
use crate::config::DriveConfig;
use crate::display::{Display, PixelSurface, PresentationBridge};
use crate::error::{DriveError, DriveResult};
use crate::frame::{FrameHost, FrameId};
use crate::keypad::{KeyEdge, KeyRouter, KeySymbol};
use crate::machine::{MachineFactory, Opcode, VirtualMachine};
use crate::scheduler::{CycleScheduler, TickClock, TickReport};
use crate::sound::{AudioGate, DeviceOpener};
use crate::telemetry::TelemetrySampler;
use tracing::{debug, error, info, warn};

/// one program running on one machine instance
pub struct Session<M> {
    machine: M,
    program: String,
    surface: PixelSurface,
    clock: TickClock,
    executed: Vec<Opcode>,
}

impl<M: VirtualMachine> Session<M> {
    fn new(machine: M, program: &str, expected_steps: usize) -> Self {
        let surface = PixelSurface::for_view(&machine.framebuffer());
        Session {
            machine,
            program: program.to_string(),
            surface,
            clock: TickClock::new(),
            executed: Vec::with_capacity(expected_steps),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
}

pub struct SessionManager<F: MachineFactory, H: FrameHost> {
    factory: F,
    frames: H,
    display: Box<dyn Display>,
    gate: AudioGate,
    router: KeyRouter,
    scheduler: CycleScheduler,
    bridge: PresentationBridge,
    telemetry: Option<TelemetrySampler>,
    programs: Vec<String>,
    current_program: Option<String>,
    session: Option<Session<F::Machine>>,
    pending: Option<FrameId>,
    expected_steps: usize,
}

impl<F: MachineFactory, H: FrameHost> SessionManager<F, H> {
    pub fn new(
        config: &DriveConfig,
        factory: F,
        frames: H,
        display: Box<dyn Display>,
        opener: DeviceOpener,
    ) -> Self {
        let expected_steps =
            (config.target_cycles_per_second / config.frame_rate).ceil().max(1.0) as usize * 2;
        SessionManager {
            factory,
            frames,
            display,
            gate: AudioGate::new(opener, config.audio_level, config.audio_ramp_ms),
            router: KeyRouter::new(config.key_layout),
            scheduler: CycleScheduler::new(
                config.target_cycles_per_second,
                config.carry_cycle_remainder,
            ),
            bridge: PresentationBridge::new(config.on_color, config.off_color),
            telemetry: config
                .telemetry
                .then(|| TelemetrySampler::new(config.history_depth)),
            programs: config.programs.clone(),
            current_program: None,
            session: None,
            pending: None,
            expected_steps,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn current_program(&self) -> Option<&str> {
        self.current_program.as_deref()
    }

    pub fn session(&self) -> Option<&Session<F::Machine>> {
        self.session.as_ref()
    }

    pub fn machine(&self) -> Option<&F::Machine> {
        self.session.as_ref().map(|s| &s.machine)
    }

    pub fn machine_mut(&mut self) -> Option<&mut F::Machine> {
        self.session.as_mut().map(|s| &mut s.machine)
    }

    pub fn telemetry(&self) -> Option<&TelemetrySampler> {
        self.telemetry.as_ref()
    }

    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }

    pub fn frames(&self) -> &H {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut H {
        &mut self.frames
    }

    /// Tear down whatever runs now, then run `program` on a brand new
    /// machine. A program that fails to load leaves us stopped.
    pub fn start(&mut self, program: &str) -> DriveResult<()> {
        self.release();
        self.current_program = Some(program.to_string());
        if let Some(t) = self.telemetry.as_mut() {
            t.reset();
        }

        let machine = match self.open(program) {
            Ok(machine) => machine,
            Err(e) => {
                error!("could not start {:?}: {}", program, e);
                self.silence();
                return Err(e);
            }
        };
        self.session = Some(Session::new(machine, program, self.expected_steps));
        self.pending = Some(self.frames.request_frame());
        info!("started {:?}", program);
        Ok(())
    }

    /// programs are never swapped inside a live machine
    pub fn switch_program(&mut self, program: &str) -> DriveResult<()> {
        self.start(program)
    }

    /// the host went away: stop the loop, free the machine, cut the sound
    pub fn pause(&mut self) -> DriveResult<()> {
        self.release();
        self.gate.silence()?;
        info!("paused");
        Ok(())
    }

    /// the host is back: start the last program afresh
    pub fn resume(&mut self) -> DriveResult<()> {
        if self.is_running() {
            return Ok(());
        }
        match self.current_program.clone() {
            Some(program) => self.start(&program),
            None => Ok(()),
        }
    }

    pub fn next_program(&mut self) -> DriveResult<()> {
        self.cycle_program(1)
    }

    pub fn previous_program(&mut self) -> DriveResult<()> {
        self.cycle_program(-1)
    }

    fn cycle_program(&mut self, step: isize) -> DriveResult<()> {
        let n = self.programs.len() as isize;
        if n == 0 {
            return Ok(());
        }
        let at = self
            .current_program
            .as_ref()
            .and_then(|p| self.programs.iter().position(|q| q == p))
            .map_or(if step > 0 { -1 } else { 0 }, |i| i as isize);
        let next = self.programs[(at + step).rem_euclid(n) as usize].clone();
        self.switch_program(&next)
    }

    /// forward a key edge to the live machine, if there is one
    pub fn key(&mut self, key: char, edge: KeyEdge) -> Option<KeySymbol> {
        let session = self.session.as_mut()?;
        self.router.route(&mut session.machine, key, edge)
    }

    /// The frame callback. `frame` has to be the request this manager made
    /// last; anything else belongs to a session that no longer exists.
    pub fn tick(&mut self, frame: FrameId, now: f64) -> DriveResult<TickReport> {
        if self.pending != Some(frame) {
            return Err(DriveError::ResourceStale("frame was not requested by this session"));
        }
        self.pending = None;
        let Some(session) = self.session.as_mut() else {
            return Err(DriveError::ResourceStale("tick without a session"));
        };

        session.executed.clear();
        let report = match self.scheduler.tick(
            &mut session.clock,
            &mut session.machine,
            now,
            &mut session.executed,
        ) {
            Ok(report) => report,
            Err(fault) => {
                if let Some(t) = self.telemetry.as_mut() {
                    t.sample(&session.machine, &session.executed);
                }
                error!("{:?} halted: {}", session.program, fault);
                self.halt();
                return Err(fault.into());
            }
        };

        if report.ran() {
            if let Err(e) = self.finish_tick(now) {
                error!("tick failed: {}", e);
                self.halt();
                return Err(e);
            }
        }

        self.pending = Some(self.frames.request_frame());
        Ok(report)
    }

    /// telemetry, presentation, audio, in that order
    fn finish_tick(&mut self, now: f64) -> DriveResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(DriveError::ResourceStale("tick without a session"))?;

        if let Some(t) = self.telemetry.as_mut() {
            t.sample(&session.machine, &session.executed);
        }

        // fetched fresh every tick, the address may differ from last time
        let view = session.machine.framebuffer();
        self.bridge.present(
            &view,
            &mut session.surface,
            self.display.as_mut(),
            self.telemetry.as_ref(),
        )?;

        self.gate.observe(session.machine.is_sound_active(), now)?;
        Ok(())
    }

    fn open(&mut self, program: &str) -> DriveResult<F::Machine> {
        let mut machine = self.factory.create()?;
        machine.load_program(program)?;
        debug!("loaded {:?}", program);
        Ok(machine)
    }

    /// cancel the outstanding frame, then drop the machine
    fn release(&mut self) {
        if let Some(frame) = self.pending.take() {
            if !self.frames.cancel_frame(frame) {
                warn!(?frame, "outstanding frame could not be cancelled");
            }
        }
        if let Some(session) = self.session.take() {
            debug!("releasing machine for {:?}", session.program);
        }
    }

    fn silence(&mut self) {
        if let Err(e) = self.gate.silence() {
            warn!("could not silence audio: {}", e);
        }
    }

    fn halt(&mut self) {
        self.release();
        self.silence();
    }
}
