//! # ffi
//!
//! Binds a CHIP-8 interpreter built as a shared library. The library exports
//! a small C ABI (see `Api`); every instance is an opaque handle that is
//! destroyed exactly once, when its `ForeignMachine` drops.
//!
//! NB. function pointers copied out of the library are only valid while the
//! library stays loaded, so every machine holds its own reference to it.
use crate::error::{DriveError, ExecutionFault, FaultKind, LoadError, LoadFailure};
use crate::keypad::KeySymbol;
use crate::machine::{FrameBufferView, MachineFactory, Opcode, RegisterSnapshot, VirtualMachine};
use libloading::Library;
use std::ffi::{c_char, c_int, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::slice;
use tracing::{debug, info};

/// register file as the library lays it out
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRegisters {
    pub v: [u8; 16],
    pub i: u16,
    pub pc: u16,
    pub sp: u16,
    pub delay_timer: u8,
    pub sound_timer: u8,
}

impl From<RawRegisters> for RegisterSnapshot {
    fn from(raw: RawRegisters) -> Self {
        RegisterSnapshot {
            v: raw.v,
            i: raw.i,
            program_counter: raw.pc,
            stack_pointer: raw.sp,
            delay_timer: raw.delay_timer,
            sound_timer: raw.sound_timer,
        }
    }
}

type Handle = *mut c_void;

/// the exported entry points, copied out of the library once
#[derive(Clone, Copy)]
struct Api {
    create: unsafe extern "C" fn() -> Handle,
    destroy: unsafe extern "C" fn(Handle),
    load_program: unsafe extern "C" fn(Handle, *const c_char) -> c_int,
    set_key: unsafe extern "C" fn(Handle, u8, bool),
    update_timers: unsafe extern "C" fn(Handle, f64),
    execute_instruction: unsafe extern "C" fn(Handle, *mut u16) -> c_int,
    is_sound_active: unsafe extern "C" fn(Handle) -> bool,
    framebuffer: unsafe extern "C" fn(Handle, *mut usize, *mut usize) -> *const u8,
    register_snapshot: unsafe extern "C" fn(Handle, *mut RawRegisters),
}

/// look up one symbol and copy the function pointer out
fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T, DriveError> {
    // SAFETY: `T` is the signature the library's ABI declares for `name`;
    // the copied pointer is only used next to an `Rc<Library>`
    let sym = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|e| DriveError::Create(format!("missing symbol {name}: {e}")))?;
    Ok(*sym)
}

impl Api {
    fn resolve(lib: &Library) -> Result<Api, DriveError> {
        Ok(Api {
            create: symbol(lib, "chip8_create")?,
            destroy: symbol(lib, "chip8_destroy")?,
            load_program: symbol(lib, "chip8_load_program")?,
            set_key: symbol(lib, "chip8_set_key")?,
            update_timers: symbol(lib, "chip8_update_timers")?,
            execute_instruction: symbol(lib, "chip8_execute_instruction")?,
            is_sound_active: symbol(lib, "chip8_is_sound_active")?,
            framebuffer: symbol(lib, "chip8_framebuffer")?,
            register_snapshot: symbol(lib, "chip8_register_snapshot")?,
        })
    }
}

/// a loaded interpreter library; creates `ForeignMachine`s
pub struct ForeignLibrary {
    path: PathBuf,
    api: Api,
    lib: Rc<Library>,
}

impl ForeignLibrary {
    pub fn open(path: &Path) -> Result<ForeignLibrary, DriveError> {
        // SAFETY: loading runs the library's initialisers; we trust the
        // library the user pointed us at
        let lib = unsafe { Library::new(path) }
            .map_err(|e| DriveError::Create(format!("{}: {}", path.display(), e)))?;
        let api = Api::resolve(&lib)?;
        info!(path = %path.display(), "interpreter library loaded");
        Ok(ForeignLibrary {
            path: path.to_path_buf(),
            api,
            lib: Rc::new(lib),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MachineFactory for ForeignLibrary {
    type Machine = ForeignMachine;

    fn create(&mut self) -> Result<ForeignMachine, DriveError> {
        // SAFETY: takes no arguments; a null return is handled below
        let raw = unsafe { (self.api.create)() };
        let raw = NonNull::new(raw)
            .ok_or_else(|| DriveError::Create("chip8_create returned null".into()))?;
        debug!(handle = ?raw, "machine created");
        Ok(ForeignMachine {
            raw,
            api: self.api,
            _lib: Rc::clone(&self.lib),
        })
    }
}

/// one interpreter instance inside the library
pub struct ForeignMachine {
    raw: NonNull<c_void>,
    api: Api,
    _lib: Rc<Library>,
}

impl ForeignMachine {
    fn handle(&self) -> Handle {
        self.raw.as_ptr()
    }
}

impl Drop for ForeignMachine {
    fn drop(&mut self) {
        debug!(handle = ?self.raw, "machine destroyed");
        // SAFETY: the handle came from chip8_create and is destroyed once
        unsafe { (self.api.destroy)(self.handle()) }
    }
}

fn load_failure(status: c_int) -> LoadFailure {
    match status {
        1 => LoadFailure::NotFound,
        2 => LoadFailure::Malformed,
        other => LoadFailure::Status(other),
    }
}

fn fault_kind(status: c_int) -> FaultKind {
    match status {
        1 => FaultKind::InvalidOpcode,
        2 => FaultKind::StackOverflow,
        3 => FaultKind::StackUnderflow,
        other => FaultKind::Other(other),
    }
}

impl VirtualMachine for ForeignMachine {
    fn load_program(&mut self, name: &str) -> Result<(), LoadError> {
        let c_name = CString::new(name).map_err(|e| LoadError {
            name: name.to_string(),
            reason: LoadFailure::BadName(e.to_string()),
        })?;
        // SAFETY: live handle; the string outlives the call
        let status = unsafe { (self.api.load_program)(self.handle(), c_name.as_ptr()) };
        match status {
            0 => Ok(()),
            status => Err(LoadError {
                name: name.to_string(),
                reason: load_failure(status),
            }),
        }
    }

    fn set_key(&mut self, key: KeySymbol, pressed: bool) {
        // SAFETY: live handle; the symbol is always below 16
        unsafe { (self.api.set_key)(self.handle(), key.index(), pressed) }
    }

    fn advance_timers(&mut self, elapsed_ms: f64) {
        // SAFETY: live handle
        unsafe { (self.api.update_timers)(self.handle(), elapsed_ms) }
    }

    fn step(&mut self) -> Result<Opcode, ExecutionFault> {
        let mut opcode: u16 = 0;
        // SAFETY: live handle; `opcode` is a valid out pointer for the call
        let status = unsafe { (self.api.execute_instruction)(self.handle(), &mut opcode) };
        match status {
            0 => Ok(opcode),
            status => Err(ExecutionFault {
                kind: fault_kind(status),
                opcode: Some(opcode),
                completed: 0,
            }),
        }
    }

    fn is_sound_active(&self) -> bool {
        // SAFETY: live handle
        unsafe { (self.api.is_sound_active)(self.handle()) }
    }

    fn framebuffer(&self) -> FrameBufferView<'_> {
        let (mut width, mut height) = (0usize, 0usize);
        // SAFETY: live handle; both out pointers are valid for the call
        let cells = unsafe { (self.api.framebuffer)(self.handle(), &mut width, &mut height) };
        let Some(len) = width.checked_mul(height) else {
            return FrameBufferView::empty();
        };
        if cells.is_null() || len == 0 {
            return FrameBufferView::empty();
        }
        // SAFETY: the library keeps `width * height` bytes at `cells` until
        // the next mutating call; `&self` holds off every such call for as
        // long as the view lives
        let cells = unsafe { slice::from_raw_parts(cells, len) };
        FrameBufferView::new(cells, width, height).unwrap_or_else(FrameBufferView::empty)
    }

    fn registers(&self) -> RegisterSnapshot {
        let mut raw = RawRegisters::default();
        // SAFETY: live handle; `raw` is a valid out pointer for the call
        unsafe { (self.api.register_snapshot)(self.handle(), ptr::addr_of_mut!(raw)) };
        raw.into()
    }
}
