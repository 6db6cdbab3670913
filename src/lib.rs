//! # chip8-drive
//!
//! Drives a CHIP-8 interpreter that lives elsewhere (a shared library, or
//! anything implementing `VirtualMachine`) from a host's frame callback.
//!
//! ## Design
//!
//! * the interpreter is a black box: create, load, key, timers, step, read
//!   the framebuffer, read the sound flag, read registers, destroy
//! * cycles per tick come from wall-clock time, not from the frame rate, so
//!   the program runs at the same speed on a 30Hz or a 144Hz host
//! * abstract display, input and tone output behind traits so the terminal
//!   host can be swapped for another and tests can run headless
//! * exactly one machine at a time; switching programs tears the old one
//!   down before the new one is created
//! * the frame loop is explicit: each tick requests the next frame, and
//!   stopping cancels it
//!
//! Model
//!
//! SessionManager
//!  |-- factory (creates machines), frame host, display, audio gate, config
//!  |-- session(machine, surface, tick clock)   // only while Running
//!  `-- tick(frame, now)
//!       |-- elapsed = now - previous            // first tick: baseline only
//!       |-- machine.advance_timers(elapsed)
//!       |-- step floor(elapsed * rate / 1000) times, collecting opcodes
//!       |-- telemetry.sample(registers, opcodes)
//!       |-- present(framebuffer -> rgba surface -> display)
//!       |-- gate.observe(sound flag)
//!       `-- request the next frame
pub mod config;
pub mod display;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod input;
pub mod keypad;
pub mod machine;
pub mod scheduler;
pub mod session;
pub mod sound;
pub mod telemetry;

#[cfg(test)]
mod testing;
