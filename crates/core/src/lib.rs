//! x86-64 user-mode instruction engine.
//!
//! [`cpu_x86_64`] holds the machine model and the fetch/decode/execute loop;
//! [`logging`] is the engine-wide logging facility.

pub mod cpu_x86_64;
pub mod logging;

pub use cpu_x86_64::{
    Context, EngineError, Fault, FlagSet, Handle, HandleSettings, MemorySpace, RegisterHandle,
    Status, StopReason, Width,
};
