//! Program execution consumer

use crate::X64Error;
use emu_core::cpu_x86_64::{Registry, RunTask};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::{
    Context, EngineError, FlagSet, Handle, HandleSettings, MemorySpace, RegisterHandle, Status,
    Width,
};
use serde_json::Value;
use std::sync::Arc;

/// A loaded program and the machine running it
pub struct Vm {
    handle: Handle,
    /// Last flashed image, reloaded by `reset`
    image: Vec<u8>,
}

impl Vm {
    /// Load `code` into a fresh machine in the global registry
    pub fn new(code: &[u8]) -> Self {
        Self::with_registry(&Registry::global(), code)
    }

    pub fn with_registry(registry: &Arc<Registry>, code: &[u8]) -> Self {
        let handle = registry.register("vm", Context::new(code), HandleSettings::NONE);
        Self {
            handle,
            image: code.to_vec(),
        }
    }

    /// Replace the program with `code` and start over
    ///
    /// Breakpoints and the strict-memory setting carry over.
    pub fn flash(&mut self, code: &[u8]) -> Result<(), X64Error> {
        self.image = code.to_vec();
        self.reload()
    }

    /// Restart the last flashed program from a fresh machine state
    pub fn reset(&self) -> Result<(), X64Error> {
        self.reload()
    }

    fn reload(&self) -> Result<(), X64Error> {
        let image = &self.image;
        self.handle.invoke(|context| {
            let mut fresh = Context::new(image);
            fresh.memory.set_strict(context.memory.is_strict());
            fresh.breakpoints = std::mem::take(&mut context.breakpoints);
            *context = fresh;
        })?;
        log(LogCategory::Memory, LogLevel::Debug, || {
            format!("Flashed {} bytes into {}", image.len(), self.handle.name())
        });
        Ok(())
    }

    /// Fault on reads of unmapped memory instead of returning zero
    pub fn set_strict(&self, strict: bool) -> Result<(), X64Error> {
        self.handle
            .invoke(|context| context.memory.set_strict(strict))?;
        Ok(())
    }

    /// Add or remove a breakpoint; returns true if it is now set
    pub fn toggle_breakpoint(&self, address: u64) -> Result<bool, X64Error> {
        Ok(self
            .handle
            .invoke(|context| context.toggle_breakpoint(address))?)
    }

    pub fn breakpoints(&self) -> Result<Vec<u64>, X64Error> {
        Ok(self
            .handle
            .invoke(|context| context.breakpoints.iter().copied().collect())?)
    }

    /// Run until a breakpoint, a fault or the end of code
    pub fn run(&self) -> Result<Status, X64Error> {
        Ok(self.handle.run(false)?)
    }

    /// Execute one instruction
    pub fn step(&self) -> Result<Status, X64Error> {
        Ok(self.handle.run(true)?)
    }

    /// Run at most `limit` instructions
    pub fn run_for(&self, limit: u64) -> Result<Status, X64Error> {
        Ok(self.handle.run_for(limit)?)
    }

    /// Run on a worker thread
    pub fn run_async(&self) -> Result<RunTask, X64Error> {
        Ok(self.handle.run_async(false)?)
    }

    /// All sixteen general purpose registers at `width`, in encoding order
    pub fn registers(&self, width: Width) -> Result<[u64; 16], X64Error> {
        Ok(self
            .handle
            .invoke(|context| context.registers.general_at(width))?)
    }

    /// Read a register by Intel name (`RAX`, `r9d`, `AH`, `XMM3`, ...)
    pub fn register(&self, name: &str) -> Result<u64, X64Error> {
        let handle = resolve(name)?;
        Ok(self
            .handle
            .invoke(|context| handle.fetch(&context.registers))?)
    }

    pub fn set_register(&self, name: &str, value: u64) -> Result<(), X64Error> {
        let handle = resolve(name)?;
        self.handle
            .invoke(|context| handle.set(&mut context.registers, value))?;
        Ok(())
    }

    pub fn flags(&self) -> Result<FlagSet, X64Error> {
        Ok(self.handle.flags()?)
    }

    pub fn memory(&self) -> Result<MemorySpace, X64Error> {
        Ok(self.handle.memory()?)
    }

    pub fn instruction_pointer(&self) -> Result<u64, X64Error> {
        Ok(self.handle.invoke(|context| context.instruction_pointer)?)
    }

    /// Deep copy of the whole machine state
    pub fn context(&self) -> Result<Context, X64Error> {
        Ok(self.handle.context()?)
    }

    /// Machine state as JSON, for `load_state` or offline inspection
    pub fn save_state(&self) -> Result<Value, X64Error> {
        Ok(self.handle.invoke(|context| context.save_state())??)
    }

    /// Continue from a state saved by `save_state`
    pub fn load_state(&self, state: &Value) -> Result<(), X64Error> {
        self.handle.invoke(|context| context.load_state(state))??;
        log(LogCategory::Memory, LogLevel::Debug, || {
            format!("Loaded saved state into {}", self.handle.name())
        });
        Ok(())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

fn resolve(name: &str) -> Result<RegisterHandle, EngineError> {
    RegisterHandle::from_name(name).ok_or_else(|| EngineError::UnknownRegister(name.to_string()))
}
