//! Incremental disassembly listing

use crate::X64Error;
use emu_core::cpu_x86_64::{ControlUnit, DisassembledLine, LineInfo, Registry};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::{Context, Handle, HandleSettings};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decoded listing of a context's code, kept in step with edits
///
/// Lines are cached by start address. An edit only re-decodes from the
/// first line it touches until decoding lands on a cached line boundary
/// again past the edited bytes.
pub struct Disassembler {
    handle: Handle,
    lines: BTreeMap<u64, DisassembledLine>,
}

impl Disassembler {
    /// Disassemble a snapshot of `source`
    pub fn new(source: &Context) -> Result<Self, X64Error> {
        Self::with_registry(&Registry::global(), source)
    }

    pub fn with_registry(registry: &Arc<Registry>, source: &Context) -> Result<Self, X64Error> {
        let settings = HandleSettings::DISASSEMBLE | HandleSettings::NOJMP | HandleSettings::NOBREAK;
        let handle = registry.register("disassembler", source.deep_copy(), settings);
        let mut disassembler = Self {
            handle,
            lines: BTreeMap::new(),
        };
        disassembler.rebuild()?;
        Ok(disassembler)
    }

    /// Start over from a new snapshot, e.g. after the program was reflashed
    pub fn reload(&mut self, source: &Context) -> Result<(), X64Error> {
        self.handle.update_context(source.deep_copy())?;
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<(), X64Error> {
        let status = self.handle.invoke(|context| {
            context.instruction_pointer = context.memory.entry_point();
            ControlUnit::new(context, self.handle.settings()).run(false)
        })?;
        self.lines = status
            .decoded_lines
            .into_iter()
            .map(|line| (line.address, line))
            .collect();
        log(LogCategory::Decode, LogLevel::Debug, || {
            format!("Disassembled {} lines", self.lines.len())
        });
        Ok(())
    }

    /// The listing in address order, with the line at `rip` marked
    pub fn lines(&self, rip: u64) -> Vec<DisassembledLine> {
        self.lines
            .values()
            .map(|line| {
                let mut line = line.clone();
                if line.address == rip {
                    line.info.insert(LineInfo::RIP_HERE);
                }
                line
            })
            .collect()
    }

    pub fn line_at(&self, address: u64) -> Option<&DisassembledLine> {
        self.lines.get(&address)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Flip the breakpoint marker on the line starting at `address`
    ///
    /// Returns true if the breakpoint is now set.
    pub fn toggle_breakpoint(&mut self, address: u64) -> Result<bool, X64Error> {
        let set = self
            .handle
            .invoke(|context| context.toggle_breakpoint(address))?;
        if let Some(line) = self.lines.get_mut(&address) {
            if set {
                line.info.insert(LineInfo::BREAKPOINT);
            } else {
                line.info.remove(LineInfo::BREAKPOINT);
            }
        }
        Ok(set)
    }

    /// Write `bytes` at `address` and re-decode the affected lines
    pub fn flash(&mut self, address: u64, bytes: &[u8]) -> Result<(), X64Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        let modified_end = address.saturating_add(bytes.len() as u64);
        let end = self.handle.invoke(|context| {
            context.memory.write(address, bytes);
            context.memory.end()
        })?;

        // Start at the line that contains the first modified byte
        let start = self
            .lines
            .range(..=address)
            .next_back()
            .filter(|(_, line)| line.end() > address)
            .map(|(at, _)| *at)
            .unwrap_or(address);
        let stale: Vec<u64> = self
            .lines
            .range(start..modified_end)
            .map(|(at, _)| *at)
            .collect();
        for at in stale {
            self.lines.remove(&at);
        }

        let mut ip = start;
        let mut decoded = 0;
        while ip < end {
            if ip >= modified_end && self.lines.contains_key(&ip) {
                break;
            }
            let line = match self.decode_at(ip)? {
                Some(line) => line,
                None => break,
            };
            let covered: Vec<u64> = self
                .lines
                .range(ip..line.end())
                .map(|(at, _)| *at)
                .collect();
            for at in covered {
                self.lines.remove(&at);
            }
            ip = line.end();
            self.lines.insert(line.address, line);
            decoded += 1;
        }

        log(LogCategory::Decode, LogLevel::Debug, || {
            format!(
                "Flashed {} bytes at {:#x}; re-decoded {} lines from {:#x}",
                bytes.len(),
                address,
                decoded,
                start
            )
        });
        Ok(())
    }

    fn decode_at(&self, address: u64) -> Result<Option<DisassembledLine>, X64Error> {
        let settings = self.handle.settings();
        let status = self.handle.invoke(|context| {
            context.instruction_pointer = address;
            ControlUnit::new(context, settings).run(true)
        })?;
        Ok(status.decoded_lines.into_iter().next())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disassembler(code: &[u8]) -> Disassembler {
        Disassembler::with_registry(&Registry::new(), &Context::new(code)).unwrap()
    }

    fn texts(d: &Disassembler) -> Vec<(u64, String)> {
        d.lines(0).iter().map(|l| (l.address, l.text())).collect()
    }

    #[test]
    fn test_full_listing() {
        // PUSH RBP; MOV RBP, RSP; RET
        let d = disassembler(&[0x55, 0x48, 0x89, 0xE5, 0xC3]);
        assert_eq!(
            texts(&d),
            vec![
                (0x1000, "PUSH RBP".to_string()),
                (0x1001, "MOV RBP, RSP".to_string()),
                (0x1004, "RET".to_string()),
            ]
        );
    }

    #[test]
    fn test_rip_marker() {
        let d = disassembler(&[0x90, 0x90]);
        let lines = d.lines(0x1001);
        assert!(!lines[0].info.contains(LineInfo::RIP_HERE));
        assert!(lines[1].info.contains(LineInfo::RIP_HERE));
    }

    #[test]
    fn test_toggle_breakpoint_marks_one_line() {
        let mut d = disassembler(&[0x90, 0x90, 0x90]);
        assert!(d.toggle_breakpoint(0x1001).unwrap());
        let marked: Vec<bool> = d
            .lines(0)
            .iter()
            .map(|l| l.info.contains(LineInfo::BREAKPOINT))
            .collect();
        assert_eq!(marked, vec![false, true, false]);

        assert!(!d.toggle_breakpoint(0x1001).unwrap());
        assert!(!d.line_at(0x1001).unwrap().info.contains(LineInfo::BREAKPOINT));
    }

    #[test]
    fn test_flash_same_length_instruction() {
        // NOP; MOV EAX, 1; NOP
        let mut d = disassembler(&[0x90, 0xB8, 0x01, 0x00, 0x00, 0x00, 0x90]);
        d.flash(0x1002, &[0x02]).unwrap();
        assert_eq!(d.line_at(0x1001).unwrap().text(), "MOV EAX, 0x2");
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_flash_resynchronises_after_length_change() {
        // NOP; MOV EAX, 0x90909090; NOP
        let mut d = disassembler(&[0x90, 0xB8, 0x90, 0x90, 0x90, 0x90, 0x90]);
        assert_eq!(d.len(), 3);

        // Turning the MOV opcode into a NOP exposes four more NOPs
        d.flash(0x1001, &[0x90]).unwrap();
        let addresses: Vec<u64> = d.lines(0).iter().map(|l| l.address).collect();
        assert_eq!(addresses, (0x1000..0x1007).collect::<Vec<_>>());
        assert!(d.lines(0).iter().all(|l| l.text() == "NOP"));
    }

    #[test]
    fn test_flash_merges_lines() {
        // Seven NOPs become NOP; MOV EAX, 0x90909090; NOP
        let mut d = disassembler(&[0x90; 7]);
        d.flash(0x1001, &[0xB8]).unwrap();
        assert_eq!(
            texts(&d),
            vec![
                (0x1000, "NOP".to_string()),
                (0x1001, "MOV EAX, 0x90909090".to_string()),
                (0x1006, "NOP".to_string()),
            ]
        );
    }

    #[test]
    fn test_flash_keeps_breakpoint_markers() {
        let mut d = disassembler(&[0x90, 0x90, 0x90]);
        d.toggle_breakpoint(0x1002).unwrap();
        d.flash(0x1002, &[0xC3]).unwrap();
        let line = d.line_at(0x1002).unwrap();
        assert_eq!(line.text(), "RET");
        assert!(line.info.contains(LineInfo::BREAKPOINT));
    }
}
