//! Checkpoint-based testcase runner

use crate::testcase::{Checkpoint, Testcase};
use crate::X64Error;
use emu_core::cpu_x86_64::Registry;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::{Context, EngineError, FlagSet, HandleSettings, RegisterHandle, StopReason};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Instructions a testcase may execute before it is declared stuck
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// One way the machine state differed from a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Mismatch {
    Register {
        name: String,
        expected: u64,
        actual: u64,
    },
    Memory {
        address: u64,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
    Flags {
        expected: FlagSet,
        actual: FlagSet,
    },
    /// Execution stopped for another reason before reaching the checkpoint
    NotReached { stop: StopReason },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Register {
                name,
                expected,
                actual,
            } => write!(f, "{}: expected {:#x}, got {:#x}", name, expected, actual),
            Mismatch::Memory {
                address,
                expected,
                actual,
            } => write!(
                f,
                "memory at {:#x}: expected {:02X?}, got {:02X?}",
                address, expected, actual
            ),
            Mismatch::Flags { expected, actual } => {
                write!(f, "flags: expected [{}], got [{}]", expected, actual)
            }
            Mismatch::NotReached { stop } => write!(f, "never reached ({:?})", stop),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointResult {
    pub address: u64,
    pub reached: bool,
    pub mismatches: Vec<Mismatch>,
}

impl CheckpointResult {
    pub fn passed(&self) -> bool {
        self.reached && self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub name: String,
    pub checkpoints: Vec<CheckpointResult>,
    /// Instructions executed over the whole testcase
    pub executed: u64,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.checkpoints.iter().all(CheckpointResult::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckpointResult> {
        self.checkpoints.iter().filter(|c| !c.passed())
    }
}

/// Runs testcases, each on its own handle
pub struct TestRunner {
    registry: Arc<Registry>,
    step_limit: u64,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_registry(Registry::global())
    }

    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn set_step_limit(&mut self, limit: u64) {
        self.step_limit = limit;
    }

    /// Run `testcase` from a fresh machine and compare every checkpoint
    ///
    /// Checkpoints are visited in order. Once one is not reached, it and
    /// every later checkpoint fail.
    pub fn run(&self, testcase: &Testcase) -> Result<TestReport, X64Error> {
        testcase.validate()?;
        let code = testcase.code.bytes()?;
        let expected = testcase
            .checkpoints
            .iter()
            .map(resolve_registers)
            .collect::<Result<Vec<_>, _>>()?;

        let mut context = Context::new(&code);
        for checkpoint in &testcase.checkpoints {
            context.breakpoints.insert(checkpoint.address.0);
        }
        let handle = self.registry.register(
            &format!("test:{}", testcase.name),
            context,
            HandleSettings::NONE,
        );

        let mut results = Vec::with_capacity(testcase.checkpoints.len());
        let mut executed = 0;
        let mut stuck: Option<StopReason> = None;

        for (checkpoint, registers) in testcase.checkpoints.iter().zip(&expected) {
            let address = checkpoint.address.0;
            if let Some(stop) = stuck {
                results.push(unreached(address, stop));
                continue;
            }

            let stop = loop {
                let budget = self.step_limit.saturating_sub(executed);
                if budget == 0 {
                    break StopReason::Step;
                }
                let status = handle.run_for(budget)?;
                executed += status.executed;
                match status.stop {
                    StopReason::Breakpoint(at) if at == address => break status.stop,
                    // Another checkpoint's address; keep going
                    StopReason::Breakpoint(_) => continue,
                    other => break other,
                }
            };

            if stop != StopReason::Breakpoint(address) {
                log(LogCategory::Harness, LogLevel::Info, || {
                    format!("{}: checkpoint {:#x} not reached ({:?})", testcase.name, address, stop)
                });
                stuck = Some(stop);
                results.push(unreached(address, stop));
                continue;
            }

            let mismatches = handle.invoke(|context| compare(context, checkpoint, registers))?;
            log(LogCategory::Harness, LogLevel::Debug, || {
                format!(
                    "{}: checkpoint {:#x} {} mismatches",
                    testcase.name,
                    address,
                    mismatches.len()
                )
            });
            results.push(CheckpointResult {
                address,
                reached: true,
                mismatches,
            });
        }

        let report = TestReport {
            name: testcase.name.clone(),
            checkpoints: results,
            executed,
        };
        log(LogCategory::Harness, LogLevel::Info, || {
            format!(
                "{}: {}",
                report.name,
                if report.passed() { "passed" } else { "FAILED" }
            )
        });
        Ok(report)
    }
}

fn unreached(address: u64, stop: StopReason) -> CheckpointResult {
    CheckpointResult {
        address,
        reached: false,
        mismatches: vec![Mismatch::NotReached { stop }],
    }
}

fn resolve_registers(checkpoint: &Checkpoint) -> Result<Vec<(String, RegisterHandle, u64)>, EngineError> {
    checkpoint
        .registers
        .iter()
        .map(|(name, value)| {
            RegisterHandle::from_name(name)
                .map(|handle| (name.to_ascii_uppercase(), handle, value.0))
                .ok_or_else(|| EngineError::UnknownRegister(name.clone()))
        })
        .collect()
}

fn compare(
    context: &Context,
    checkpoint: &Checkpoint,
    registers: &[(String, RegisterHandle, u64)],
) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    for (name, handle, expected) in registers {
        let actual = handle.fetch(&context.registers);
        let expected = expected & handle.width.mask();
        if actual != expected {
            mismatches.push(Mismatch::Register {
                name: name.clone(),
                expected,
                actual,
            });
        }
    }

    for expectation in &checkpoint.memory {
        // Validated before the run
        let expected = expectation.bytes.bytes().unwrap_or_default();
        let actual = context.memory.dump(expectation.address.0, expected.len());
        if actual != expected {
            mismatches.push(Mismatch::Memory {
                address: expectation.address.0,
                expected,
                actual,
            });
        }
    }

    if !context.flags.equals_or_undefined(&checkpoint.flags) {
        mismatches.push(Mismatch::Flags {
            expected: checkpoint.flags,
            actual: context.flags,
        });
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::{Code, Word};
    use std::collections::BTreeMap;

    fn runner() -> TestRunner {
        TestRunner::with_registry(Registry::new())
    }

    fn checkpoint(address: u64, registers: &[(&str, u64)]) -> Checkpoint {
        Checkpoint {
            address: Word(address),
            registers: registers
                .iter()
                .map(|(n, v)| (n.to_string(), Word(*v)))
                .collect::<BTreeMap<_, _>>(),
            memory: vec![],
            flags: FlagSet::undefined(),
        }
    }

    #[test]
    fn test_passing_testcase() {
        // MOV EAX, 5; ADD EAX, 3
        let testcase = Testcase {
            name: "add".into(),
            code: Code::Hex("B8 05 00 00 00 83 C0 03".into()),
            checkpoints: vec![checkpoint(0x1005, &[("EAX", 5)]), checkpoint(0x1008, &[("RAX", 8)])],
        };
        let report = runner().run(&testcase).unwrap();
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.executed, 2);
    }

    #[test]
    fn test_register_mismatch_is_reported() {
        let testcase = Testcase {
            name: "wrong".into(),
            code: Code::Hex("B0 01 90".into()),
            checkpoints: vec![checkpoint(0x1002, &[("al", 2)])],
        };
        let report = runner().run(&testcase).unwrap();
        assert!(!report.passed());
        assert_eq!(
            report.checkpoints[0].mismatches,
            vec![Mismatch::Register {
                name: "AL".into(),
                expected: 2,
                actual: 1
            }]
        );
    }

    #[test]
    fn test_unreached_checkpoint_fails_the_rest() {
        let testcase = Testcase {
            name: "short".into(),
            code: Code::Hex("90 90".into()),
            checkpoints: vec![checkpoint(0x2000, &[]), checkpoint(0x1001, &[])],
        };
        let report = runner().run(&testcase).unwrap();
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 2);
        assert_eq!(
            report.checkpoints[0].mismatches,
            vec![Mismatch::NotReached {
                stop: StopReason::EndOfCode
            }]
        );
    }

    #[test]
    fn test_endless_loop_hits_step_limit() {
        let mut runner = runner();
        runner.set_step_limit(50);
        let testcase = Testcase {
            name: "spin".into(),
            code: Code::Hex("EB FE 90".into()),
            checkpoints: vec![checkpoint(0x1002, &[])],
        };
        let report = runner.run(&testcase).unwrap();
        assert_eq!(report.executed, 50);
        assert!(!report.checkpoints[0].reached);
    }

    #[test]
    fn test_unknown_register_is_an_error() {
        let testcase = Testcase {
            name: "bad".into(),
            code: Code::Hex("90".into()),
            checkpoints: vec![checkpoint(0x1001, &[("RQX", 0)])],
        };
        assert!(matches!(
            runner().run(&testcase),
            Err(X64Error::Engine(EngineError::UnknownRegister(_)))
        ));
    }

    #[test]
    fn test_memory_and_flag_checks() {
        // MOV BYTE PTR [RIP+0x10], 0x7F; CMP AL, AL
        let mut cp = checkpoint(0x1009, &[]);
        cp.memory.push(crate::testcase::MemoryExpectation {
            address: Word(0x1007 + 0x10),
            bytes: Code::Bytes(vec![0x7F]),
        });
        cp.flags = FlagSet {
            zero: Some(true),
            carry: Some(true),
            ..FlagSet::undefined()
        };
        let testcase = Testcase {
            name: "mem".into(),
            code: Code::Hex("C6 05 10 00 00 00 7F 38 C0".into()),
            checkpoints: vec![cp],
        };
        let report = runner().run(&testcase).unwrap();
        let mismatches = &report.checkpoints[0].mismatches;
        assert_eq!(mismatches.len(), 1);
        assert!(matches!(mismatches[0], Mismatch::Flags { .. }));
    }
}
