mod config;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use config::Settings;
use emu_core::cpu_x86_64::LineInfo;
use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use emu_core::{Context, RegisterHandle, Status, StopReason, Width};
use emu_x64::{parse_hex, parse_u64, Disassembler, TestRunner, Testcase, Vm};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "x64emu", version, about = "x86-64 user-mode emulator")]
struct Cli {
    /// Settings file (default: x64emu.json next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine log level for every category: off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Engine log level for instruction execution only
    #[arg(long, global = true)]
    log_cpu: Option<String>,

    /// Write engine logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program and dump the machine state
    Run {
        file: PathBuf,

        /// The file holds hex text instead of raw bytes
        #[arg(long)]
        hex: bool,

        /// Stop at this address (decimal or 0x hex); may be repeated
        #[arg(long = "break", value_name = "ADDR")]
        breakpoints: Vec<String>,

        /// Execute at most this many instructions
        #[arg(long)]
        steps: Option<u64>,

        /// Fault on reads of unmapped memory
        #[arg(long)]
        strict: bool,

        /// Resume from a machine state saved with --save
        #[arg(long, value_name = "STATE")]
        load: Option<PathBuf>,

        /// Write the final machine state to this file as JSON
        #[arg(long, value_name = "STATE")]
        save: Option<PathBuf>,
    },
    /// Print the disassembly of a program
    Disasm {
        file: PathBuf,

        #[arg(long)]
        hex: bool,
    },
    /// Run JSON testcases and report mismatches
    Test {
        #[arg(required = true)]
        testcases: Vec<PathBuf>,
    },
    /// Show or save the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Save,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&config_path);
    configure_logging(&cli, &settings)?;

    match cli.command {
        Command::Run {
            file,
            hex,
            breakpoints,
            steps,
            strict,
            load,
            save,
        } => {
            let code = load_program(&file, hex)?;
            let vm = Vm::new(&code);
            if let Some(path) = &load {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                vm.load_state(&serde_json::from_str(&text)?)?;
            }
            vm.set_strict(strict || settings.strict_memory)?;

            let mut addresses = BTreeSet::new();
            for text in settings.breakpoints.iter().chain(&breakpoints) {
                addresses.insert(
                    parse_u64(text).with_context(|| format!("Bad breakpoint '{}'", text))?,
                );
            }
            // A loaded state may already carry some of them
            let existing = vm.breakpoints()?;
            for address in addresses.difference(&existing.into_iter().collect()) {
                vm.toggle_breakpoint(*address)?;
            }

            let status = vm.run_for(steps.unwrap_or(settings.max_steps))?;
            print_state(&vm, &status)?;
            if let Some(path) = &save {
                fs::write(path, serde_json::to_string_pretty(&vm.save_state()?)?)?;
                log::info!("Saved machine state to {}", path.display());
            }
        }
        Command::Disasm { file, hex } => {
            let code = load_program(&file, hex)?;
            let context = Context::new(&code);
            let listing = Disassembler::new(&context)?;
            for line in listing.lines(context.instruction_pointer) {
                let start = (line.address - context.memory.entry_point()) as usize;
                let bytes = code
                    .get(start..start + line.length as usize)
                    .unwrap_or_default();
                let marker = if line.info.contains(LineInfo::INVALID) {
                    "!"
                } else {
                    " "
                };
                println!(
                    "{:08X}:{}{:<30} {}",
                    line.address,
                    marker,
                    hex_bytes(bytes),
                    line.text()
                );
            }
        }
        Command::Test { testcases } => {
            let mut runner = TestRunner::new();
            runner.set_step_limit(settings.max_steps);

            let mut failed = 0;
            for path in &testcases {
                if !run_testcase(&runner, path) {
                    failed += 1;
                }
            }
            println!(
                "{} passed, {} failed",
                testcases.len() - failed,
                failed
            );
            if failed > 0 {
                bail!("{} testcase(s) failed", failed);
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            ConfigAction::Save => {
                settings.save(&config_path)?;
                log::info!("Saved settings to {}", config_path.display());
            }
        },
    }

    Ok(())
}

fn configure_logging(cli: &Cli, settings: &Settings) -> Result<()> {
    let config = LogConfig::global();
    config.set_global_level(parse_level(
        cli.log_level.as_deref().unwrap_or(&settings.log_level),
    )?);
    config.set_rate_limit(settings.rate_limit);
    if let Some(level) = &cli.log_cpu {
        config.set_level(LogCategory::Cpu, parse_level(level)?);
    }
    if let Some(path) = &cli.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("Cannot open log file {}", path.display()))?;
    }
    Ok(())
}

fn parse_level(text: &str) -> Result<LogLevel> {
    match LogLevel::from_str(text) {
        Some(level) => Ok(level),
        None => bail!("Unknown log level '{}'", text),
    }
}

/// Read a program as raw bytes, or as hex text with `--hex` or a `.hex` extension
fn load_program(path: &Path, hex: bool) -> Result<Vec<u8>> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_hex = hex
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));
    let code = if is_hex {
        let text = String::from_utf8(raw)
            .with_context(|| format!("{} is not hex text", path.display()))?;
        parse_hex(&text)?
    } else {
        raw
    };
    if code.is_empty() {
        bail!("{} contains no code", path.display());
    }
    log::debug!("Loaded {} bytes from {}", code.len(), path.display());
    Ok(code)
}

/// Run one testcase file and print its result; false on any failure
fn run_testcase(runner: &TestRunner, path: &Path) -> bool {
    let report = match Testcase::load(path).and_then(|testcase| runner.run(&testcase)) {
        Ok(report) => report,
        Err(e) => {
            println!("ERROR {}: {}", path.display(), e);
            return false;
        }
    };

    if report.passed() {
        println!("PASS  {} ({} instructions)", report.name, report.executed);
        return true;
    }
    println!("FAIL  {}", report.name);
    for checkpoint in report.failures() {
        for mismatch in &checkpoint.mismatches {
            println!("      {:#x}: {}", checkpoint.address, mismatch);
        }
    }
    false
}

fn print_state(vm: &Vm, status: &Status) -> Result<()> {
    let values = vm.registers(Width::Qword)?;
    for row in (0..16u8).collect::<Vec<_>>().chunks(4) {
        let cells: Vec<String> = row
            .iter()
            .map(|&code| {
                format!(
                    "{:>3}={:016X}",
                    RegisterHandle::general(code, Width::Qword).mnemonic(),
                    values[code as usize]
                )
            })
            .collect();
        println!("{}", cells.join("  "));
    }
    println!("RIP={:016X}  [{}]", status.final_instruction_pointer, vm.flags()?);
    println!(
        "{} after {} instructions",
        describe_stop(status.stop),
        status.executed
    );
    if let Some(fault) = status.invalid_opcode {
        log::warn!("{}", fault);
    }
    Ok(())
}

fn describe_stop(stop: StopReason) -> String {
    match stop {
        StopReason::Step => "Instruction budget spent".to_string(),
        StopReason::Breakpoint(address) => format!("Breakpoint at {:#x}", address),
        StopReason::EndOfCode => "End of code".to_string(),
        StopReason::Fault(fault) => format!("Fault: {}", fault),
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use emu_core::Fault;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "x64emu", "run", "prog.bin", "--break", "0x1004", "--break", "4100", "--steps", "10",
            "--save", "state.json",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                breakpoints,
                steps,
                strict,
                hex,
                save,
                ..
            } => {
                assert_eq!(breakpoints, vec!["0x1004", "4100"]);
                assert_eq!(steps, Some(10));
                assert!(!strict);
                assert!(!hex);
                assert_eq!(save, Some(PathBuf::from("state.json")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_test_requires_a_file() {
        assert!(Cli::try_parse_from(["x64emu", "test"]).is_err());
        assert!(Cli::try_parse_from(["x64emu", "--log-level", "debug", "test", "a.json"]).is_ok());
    }

    #[test]
    fn test_load_hex_program() {
        let path = std::env::temp_dir().join(format!("x64emu-load-{}.hex", std::process::id()));
        fs::write(&path, "48 31 C0\nC3\n").unwrap();
        assert_eq!(load_program(&path, false).unwrap(), vec![0x48, 0x31, 0xC0, 0xC3]);
        fs::write(&path, "").unwrap();
        assert!(load_program(&path, false).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_describe_stop() {
        assert_eq!(describe_stop(StopReason::Breakpoint(0x1004)), "Breakpoint at 0x1004");
        let fault = describe_stop(StopReason::Fault(Fault::DivideError { address: 0x1000 }));
        assert!(fault.starts_with("Fault: "));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE").unwrap(), LogLevel::Trace);
        assert!(parse_level("loud").is_err());
    }
}
