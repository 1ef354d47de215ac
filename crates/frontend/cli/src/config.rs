use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine log level applied to every category
    pub log_level: String,
    /// Maximum engine log messages per second per category
    pub rate_limit: usize,
    /// Fault on reads of unmapped memory
    pub strict_memory: bool,
    /// Instruction budget for `run` and each testcase
    pub max_steps: u64,
    /// Breakpoints set before every `run`, as decimal or 0x hex
    pub breakpoints: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "off".to_string(),
            rate_limit: 60,
            strict_memory: false,
            max_steps: emu_x64::DEFAULT_STEP_LIMIT,
            breakpoints: Vec::new(),
        }
    }
}

impl Settings {
    /// `x64emu.json` next to the executable
    pub fn default_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("x64emu.json");
        path
    }

    /// Load settings from `path`, falling back to defaults on error
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            // Missing file: first run
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
