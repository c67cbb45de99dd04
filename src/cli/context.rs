use std::path::{Path, PathBuf};

use runplane_kernel::Config;

use super::output::OutputFormat;

pub struct CliContext {
    config: Config,
    config_path: Option<PathBuf>,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: Config, config_path: Option<PathBuf>, output: OutputFormat) -> Self {
        Self {
            config,
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }
}
