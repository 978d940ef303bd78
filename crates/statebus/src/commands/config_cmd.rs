//! `statebus config`: inspect the effective configuration.

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(command: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            let config = statebus_config::load_config(global.config.as_deref())?;
            output::print_output(config.to_toml()?.trim_end());
        }
        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(statebus_config::config_path);
            output::print_output(&path.display().to_string());
        }
    }
    Ok(())
}
