//! `reflux check`: compile without running.

use anyhow::{Result, anyhow};

use crate::{config::Config, log, runner::check_script, source::FileSource};

pub fn check(config: &Config) -> Result<()> {
    let source = FileSource::new(&config.script);
    check_script(&source).map_err(|e| anyhow!(e))?;
    log!("check"; "{} compiles", config.script_display());
    Ok(())
}
