//! `astrobox config-path` – print where the config file lives.

use anyhow::Result;
use std::path::Path;

pub fn run_config_path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    Ok(())
}
