use anyhow::{Context, Result};
use std::path::PathBuf;

use SalvageDB::{Factory, Recovery, RepairConfig};

pub fn exec(path: PathBuf, prepare: bool) -> Result<()> {
    let mut recovery = Recovery::new(RepairConfig::from_env());
    if prepare {
        match recovery
            .prepare_renew(&path)
            .with_context(|| format!("prepare renew for {}", path.display()))?
        {
            Some(p) => println!("Prepared: {}", p.display()),
            None => println!("No material found, nothing prepared."),
        }
        return Ok(());
    }

    let factory = Factory::new(&path);
    let installed = recovery
        .renew(factory.directory())
        .with_context(|| format!("renew {}", factory.directory().display()))?;
    if installed {
        println!("Renewed: {}", path.display());
    } else {
        println!("Nothing to renew for {}", path.display());
    }
    Ok(())
}
