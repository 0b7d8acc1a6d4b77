use super::{GlobalArgs, settings};
use crate::output;
use anyhow::Result;
use clap::Args;
use config::{GlobalConfigStore, storage_config_path};

#[derive(Args)]
pub struct InitArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub fn run(global: &GlobalArgs, args: InitArgs) -> Result<()> {
    let settings = settings(global)?;
    let path = storage_config_path(&settings.data_dir);
    let existed = path.exists();

    let store = GlobalConfigStore::load(&settings.data_dir, settings.environment)?;
    // Loading only writes defaults outside production; init is an explicit
    // request, so persist in every environment.
    if !path.exists() {
        store.save()?;
    }

    if args.json {
        let output = serde_json::json!({
            "path": path.display().to_string(),
            "created": !existed,
            "roots": store.document().roots.len()
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if existed {
        output::info(&format!("{} already exists, left unchanged", path.display()));
    } else {
        output::success(&format!("Initialized storage config at {}", path.display()));
        output::hint("edit the example root and set \"disabled\": false to enable it");
    }
    Ok(())
}
