use super::{GlobalArgs, settings};
use crate::output;
use anyhow::{Result, bail};
use clap::Args;
use config::{Environment, load_storage_config, storage_config_path};

#[derive(Args)]
pub struct ValidateArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub fn run(global: &GlobalArgs, args: ValidateArgs) -> Result<()> {
    let settings = settings(global)?;
    let path = storage_config_path(&settings.data_dir);
    // Defaults are applied in memory only; validating never writes the file.
    let document = load_storage_config(&settings.data_dir, Environment::Production)?;

    let mut problems: Vec<String> = Vec::new();
    if let Err(e) = document.validate_roots() {
        problems.push(e.to_string());
    }
    for root in &document.roots {
        if root.kind().is_none() {
            problems.push(format!(
                "root '{}': unsupported storage type: {}",
                root.prefix,
                root.kind_name()
            ));
        } else if let Err(e) = root.validate_all() {
            problems.push(format!("root '{}': {}", root.prefix, e));
        }
    }

    if args.json {
        let output = serde_json::json!({
            "path": path.display().to_string(),
            "roots": document.roots.len(),
            "valid": problems.is_empty(),
            "problems": problems
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if problems.is_empty() {
        output::success(&format!(
            "{} is valid ({} roots)",
            path.display(),
            document.roots.len()
        ));
    } else {
        for problem in &problems {
            output::error(problem);
        }
    }

    if !problems.is_empty() {
        bail!("{} problem(s) found in {}", problems.len(), path.display());
    }
    Ok(())
}
