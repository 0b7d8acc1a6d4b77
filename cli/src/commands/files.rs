use super::{GlobalArgs, open_service};
use crate::output;
use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use std::io::{Read, Write};
use std::path::PathBuf;
use storage::{ChangeOutcome, WriteRequest};

#[derive(Args)]
pub struct LsArgs {
    #[arg(help = "Root prefix")]
    pub prefix: String,

    #[arg(default_value = "", help = "Directory within the root")]
    pub path: String,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

#[derive(Args)]
pub struct CatArgs {
    #[arg(help = "Root prefix")]
    pub prefix: String,

    #[arg(help = "File within the root")]
    pub path: String
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(help = "Root prefix")]
    pub prefix: String,

    #[arg(help = "File within the root")]
    pub path: String,

    #[arg(long, short, help = "Read the body from this file instead of stdin")]
    pub file: Option<PathBuf>,

    #[arg(long, short, help = "Change description for versioned roots")]
    pub message: Option<String>,

    #[arg(long, help = "Mark the write as carrying an image")]
    pub needs_image: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(help = "Root prefix")]
    pub prefix: String,

    #[arg(help = "File within the root")]
    pub path: String,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn ls(global: &GlobalArgs, args: LsArgs) -> Result<()> {
    let service = open_service(global).await?;
    let entries = service.registry().list(&args.prefix, &args.path).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        output::info(&format!("{}/{} is empty", args.prefix, args.path.trim_matches('/')));
    }
    for entry in &entries {
        if entry.is_dir {
            println!("{}/", entry.name.blue().bold());
        } else {
            println!("{:<40} {:>10}", entry.name, entry.size);
        }
    }
    Ok(())
}

pub async fn cat(global: &GlobalArgs, args: CatArgs) -> Result<()> {
    let service = open_service(global).await?;
    let Some(entry) = service.registry().read(&args.prefix, &args.path).await? else {
        bail!("{}/{} not found", args.prefix, args.path.trim_start_matches('/'));
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&entry.body)?;
    stdout.flush()?;
    Ok(())
}

pub async fn put(global: &GlobalArgs, args: PutArgs) -> Result<()> {
    let body = match &args.file {
        Some(file) => std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let service = open_service(global).await?;
    let mut request = WriteRequest::new(args.path.clone(), body).with_needs_image(args.needs_image);
    if let Some(message) = args.message {
        request = request.with_message(message);
    }
    let outcome = service.registry().write(&args.prefix, request).await?;
    report(&args.prefix, &outcome, args.json, "saved")
}

pub async fn rm(global: &GlobalArgs, args: RmArgs) -> Result<()> {
    let service = open_service(global).await?;
    let outcome = service.registry().delete(&args.prefix, &args.path).await?;
    report(&args.prefix, &outcome, args.json, "deleted")
}

fn report(prefix: &str, outcome: &ChangeOutcome, json: bool, verb: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    match outcome {
        ChangeOutcome::Committed { path, revision } => {
            let revision = revision
                .as_deref()
                .map(|r| format!(" at {r}"))
                .unwrap_or_default();
            output::success(&format!("{prefix}/{path} {verb}{revision}"));
        }
        ChangeOutcome::Proposed { path, branch, .. } => {
            output::success(&format!("{prefix}/{path} proposed on branch {branch}"));
            output::hint("open a pull request for the branch to apply the change");
        }
        ChangeOutcome::Missing { path } => {
            output::warn(&format!("{prefix}/{path} does not exist"));
        }
    }
    Ok(())
}
