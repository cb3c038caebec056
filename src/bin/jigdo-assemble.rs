//! CLI wrapper for `jigdo_assemble`.
//!
//! This code uses the public crate interface to provide a handy shell
//! command: parse the `.jigdo` manifest, reconstruct the image next to
//! it (or wherever `--output` says), and log progress on `SIGUSR1`.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use jigdo_assemble::fetch::DispatchFetcher;
use jigdo_assemble::progress::ProgressReporter;
use jigdo_assemble::{default_worker_count, jigdo, Reconstructor};
use std::path::PathBuf;
use std::process::ExitCode;

/// Reconstructs a target image from a jigdo template and fetched component files.
#[derive(Parser, Debug)]
#[command(name = "jigdo-assemble", version, about)]
struct Cli {
    /// Path to the `.jigdo` manifest (optionally gzip-compressed).
    jigdo_path: PathBuf,

    /// Output image path [default: the jigdo file's name with its extension stripped]
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Path to the matching `.template` file [default: named by the manifest]
    #[arg(short, long, value_name = "PATH")]
    template: Option<PathBuf>,

    /// Number of concurrent fetch workers [default: number of CPUs]
    #[arg(short = 'j', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Extra `label=url-or-path` mirror to try before the manifest's own servers
    #[arg(short, long = "mirror", value_name = "LABEL=URL")]
    mirrors: Vec<String>,

    /// Additional local directory to search for component files before fetching
    #[arg(short = 'd', long = "local-dir", value_name = "DIR")]
    local_dirs: Vec<PathBuf>,

    /// Does not display progress indication
    #[arg(short, long)]
    quiet: bool,
}

fn parse_mirror(spec: &str) -> Result<(String, String)> {
    let (label, value) = spec
        .split_once('=')
        .with_context(|| format!("mirror {:?} is not in LABEL=URL form", spec))?;
    Ok((label.to_string(), value.to_string()))
}

fn template_path(cli: &Cli, info: &jigdo::JigdoInfo) -> Result<PathBuf> {
    if let Some(path) = &cli.template {
        return Ok(path.clone());
    }
    let name = info
        .template_name
        .as_ref()
        .context("jigdo manifest names no template and --template was not given")?;
    Ok(cli
        .jigdo_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(name))
}

fn output_path(cli: &Cli, info: &jigdo::JigdoInfo) -> PathBuf {
    if let Some(path) = &cli.output {
        return path.clone();
    }
    if let Some(name) = &info.image_filename {
        return cli
            .jigdo_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(name);
    }
    match cli.jigdo_path.file_stem() {
        Some(stem) => cli.jigdo_path.with_file_name(stem),
        None => cli.jigdo_path.with_extension(""),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let (manifest, info) = jigdo::read_jigdo(&cli.jigdo_path)
        .with_context(|| format!("reading {}", cli.jigdo_path.display()))?;
    let extra_mirrors = cli
        .mirrors
        .iter()
        .map(|spec| parse_mirror(spec))
        .collect::<Result<Vec<_>>>()?;

    let template = template_path(&cli, &info)?;
    let output = output_path(&cli, &info);
    let threads = cli.threads.unwrap_or_else(default_worker_count);

    let reconstructor = Reconstructor::open(&template, manifest)
        .with_context(|| format!("reading {}", template.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} reconstructing {} ({} bytes) using {} worker(s)",
            style("==>").green().bold(),
            output.display(),
            reconstructor.image_size(),
            threads
        );
    }

    let fetcher = Box::new(DispatchFetcher::new()?);
    let scheduler = reconstructor.prepare(&output, cli.local_dirs, extra_mirrors, fetcher)?;
    let _reporter = if cli.quiet {
        None
    } else {
        Some(ProgressReporter::spawn(scheduler.clone())?)
    };

    scheduler.run(threads)?;

    if !cli.quiet {
        eprintln!("{} done", style("==>").green().bold());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
