//! `ghs-maintenance`: the thin command dispatch front-end. Parses the CLI,
//! wires a real [`ghs_git::ShellGit`] to the action named on the command
//! line, and writes the Result JSON the external scheduler reads back. No
//! design of its own lives here; it only adapts
//! `ghs_pack_maintenance::run_action` to argv and a few environment
//! variables, in the manner of `proxmox-restore-daemon`'s `main.rs`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Error};
use log::info;

use ghs_api_types::{ActionOutput, ActionStats};
use ghs_git::ShellGit;
use ghs_pack_maintenance::{run_action, ActionName, RunOptions};

struct Cli {
    verbose: bool,
    sequential_bitmap_generation: bool,
    action: ActionName,
    repository_path: PathBuf,
    output_file: PathBuf,
}

fn default_output_file() -> PathBuf {
    PathBuf::from(format!("/tmp/ghs-action-execution-{}.json", std::process::id()))
}

/// `program [-v] [--sequential-bitmap-generation] <actionName> <repositoryPath> [<outputFile>]`.
/// Flags may appear in any order before `<actionName>`.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, Error> {
    let _argv0 = args.next();

    let mut verbose = false;
    let mut sequential_bitmap_generation = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-v" => verbose = true,
            "--sequential-bitmap-generation" => sequential_bitmap_generation = true,
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let action_name = positional
        .next()
        .ok_or_else(|| anyhow::format_err!("usage: ghs-maintenance [-v] [--sequential-bitmap-generation] <actionName> <repositoryPath> [<outputFile>]"))?;
    let repository_path = positional
        .next()
        .ok_or_else(|| anyhow::format_err!("missing <repositoryPath>"))?;
    let output_file = positional.next().map(PathBuf::from).unwrap_or_else(default_output_file);

    if positional.next().is_some() {
        bail!("too many arguments");
    }

    let action: ActionName = action_name
        .parse()
        .map_err(|err: ghs_pack_maintenance::UnknownActionError| anyhow::format_err!("{err}"))?;

    Ok(Cli {
        verbose,
        sequential_bitmap_generation,
        action,
        repository_path: PathBuf::from(repository_path),
        output_file,
    })
}

/// Translates `LOG_LEVEL_ROOT`/`LOG_LEVEL_JGIT`/`LOG_LEVEL_GHS` into an
/// `env_logger` filter directive string. `ghs_git` stands in for "JGIT" (the
/// contract boundary to the external Git implementation) and
/// `ghs_pack_maintenance` for "GHS" (the core itself).
fn build_log_filter(verbose: bool) -> String {
    let root = std::env::var("LOG_LEVEL_ROOT").unwrap_or_else(|_| "info".to_string());
    let jgit = std::env::var("LOG_LEVEL_JGIT").unwrap_or_else(|_| root.clone());
    let ghs = std::env::var("LOG_LEVEL_GHS").unwrap_or_else(|_| root.clone());

    let mut directive = format!("{root},ghs_git={jgit},ghs_pack_maintenance={ghs}");
    if verbose {
        directive.push_str(",debug");
    }
    directive
}

fn init_logging(verbose: bool) {
    let filter = build_log_filter(verbose);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();
}

/// Microsecond-precision process CPU time via `getrusage(RUSAGE_SELF)`,
/// combining user and system time into one number.
fn cpu_time_ns() -> u64 {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return 0;
        }
        let user_ns = usage.ru_utime.tv_sec as u64 * 1_000_000_000
            + usage.ru_utime.tv_usec as u64 * 1_000;
        let sys_ns = usage.ru_stime.tv_sec as u64 * 1_000_000_000
            + usage.ru_stime.tv_usec as u64 * 1_000;
        user_ns + sys_ns
    }
}

fn main() {
    let cli = match parse_args(std::env::args()) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(-1);
        }
    };

    init_logging(cli.verbose);

    let wall_start = Instant::now();
    let cpu_start = cpu_time_ns();

    info!(
        "running {} on {}",
        cli.action.as_str(),
        cli.repository_path.display()
    );

    let git = ShellGit::new(&cli.repository_path);
    let options = RunOptions {
        single_pack: cli.sequential_bitmap_generation,
    };
    let result = run_action(cli.action, &git, &options);

    let output = ActionOutput {
        action: result,
        stats: ActionStats {
            cpu_time_ns: cpu_time_ns().saturating_sub(cpu_start),
            wall_time_ms: wall_start.elapsed().as_millis() as u64,
        },
    };

    if let Err(err) = write_output(&cli.output_file, &output) {
        eprintln!("error: failed to write result to {}: {err}", cli.output_file.display());
        std::process::exit(-1);
    }

    info!(
        "{} finished: successful={} message={:?}",
        cli.action.as_str(),
        output.action.successful,
        output.action.message
    );
}

fn write_output(path: &std::path::Path, output: &ActionOutput) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(output)?;
    std::fs::write(path, json)?;
    Ok(())
}
