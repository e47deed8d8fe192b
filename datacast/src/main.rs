mod output;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{ArgAction, Parser, Subcommand};
use datacast_core::{
    CastFailure, CastPaths, Caster, CountSnapshot, CounterState, Recipe, RecipeOptions,
    RecipeRegistry, Settings, TreeCounter, cleanup_stale_staging_dirs,
};
use output::{CastOutput, GuessOutput, OutputWriter, RecipeInfo, RecipeListOutput};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_SUCCESS: u8 = 0;
const EXIT_PARTIAL: u8 = 1;
const EXIT_FATAL: u8 = 2;

/// Datacast - Cast raw experiment data to a target directory
#[derive(Parser)]
#[command(name = "datacast")]
#[command(about = "Recipe-driven, hash-verified transfer of experiment data", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to DATACAST_CONFIG env var)
    #[arg(short, long, global = true, env = "DATACAST_CONFIG")]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert and transfer a raw data directory
    Cast {
        /// Raw data directory
        raw: PathBuf,

        /// Target directory (created if missing)
        target: PathBuf,

        /// Recipe name, case-insensitive (defaults to DATACAST_RECIPE env var)
        #[arg(short, long, env = "DATACAST_RECIPE", default_value = "CatchAll")]
        recipe: String,

        /// Recipe options as comma-separated key=value pairs
        #[arg(short, long, default_value = "")]
        options: String,

        /// Write failed paths and their errors to this file
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// List available recipes
    ListRecipes,

    /// Suggest the recipe that finds the most datasets
    Guess {
        /// Raw data directory
        raw: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output.write_error(&e, EXIT_FATAL);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: Cli, output: &OutputWriter) -> Result<u8> {
    let settings = load_settings(cli.config.as_deref())?;
    let registry = RecipeRegistry::with_builtins();

    match cli.command {
        Commands::Cast {
            raw,
            target,
            recipe,
            options,
            dump,
        } => cmd_cast(
            &registry,
            &settings,
            output,
            CastArgs {
                raw: &raw,
                target: &target,
                recipe: &recipe,
                options: &options,
                dump: dump.as_deref(),
            },
        ),
        Commands::ListRecipes => cmd_list_recipes(&registry, output),
        Commands::Guess { raw } => cmd_guess(&registry, output, &raw),
    }
}

/// Log filter: `-v` wins over `RUST_LOG`, which wins over the default.
fn log_filter(verbose: u8) -> EnvFilter {
    match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    }
}

fn init_logging(verbose: u8) {
    tracing_subscriber::registry()
        .with(log_filter(verbose))
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_settings(config: Option<&Path>) -> Result<Settings> {
    match config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

struct CastArgs<'a> {
    raw: &'a Path,
    target: &'a Path,
    recipe: &'a str,
    options: &'a str,
    dump: Option<&'a Path>,
}

fn cmd_cast(
    registry: &RecipeRegistry,
    settings: &Settings,
    output: &OutputWriter,
    args: CastArgs<'_>,
) -> Result<u8> {
    let paths = CastPaths::new(args.raw, args.target).with_context(|| "Invalid cast paths")?;
    let entry = registry.get(args.recipe)?;
    let recipe: Arc<dyn Recipe> = Arc::from(
        entry
            .instantiate(&paths)
            .with_context(|| format!("Failed to set up recipe {}", entry.name))?,
    );
    let options = RecipeOptions::parse(recipe.options(), args.options)
        .with_context(|| format!("Invalid options for recipe {}", entry.name))?;

    if let Err(e) = cleanup_stale_staging_dirs(settings.staging_base.as_deref()) {
        warn!(error = %e, "could not clean up stale staging areas");
    }

    let show_progress = !output.is_json() && atty::is(atty::Stream::Stderr);
    let counter = TreeCounter::new();
    if show_progress {
        counter
            .watch(Arc::clone(&recipe))
            .with_context(|| "Failed to start progress counter")?;
    }

    let mut done = 0u64;
    let cast = Caster::new(recipe.as_ref(), settings).cast_with_progress(&options, |files| {
        done += 1;
        if show_progress {
            print_progress(done, counter.snapshot(), files);
        }
    });
    counter.reset();
    if show_progress {
        eprintln!();
    }
    let result = cast.with_context(|| format!("Cast aborted, target {} is incomplete", paths.target_root().display()))?;

    let dump = match args.dump {
        Some(path) if !result.success => {
            write_dump(path, entry.name, &result.errors)
                .with_context(|| format!("Failed to write dump file {}", path.display()))?;
            Some(path.display().to_string())
        }
        _ => None,
    };

    let result_code = if result.success { EXIT_SUCCESS } else { EXIT_PARTIAL };
    let data = CastOutput {
        success: result.success,
        result_code,
        recipe: entry.name.to_string(),
        raw: paths.raw_root().display().to_string(),
        target: paths.target_root().display().to_string(),
        finished_at: Utc::now(),
        stats: result.stats,
        errors: result.errors.clone(),
        dump: dump.clone(),
    };

    output.write(&data, || {
        let mut text = String::new();
        let stats = &result.stats;
        if result.success {
            let _ = writeln!(text, "Success");
        } else {
            let _ = writeln!(text, "Failed to cast {} dataset(s):", result.errors.len());
            for failure in &result.errors {
                let _ = writeln!(text, "  {}", failure.path.display());
            }
            match &dump {
                Some(path) => {
                    let _ = writeln!(text, "Details written to {}", path);
                }
                None => {
                    let _ = writeln!(text, "Use --dump FILE to write the error details");
                }
            }
        }
        let _ = writeln!(
            text,
            "{} dataset(s) converted, {} file(s) passed through, {} copied, {} unchanged ({} bytes)",
            stats.datasets_converted,
            stats.files_passed_through,
            stats.files_copied,
            stats.files_unchanged,
            stats.bytes_copied
        );
        text
    })?;

    Ok(result_code)
}

fn print_progress(done: u64, snapshot: CountSnapshot, files: &[PathBuf]) {
    let total = match snapshot.state {
        CounterState::Done => snapshot.objects.max(done).to_string(),
        _ => "?".to_string(),
    };
    let name = files
        .first()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stderr = io::stderr();
    let _ = write!(stderr, "\r\x1b[2K{}/{} {}", done, total, name);
    let _ = stderr.flush();
}

/// Write `PATH <path>:` followed by the error for every failure.
fn write_dump(path: &Path, recipe: &str, failures: &[CastFailure]) -> Result<()> {
    fs::write(path, render_dump(recipe, failures))?;
    Ok(())
}

fn render_dump(recipe: &str, failures: &[CastFailure]) -> String {
    let mut text = format!(
        "# datacast {} dump, recipe {}, {}\n\n",
        env!("CARGO_PKG_VERSION"),
        recipe,
        Local::now().to_rfc3339()
    );
    for failure in failures {
        let _ = write!(text, "PATH {}:\n{}\n\n", failure.path.display(), failure.error);
    }
    text
}

fn cmd_list_recipes(registry: &RecipeRegistry, output: &OutputWriter) -> Result<u8> {
    let recipes: Vec<RecipeInfo> = registry
        .entries()
        .iter()
        .map(|entry| RecipeInfo {
            name: entry.name.to_string(),
            description: entry.description.to_string(),
        })
        .collect();

    let data = RecipeListOutput {
        success: true,
        result_code: EXIT_SUCCESS,
        recipes: recipes.clone(),
    };
    output.write(&data, || {
        let width = recipes.iter().map(|r| r.name.len()).max().unwrap_or(0);
        recipes
            .iter()
            .map(|r| format!("{:width$}  {}\n", r.name, r.description, width = width))
            .collect()
    })?;
    Ok(EXIT_SUCCESS)
}

fn cmd_guess(registry: &RecipeRegistry, output: &OutputWriter, raw: &Path) -> Result<u8> {
    let raw = fs::canonicalize(raw)
        .with_context(|| format!("Invalid raw data path {}", raw.display()))?;
    // Enumeration never writes, so any target outside the raw tree will do.
    let sibling = raw.with_extension("datacast-guess");
    let paths = CastPaths::new(&raw, &sibling).with_context(|| "Invalid raw data path")?;

    let scores = registry.scores(&paths);
    let recipe = registry.guess(&paths).map(|entry| entry.name.to_string());
    let result_code = if recipe.is_some() { EXIT_SUCCESS } else { EXIT_FATAL };

    let data = GuessOutput {
        success: recipe.is_some(),
        result_code,
        recipe: recipe.clone(),
        scores: scores.clone(),
    };
    output.write(&data, || match &recipe {
        Some(name) => {
            let mut text = format!("{}\n", name);
            for score in &scores {
                let _ = writeln!(text, "  {}: {} dataset(s)", score.name, score.datasets);
            }
            text
        }
        None => "No recipes registered\n".to_string(),
    })?;
    Ok(result_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cast() {
        let cli = Cli::try_parse_from([
            "datacast",
            "cast",
            "raw",
            "target",
            "-r",
            "catchall",
            "-o",
            "wavelength=984e-9,pixel_size=1.2e-6",
            "--dump",
            "dump.txt",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Cast {
                raw,
                recipe,
                options,
                dump,
                ..
            } => {
                assert_eq!(raw, PathBuf::from("raw"));
                assert_eq!(recipe, "catchall");
                assert_eq!(options, "wavelength=984e-9,pixel_size=1.2e-6");
                assert_eq!(dump, Some(PathBuf::from("dump.txt")));
            }
            _ => panic!("expected cast"),
        }
    }

    #[test]
    fn test_render_dump() {
        let failures = vec![
            CastFailure {
                path: PathBuf::from("/raw/a.mat"),
                error: "Malformed input /raw/a.mat: truncated".to_string(),
            },
            CastFailure {
                path: PathBuf::from("/raw/b.mat"),
                error: "I/O error: gone".to_string(),
            },
        ];
        let dump = render_dump("CatchAll", &failures);
        assert!(dump.starts_with("# datacast "));
        assert!(dump.ends_with(
            "PATH /raw/a.mat:\nMalformed input /raw/a.mat: truncated\n\n\
             PATH /raw/b.mat:\nI/O error: gone\n\n"
        ));
    }

    #[test]
    fn test_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("datacast.conf");
        fs::write(&path, "algorithm=md5\nretry_attempts=5\n").unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.retry_attempts, 5);
        assert_eq!(settings.algorithm.as_str(), "md5");

        assert_eq!(load_settings(None).unwrap(), Settings::default());
        assert!(load_settings(Some(&temp_dir.path().join("missing"))).is_err());
    }

    #[test]
    fn test_cast_command_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw");
        fs::create_dir_all(raw.join("sub")).unwrap();
        fs::write(raw.join("sub/a.txt"), "hello").unwrap();
        fs::write(raw.join("sub/.DS_Store"), "junk").unwrap();
        let target = temp_dir.path().join("target");

        let settings = Settings {
            staging_base: Some(temp_dir.path().join("staging")),
            ..Settings::default()
        };
        let code = cmd_cast(
            &RecipeRegistry::with_builtins(),
            &settings,
            &OutputWriter::new(true),
            CastArgs {
                raw: &raw,
                target: &target,
                recipe: "CATCHALL",
                options: "",
                dump: None,
            },
        )
        .unwrap();

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(fs::read_to_string(target.join("sub/a.txt")).unwrap(), "hello");
        assert!(!target.join("sub/.DS_Store").exists());
    }

    #[test]
    fn test_guess_command() {
        let temp_dir = TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("a.txt"), "a").unwrap();
        let output = OutputWriter::new(true);

        let code = cmd_guess(&RecipeRegistry::with_builtins(), &output, &raw).unwrap();
        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(cmd_guess(&RecipeRegistry::new(), &output, &raw).unwrap(), EXIT_FATAL);
        assert!(cmd_guess(&RecipeRegistry::new(), &output, &temp_dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_cast_command_rejects_unknown_option() {
        let temp_dir = TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw");
        fs::create_dir(&raw).unwrap();

        let err = cmd_cast(
            &RecipeRegistry::with_builtins(),
            &Settings::default(),
            &OutputWriter::new(true),
            CastArgs {
                raw: &raw,
                target: &temp_dir.path().join("target"),
                recipe: "CatchAll",
                options: "colour=red",
                dump: None,
            },
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("does not implement option 'colour'"));
    }
}
