use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{self, Command};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use envfile::{
    EnvConfig, EnvLoader, KeyParsingMode, ParseOptions, ParseResult, SubstitutionMode,
    TargetEnv, is_settable,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILE: &str = ".env";

/// Run commands with variables loaded from .env files.
#[derive(Debug, Parser)]
#[command(name = "envfile", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load env files and execute a command.
    Run {
        #[command(flatten)]
        load: LoadArgs,
        /// Command to execute, followed by its arguments.
        #[arg(
            value_name = "COMMAND",
            required_unless_present = "config",
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<OsString>,
    },
    /// Print the merged variables as a JSON object.
    Print {
        #[command(flatten)]
        load: LoadArgs,
    },
}

impl Commands {
    fn load_args(&self) -> &LoadArgs {
        match self {
            Self::Run { load, .. } | Self::Print { load } => load,
        }
    }

    fn load_args_mut(&mut self) -> &mut LoadArgs {
        match self {
            Self::Run { load, .. } | Self::Print { load } => load,
        }
    }
}

#[derive(Debug, Args)]
struct LoadArgs {
    /// Take files, directory, required keys and command from environment
    /// ENV of `env.config.json`.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "ENV",
        conflicts_with_all = ["files", "dir", "required"]
    )]
    config: Option<String>,
    /// Directory containing `env.config.json`.
    #[arg(long = "config-dir", value_name = "DIR", requires = "config")]
    config_dir: Option<PathBuf>,
    /// Env file path(s). Repeat or pass comma-separated paths.
    #[arg(
        short = 'f',
        long = "file",
        value_name = "PATHS",
        value_delimiter = ',',
        default_value = DEFAULT_FILE
    )]
    files: Vec<PathBuf>,
    /// Directory that relative file paths are resolved against.
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dir: Option<PathBuf>,
    /// Skip env files that do not exist.
    #[arg(short = 'i', long = "ignore-missing")]
    ignore_missing: bool,
    /// Override variables already set in the environment.
    #[arg(short = 'o', long = "override")]
    override_existing: bool,
    /// Keys that must be defined with a non-empty value.
    #[arg(short = 'r', long = "required", value_name = "KEYS", value_delimiter = ',')]
    required: Vec<String>,
    /// Expand `$VAR` and `${VAR}` references in values.
    #[arg(long)]
    expand: bool,
    /// Join adjacent quoted segments on one line into a single value.
    #[arg(long)]
    concat_quotes: bool,
    /// Continue unquoted values ending in a backslash onto the next line.
    #[arg(long)]
    line_continuation: bool,
    /// Only accept keys made of `[A-Za-z0-9_.-]`.
    #[arg(long)]
    strict_keys: bool,
    /// Print loader diagnostics to stderr.
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl LoadArgs {
    fn parse_options(&self) -> ParseOptions {
        let key_parsing_mode = if self.strict_keys {
            KeyParsingMode::Strict
        } else {
            KeyParsingMode::Lenient
        };

        ParseOptions::new()
            .key_parsing_mode(key_parsing_mode)
            .concat_adjacent_quotes(self.concat_quotes)
            .line_continuation(self.line_continuation)
    }

    fn substitution_mode(&self) -> SubstitutionMode {
        if self.expand {
            SubstitutionMode::Expand
        } else {
            SubstitutionMode::Disabled
        }
    }

    /// Replace file selection settings with those of the `--config` environment.
    fn apply_config(&mut self) -> Result<Option<EnvConfig>> {
        let Some(environment) = self.config.clone() else {
            return Ok(None);
        };
        let config_dir = self
            .config_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let config = EnvConfig::load(&config_dir, &environment)
            .with_context(|| format!("failed to load config `{environment}`"))?;

        self.files = config.files.clone();
        self.dir = config.dir.clone();
        self.required = config.required.clone();
        self.override_existing |= config.override_existing;
        self.verbose |= config.debug;
        Ok(Some(config))
    }

    fn display_files(&self) -> String {
        let names: Vec<String> = self
            .files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        names.join(", ")
    }
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("envfile: {err:#}");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(mut cli: Cli) -> Result<i32> {
    let config = cli.command.load_args_mut().apply_config()?;
    init_tracing(cli.command.load_args().verbose);

    match cli.command {
        Commands::Run { load, mut command } => {
            if command.is_empty()
                && let Some(config) = &config
            {
                command = config.command().into_iter().map(OsString::from).collect();
            }
            execute_run(&load, &command)
        }
        Commands::Print { load } => {
            let result = load_entries(&load)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(0)
        }
    }
}

fn load_entries(args: &LoadArgs) -> Result<ParseResult> {
    let mut loader = EnvLoader::new()
        .paths(&args.files)
        .required(!args.ignore_missing)
        .required_keys(args.required.iter().filter(|key| !key.is_empty()).cloned())
        .override_existing(args.override_existing)
        .substitution_mode(args.substitution_mode())
        .parse_options(args.parse_options())
        .target(TargetEnv::from_memory(snapshot_process_env()));
    if let Some(dir) = &args.dir {
        loader = loader.dir(dir);
    }

    loader
        .parse_only()
        .with_context(|| format!("failed to load {}", args.display_files()))
}

fn execute_run(args: &LoadArgs, command_line: &[OsString]) -> Result<i32> {
    let Some((program, program_args)) = command_line.split_first() else {
        bail!("missing command: pass one after `run` or set `execute` in the config");
    };
    let result = load_entries(args)?;

    if let Some(entry) = result
        .iter()
        .find(|entry| !is_settable(&entry.key, &entry.value))
    {
        bail!("`{}` cannot be passed to a child process environment", entry.key);
    }

    let mut command = Command::new(program);
    command.args(program_args);
    for entry in &result {
        if !args.override_existing && env::var_os(&entry.key).is_some() {
            continue;
        }
        command.env(&entry.key, &entry.value);
    }

    execute_command(command, program)
}

fn snapshot_process_env() -> BTreeMap<String, String> {
    env::vars_os()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

#[cfg(unix)]
fn execute_command(mut command: Command, program: &OsString) -> Result<i32> {
    let err = command.exec();
    Err(err).with_context(|| format!("failed to execute `{}`", program.to_string_lossy()))
}

#[cfg(not(unix))]
fn execute_command(mut command: Command, program: &OsString) -> Result<i32> {
    let status = command
        .status()
        .with_context(|| format!("failed to execute `{}`", program.to_string_lossy()))?;
    Ok(status.code().unwrap_or(1))
}
