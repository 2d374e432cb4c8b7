use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "etrace")]
#[command(about = "Measure application startup and trace what it executes and reads", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file path
    ///
    /// Defaults to `~/.config/etrace/config.toml`, or `ETRACE_CONFIG_PATH`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show more log output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Time a program's startup, tracing the programs it executes
    Exec(ExecArgs),

    /// Trace the files a program accesses during startup
    File(FileArgs),

    /// Report on an existing strace log
    Analyze {
        #[command(subcommand)]
        mode: AnalyzeMode,
    },
}

#[derive(Args)]
pub struct ExecArgs {
    /// Don't trace the process, only time it
    #[arg(short = 't', long)]
    pub no_trace: bool,

    /// Number of runs
    #[arg(short = 'n', long, default_value_t = 1)]
    pub repeat: usize,

    /// Keep only the N slowest execs (0 keeps all)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub slowest: usize,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Command to run
    #[arg(last = true, required = true, value_name = "CMD")]
    pub cmd: Vec<String>,
}

#[derive(Args)]
pub struct FileArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Command to run
    #[arg(last = true, required = true, value_name = "CMD")]
    pub cmd: Vec<String>,
}

#[derive(Subcommand)]
pub enum AnalyzeMode {
    /// Exec timings from a `-ttt -f` log
    Exec {
        /// Trace log
        log: PathBuf,

        /// Keep only the N slowest execs (0 keeps all)
        #[arg(long, value_name = "N", default_value_t = 0)]
        slowest: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// File accesses from a `-ttt -f -y` log
    File {
        /// Trace log, or the `-ff` fragment pattern with --merge
        log: PathBuf,

        /// Merge `LOG.<pid>` fragments into LOG first
        #[arg(long)]
        merge: bool,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Which file accesses are reported
#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Only report paths matching this regex
    #[arg(long, value_name = "REGEX", conflicts_with = "parent_dirs")]
    pub file_regex: Option<String>,

    /// Only report paths under these directories
    #[arg(long, value_name = "DIR", num_args = 1..)]
    pub parent_dirs: Vec<String>,

    /// Only report accesses by programs matching this regex
    #[arg(long, value_name = "REGEX")]
    pub program_regex: Option<String>,

    /// Report accesses by snapd's own helpers too
    #[arg(long)]
    pub include_snapd_programs: bool,

    /// Show which program accessed each file
    #[arg(long)]
    pub show_programs: bool,
}

/// How the program is launched and observed
#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// Window name to wait for
    #[arg(short = 'w', long, value_name = "NAME")]
    pub window_name: Option<String>,

    /// Window class to wait for, instead of the command's basename
    #[arg(short = 'c', long, value_name = "CLASS")]
    pub class_name: Option<String>,

    /// Don't wait for a window, run until the program exits
    #[arg(long)]
    pub no_window_wait: bool,

    /// Run the command through `snap run`
    #[arg(short = 's', long, conflicts_with = "use_flatpak_run")]
    pub use_snap_run: bool,

    /// Run the command through `flatpak run`
    #[arg(long)]
    pub use_flatpak_run: bool,

    /// Script to run before each run
    #[arg(short = 'p', long, value_name = "SCRIPT")]
    pub prepare_script: Option<PathBuf>,

    /// Arguments for the prepare script
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub prepare_script_args: Vec<String>,

    /// Script to run after each run
    #[arg(short = 'r', long, value_name = "SCRIPT")]
    pub restore_script: Option<PathBuf>,

    /// Arguments for the restore script
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub restore_script_args: Vec<String>,

    /// Append the command's stdout to this file
    #[arg(long, value_name = "PATH")]
    pub cmd_stdout: Option<PathBuf>,

    /// Append the command's stderr to this file
    #[arg(long, value_name = "PATH")]
    pub cmd_stderr: Option<PathBuf>,

    /// Don't drop the VM caches before running
    #[arg(long)]
    pub keep_vm_caches: bool,
}

#[derive(Args, Clone, Default)]
pub struct OutputArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Shorthand for --format=json
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Write results to this file instead of stdout (replaced if it exists)
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,
}

impl OutputArgs {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
