pub mod config;
pub mod profiling;
pub mod shell_exec;
pub mod strace;
pub mod utils;
pub mod xdotool;

pub use strace::TraceError;
