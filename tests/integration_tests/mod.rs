mod analyze_exec;
mod analyze_file;
mod cli;
