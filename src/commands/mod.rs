pub mod analyze;
pub mod exec;
pub mod file;
mod run;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use etrace::config::EtraceConfig;
use etrace::strace::{FileFilter, FileFilterSpec};
use serde::Serialize;

use crate::cli::{FilterArgs, OutputArgs, OutputFormat};

/// Where results go: `--output-file` (replaced) or stdout.
pub(crate) struct Output {
    format: OutputFormat,
    writer: Box<dyn Write>,
}

impl Output {
    pub fn open(args: &OutputArgs) -> anyhow::Result<Self> {
        let writer: Box<dyn Write> = match &args.output_file {
            Some(path) => Box::new(BufWriter::new(create_output_file(path)?)),
            None => Box::new(io::stdout().lock()),
        };
        Ok(Self {
            format: args.format(),
            writer,
        })
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Text output; ignored in JSON mode.
    pub fn text(&mut self, text: &str) -> anyhow::Result<()> {
        if !self.is_json() {
            self.writer
                .write_all(text.as_bytes())
                .context("cannot write output")?;
        }
        Ok(())
    }

    /// The final JSON document; ignored in text mode.
    pub fn json(&mut self, value: &impl Serialize) -> anyhow::Result<()> {
        if self.is_json() {
            serde_json::to_writer_pretty(&mut self.writer, value)
                .context("cannot serialize results")?;
            writeln!(self.writer).context("cannot write output")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<()> {
        self.writer.flush().context("cannot write output")
    }
}

fn create_output_file(path: &Path) -> anyhow::Result<File> {
    File::create(path).with_context(|| format!("cannot create output file {}", path.display()))
}

/// Build the file filter from the command line, with config defaults for
/// the excluded programs.
pub(crate) fn file_filter(args: &FilterArgs, config: &EtraceConfig) -> anyhow::Result<FileFilter> {
    let defaults = FileFilterSpec::default();
    let spec = FileFilterSpec {
        file_regex: args.file_regex.clone().unwrap_or(defaults.file_regex),
        parent_dirs: args.parent_dirs.clone(),
        program_regex: args.program_regex.clone().unwrap_or(defaults.program_regex),
        exclude_programs: if args.include_snapd_programs {
            Vec::new()
        } else {
            config.exclude_programs.clone()
        },
        show_programs: args.show_programs,
    };
    Ok(spec.compile()?)
}
