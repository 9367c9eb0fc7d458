#[macro_use]
extern crate log;

use std::env::consts::{ARCH, FAMILY, OS};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Error;
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, ThreadLogMode,
    WriteLogger,
};

use crate::cli::Cli;
use crate::program::Program;

mod analytics;
mod cli;
mod program;

/// Run log sink. Flushes every 50 lines and on drop so a crashed run still leaves a usable log.
///
/// `WriteLogger` serialises access itself, so no lock is held here.
struct BufferedFileWriter {
    writer: BufWriter<File>,
    lines: usize,
}

impl BufferedFileWriter {
    const FLUSH_EVERY_LINES: usize = 50;

    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(64 * 1024, file),
            lines: 0,
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = self.writer.write(buf)?;

        let new_lines = buf[..size].iter().filter(|&&b| b == b'\n').count();
        let before = self.lines / Self::FLUSH_EVERY_LINES;
        self.lines += new_lines;
        if self.lines / Self::FLUSH_EVERY_LINES != before {
            self.writer.flush()?;
        }
        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    initialize_logger(&cli.log_file, cli.verbose);
    log_system_information();

    Program::new(cli).run()
}

/// Initializes the terminal and file loggers, tagging every line with the thread name.
fn initialize_logger(log_file: &Path, verbose: bool) {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let term_config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Error)
        .set_thread_mode(ThreadLogMode::Names)
        .build();

    let buffered_file_writer = match BufferedFileWriter::new(log_file) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "Failed to open log file {}: {}. Logging will only output to terminal.",
                log_file.display(),
                e
            );
            let _ = TermLogger::init(
                term_level,
                term_config,
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            term_level,
            term_config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), file_log_config(), buffered_file_writer),
    ]) {
        eprintln!(
            "Failed to initialize combined logger: {}. Falling back to terminal-only logging.",
            e
        );
        let _ = TermLogger::init(
            term_level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}

/// Every line of the run log names its thread, so worker lines read `(run_reports-N)`.
fn file_log_config() -> Config {
    ConfigBuilder::new()
        .add_filter_allow_str("yt_analytics_dump")
        .set_thread_level(LevelFilter::Error)
        .set_thread_mode(ThreadLogMode::Names)
        .build()
}

/// Logs information about the system being used.
fn log_system_information() {
    trace!("ARCH:   \"{}\"", ARCH);
    trace!("FAMILY: \"{}\"", FAMILY);
    trace!("OS:     \"{}\"", OS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    use log::{Level, Log, Record};

    #[test]
    fn every_level_in_the_run_log_names_the_worker_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics_dump.log");
        let logger = WriteLogger::new(
            LevelFilter::max(),
            file_log_config(),
            BufferedFileWriter::new(&path).unwrap(),
        );

        thread::scope(|scope| {
            thread::Builder::new()
                .name("run_reports-0".to_string())
                .spawn_scoped(scope, || {
                    for level in [Level::Error, Level::Warn, Level::Info, Level::Debug] {
                        logger.log(
                            &Record::builder()
                                .level(level)
                                .target("yt_analytics_dump::analytics::worker")
                                .args(format_args!("message at {level}"))
                                .build(),
                        );
                    }
                })
                .unwrap();
        });
        drop(logger);

        let log = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 4);
        for line in lines {
            assert!(line.contains("(run_reports-0)"), "untagged line: {line}");
        }
    }

    #[test]
    fn buffered_writer_flushes_every_fifty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics_dump.log");
        let mut writer = BufferedFileWriter::new(&path).unwrap();

        for i in 0..49 {
            writeln!(writer, "line {i}").unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        writeln!(writer, "line 49").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 50);

        writeln!(writer, "line 50").unwrap();
        drop(writer);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 51);
    }
}
