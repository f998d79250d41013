use std::env;
use std::fs::{metadata, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use blockdex::btree::Blockdex;
use blockdex::btree::DEFAULT_CACHE_CAPACITY;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::EnumString;
use tracing_subscriber::EnvFilter;

mod csv;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of B-Tree nodes to keep in memory
    #[arg(short, long, global = true, default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new index (fails if the file exists)
    Create { file: PathBuf },
    /// Insert key value pair
    Insert { file: PathBuf, key: u64, value: u64 },
    /// Search for this key
    Search { file: PathBuf, key: u64 },
    /// Insert every key,value line of a CSV file
    Load { file: PathBuf, csv: PathBuf },
    /// Print index entries in key order
    Print { file: PathBuf },
    /// Write index entries in key order to a new CSV file
    Extract { file: PathBuf, csv: PathBuf },
    /// Display entry count
    Count { file: PathBuf },
    /// Verify index
    Verify { file: PathBuf },
    /// Interactive shell
    Shell { file: PathBuf },
}

/// Words understood by the interactive shell.
#[derive(Debug, EnumString, PartialEq, Subcommand)]
#[strum(ascii_case_insensitive)]
enum Parameter {
    /// Display entry count
    Count,
    /// Interactive Help
    Help,
    /// Insert key value pair
    Insert { key: u64, value: u64 },
    /// Print index entries in key order
    Print,
    /// Search for this key
    Search { key: u64 },
    /// Verify index
    Verify,
}

/// Only used to render help for the interactive shell.
#[derive(Debug, Parser)]
#[command(name = "shell", disable_help_subcommand = true)]
struct Shell {
    #[command(subcommand)]
    parameter: Parameter,
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Done,
    NotFound,
}

fn get_history_file() -> Option<PathBuf> {
    dirs::preference_dir()
        .and_then(|mut base| {
            base.push("blockdex");
            // Note: Not create_dir_all(), because we don't want to create preference
            // dirs if they don't exist.
            if metadata(base.clone()).ok().is_none() {
                std::fs::create_dir(base.clone()).ok()?
            }
            Some(base)
        })
        .map(|mut base| {
            base.push("history.txt");
            base
        })
}

fn open(file: &Path, capacity: usize) -> Result<Blockdex> {
    Blockdex::try_open_with_capacity(file, capacity)
        .with_context(|| format!("could not open index: {}", file.display()))
}

/// Turn a line of shell input into a parameter, or a usage message.
fn parse_parameter(line: &str) -> Result<Parameter, String> {
    // EnumString doesn't deal with variant parameters, so...
    let words = line.split_whitespace().collect::<Vec<&str>>();
    let Some(first) = words.first() else {
        return Err("usage: <command> [<args>]".to_string());
    };
    let parameter = Parameter::from_str(first).map_err(|e| format!("error: {e}"))?;
    match parameter {
        Parameter::Insert { key: _, value: _ } => match words[1..] {
            [key, value] => match (csv::parse_u64(key), csv::parse_u64(value)) {
                (Ok(key), Ok(value)) => Ok(Parameter::Insert { key, value }),
                _ => Err("usage: insert <key> <value>".to_string()),
            },
            _ => Err("usage: insert <key> <value>".to_string()),
        },
        Parameter::Search { key: _ } => match words[1..] {
            [key] => csv::parse_u64(key)
                .map(|key| Parameter::Search { key })
                .map_err(|_| "usage: search <key>".to_string()),
            _ => Err("usage: search <key>".to_string()),
        },
        p => {
            if words.len() != 1 {
                return Err(format!("usage: {}", first.to_lowercase()));
            }
            Ok(p)
        }
    }
}

fn interactive(btree: &mut Blockdex) -> Result<()> {
    // `()` can be used when no completer is required
    let mut rl = DefaultEditor::new()?;
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.load_history(&file_location) {
            println!("error loading history: {e}");
        }
    }
    println!("terminate with ctrl-c or ctrl-d");
    let mut stdout = std::io::stdout().lock();
    loop {
        let readline = rl.readline("blockdex: ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_parameter(&line) {
                    Ok(parameter) => {
                        if let Err(e) = process_parameter(btree, &parameter, &mut stdout) {
                            println!("error: {e:#}");
                        }
                    }
                    Err(usage) => {
                        println!("{usage}");
                        continue;
                    }
                }
                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) => {
                println!("terminating...");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("terminating...");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.save_history(&file_location) {
            println!("error saving history: {e}");
        }
    }
    Ok(())
}

fn process_parameter(
    btree: &mut Blockdex,
    parameter: &Parameter,
    out: &mut impl Write,
) -> Result<()> {
    match parameter {
        Parameter::Count => writeln!(out, "count: {}", btree.count()?)?,
        Parameter::Help => {
            let help = Shell::command().render_help().to_string();

            let mut print_it = false;

            for line in help.lines() {
                if line.starts_with("Options:") {
                    print_it = false;
                }
                if print_it && !line.is_empty() {
                    writeln!(out, "{}", line)?;
                }
                if line.starts_with("Commands:") {
                    print_it = true;
                }
            }
        }
        Parameter::Insert { key, value } => {
            btree.insert(*key, *value)?;
            writeln!(out, "inserted: {key},{value}")?;
        }
        Parameter::Print => {
            btree.export(&mut *out)?;
        }
        Parameter::Search { key } => match btree.search(*key)? {
            Some((key, value)) => writeln!(out, "{key},{value}")?,
            None => writeln!(out, "not found")?,
        },
        Parameter::Verify => {
            btree.verify()?;
            writeln!(out, "Ok")?;
        }
    }
    Ok(())
}

fn run(command: &Command, capacity: usize, out: &mut impl Write) -> Result<Outcome> {
    match command {
        Command::Create { file } => {
            Blockdex::try_new_with_capacity(file, capacity)
                .with_context(|| format!("could not create index: {}", file.display()))?
                .close()?;
            writeln!(out, "created index: {}", file.display())?;
        }
        Command::Insert { file, key, value } => {
            let mut btree = open(file, capacity)?;
            btree.insert(*key, *value)?;
            btree.close()?;
        }
        Command::Search { file, key } => {
            let mut btree = open(file, capacity)?;
            let found = btree.search(*key)?;
            btree.close()?;
            match found {
                Some((key, value)) => writeln!(out, "{key},{value}")?,
                None => return Ok(Outcome::NotFound),
            }
        }
        Command::Load { file, csv } => {
            let input = File::open(csv)
                .with_context(|| format!("could not open csv: {}", csv.display()))?;
            let mut btree = open(file, capacity)?;
            csv::load(&mut btree, BufReader::new(input))
                .with_context(|| format!("could not load csv: {}", csv.display()))?;
            btree.close()?;
        }
        Command::Print { file } => {
            let mut btree = open(file, capacity)?;
            btree.export(&mut *out)?;
            btree.close()?;
        }
        Command::Extract { file, csv } => {
            let mut btree = open(file, capacity)?;
            let output = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(csv)
                .with_context(|| format!("could not create csv: {}", csv.display()))?;
            let count = btree.export(BufWriter::new(output))?;
            tracing::info!("extracted {count} entries to: {}", csv.display());
            btree.close()?;
        }
        Command::Count { file } => {
            let mut btree = open(file, capacity)?;
            writeln!(out, "count: {}", btree.count()?)?;
            btree.close()?;
        }
        Command::Verify { file } => {
            let mut btree = open(file, capacity)?;
            btree.verify()?;
            btree.info()?;
            writeln!(out, "Ok")?;
            btree.close()?;
        }
        Command::Shell { file } => {
            let mut btree = open(file, capacity)?;
            interactive(&mut btree)?;
            btree.close()?;
        }
    }
    Ok(Outcome::Done)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_dir = match env::var("TMPDIR") {
        Ok(d) => d,
        Err(_e) => ".".to_string(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "blockdex.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .init();

    let mut stdout = std::io::stdout().lock();
    match run(&cli.command, cli.cache_capacity, &mut stdout)? {
        Outcome::Done => Ok(ExitCode::SUCCESS),
        Outcome::NotFound => {
            eprintln!("error: key not found");
            Ok(ExitCode::FAILURE)
        }
    }
}
