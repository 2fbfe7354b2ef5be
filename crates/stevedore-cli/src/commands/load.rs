use super::{json_pretty, BarProgress, EXIT_SUCCESS};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use stevedore_core::{LoadError, LoadOptions, LoadReport, Loader, NoProgress, ProgressSink};

/// Parse a `--ref REFNAME=TARGET` argument.
pub fn parse_ref_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((ref_name, target)) if !ref_name.is_empty() && !target.is_empty() => {
            Ok((ref_name.to_owned(), target.to_owned()))
        }
        _ => Err(format!("expected REFNAME=TARGET, got '{s}'")),
    }
}

pub fn options(name: Option<String>, refs: Vec<(String, String)>) -> Result<LoadOptions, String> {
    let mut map = BTreeMap::new();
    for (ref_name, target) in refs {
        if map.insert(ref_name.clone(), target).is_some() {
            return Err(format!("--ref given twice for '{ref_name}'"));
        }
    }
    Ok(LoadOptions { name, refs: map })
}

pub fn run(
    loader: &Loader,
    input: Option<&Path>,
    options: &LoadOptions,
    json: bool,
    quiet: bool,
) -> Result<u8, String> {
    let bars = (!quiet && !json).then(BarProgress::new);
    let progress: &dyn ProgressSink = match &bars {
        Some(bars) => bars,
        None => &NoProgress,
    };

    // With --json, stdout carries only the report.
    let mut status: Box<dyn Write> = if json {
        Box::new(io::stderr().lock())
    } else {
        Box::new(io::stdout().lock())
    };

    let result = match input {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
            loader.load(BufReader::new(file), options, &mut status, progress)
        }
        None => loader.load(io::stdin().lock(), options, &mut status, progress),
    };
    drop(status);

    let report = result.map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else if !quiet {
        print_summary(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn print_summary(report: &LoadReport) {
    if report.tags.is_empty() {
        for id in &report.images {
            println!("Loaded image ID: {id}");
        }
    }
}

/// Message whose prefix selects the exit code.
fn describe(e: &LoadError) -> String {
    match e {
        LoadError::Store(_) => e.to_string(),
        e if e.is_archive_error() => format!("archive error: {e}"),
        e => format!("load failed: {e}"),
    }
}
