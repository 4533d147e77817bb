use pairlint::analysis::{
    KeyedConfig, KeyedPairing, MemoryReporter, OrderedConfig, OrderedPairing, Pairing,
    UnitAnalyzer, Violation,
};
use pairlint::listing;

use clap::{Arg, ArgAction, Command};
use std::fmt;
use std::fs;
use std::process::ExitCode;

#[derive(Debug)]
enum Error {
    Io(String, std::io::Error),
    Listing(String, listing::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(file, err) => write!(f, "{}: {}", file, err),
            Error::Listing(file, err) => write!(f, "{}: {}", file, err),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let matches = Command::new("pairlint")
        .version("0.1.0")
        .about("Check paired container operations in JVM method listings")
        .arg(
            Arg::new("check")
                .long("check")
                .value_name("WHICH")
                .value_parser(["parcel", "bundle", "all"])
                .default_value("all")
                .help("Which pairing contract to check"),
        )
        .arg(
            Arg::new("all-findings")
                .long("all-findings")
                .action(ArgAction::SetTrue)
                .help("Also print advisory findings"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Method listing files to analyze")
                .required(true)
                .num_args(1..),
        )
        .get_matches();

    let check = matches.get_one::<String>("check").unwrap();
    let all_findings = matches.get_flag("all-findings");
    let inputs: Vec<&String> = matches.get_many::<String>("INPUT").unwrap().collect();

    let mut analyzer = UnitAnalyzer::new(pairings(check));
    let mut reported = 0usize;
    for input in inputs {
        match check_file(&mut analyzer, input, all_findings) {
            Ok(count) => reported += count,
            Err(err) => {
                log::error!("{}", err);
                return ExitCode::from(2);
            }
        }
    }

    if reported == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Engines selected by `--check`
fn pairings(check: &str) -> Vec<Pairing> {
    let mut pairings = Vec::new();
    if check == "parcel" || check == "all" {
        pairings.push(Pairing::Ordered(OrderedPairing::new(OrderedConfig::parcel())));
    }
    if check == "bundle" || check == "all" {
        pairings.push(Pairing::Keyed(KeyedPairing::new(KeyedConfig::bundle())));
    }
    pairings
}

/// Analyze one listing file; returns the number of non-advisory findings
fn check_file(
    analyzer: &mut UnitAnalyzer,
    input: &str,
    all_findings: bool,
) -> Result<usize, Error> {
    log::info!("Analyzing '{}'", input);
    let source = fs::read_to_string(input).map_err(|err| Error::Io(input.to_string(), err))?;
    let unit =
        listing::parse_listing(&source).map_err(|err| Error::Listing(input.to_string(), err))?;

    let mut reporter = MemoryReporter::new();
    analyzer.analyze_unit(&unit, &mut reporter);

    let reportable = reporter.reportable().count();
    let shown: Vec<&Violation> = if all_findings {
        reporter.violations.iter().collect()
    } else {
        reporter.reportable().collect()
    };
    for violation in shown {
        println!("{}: {}", input, violation);
    }
    Ok(reportable)
}
