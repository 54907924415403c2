mod decode;
mod describe;
mod info;

use std::io::stderr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use hifitime::Epoch;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode packets to JSON, one document per line.
    ///
    /// Packets that cannot be decoded are logged and skipped. Packets that are only partly
    /// decoded are still written.
    Decode {
        /// Catalog (IDB) SQLite file.
        #[arg(short, long, value_name = "path")]
        catalog: PathBuf,

        /// Only decode these apids or apid ranges.
        ///
        /// This accepts a CSV of APIDs as well as ranges of the format <start>-<end>
        /// where start and end are inclusive. For example, you can specify
        /// --apids 0,1,2,3,4,5,10,20,30 or --apids 0-5,10,20,30
        #[arg(short, long, value_name = "csv", value_delimiter = ',')]
        apids: Vec<String>,

        /// Only decode these service types or service type ranges.
        #[arg(short, long, value_name = "csv", value_delimiter = ',')]
        services: Vec<String>,

        /// Only decode these structure ids or structure id ranges.
        #[arg(long, value_name = "csv", value_delimiter = ',')]
        spids: Vec<String>,

        /// Report raw values only.
        #[arg(long, action)]
        no_calibration: bool,

        /// Include the raw packet bytes in the output.
        #[arg(long, action)]
        keep_raw: bool,

        /// Decode on this many threads. Output order is unchanged.
        #[arg(short = 'j', long, value_name = "num")]
        threads: Option<usize>,

        /// Print a summary table to stderr when done.
        #[arg(long, action)]
        summary: bool,

        /// Input spacepacket file.
        input: PathBuf,
    },
    /// Show information about a spacepacket file decoded against a catalog.
    Info {
        /// Catalog (IDB) SQLite file.
        #[arg(short, long, value_name = "path")]
        catalog: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Mission epoch (RFC3339) used to convert spacecraft time to UTC.
        #[arg(short, long, value_parser = parse_timestamp, value_name = "timestamp")]
        epoch: Option<Epoch>,

        /// Input spacepacket file.
        input: PathBuf,
    },
    /// Describe parameters, structures or packet types by name.
    Describe {
        /// Catalog (IDB) SQLite file.
        #[arg(short, long, value_name = "path")]
        catalog: PathBuf,

        /// Parameter, structure or packet type names.
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn parse_number_ranges(list: &[String]) -> Result<Vec<u32>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").context("compiling range regex")?;
    let mut values = Vec::default();
    for (i, s) in list.iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid number or range {s:?}");
        };
        if cap.len() != 4 {
            bail!("invalid number or range at {i}");
        }

        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid number value"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            let end = cap[3]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            if start >= end {
                bail!("invalid range {s:?}")
            }
            values.extend(start..=end);
        }
    }

    Ok(values)
}

fn parse_timestamp(s: &str) -> Result<Epoch, String> {
    Epoch::from_str(s).map_err(|_| "Could not parse into an RFC3339 timestamp".to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TMTC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode {
            catalog,
            apids,
            services,
            spids,
            no_calibration,
            keep_raw,
            threads,
            summary,
            input,
        } => {
            let opts = decode::Options {
                apids: parse_number_ranges(apids)?,
                services: parse_number_ranges(services)?,
                spids: parse_number_ranges(spids)?,
                calibrate: !no_calibration,
                keep_raw: *keep_raw,
                threads: *threads,
                summary: *summary,
            };
            decode::decode(catalog, input, &opts)
        }
        Commands::Info {
            catalog,
            format,
            epoch,
            input,
        } => info::info(catalog, input, format, *epoch),
        Commands::Describe { catalog, names } => describe::describe(catalog, names),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn number_ranges() {
        let values = parse_number_ranges(&strings(&["1", "5-7", " 10"])).unwrap();
        assert_eq!(values, vec![1, 5, 6, 7, 10]);
    }

    #[test]
    fn bad_number_ranges() {
        assert!(parse_number_ranges(&strings(&["7-5"])).is_err());
        assert!(parse_number_ranges(&strings(&["x"])).is_err());
        assert!(parse_number_ranges(&strings(&["1-"])).is_err());
    }
}
