// src/bin/refljoin_cli.rs
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use refl_join::combine::{AverageMode, GeometryWeights, Normbase};
use refl_join::config::{read_datasets, JoinConfig};
use refl_join::quality::Quality;
use refl_join::{join, rebin, FileOrder, GroupKey, ReflDataset};
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    Csv,
    Json,
}

#[derive(Parser)]
#[command(author, version, about = "Join and rebin reflectometry datasets")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(ClapArgs)]
struct Common {
    /// Datasets as JSON (one object or a list)
    #[arg(short, long)]
    input: PathBuf,

    /// JSON config; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (csv|json)
    #[arg(short, long, value_enum, default_value_t = Output::Csv)]
    output: Output,

    /// Omit the CSV header line
    #[arg(long)]
    no_header: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Merge repeated points, one output dataset per group_by key
    Join {
        #[command(flatten)]
        common: Common,
        /// Allowed separation as a multiple of the resolution
        #[arg(long)]
        q_tolerance: Option<f64>,
        /// Allowed resolution difference as a multiple of the resolution
        #[arg(long)]
        dq_tolerance: Option<f64>,
        /// File order within a group (file|time|theta|slit|none)
        #[arg(long)]
        order: Option<FileOrder>,
        /// Comma-separated keys, e.g. "polarization,sample.name"
        #[arg(long)]
        group_by: Option<String>,
        /// Intensity averaging (poisson|gauss)
        #[arg(long)]
        average: Option<AverageMode>,
        /// Geometry weights (equal|intensity|normbase)
        #[arg(long)]
        weights: Option<GeometryWeights>,
        /// Group by Q instead of by instrument angles
        #[arg(long)]
        by_q: bool,
    },
    /// Merge all points onto a Q grid
    Rebin {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        qmin: Option<f64>,
        #[arg(long)]
        qmax: Option<f64>,
        /// Step at qmin; 0 disables binning
        #[arg(long)]
        qstep: Option<f64>,
        /// Step at qmax (progressively coarser grid)
        #[arg(long)]
        qstep_max: Option<f64>,
        /// Intensity averaging (poisson|gauss)
        #[arg(long)]
        average: Option<AverageMode>,
    },
    /// Compare Poisson and Gaussian averaging on simulated counts
    Quality {
        /// Underlying count rate per unit interval
        #[arg(long)]
        rate: f64,
        /// Counting intervals (comma separated)
        #[arg(long)]
        monitors: String,
        /// Interval type (monitor|time)
        #[arg(long, default_value = "monitor")]
        norm: Normbase,
        #[arg(long, default_value_t = 1000)]
        trials: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn parse_numbers(s: &str) -> Result<Vec<f64>, Box<dyn Error>> {
    let mut out = Vec::new();
    for tok in s
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|t| !t.is_empty())
    {
        out.push(tok.parse::<f64>()?);
    }
    Ok(out)
}

fn load_config(common: &Common) -> Result<JoinConfig, Box<dyn Error>> {
    Ok(match &common.config {
        Some(path) => JoinConfig::load(path)?,
        None => JoinConfig::default(),
    })
}

fn write_csv(out: &mut impl Write, datasets: &[ReflDataset], header: bool) -> Result<(), Box<dyn Error>> {
    if header {
        writeln!(out, "dataset,Qz,dQ,v,dv,points")?;
    }
    for data in datasets {
        let (_, qz, dq) = data.q_columns()?;
        let merged = data.merged.clone().unwrap_or_else(|| vec![1; data.len()]);
        for i in 0..data.len() {
            writeln!(
                out,
                "{},{},{},{},{},{}",
                data.name, qz[i], dq[i], data.v[i], data.dv[i], merged[i]
            )?;
        }
    }
    Ok(())
}

fn emit(datasets: &[ReflDataset], common: &Common) -> Result<(), Box<dyn Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match common.output {
        Output::Csv => write_csv(&mut out, datasets, !common.no_header)?,
        Output::Json => {
            serde_json::to_writer_pretty(&mut out, datasets)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.cmd {
        Cmd::Join {
            common,
            q_tolerance,
            dq_tolerance,
            order,
            group_by,
            average,
            weights,
            by_q,
        } => {
            let mut cfg = load_config(&common)?;
            if let Some(t) = q_tolerance {
                cfg.q_tolerance = t;
            }
            if let Some(t) = dq_tolerance {
                cfg.dq_tolerance = t;
            }
            if q_tolerance.is_some() || dq_tolerance.is_some() {
                cfg.tolerance = None;
            }
            if let Some(o) = order {
                cfg.order = o;
            }
            if let Some(g) = group_by {
                // validate early for a clean message
                GroupKey::parse_list(&g)?;
                cfg.group_by = g;
            }
            if let Some(a) = average {
                cfg.average = a;
            }
            if let Some(w) = weights {
                cfg.weights = w;
            }
            cfg.by_q |= by_q;

            let options = cfg.to_options()?;
            let datasets = read_datasets(&common.input)?;
            let joined = join(&datasets, &options)?;
            emit(&joined, &common)
        }
        Cmd::Rebin {
            common,
            qmin,
            qmax,
            qstep,
            qstep_max,
            average,
        } => {
            let mut cfg = load_config(&common)?.rebin;
            cfg.qmin = qmin.or(cfg.qmin);
            cfg.qmax = qmax.or(cfg.qmax);
            cfg.qstep = qstep.unwrap_or(cfg.qstep);
            cfg.qstep_max = qstep_max.or(cfg.qstep_max);
            cfg.average = average.unwrap_or(cfg.average);

            let datasets = read_datasets(&common.input)?;
            let grid = cfg.grid_for(&datasets)?;
            let binned = rebin(&datasets, &grid, cfg.average)?;
            emit(std::slice::from_ref(&binned), &common)
        }
        Cmd::Quality {
            rate,
            monitors,
            norm,
            trials,
            seed,
        } => {
            let report = Quality::new(rate, parse_numbers(&monitors)?)
                .norm(norm)
                .trials(trials)
                .seed(seed)
                .run()?;
            println!("method\tbias\tdv_ratio");
            println!(
                "poisson\t{:.6e}\t{:.6}",
                report.poisson.bias, report.poisson.uncertainty_ratio
            );
            println!(
                "gauss\t{:.6e}\t{:.6}",
                report.gauss.bias, report.gauss.uncertainty_ratio
            );
            Ok(())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run(Args::parse()) {
        eprintln!("refljoin: {e}");
        std::process::exit(2);
    }
}
