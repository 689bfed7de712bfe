mod interactive;
mod report;

use std::{
    fs::File,
    io::{stdout, BufWriter, Read, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use cache_sim::{
    geometry::{Geometry, RawGeometry},
    sim::Simulator,
    trace::Trace,
    tracer::{AccessTracer, LogTracer, RecordingTracer},
};
use clap::{Args, Parser, Subcommand};

use report::{CountsView, SnapshotView, Summary};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// replay a trace, reporting the line table after each access
    Replay(ReplayArgs),
    /// replay a trace and print statistics only
    Stat(StatArgs),
}

#[derive(Args, Debug)]
struct GeometryArgs {
    /// Cache size in bytes
    #[arg(required_unless_present = "geometry", allow_negative_numbers = true)]
    cache_size: Option<i64>,
    /// Line size in bytes
    #[arg(required_unless_present = "geometry", allow_negative_numbers = true)]
    line_size: Option<i64>,
    /// Lines per set
    #[arg(required_unless_present = "geometry", allow_negative_numbers = true)]
    group_size: Option<i64>,
    /// File path to geometry in JSON, instead of the three sizes
    #[arg(long, conflicts_with_all = ["cache_size", "line_size", "group_size"])]
    geometry: Option<PathBuf>,
}

impl GeometryArgs {
    fn resolve(self) -> Result<Geometry> {
        match self {
            GeometryArgs {
                geometry: Some(path),
                ..
            } => {
                let file = File::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Geometry::deser(file)
                    .with_context(|| format!("invalid geometry in {}", path.display()))
            }
            GeometryArgs {
                cache_size: Some(cache_size),
                line_size: Some(line_size),
                group_size: Some(group_size),
                ..
            } => Ok(Geometry::try_from(RawGeometry {
                cache_size,
                line_size,
                group_size,
            })?),
            _ => Err(anyhow::anyhow!(
                "cache size, line size and group size are all required"
            )),
        }
    }
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[command(flatten)]
    geometry: GeometryArgs,
    /// File path to input trace
    #[arg(short, long)]
    input: PathBuf,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Log the decomposition and victim of every access
    #[arg(long)]
    trace_access: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// File path to write the report to (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Report the line table only once, after the whole trace
    #[arg(long)]
    final_only: bool,
    /// Print 1 (hit) or 0 (miss) for every access
    #[arg(long)]
    outcomes: bool,
    /// Enable interactive mode (reports on the terminal only)
    #[arg(long, conflicts_with_all = ["output", "final_only", "outcomes", "trace_access"])]
    interactive: bool,
}

#[derive(Args, Debug)]
struct StatArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// Print the counters as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Replay(ReplayArgs {
            delegate,
            output,
            final_only,
            outcomes,
            interactive,
        }) => {
            let (geometry, trace, trace_access) = setup(delegate)?;
            if interactive {
                let mut sim = Simulator::with_tracer(geometry, trace, RecordingTracer::new());
                interactive::execute_interactive(&mut sim)?;
                output_stat(&sim);
                return Ok(());
            }
            let mut out: Box<dyn Write> = match output {
                Some(p) => Box::new(BufWriter::new(
                    File::create(&p)
                        .with_context(|| format!("failed to create {}", p.display()))?,
                )),
                None => Box::new(stdout().lock()),
            };
            let mut digits = stdout();
            let digits = outcomes.then_some(&mut digits as &mut dyn Write);
            if trace_access {
                let mut sim = Simulator::with_tracer(geometry, trace, LogTracer);
                replay(&mut sim, &mut out, digits, final_only)?;
                output_stat(&sim);
            } else {
                let mut sim = Simulator::new(geometry, trace);
                replay(&mut sim, &mut out, digits, final_only)?;
                output_stat(&sim);
            }
            out.flush()?;
            Ok(())
        }
        Command::Stat(StatArgs { delegate, json }) => {
            let (geometry, trace, trace_access) = setup(delegate)?;
            if trace_access {
                let mut sim = Simulator::with_tracer(geometry, trace, LogTracer);
                sim.run_to_end();
                print_stat(&sim, json)
            } else {
                let mut sim = Simulator::new(geometry, trace);
                sim.run_to_end();
                print_stat(&sim, json)
            }
        }
    }
}

fn setup(
    CommonArgs {
        geometry,
        input,
        verbose,
        trace_access,
    }: CommonArgs,
) -> Result<(Geometry, Trace, bool)> {
    if trace_access {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .init();
    } else if verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .init();
    } else {
        env_logger::init();
    }
    let geometry = geometry.resolve()?;
    let trace = read_trace(input)?;
    Ok((geometry, trace, trace_access))
}

fn read_trace(input: PathBuf) -> Result<Trace> {
    let mut buf = String::new();
    let mut file =
        File::open(&input).with_context(|| format!("failed to open {}", input.display()))?;
    file.read_to_string(&mut buf)?;
    let trace = Trace::parse(&buf).with_context(|| format!("in {}", input.display()))?;
    log::info!("finished parsing trace. # of records: {}", trace.len());
    Ok(trace)
}

/// Writes the line table to `out` after every access (or once at the end when
/// `final_only`), then the counts. `digits` receives `1`/`0` per access.
fn replay<T: AccessTracer>(
    sim: &mut Simulator<T>,
    out: &mut impl Write,
    mut digits: Option<&mut dyn Write>,
    final_only: bool,
) -> Result<()> {
    while let Some(r) = sim.step() {
        if let Some(w) = digits.as_mut() {
            writeln!(w, "{}", u8::from(r.outcome))?;
        }
        if !final_only {
            write!(out, "{}", SnapshotView::new(sim.cache()))?;
        }
    }
    if final_only {
        write!(out, "{}", SnapshotView::new(sim.cache()))?;
    }
    write!(out, "{}", CountsView(sim.cache().stat()))?;
    Ok(())
}

fn print_stat<T>(sim: &Simulator<T>, json: bool) -> Result<()> {
    if json {
        let summary = Summary::from(sim.cache().stat());
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    #[cfg(feature = "stat")]
    {
        let max_width = get_terminal_width().unwrap_or(120) as usize;
        println!("{}", sim.collect_stat().view(max_width));
    }
    #[cfg(not(feature = "stat"))]
    print!("{}", CountsView(sim.cache().stat()));
    Ok(())
}

#[cfg(not(feature = "stat"))]
fn output_stat<T>(_: &Simulator<T>) {}

#[cfg(feature = "stat")]
fn output_stat<T>(sim: &Simulator<T>) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_sim::addr::Addr;

    #[test]
    fn test_cli_positional_geometry() {
        let cli = Cli::try_parse_from(["cache-sim", "replay", "1024", "64", "2", "-i", "t.txt"])
            .unwrap();
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        let g = args.delegate.geometry.resolve().unwrap();
        assert_eq!((g.line_count(), g.set_count()), (16, 8));
        assert!(!args.final_only);
    }

    #[test]
    fn test_cli_negative_geometry() {
        let cli = Cli::try_parse_from(["cache-sim", "stat", "1024", "-64", "2", "-i", "t.txt"])
            .unwrap();
        let Command::Stat(args) = cli.command else {
            panic!("expected stat");
        };
        assert!(args.delegate.geometry.resolve().is_err());
    }

    #[test]
    fn test_cli_geometry_required() {
        assert!(Cli::try_parse_from(["cache-sim", "replay", "-i", "t.txt"]).is_err());
        assert!(Cli::try_parse_from([
            "cache-sim",
            "replay",
            "1024",
            "64",
            "2",
            "--geometry",
            "g.json",
            "-i",
            "t.txt"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_interactive_conflicts() {
        let base = ["cache-sim", "replay", "1024", "64", "2", "-i", "t.txt", "--interactive"];
        assert!(Cli::try_parse_from(base).is_ok());
        for extra in [
            &["-o", "out.txt"][..],
            &["--final-only"],
            &["--outcomes"],
            &["--trace-access"],
        ] {
            let args = base.iter().chain(extra);
            assert!(Cli::try_parse_from(args).is_err(), "{extra:?}");
        }
    }

    fn scenario() -> Simulator {
        let trace: Trace = [0x000, 0x200, 0x000, 0x400]
            .into_iter()
            .map(Addr::new)
            .collect();
        // one set of two lines
        Simulator::new(Geometry::new(128, 64, 2).unwrap(), trace)
    }

    #[test]
    fn test_replay_report() {
        let mut sim = scenario();
        let mut out = Vec::new();
        replay(&mut sim, &mut out, None, true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "================
IDX V ** ADDR **
000 1 0x00000010
001 1 0x00000008
#hits: 1
#miss: 3
"
        );
    }

    #[test]
    fn test_replay_every_access() {
        let mut sim = scenario();
        let mut out = Vec::new();
        let mut digits = Vec::new();
        replay(&mut sim, &mut out, Some(&mut digits as &mut dyn Write), false).unwrap();
        assert_eq!(String::from_utf8(digits).unwrap(), "0\n0\n1\n0\n");
        let table = |l0: &str, l1: &str| {
            format!("================\nIDX V ** ADDR **\n000 {l0}\n001 {l1}\n")
        };
        let expected = [
            table("1 0x00000000", "0"),
            table("1 0x00000000", "1 0x00000008"),
            table("1 0x00000000", "1 0x00000008"),
            table("1 0x00000010", "1 0x00000008"),
        ]
        .concat()
            + "#hits: 1\n#miss: 3\n";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
