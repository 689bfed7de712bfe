use std::io::{stdin, stdout, Write};

use anyhow::Result;
use cache_sim::{
    addr::Addr,
    common::{BreakPoint, ExecuteMode, RunStep, SimulationOption, Spy, SpyWatchKind},
    geometry::Geometry,
    sim::{BreakReason, ControlFlow, OnBreak, Simulator, SpyResult},
    tracer::RecordingTracer,
};

use crate::report::{CountsView, SetView, SnapshotView};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

peg::parser!(grammar command(g: &Geometry) for str {
    rule unsigned() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().or(Err("unsigned")) }
        / expected!("unsigned")
    rule addr() -> Addr
        = quiet!{"0" ['x' | 'X']} n:$(quiet!{['0'..='9'|'a'..='f'|'A'..='F']+})
        {? u64::from_str_radix(n, 16).map(Addr::new).or(Err("64-bit address")) }
        / expected!("address (0x...)")
    rule bp() = "bp" / "breakpoint"
    rule rm() = "rm" / "remove" / "-="
    rule set() -> usize
        = "set" __ n:unsigned() {?
            if n < g.set_count() { Ok(n) } else { Err("set index in range") }
        }
    rule spy_kind() -> SpyWatchKind
        = "hit" __ "miss" { SpyWatchKind::Hit | SpyWatchKind::Miss }
        / "hit" { SpyWatchKind::Hit }
        / "miss" { SpyWatchKind::Miss }
    rule dyn_command() -> ExecuteMode
        = "skip" __ "until" __ addr:addr() { ExecuteMode::SkipUntil { addr } }
        / "run" { ExecuteMode::Run }
        / "step" step:(__ n:unsigned() { n })? { ExecuteMode::RunStep(RunStep::new(step)) }
    rule static_command() -> StaticCommand
        = "trace" __ "off" { StaticCommand::UpdateWhetherTrace(false) }
        / "trace" (__ "on")? { StaticCommand::UpdateWhetherTrace(true) }
        / bp() __ rm() __ addr:addr() { StaticCommand::RemoveBp(BreakPoint::new(g.decompose(addr).block)) }
        / bp() __ addr:addr() { StaticCommand::AddBp(BreakPoint::new(g.decompose(addr).block)) }
        / "spy" __ "off" __ set_index:set() { StaticCommand::RemoveSpy(set_index) }
        / "spy" __ ("on" __)? kind:spy_kind() __ set_index:set() { StaticCommand::AddSpy(Spy { kind, set_index }) }
        / "spy" __ ("on" __)? set_index:set() { StaticCommand::AddSpy(Spy { kind: SpyWatchKind::all_flags(), set_index }) }
        / "rewind" { StaticCommand::Rewind }
        / "show" __ sk:show_kind() { StaticCommand::Show(sk) }
    rule show_kind() -> ShowKind
        = "pos" { ShowKind::Pos }
        / "stat" { ShowKind::Stat }
        / "lines" { ShowKind::Lines }
        / set_index:set() { ShowKind::Set(set_index) }
        / bp() "s"? { ShowKind::AllBp }
        / "spies" { ShowKind::Spies }
    pub(crate) rule parse_command() -> Command
        = _ s:static_command() _ { Command::Static(s) }
        / _ "exit" _ { Command::Exit }
        / _ d:dyn_command()? _ { Command::Dynamic(d) }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

#[derive(Debug)]
pub(crate) enum Command {
    Dynamic(Option<ExecuteMode>),
    Static(StaticCommand),
    Exit,
}

#[derive(Debug)]
pub(crate) enum StaticCommand {
    UpdateWhetherTrace(bool),
    Show(ShowKind),
    AddBp(BreakPoint),
    RemoveBp(BreakPoint),
    AddSpy(Spy),
    RemoveSpy(usize),
    Rewind,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ShowKind {
    Pos,
    Stat,
    Lines,
    Set(usize),
    AllBp,
    Spies,
    IsTraceEnabled,
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

fn show(sim: &Simulator<RecordingTracer>, opt: &SimulationOption, kind: ShowKind) {
    match kind {
        ShowKind::Pos => match sim.peek() {
            Some(addr) => println!(
                "record {} of {}, next: {addr}",
                sim.position(),
                sim.trace().len()
            ),
            None => println!("end of trace ({} records)", sim.trace().len()),
        },
        ShowKind::IsTraceEnabled => {
            let enabled = sim.cache().tracer().is_enabled();
            println!("trace {}", if enabled { "enabled" } else { "disabled" });
        }
        #[cfg(feature = "stat")]
        ShowKind::Stat => {
            let width = get_terminal_width().unwrap_or(60) as usize;
            println!("{}", sim.collect_stat().view(width));
        }
        #[cfg(not(feature = "stat"))]
        ShowKind::Stat => print!("{}", CountsView(sim.cache().stat())),
        ShowKind::Lines => print!("{}", SnapshotView::new(sim.cache())),
        ShowKind::Set(set_index) => {
            if let Some(lines) = sim.cache().set(set_index) {
                let first_line = sim.cache().geometry().set_range(set_index).start;
                print!(
                    "{}",
                    SetView {
                        set_index,
                        first_line,
                        lines,
                    }
                );
            }
        }
        ShowKind::AllBp => {
            let mut v: Vec<_> = opt.breakpoints.values().collect();
            if v.is_empty() {
                println!("no breakpoints set.");
            } else {
                v.sort_by_key(|b| b.block);
                println!(
                    "breakpoints: [{}]",
                    v.into_iter()
                        .map(|b| format!("{b}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        ShowKind::Spies => {
            let mut v: Vec<_> = opt.spies.values().collect();
            if v.is_empty() {
                println!("no spies set.");
            } else {
                v.sort_by_key(|s| s.set_index);
                for s in v {
                    println!("\tspy on {s}");
                }
            }
        }
    }
}

pub fn execute_interactive(sim: &mut Simulator<RecordingTracer>) -> Result<()> {
    let mut opt = SimulationOption::default();
    println!("entering interactive.");
    'interactive: loop {
        let mut pending = None;
        let update_mode = 'input: loop {
            if let Some(kind) = pending.take() {
                show(sim, &opt, kind);
            }
            // prompt string
            match &opt.mode {
                ExecuteMode::Run => print!("run "),
                ExecuteMode::SkipUntil { addr } => print!("until {addr} "),
                ExecuteMode::RunStep(n) => print!("step {} ", n.get_step()),
            }
            if sim.cache().tracer().is_enabled() {
                print!("[trace] ");
            }
            print!("> ");
            stdout().flush()?;
            let mut str = String::new();
            if stdin().read_line(&mut str)? == 0 {
                break 'interactive;
            }
            let parsed = match command::parse_command(&str, sim.cache().geometry()) {
                Ok(p) => p,
                Err(e) => {
                    println!("parse error: expected {}", e.expected);
                    continue;
                }
            };
            match parsed {
                Command::Dynamic(d) => {
                    break 'input d;
                }
                Command::Static(s) => {
                    pending = Some(match s {
                        StaticCommand::Show(s) => s,
                        StaticCommand::UpdateWhetherTrace(b) => {
                            sim.tracer_mut().set_enabled(b);
                            ShowKind::IsTraceEnabled
                        }
                        StaticCommand::AddBp(bp) => {
                            opt.breakpoints.insert(bp.block, bp);
                            ShowKind::AllBp
                        }
                        StaticCommand::RemoveBp(bp) => {
                            opt.breakpoints.remove(&bp.block);
                            ShowKind::AllBp
                        }
                        StaticCommand::AddSpy(spy) => {
                            opt.spies.insert(spy.set_index, spy);
                            ShowKind::Spies
                        }
                        StaticCommand::RemoveSpy(set_index) => {
                            opt.spies.remove(&set_index);
                            ShowKind::Spies
                        }
                        StaticCommand::Rewind => {
                            sim.rewind();
                            ShowKind::Pos
                        }
                    });
                    continue 'input;
                }
                Command::Exit => {
                    break 'interactive;
                }
            }
        };
        if let Some(mode) = update_mode {
            println!("mode: {mode}");
            opt.mode = mode;
        }
        let flow = sim.single_cycle(&opt);
        for e in sim.tracer_mut().take() {
            println!("{e}");
        }
        match flow {
            ControlFlow::Break(OnBreak { reason, last }) => {
                match reason {
                    BreakReason::Reached(a) => println!("reached {a}"),
                    BreakReason::StepEnded => (),
                    BreakReason::BreakPoint(b) => println!("stopped before {b}"),
                    BreakReason::Spy(SpyResult { spy, record }) => {
                        println!("detect {} of set {}", record.outcome, spy.set_index)
                    }
                }
                if let Some(r) = last {
                    println!("last: {r}");
                }
            }
            ControlFlow::Exit => {
                println!("end of trace; type \"rewind\" to start over.");
            }
        }
    }
    println!("exiting interactive.");
    print!("{}", CountsView(sim.cache().stat()));
    Ok(())
}
