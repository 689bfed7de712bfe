use std::fmt;

use serde::Serialize;

use crate::{
    addr::{Addr, BlockAddr},
    cache::{Cache, CacheStat, Outcome},
    common::{BreakPoint, ExecuteMode, SimulationOption, Spy},
    geometry::Geometry,
    trace::Trace,
    tracer::{AccessTracer, NoTrace},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// what happened to one trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    /// position in the trace
    pub index: usize,
    pub addr: Addr,
    pub block: BlockAddr,
    pub set_index: usize,
    pub outcome: Outcome,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:06} {}: block {}, set {}, {}",
            self.index, self.addr, self.block, self.set_index, self.outcome
        )
    }
}

/// Replays a trace against one cache.
pub struct Simulator<T = NoTrace> {
    cache: Cache<T>,
    trace: Trace,
    cursor: usize,
    #[cfg(feature = "stat")]
    stat_builder: stat::SimStatBuilder,
}

impl Simulator {
    pub fn new(geometry: Geometry, trace: Trace) -> Self {
        Self::with_tracer(geometry, trace, NoTrace)
    }
}

impl<T: AccessTracer> Simulator<T> {
    pub fn with_tracer(geometry: Geometry, trace: Trace, tracer: T) -> Self {
        log::info!("cache geometry: {geometry}");
        log::info!("trace: {} records", trace.len());
        Self {
            cache: Cache::with_tracer(geometry, tracer),
            trace,
            cursor: 0,
            #[cfg(feature = "stat")]
            stat_builder: stat::SimStatBuilder::new(),
        }
    }

    /// Replays the next record; `None` once the trace is exhausted.
    pub fn step(&mut self) -> Option<AccessRecord> {
        let addr = self.trace.get(self.cursor)?;
        let d = self.cache.geometry().decompose(addr);
        let outcome = self.cache.access(addr);
        let record = AccessRecord {
            index: self.cursor,
            addr,
            block: d.block,
            set_index: d.set_index,
            outcome,
        };
        self.cursor += 1;
        if self.is_finished() {
            self.exit_sim();
        }
        Some(record)
    }

    pub fn run_to_end(&mut self) -> CacheStat {
        while self.step().is_some() {}
        self.cache.stat()
    }

    /// Replays according to `opt.mode` until it is satisfied, a breakpoint or
    /// spy fires, or the trace ends. A breakpoint on the very first record is
    /// not honored, so that replay can resume from a previous stop.
    pub fn single_cycle(&mut self, opt: &SimulationOption) -> ControlFlow {
        let mut last = None;
        let mut is_enter = true;
        macro_rules! break_sim {
            ($reason:expr) => {
                return ControlFlow::Break(OnBreak {
                    reason: $reason,
                    last,
                })
            };
        }
        macro_rules! execute {
            () => {
                if is_enter {
                    is_enter = false;
                } else if let Some(bp) = self.next_block().and_then(|b| opt.breakpoints.get(&b)) {
                    break_sim!(BreakReason::BreakPoint(*bp));
                }
                let Some(r) = self.step() else {
                    return ControlFlow::Exit;
                };
                last = Some(r);
                if let Some(spy) = opt.spies.get(&r.set_index) {
                    if spy.kind.matches(r.outcome) {
                        break_sim!(BreakReason::Spy(SpyResult {
                            spy: *spy,
                            record: r
                        }));
                    }
                }
            };
        }

        match &opt.mode {
            ExecuteMode::SkipUntil { addr } => loop {
                if !is_enter && self.peek() == Some(*addr) {
                    break_sim!(BreakReason::Reached(*addr));
                }
                execute!();
            },
            ExecuteMode::Run => loop {
                execute!();
            },
            ExecuteMode::RunStep(r) => {
                for _ in 0..r.get_step() {
                    execute!();
                }
                break_sim!(BreakReason::StepEnded)
            }
        }
    }

    /// starts over with an empty cache
    pub fn rewind(&mut self) {
        self.cache.reset();
        self.cursor = 0;
        #[cfg(feature = "stat")]
        {
            self.stat_builder = stat::SimStatBuilder::new();
        }
    }
}

impl<T> Simulator<T> {
    fn exit_sim(&mut self) {
        #[cfg(feature = "stat")]
        self.stat_builder.stop_timer(self.cursor);
        log::info!("trace exhausted after {} records.", self.cursor);
    }

    fn next_block(&self) -> Option<BlockAddr> {
        self.peek()
            .map(|a| self.cache.geometry().decompose(a).block)
    }

    pub fn peek(&self) -> Option<Addr> {
        self.trace.get(self.cursor)
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.trace.len() - self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.trace.len()
    }

    pub fn cache(&self) -> &Cache<T> {
        &self.cache
    }

    pub fn tracer_mut(&mut self) -> &mut T {
        self.cache.tracer_mut()
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    #[cfg(feature = "stat")]
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl<T> AddStats for Simulator<T> {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish(self.cursor)));
        self.cache.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use crate::stat::*;

    use super::*;
    use std::time;

    pub struct SimStatBuilder {
        begin: time::Instant,
        elapsed: Option<time::Duration>,
        records: Option<usize>,
    }

    impl SimStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                elapsed: None,
                records: None,
            }
        }
        pub fn stop_timer(&mut self, records: usize) {
            self.elapsed = Some(self.begin.elapsed());
            self.records = Some(records);
        }
        /// `replayed` is used while the replay is still in progress
        pub fn finish(&self, replayed: usize) -> SimStat {
            SimStat {
                records: self.records.unwrap_or(replayed),
                elapsed: self.elapsed.unwrap_or_else(|| self.begin.elapsed()),
                finished: self.elapsed.is_some(),
            }
        }
    }

    impl Default for SimStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct SimStat {
        records: usize,
        elapsed: time::Duration,
        finished: bool,
    }

    impl Stat for SimStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ SimStat {
        fn header(&self) -> &'static str {
            "replay stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ SimStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>12}")?;
            let records = format!("#{}", self.records);
            writeln!(f, "  records total: {records:>12}")?;
            if !self.finished {
                writeln!(f, "  (replay in progress)")?;
            }
            Ok(())
        }
    }
}

pub enum ControlFlow {
    Break(OnBreak),
    /// trace exhausted
    Exit,
}

pub enum BreakReason {
    Reached(Addr),
    StepEnded,
    BreakPoint(BreakPoint),
    Spy(SpyResult),
}

pub struct SpyResult {
    pub spy: Spy,
    pub record: AccessRecord,
}

pub struct OnBreak {
    pub reason: BreakReason,
    /// the last access replayed before stopping
    pub last: Option<AccessRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RunStep, SpyWatchKind};

    fn scenario() -> Simulator {
        let trace: Trace = [0x000, 0x200, 0x000, 0x400]
            .into_iter()
            .map(Addr::new)
            .collect();
        Simulator::new(Geometry::new(1024, 64, 2).unwrap(), trace)
    }

    fn step_opt(n: usize) -> SimulationOption {
        SimulationOption {
            mode: ExecuteMode::RunStep(RunStep::new(Some(n))),
            ..Default::default()
        }
    }

    #[test]
    fn test_step() {
        let mut sim = scenario();
        let outcomes: Vec<_> = std::iter::from_fn(|| sim.step())
            .map(|r| (r.index, r.block.inner(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (0, 0, Outcome::Miss),
                (1, 8, Outcome::Miss),
                (2, 0, Outcome::Hit),
                (3, 16, Outcome::Miss)
            ]
        );
        assert!(sim.is_finished());
        assert_eq!(sim.step(), None);
    }

    #[test]
    fn test_run_to_end() {
        let mut sim = scenario();
        let stat = sim.run_to_end();
        assert_eq!((stat.hits, stat.misses), (1, 3));
        assert_eq!(sim.remaining(), 0);
    }

    #[test]
    fn test_run_step() {
        let mut sim = scenario();
        match sim.single_cycle(&step_opt(2)) {
            ControlFlow::Break(OnBreak {
                reason: BreakReason::StepEnded,
                last: Some(r),
            }) => assert_eq!(r.index, 1),
            _ => panic!("expected to stop after two steps"),
        }
        assert_eq!(sim.position(), 2);
        assert!(matches!(sim.single_cycle(&step_opt(5)), ControlFlow::Exit));
        assert_eq!(sim.cache().stat().accesses(), 4);
    }

    #[test]
    fn test_breakpoint() {
        let mut sim = scenario();
        let mut opt = SimulationOption::default();
        let bp = BreakPoint::new(BlockAddr::new(0));
        opt.breakpoints.insert(bp.block, bp);
        // the first record is block 0, but entry never breaks
        match sim.single_cycle(&opt) {
            ControlFlow::Break(OnBreak {
                reason: BreakReason::BreakPoint(b),
                last: Some(r),
            }) => {
                assert_eq!(b, bp);
                assert_eq!(r.index, 1);
            }
            _ => panic!("expected breakpoint"),
        }
        // stopped before the access
        assert_eq!(sim.cache().stat().accesses(), 2);
        assert!(matches!(sim.single_cycle(&opt), ControlFlow::Exit));
    }

    #[test]
    fn test_spy() {
        let mut sim = scenario();
        let mut opt = SimulationOption::default();
        opt.spies.insert(
            0,
            Spy {
                kind: SpyWatchKind::Hit,
                set_index: 0,
            },
        );
        match sim.single_cycle(&opt) {
            ControlFlow::Break(OnBreak {
                reason: BreakReason::Spy(SpyResult { record, .. }),
                ..
            }) => {
                assert_eq!(record.index, 2);
                assert_eq!(record.outcome, Outcome::Hit);
            }
            _ => panic!("expected spy"),
        }
        // stopped after the access
        assert_eq!(sim.cache().stat().accesses(), 3);
    }

    #[test]
    fn test_skip_until() {
        let mut sim = scenario();
        let opt = SimulationOption {
            mode: ExecuteMode::SkipUntil {
                addr: Addr::new(0x400),
            },
            ..Default::default()
        };
        match sim.single_cycle(&opt) {
            ControlFlow::Break(OnBreak {
                reason: BreakReason::Reached(a),
                ..
            }) => assert_eq!(a, Addr::new(0x400)),
            _ => panic!("expected to reach 0x400"),
        }
        assert_eq!(sim.position(), 3);
        assert_eq!(sim.peek(), Some(Addr::new(0x400)));
    }

    #[test]
    fn test_rewind() {
        let mut sim = scenario();
        let first = sim.run_to_end();
        sim.rewind();
        assert_eq!(sim.position(), 0);
        assert_eq!(sim.cache().stat().accesses(), 0);
        assert_eq!(sim.run_to_end(), first);
    }

    #[test]
    fn test_empty_trace() {
        let mut sim = Simulator::new(Geometry::new(64, 64, 1).unwrap(), Trace::default());
        assert!(matches!(
            sim.single_cycle(&SimulationOption::default()),
            ControlFlow::Exit
        ));
        assert_eq!(sim.run_to_end(), CacheStat::default());
    }
}
