use std::fmt;

use num_enum::IntoPrimitive;
use serde::Serialize;

use crate::{
    addr::{Addr, BlockAddr, Decomposed, InvalidAddressError},
    geometry::{ConfigError, Geometry},
    tracer::{AccessEvent, AccessTracer, Fill, NoTrace},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[cfg(feature = "stat")]
pub use stat::{SetCount, SetUsageStat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Outcome {
    Miss = 0,
    Hit = 1,
}

impl Outcome {
    #[must_use]
    pub fn is_hit(self) -> bool {
        matches!(self, Self::Hit)
    }
    #[must_use]
    pub fn is_miss(self) -> bool {
        matches!(self, Self::Miss)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Hit => write!(f, "hit"),
            Outcome::Miss => write!(f, "miss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Resident {
    block: BlockAddr,
    insertion_order: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheLine {
    resident: Option<Resident>,
}

impl CacheLine {
    pub fn is_valid(&self) -> bool {
        self.resident.is_some()
    }
    pub fn block(&self) -> Option<BlockAddr> {
        self.resident.map(|r| r.block)
    }
    /// fill sequence number; only defined while the line is valid
    pub fn insertion_order(&self) -> Option<u64> {
        self.resident.map(|r| r.insertion_order)
    }
    #[inline]
    fn holds(&self, block: BlockAddr) -> bool {
        self.block() == Some(block)
    }
    /// returns the block that was resident before
    fn fill(&mut self, block: BlockAddr, insertion_order: u64) -> Option<BlockAddr> {
        self.resident
            .replace(Resident {
                block,
                insertion_order,
            })
            .map(|r| r.block)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    pub index: usize,
    pub valid: bool,
    pub block: Option<BlockAddr>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStat {
    pub hits: u64,
    pub misses: u64,
    /// misses that replaced a valid line
    pub evictions: u64,
}

impl CacheStat {
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }
    pub fn hit_ratio(&self) -> f64 {
        match self.accesses() {
            0 => 0.,
            n => self.hits as f64 / n as f64,
        }
    }
    pub fn miss_ratio(&self) -> f64 {
        match self.accesses() {
            0 => 0.,
            n => self.misses as f64 / n as f64,
        }
    }
}

/// Set-associative cache with FIFO replacement.
///
/// Lines are stored contiguously; set `s` owns lines
/// `s * group_size .. (s + 1) * group_size`. On a miss the first invalid line
/// of the set is filled, otherwise the line filled earliest is replaced. Hits
/// never change the replacement order.
pub struct Cache<T = NoTrace> {
    geometry: Geometry,
    lines: Vec<CacheLine>,
    stat: CacheStat,
    next_insertion_order: u64,
    tracer: T,
    #[cfg(feature = "stat")]
    set_stat: Vec<SetCount>,
}

impl Cache {
    pub fn new(geometry: Geometry) -> Self {
        Self::with_tracer(geometry, NoTrace)
    }
    pub fn from_params(
        cache_size: usize,
        line_size: usize,
        group_size: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(Geometry::new(cache_size, line_size, group_size)?))
    }
}

impl<T: AccessTracer> Cache<T> {
    pub fn with_tracer(geometry: Geometry, tracer: T) -> Self {
        Self {
            geometry,
            lines: vec![CacheLine::default(); geometry.line_count()],
            stat: CacheStat::default(),
            next_insertion_order: 0,
            tracer,
            #[cfg(feature = "stat")]
            set_stat: vec![SetCount::default(); geometry.set_count()],
        }
    }

    pub fn access(&mut self, addr: Addr) -> Outcome {
        let Decomposed { block, set_index } = self.geometry.decompose(addr);
        let set_lines = self.geometry.set_range(set_index);
        let set = &mut self.lines[set_lines.clone()];
        let (outcome, fill) = if set.iter().any(|l| l.holds(block)) {
            self.stat.hits += 1;
            (Outcome::Hit, None)
        } else {
            self.stat.misses += 1;
            let victim = select_victim(set);
            let insertion_order = self.next_insertion_order;
            self.next_insertion_order += 1;
            let evicted = set[victim].fill(block, insertion_order);
            if evicted.is_some() {
                self.stat.evictions += 1;
            }
            let fill = Fill {
                line: set_lines.start + victim,
                evicted,
                insertion_order,
            };
            (Outcome::Miss, Some(fill))
        };
        #[cfg(feature = "stat")]
        self.set_stat[set_index].incr(outcome);
        self.tracer.on_access(&AccessEvent {
            addr,
            block,
            set_index,
            set_lines,
            outcome,
            fill,
        });
        outcome
    }

    /// Like [`Cache::access`], but for addresses that may be negative. A
    /// rejected address leaves the cache untouched.
    pub fn try_access(&mut self, addr: i64) -> Result<Outcome, InvalidAddressError> {
        let addr = Addr::try_from(addr)?;
        Ok(self.access(addr))
    }
}

/// first invalid line, or else the line filled earliest
fn select_victim(set: &[CacheLine]) -> usize {
    set.iter().position(|l| !l.is_valid()).unwrap_or_else(|| {
        set.iter()
            .enumerate()
            .min_by_key(|(_, l)| l.insertion_order())
            .map_or(0, |(i, _)| i)
    })
}

impl<T> Cache<T> {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
    /// lines of set `set_index`
    pub fn set(&self, set_index: usize) -> Option<&[CacheLine]> {
        if set_index < self.geometry.set_count() {
            Some(&self.lines[self.geometry.set_range(set_index)])
        } else {
            None
        }
    }
    pub fn snapshot(&self) -> impl Iterator<Item = LineSnapshot> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, l)| LineSnapshot {
                index,
                valid: l.is_valid(),
                block: l.block(),
            })
    }
    /// index of the line holding `block`, if resident
    pub fn resident(&self, block: BlockAddr) -> Option<usize> {
        let set_index = (block.inner() % self.geometry.set_count() as u64) as usize;
        let range = self.geometry.set_range(set_index);
        let start = range.start;
        self.lines[range]
            .iter()
            .position(|l| l.holds(block))
            .map(|i| start + i)
    }
    pub fn stat(&self) -> CacheStat {
        self.stat
    }
    pub fn hits(&self) -> u64 {
        self.stat.hits
    }
    pub fn misses(&self) -> u64 {
        self.stat.misses
    }
    /// back to the freshly constructed state; the tracer is kept
    pub fn reset(&mut self) {
        self.lines.fill(CacheLine::default());
        self.stat = CacheStat::default();
        self.next_insertion_order = 0;
        #[cfg(feature = "stat")]
        self.set_stat.fill(SetCount::default());
    }
    pub fn tracer(&self) -> &T {
        &self.tracer
    }
    pub fn tracer_mut(&mut self) -> &mut T {
        &mut self.tracer
    }
    pub fn into_tracer(self) -> T {
        self.tracer
    }
}

#[cfg(feature = "stat")]
impl<T> AddStats for Cache<T> {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
        buf.push(Box::new(SetUsageStat::new(self.set_stat.clone())));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use crate::stat::*;

    use super::*;

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SetCount {
        pub hits: u64,
        pub misses: u64,
    }

    impl SetCount {
        pub(super) fn incr(&mut self, outcome: Outcome) {
            match outcome {
                Outcome::Hit => self.hits += 1,
                Outcome::Miss => self.misses += 1,
            }
        }
    }

    impl Stat for CacheStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(CacheStatView::new(self))
        }
    }

    pub struct CacheStatView<'a> {
        stat: &'a CacheStat,
    }

    impl<'a> CacheStatView<'a> {
        pub fn new(stat: &'a CacheStat) -> Self {
            Self { stat }
        }
    }

    impl StatView for CacheStatView<'_> {
        fn header(&self) -> &'static str {
            "cache stat"
        }
        fn width(&self) -> usize {
            36
        }
    }

    impl fmt::Display for CacheStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let hit = self.stat.hits;
            let miss = self.stat.misses;
            let evicted = self.stat.evictions;
            let hit_pct = format!("{:.6}", 100. * self.stat.hit_ratio());
            let miss_pct = format!("{:.6}", 100. * self.stat.miss_ratio());
            writeln!(f, "      hit: {hit:>10} ({hit_pct:>10}%)")?;
            writeln!(f, "     miss: {miss:>10} ({miss_pct:>10}%)")?;
            writeln!(f, "  evicted: {evicted:>10}")
        }
    }

    pub struct SetUsageStat {
        sets: Vec<SetCount>,
    }

    impl SetUsageStat {
        pub fn new(sets: Vec<SetCount>) -> Self {
            Self { sets }
        }
        pub fn sets(&self) -> &[SetCount] {
            &self.sets
        }
    }

    // "set 0000: 1234567 / 1234567"
    const ENTRY_WIDTH: usize = 27;

    impl Stat for SetUsageStat {
        fn view(&self, max_width: usize) -> Box<dyn StatView + '_> {
            Box::new(SetUsageStatView {
                stat: self,
                chunk_size: SetUsageStatView::chunk_size(max_width),
            })
        }
    }

    struct SetUsageStatView<'a> {
        stat: &'a SetUsageStat,
        chunk_size: usize,
    }

    impl Width for SetUsageStatView<'_> {
        fn width_by_chunk_size(chunk_size: usize) -> usize {
            2 + chunk_size * (ENTRY_WIDTH + 2)
        }
    }

    impl StatView for SetUsageStatView<'_> {
        fn header(&self) -> &'static str {
            "access count per set (format: `# of hit / # of miss`)"
        }
        fn width(&self) -> usize {
            Self::width_by_chunk_size(self.chunk_size)
        }
    }

    impl fmt::Display for SetUsageStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let entries: Vec<_> = self
                .stat
                .sets
                .iter()
                .enumerate()
                .map(|(i, c)| format!("set {i:04}: {:>7} / {:>7}", c.hits, c.misses))
                .collect();
            for chunk in entries.chunks(self.chunk_size) {
                writeln!(f, "  {}", chunk.join(", "))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::RecordingTracer;

    fn cache(cache_size: usize, line_size: usize, group_size: usize) -> Cache {
        Cache::from_params(cache_size, line_size, group_size).unwrap()
    }

    fn blocks_of_set<T>(c: &Cache<T>, set_index: usize) -> Vec<Option<u64>> {
        c.set(set_index)
            .unwrap()
            .iter()
            .map(|l| l.block().map(BlockAddr::inner))
            .collect()
    }

    /// xorshift; deterministic addresses without pulling in a rng
    fn pseudo_random_trace(seed: u64, len: usize, max: u64) -> Vec<Addr> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                Addr::new(x % max)
            })
            .collect()
    }

    #[test]
    fn test_scenario() {
        let mut c = cache(1024, 64, 2);
        assert_eq!(c.geometry().line_count(), 16);
        assert_eq!(c.geometry().set_count(), 8);
        assert_eq!(c.access(Addr::new(0x000)), Outcome::Miss);
        assert_eq!(blocks_of_set(&c, 0), vec![Some(0), None]);
        assert_eq!(c.access(Addr::new(0x200)), Outcome::Miss);
        assert_eq!(blocks_of_set(&c, 0), vec![Some(0), Some(8)]);
        assert_eq!(c.access(Addr::new(0x000)), Outcome::Hit);
        assert_eq!(c.access(Addr::new(0x400)), Outcome::Miss);
        assert_eq!(blocks_of_set(&c, 0), vec![Some(16), Some(8)]);
        assert_eq!(c.hits(), 1);
        assert_eq!(c.misses(), 3);
        assert_eq!(c.stat().evictions, 1);
        // every other set is untouched
        for s in 1..8 {
            assert_eq!(blocks_of_set(&c, s), vec![None, None]);
        }
    }

    #[test]
    fn test_fill_before_evict() {
        let group_size = 4;
        let mut c = cache(64 * 4 * group_size, 64, group_size);
        let set_count = c.geometry().set_count() as u64;
        // blocks 3, 3 + set_count, ... all map to set 3
        let addr_of = |i: u64| Addr::new((3 + i * set_count) * 64);
        for i in 0..group_size as u64 {
            assert_eq!(c.access(addr_of(i)), Outcome::Miss);
            let expected: Vec<_> = (0..group_size as u64)
                .map(|j| (j <= i).then_some(3 + j * set_count))
                .collect();
            assert_eq!(blocks_of_set(&c, 3), expected);
        }
        assert_eq!(c.stat().evictions, 0);
        assert_eq!(c.access(addr_of(group_size as u64)), Outcome::Miss);
        assert_eq!(c.stat().evictions, 1);
        // first filled line (leftmost) was replaced
        assert_eq!(
            c.set(3).unwrap()[0].block(),
            Some(BlockAddr::new(3 + group_size as u64 * set_count))
        );
        assert_eq!(c.resident(BlockAddr::new(3)), None);
    }

    #[test]
    fn test_hit_does_not_refresh_order() {
        let mut c = cache(128, 64, 2);
        // one set, two ways
        assert_eq!(c.geometry().set_count(), 1);
        c.access(Addr::new(0x00));
        c.access(Addr::new(0x40));
        let before = c.lines().to_vec();
        assert_eq!(c.access(Addr::new(0x00)), Outcome::Hit);
        assert_eq!(c.access(Addr::new(0x00)), Outcome::Hit);
        assert_eq!(before, c.lines());
        // block 0 is still the oldest, even though it was used last
        assert_eq!(c.access(Addr::new(0x80)), Outcome::Miss);
        assert_eq!(blocks_of_set(&c, 0), vec![Some(2), Some(1)]);
        assert_eq!(c.access(Addr::new(0xc0)), Outcome::Miss);
        assert_eq!(blocks_of_set(&c, 0), vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_miss_then_hit() {
        let mut c = cache(1024, 64, 2);
        assert!(c.access(Addr::new(0x1234)).is_miss());
        // same block, different byte
        assert!(c.access(Addr::new(0x1200)).is_hit());
        assert!(c.access(Addr::new(0x123f)).is_hit());
    }

    #[test]
    fn test_insertion_order_is_global() {
        let mut c = cache(1024, 64, 2);
        c.access(Addr::new(0x000)); // set 0
        c.access(Addr::new(0x040)); // set 1
        c.access(Addr::new(0x200)); // set 0
        let orders: Vec<_> = c.lines().iter().map(CacheLine::insertion_order).collect();
        assert_eq!(orders[0], Some(0));
        assert_eq!(orders[1], Some(2));
        assert_eq!(orders[2], Some(1));
        assert!(orders[3..].iter().all(Option::is_none));
    }

    #[test]
    fn test_direct_mapped() {
        let mut c = cache(256, 16, 1);
        assert!(c.access(Addr::new(0x000)).is_miss());
        assert!(c.access(Addr::new(0x100)).is_miss());
        assert!(c.access(Addr::new(0x000)).is_miss());
        assert_eq!(c.stat().evictions, 2);
    }

    #[test]
    fn test_fully_associative() {
        let mut c = cache(64, 16, 4);
        for a in [0x00, 0x10, 0x20, 0x30] {
            assert!(c.access(Addr::new(a)).is_miss());
        }
        for a in [0x30, 0x20, 0x10, 0x00] {
            assert!(c.access(Addr::new(a)).is_hit());
        }
        assert!(c.access(Addr::new(0x40)).is_miss());
        assert_eq!(c.resident(BlockAddr::new(4)), Some(0));
        assert_eq!(c.resident(BlockAddr::new(0)), None);
        assert!(c.access(Addr::new(0x50)).is_miss());
        assert_eq!(c.resident(BlockAddr::new(5)), Some(1));
    }

    #[test]
    fn test_conservation_and_no_duplicates() {
        let trace = pseudo_random_trace(0x2545f4914f6cdd1d, 5000, 0x4000);
        let mut c = cache(1024, 32, 4);
        for (n, &a) in trace.iter().enumerate() {
            c.access(a);
            assert_eq!(c.hits() + c.misses(), n as u64 + 1);
            for s in 0..c.geometry().set_count() {
                let mut blocks: Vec<_> = c.set(s).unwrap().iter().filter_map(|l| l.block()).collect();
                let len = blocks.len();
                blocks.sort();
                blocks.dedup();
                assert_eq!(len, blocks.len(), "duplicate block in set {s}");
            }
        }
        assert!(c.stat().evictions <= c.misses());
    }

    #[test]
    fn test_determinism() {
        let trace = pseudo_random_trace(42, 2000, 0x10000);
        let run = || {
            let mut c = cache(2048, 64, 4);
            for &a in &trace {
                c.access(a);
            }
            (c.stat(), c.lines().to_vec())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_reset() {
        let trace = pseudo_random_trace(7, 300, 0x1000);
        let mut c = cache(512, 16, 2);
        let first: Vec<_> = trace.iter().map(|&a| c.access(a)).collect();
        c.reset();
        assert_eq!(c.stat(), CacheStat::default());
        assert!(c.lines().iter().all(|l| !l.is_valid()));
        let second: Vec<_> = trace.iter().map(|&a| c.access(a)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_negative_address_is_rejected() {
        let mut c = cache(1024, 64, 2);
        c.access(Addr::new(0x40));
        let before = c.lines().to_vec();
        assert_eq!(
            c.try_access(-4),
            Err(InvalidAddressError::Negative(-4))
        );
        assert_eq!(before, c.lines());
        assert_eq!(c.stat().accesses(), 1);
        assert_eq!(c.try_access(0x40), Ok(Outcome::Hit));
    }

    #[test]
    fn test_snapshot() {
        let mut c = cache(1024, 64, 2);
        c.access(Addr::new(0x200));
        let snap: Vec<_> = c.snapshot().collect();
        assert_eq!(snap.len(), 16);
        assert_eq!(
            snap[0],
            LineSnapshot {
                index: 0,
                valid: true,
                block: Some(BlockAddr::new(8))
            }
        );
        assert!(snap[1..].iter().all(|l| !l.valid && l.block.is_none()));
        assert!(c.set(8).is_none());
    }

    #[test]
    fn test_tracer_events() {
        let g = Geometry::new(1024, 64, 2).unwrap();
        let mut c = Cache::with_tracer(g, RecordingTracer::new());
        for a in [0x000, 0x200, 0x000, 0x400] {
            c.access(Addr::new(a));
        }
        let events = c.tracer().events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].set_lines, 0..2);
        assert_eq!(
            events[0].fill,
            Some(Fill {
                line: 0,
                evicted: None,
                insertion_order: 0
            })
        );
        assert_eq!(events[2].outcome, Outcome::Hit);
        assert_eq!(events[2].fill, None);
        assert_eq!(
            events[3].fill,
            Some(Fill {
                line: 0,
                evicted: Some(BlockAddr::new(0)),
                insertion_order: 2
            })
        );
    }

    #[test]
    fn test_outcome_digit() {
        assert_eq!(u8::from(Outcome::Hit), 1);
        assert_eq!(u8::from(Outcome::Miss), 0);
    }

    #[cfg(feature = "stat")]
    #[test]
    fn test_set_usage() {
        let mut c = cache(1024, 64, 2);
        for a in [0x000, 0x200, 0x000, 0x040] {
            c.access(Addr::new(a));
        }
        let mut stats = Stats::default();
        c.add_stats(&mut stats);
        let out = stats.view(80).to_string();
        assert!(out.contains("set 0000:       1 /       2"), "{out}");
        assert!(out.contains("set 0001:       0 /       1"), "{out}");
        assert!(out.contains("hit:          1"), "{out}");
    }
}
