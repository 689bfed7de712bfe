use std::fmt;

use cache_sim::cache::{Cache, CacheLine, CacheStat};
use serde::Serialize;

/// whole line table, in the layout of the trace report
pub struct SnapshotView<'a, T> {
    cache: &'a Cache<T>,
}

impl<'a, T> SnapshotView<'a, T> {
    pub fn new(cache: &'a Cache<T>) -> Self {
        Self { cache }
    }
}

impl<T> fmt::Display for SnapshotView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "================")?;
        writeln!(f, "IDX V ** ADDR **")?;
        for line in self.cache.snapshot() {
            match line.block {
                Some(block) if line.valid => writeln!(f, "{:03} 1 {block}", line.index)?,
                _ => writeln!(f, "{:03} 0", line.index)?,
            }
        }
        Ok(())
    }
}

pub struct CountsView(pub CacheStat);

impl fmt::Display for CountsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#hits: {}", self.0.hits)?;
        writeln!(f, "#miss: {}", self.0.misses)
    }
}

/// lines of one set, with their fill order
pub struct SetView<'a> {
    pub set_index: usize,
    pub first_line: usize,
    pub lines: &'a [CacheLine],
}

impl fmt::Display for SetView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "set {}:", self.set_index)?;
        for (i, l) in self.lines.iter().enumerate() {
            let index = self.first_line + i;
            match (l.block(), l.insertion_order()) {
                (Some(block), Some(order)) => {
                    writeln!(f, "  {index:03} 1 {block} (fill #{order})")?
                }
                _ => writeln!(f, "  {index:03} 0")?,
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct Summary {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub accesses: u64,
    pub hit_ratio: f64,
}

impl From<CacheStat> for Summary {
    fn from(s: CacheStat) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            evictions: s.evictions,
            accesses: s.accesses(),
            hit_ratio: s.hit_ratio(),
        }
    }
}
