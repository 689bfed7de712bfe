//! Boxed statistics blocks rendered within a maximum width.

use std::fmt;

/// For views that lay out entries in rows of `chunk_size`.
pub trait Width {
    fn width_by_chunk_size(chunk_size: usize) -> usize;
    /// largest chunk size fitting into `max_width` (at least 1)
    fn chunk_size(max_width: usize) -> usize {
        (1..)
            .take_while(|&n| n == 1 || Self::width_by_chunk_size(n) <= max_width)
            .last()
            .unwrap_or(1)
    }
}

pub trait Stat {
    fn view(&self, max_width: usize) -> Box<dyn StatView + '_>;
}

pub trait StatView: fmt::Display {
    /// header of stat
    fn header(&self) -> &'static str;
    /// body width
    fn width(&self) -> usize;
}

pub trait AddStats {
    /// add stat to `buf`.
    fn add_stats(&self, buf: &mut Stats);
}

#[derive(Default)]
pub struct Stats {
    stats: Vec<Box<dyn Stat>>,
}

impl Stats {
    pub fn push(&mut self, stat: Box<dyn Stat>) {
        self.stats.push(stat)
    }
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
    pub fn view(&self, max_width: usize) -> StatsView<'_> {
        StatsView {
            views: self.stats.iter().map(|s| s.view(max_width)).collect(),
        }
    }
}

impl Extend<Box<dyn Stat>> for Stats {
    fn extend<T: IntoIterator<Item = Box<dyn Stat>>>(&mut self, iter: T) {
        self.stats.extend(iter)
    }
}

pub struct StatsView<'s> {
    views: Vec<Box<dyn StatView + 's>>,
}

impl fmt::Display for StatsView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const TITLE: &str = " statistics ";
        let width = self
            .views
            .iter()
            .map(|s| s.header().len().max(s.width()))
            .fold(TITLE.len() + 4, usize::max);
        writeln!(f, "{TITLE:-^width$}")?;
        for sv in &self.views {
            writeln!(f, "{}:", sv.header())?;
            write!(f, "{sv}")?;
        }
        write!(f, "{:-<width$}", "")
    }
}
