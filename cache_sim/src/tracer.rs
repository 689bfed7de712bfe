use std::{fmt, ops::Range};

use crate::{
    addr::{Addr, BlockAddr},
    cache::Outcome,
};

/// the line chosen on a miss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub line: usize,
    /// block previously resident in `line`; `None` if the line was invalid
    pub evicted: Option<BlockAddr>,
    pub insertion_order: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub addr: Addr,
    pub block: BlockAddr,
    pub set_index: usize,
    pub set_lines: Range<usize>,
    pub outcome: Outcome,
    pub fill: Option<Fill>,
}

pub trait AccessTracer {
    fn on_access(&mut self, event: &AccessEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl AccessTracer for NoTrace {
    #[inline]
    fn on_access(&mut self, _: &AccessEvent) {}
}

impl fmt::Display for AccessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{addr}: block {block} -> set {set} (lines {start}..{end}): {outcome}",
            addr = self.addr,
            block = self.block,
            set = self.set_index,
            start = self.set_lines.start,
            end = self.set_lines.end,
            outcome = self.outcome,
        )?;
        if let Some(Fill {
            line,
            evicted,
            insertion_order,
        }) = self.fill
        {
            write!(f, ", line {line:03} filled #{insertion_order}")?;
            if let Some(old) = evicted {
                write!(f, " (evicted {old})")?;
            }
        }
        Ok(())
    }
}

/// Reports the arithmetic of every access through `log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl AccessTracer for LogTracer {
    fn on_access(&mut self, e: &AccessEvent) {
        log::debug!("{e}");
    }
}

/// Keeps every event while enabled; useful for inspecting a replay after the fact.
#[derive(Debug, Clone)]
pub struct RecordingTracer {
    events: Vec<AccessEvent>,
    enabled: bool,
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            enabled: true,
        }
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled
    }
    pub fn events(&self) -> &[AccessEvent] {
        &self.events
    }
    pub fn clear(&mut self) {
        self.events.clear()
    }
    pub fn take(&mut self) -> Vec<AccessEvent> {
        std::mem::take(&mut self.events)
    }
}

impl AccessTracer for RecordingTracer {
    fn on_access(&mut self, event: &AccessEvent) {
        if self.enabled {
            self.events.push(event.clone());
        }
    }
}

impl<T: AccessTracer + ?Sized> AccessTracer for &mut T {
    fn on_access(&mut self, event: &AccessEvent) {
        (**self).on_access(event)
    }
}
