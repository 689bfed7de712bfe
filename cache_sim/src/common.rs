use std::{collections::HashMap, fmt};

use bitmask_enum::bitmask;

use crate::{
    addr::{Addr, BlockAddr},
    cache::Outcome,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStep {
    step: Option<usize>,
}

impl RunStep {
    pub fn new(step: Option<usize>) -> Self {
        Self { step }
    }

    pub fn get_step(&self) -> usize {
        self.step.unwrap_or(1)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub enum ExecuteMode {
    #[default]
    Run,
    /// replay until the next record is `addr`
    SkipUntil {
        addr: Addr,
    },
    RunStep(RunStep),
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteMode::Run => write!(f, "running simply"),
            ExecuteMode::SkipUntil { addr } => write!(f, "running until {addr}"),
            ExecuteMode::RunStep(r) => {
                write!(f, "step execution by {}", r.get_step())
            }
        }
    }
}

/// stops replay before `block` is accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakPoint {
    pub block: BlockAddr,
}

impl BreakPoint {
    pub fn new(block: BlockAddr) -> Self {
        Self { block }
    }
}

impl fmt::Display for BreakPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.block)
    }
}

impl std::borrow::Borrow<BlockAddr> for BreakPoint {
    fn borrow(&self) -> &BlockAddr {
        &self.block
    }
}

#[derive(Default)]
pub struct SimulationOption {
    pub mode: ExecuteMode,
    pub breakpoints: HashMap<BlockAddr, BreakPoint>,
    /// keyed by set index
    pub spies: HashMap<usize, Spy>,
}

#[bitmask(u8)]
pub enum SpyWatchKind {
    Hit,
    Miss,
}

impl SpyWatchKind {
    pub fn matches(self, outcome: Outcome) -> bool {
        self.contains(outcome.into())
    }
}

impl From<Outcome> for SpyWatchKind {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Hit => Self::Hit,
            Outcome::Miss => Self::Miss,
        }
    }
}

impl fmt::Display for SpyWatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::Hit) {
            write!(f, "hit")?;
            if self.contains(Self::Miss) {
                write!(f, "/miss")?;
            }
        } else if self.contains(Self::Miss) {
            write!(f, "miss")?;
        }
        Ok(())
    }
}

/// stops replay after an access to `set_index` whose outcome is in `kind`
#[derive(Debug, Clone, Copy)]
pub struct Spy {
    pub kind: SpyWatchKind,
    pub set_index: usize,
}

impl fmt::Display for Spy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of set {}", self.kind, self.set_index)
    }
}
