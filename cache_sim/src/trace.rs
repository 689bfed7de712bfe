use std::fmt::Display;

use thiserror::Error;

use crate::addr::{Addr, InvalidAddressError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: blank record")]
    Blank { line: usize },
    #[error("line {line}: invalid record")]
    Record {
        line: usize,
        source: InvalidAddressError,
    },
}

/// Addresses to replay, in order. One hexadecimal address per line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Trace {
    seq: Vec<Addr>,
}

impl Trace {
    pub fn new(seq: Vec<Addr>) -> Self {
        Self { seq }
    }

    pub fn parse(trace_str: &str) -> Result<Self, TraceError> {
        let seq = trace_str
            .lines()
            .enumerate()
            .map(|(i, record)| {
                let line = i + 1;
                if record.trim().is_empty() {
                    return Err(TraceError::Blank { line });
                }
                record
                    .parse()
                    .map_err(|source| TraceError::Record { line, source })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { seq })
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<Addr> {
        self.seq.get(index).copied()
    }
    pub fn as_slice(&self) -> &[Addr] {
        &self.seq
    }
}

impl FromIterator<Addr> for Trace {
    fn from_iter<I: IntoIterator<Item = Addr>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trace [")?;
        for (i, a) in self.seq.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, "]")
    }
}
