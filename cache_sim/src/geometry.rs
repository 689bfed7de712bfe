use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::addr::{self, Addr, Decomposed};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{param} must be positive, but got {value}")]
    NonPositive { param: &'static str, value: i64 },
    #[error("cache size {cache_size} is not a multiple of line size {line_size}")]
    CacheSizeNotMultiple { cache_size: usize, line_size: usize },
    #[error("line count {line_count} is not a multiple of group size {group_size}")]
    LineCountNotMultiple { line_count: usize, group_size: usize },
}

/// parameters as written by the user, before validation
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct RawGeometry {
    pub cache_size: i64,
    pub line_size: i64,
    pub group_size: i64,
}

/// Validated shape of a set-associative cache.
///
/// `line_count = cache_size / line_size` and `set_count = line_count / group_size`
/// are both exact and non-zero.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawGeometry")]
pub struct Geometry {
    cache_size: usize,
    line_size: usize,
    group_size: usize,
    #[serde(skip_serializing)]
    line_count: usize,
    #[serde(skip_serializing)]
    set_count: usize,
}

fn positive(param: &'static str, value: i64) -> Result<usize, ConfigError> {
    match usize::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::NonPositive { param, value }),
    }
}

impl TryFrom<RawGeometry> for Geometry {
    type Error = ConfigError;

    fn try_from(
        RawGeometry {
            cache_size,
            line_size,
            group_size,
        }: RawGeometry,
    ) -> Result<Self, Self::Error> {
        let cache_size = positive("cache size", cache_size)?;
        let line_size = positive("line size", line_size)?;
        let group_size = positive("group size", group_size)?;
        Self::new(cache_size, line_size, group_size)
    }
}

impl Geometry {
    pub fn new(
        cache_size: usize,
        line_size: usize,
        group_size: usize,
    ) -> Result<Self, ConfigError> {
        for (param, v) in [
            ("cache size", cache_size),
            ("line size", line_size),
            ("group size", group_size),
        ] {
            if v == 0 {
                return Err(ConfigError::NonPositive { param, value: 0 });
            }
        }
        if cache_size % line_size != 0 {
            return Err(ConfigError::CacheSizeNotMultiple {
                cache_size,
                line_size,
            });
        }
        let line_count = cache_size / line_size;
        if line_count % group_size != 0 {
            return Err(ConfigError::LineCountNotMultiple {
                line_count,
                group_size,
            });
        }
        Ok(Self {
            cache_size,
            line_size,
            group_size,
            line_count,
            set_count: line_count / group_size,
        })
    }

    pub fn deser(file: impl std::io::Read) -> Result<Self> {
        Ok(serde_json::from_reader(file)?)
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
    pub fn line_size(&self) -> usize {
        self.line_size
    }
    pub fn group_size(&self) -> usize {
        self.group_size
    }
    pub fn line_count(&self) -> usize {
        self.line_count
    }
    pub fn set_count(&self) -> usize {
        self.set_count
    }

    #[inline]
    pub fn decompose(&self, addr: Addr) -> Decomposed {
        addr::decompose(addr, self.line_size, self.set_count)
    }

    /// line indices owned by set `set_index`
    #[inline]
    pub fn set_range(&self, set_index: usize) -> std::ops::Range<usize> {
        let start = set_index * self.group_size;
        start..start + self.group_size
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes, {} bytes/line, {}-way ({} lines in {} sets)",
            self.cache_size, self.line_size, self.group_size, self.line_count, self.set_count
        )
    }
}
