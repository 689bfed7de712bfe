use std::{fmt, str::FromStr};

use nom::{
    bytes::complete::tag_no_case,
    character::complete::{char, hex_digit1, multispace0},
    combinator::{all_consuming, map_res, opt},
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde::Serialize;
use thiserror::Error;

/// full byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Addr(u64);

impl Addr {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
    pub fn inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// address of a memory block (`Addr / line_size`)
///
/// ```
/// use cache_sim::addr::BlockAddr;
///
/// assert_eq!(BlockAddr::new(0x1a2b3).to_string(), "0x0001A2B3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockAddr(u64);

impl BlockAddr {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
    pub fn inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAddressError {
    #[error("address {0} is negative")]
    Negative(i64),
    #[error("`{0}` is not a hexadecimal address")]
    Unparsable(String),
}

impl TryFrom<i64> for Addr {
    type Error = InvalidAddressError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        u64::try_from(v)
            .map(Addr)
            .map_err(|_| InvalidAddressError::Negative(v))
    }
}

fn hex_u64(input: &str) -> IResult<&str, u64> {
    map_res(preceded(opt(tag_no_case("0x")), hex_digit1), |digits| {
        u64::from_str_radix(digits, 16)
    })(input)
}

/// `(sign, magnitude)`; a sign is only accepted to report it as negative
fn hex_record(input: &str) -> IResult<&str, (Option<char>, u64)> {
    all_consuming(delimited(
        multispace0,
        pair(opt(char('-')), hex_u64),
        multispace0,
    ))(input)
}

impl FromStr for Addr {
    type Err = InvalidAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparsable = || InvalidAddressError::Unparsable(s.trim().to_owned());
        match hex_record(s) {
            Ok((_, (None, v))) => Ok(Addr(v)),
            Ok((_, (Some(_), v))) => i64::try_from(v)
                .map_err(|_| unparsable())
                .and_then(|v| Addr::try_from(-v)),
            Err(_) => Err(unparsable()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposed {
    pub block: BlockAddr,
    pub set_index: usize,
}

/// Splits `addr` into its block address and the set that block maps to.
/// `line_size` and `set_count` must be non-zero; geometry validation
/// guarantees this for every cache.
#[inline]
pub fn decompose(addr: Addr, line_size: usize, set_count: usize) -> Decomposed {
    let block = addr.0 / line_size as u64;
    let set_index = (block % set_count as u64) as usize;
    Decomposed {
        block: BlockAddr(block),
        set_index,
    }
}
