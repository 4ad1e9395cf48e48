pub use std::path::{Path, PathBuf};
pub use std::io::{BufRead, BufReader};
pub use std::fs::File;
use ahash::AHasher;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::io;
use thiserror::Error;

/// `lmtrace` never records more frames than this per line.
pub const MAX_FRAMES: usize = 16;

pub type OpCounts = IndexMap<Op, usize, BuildHasherDefault<AHasher>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Malloc,
    Calloc,
    Realloc,
    Free,
}

impl Op {
    fn from_token(token: &str) -> Option<Op> {
        match token {
            "malloc"    => Some(Op::Malloc),
            "calloc"    => Some(Op::Calloc),
            "realloc"   => Some(Op::Realloc),
            "free"      => Some(Op::Free),
            _           => None,
        }
    }

    /// Fixed fields following the operation's name.
    fn arity(&self) -> usize {
        match self {
            Op::Malloc  => 2,
            Op::Calloc  => 3,
            Op::Realloc => 3,
            Op::Free    => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Malloc  => "malloc",
            Op::Calloc  => "calloc",
            Op::Realloc => "realloc",
            Op::Free    => "free",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments and result of one traced call. Addresses are plain
/// integers, null being 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Call {
    Malloc  { size: usize, result: usize },
    Calloc  { nobj: usize, size: usize, result: usize },
    Realloc { old: usize, size: usize, result: usize },
    Free    { target: usize },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Malloc { .. }     => Op::Malloc,
            Call::Calloc { .. }     => Op::Calloc,
            Call::Realloc { .. }    => Op::Realloc,
            Call::Free { .. }       => Op::Free,
        }
    }
}

/// One well-formed trace line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Record {
    #[serde(flatten)]
    pub call:   Call,
    /// Raw return addresses, innermost first. Feed them to
    /// `addr2line` to get names back.
    pub frames: Vec<usize>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown operation `{0}`")]
    UnknownOp(String),
    #[error("`{op}` takes {expected} fields, found {found}")]
    MissingFields { op: Op, expected: usize, found: usize },
    #[error("`{token}` is not a valid {what}")]
    BadField { what: &'static str, token: String },
    #[error("{0} frames, more than the tracer ever records")]
    TooManyFrames(usize),
}

// `str::parse` and `from_str_radix` both take a leading `+`, which
// the tracer never prints.
fn digits(token: &str, radix: u32) -> Option<usize> {
    if token.is_empty() || !token.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    usize::from_str_radix(token, radix).ok()
}

fn parse_size(token: &str) -> Result<usize, ParseError> {
    digits(token, 10).ok_or_else(|| ParseError::BadField { what: "size", token: token.to_owned() })
}

fn parse_addr(token: &str, what: &'static str) -> Result<usize, ParseError> {
    //! Addresses come as glibc's `%p` prints them.
    if token == "(nil)" {
        return Ok(0);
    }
    token
        .strip_prefix("0x")
        .and_then(|hex| digits(hex, 16))
        .ok_or_else(|| ParseError::BadField { what, token: token.to_owned() })
}

pub fn parse_line(line: &str) -> Result<Record, ParseError> {
    let mut fields = line.split(' ');
    let op = match fields.next() {
        Some("") | None => return Err(ParseError::Empty),
        Some(token)     => Op::from_token(token).ok_or_else(|| ParseError::UnknownOp(token.to_owned()))?,
    };
    let fixed: Vec<&str> = fields.by_ref().take(op.arity()).collect();
    if fixed.len() < op.arity() {
        return Err(ParseError::MissingFields { op, expected: op.arity(), found: fixed.len() });
    }
    let call = match op {
        Op::Malloc  => Call::Malloc {
            size:   parse_size(fixed[0])?,
            result: parse_addr(fixed[1], "result")?,
        },
        Op::Calloc  => Call::Calloc {
            nobj:   parse_size(fixed[0])?,
            size:   parse_size(fixed[1])?,
            result: parse_addr(fixed[2], "result")?,
        },
        Op::Realloc => Call::Realloc {
            old:    parse_addr(fixed[0], "address")?,
            size:   parse_size(fixed[1])?,
            result: parse_addr(fixed[2], "result")?,
        },
        Op::Free    => Call::Free {
            target: parse_addr(fixed[0], "address")?,
        },
    };
    let frames = fields
        .map(|token| parse_addr(token, "frame"))
        .collect::<Result<Vec<usize>, ParseError>>()?;
    if frames.len() > MAX_FRAMES {
        return Err(ParseError::TooManyFrames(frames.len()));
    }

    Ok(Record { call, frames })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    /// 1-based.
    pub line_no:    usize,
    pub error:      ParseError,
}

#[derive(Debug, Default)]
pub struct Report {
    pub lines:      usize,
    /// Well-formed lines per operation, in order of first appearance.
    pub counts:     OpCounts,
    pub malformed:  Vec<Malformed>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty()
    }

    pub fn well_formed(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Parses the whole trace, handing every well-formed record
/// to `on_record` as it goes.
pub fn check_with<R, F>(reader: R, mut on_record: F) -> io::Result<Report>
where R: BufRead, F: FnMut(&Record) -> io::Result<()> {
    let mut report = Report::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        report.lines += 1;
        match parse_line(&line) {
            Ok(record)  => {
                *report.counts.entry(record.call.op()).or_insert(0) += 1;
                on_record(&record)?;
            },
            Err(error)  => {
                report.malformed.push(Malformed { line_no: idx + 1, error });
            }
        }
    }

    Ok(report)
}

pub fn check<R: BufRead>(reader: R) -> io::Result<Report> {
    check_with(reader, |_| Ok(()))
}

pub fn check_file(path: &Path) -> io::Result<Report> {
    check(BufReader::new(File::open(path)?))
}
