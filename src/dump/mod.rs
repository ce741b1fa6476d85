//! Streaming access to the CSV-ized MediaWiki dump tables.
//!
//! A [`Dumps`] implementation hands out raw byte streams by table name; the
//! sources in [`source`] decode them lazily into pages and links.

mod source;

pub use source::{
    CategoryLinkRecords, LinkSlice, LinkSource, PageLinkRecords, PageRecords, PageSlice,
    PageSource, RedirectRecords,
};

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

pub const PAGE_TABLE: &str = "pagetable";
pub const REDIRECT_TABLE: &str = "redirecttable";
pub const CATEGORYLINKS_TABLE: &str = "categorylinkstable";
pub const PAGELINKS_TABLE: &str = "pagelinkstable";

#[derive(Debug)]
pub enum DumpError {
    Io(std::io::Error),
    Csv(csv::Error),
    UnknownTable(String),
    Truncated {
        table: &'static str,
        expected: usize,
        found: usize,
    },
    Field {
        table: &'static str,
        what: &'static str,
        value: String,
    },
}

impl Error for DumpError {}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Csv(e) => e.fmt(f),
            Self::UnknownTable(name) => write!(f, "no dump table named \"{}\"", name),
            Self::Truncated {
                table,
                expected,
                found,
            } => write!(
                f,
                "{}: expected at least {} fields, found {}",
                table, expected, found
            ),
            Self::Field { table, what, value } => {
                write!(f, "{}: cannot parse {} from \"{}\"", table, what, value)
            }
        }
    }
}

impl From<std::io::Error> for DumpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for DumpError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

/// Named access to the dump tables as raw CSV byte streams.
pub trait Dumps {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, DumpError>;
}

/// Dump tables laid out on disk as `<dir>/<name>.csv`.
pub struct DumpFiles {
    dir: PathBuf,
}

impl DumpFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DumpFiles { dir: dir.into() }
    }
}

impl Dumps for DumpFiles {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, DumpError> {
        let path = self.dir.join(format!("{}.csv", name));
        Ok(Box::new(File::open(path)?))
    }
}

/// In-memory dump tables, for tests and handcrafted fixtures.
#[derive(Default)]
pub struct MemoryDumps {
    tables: HashMap<String, String>,
}

impl MemoryDumps {
    pub fn new() -> Self {
        MemoryDumps::default()
    }

    pub fn insert(&mut self, name: &str, csv: &str) {
        self.tables.insert(name.to_string(), csv.to_string());
    }
}

impl Dumps for MemoryDumps {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, DumpError> {
        match self.tables.get(name) {
            Some(table) => Ok(Box::new(Cursor::new(table.clone().into_bytes()))),
            None => Err(DumpError::UnknownTable(name.to_string())),
        }
    }
}
