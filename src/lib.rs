pub mod collect;
pub mod index;
pub mod matching;
pub mod pool;
pub mod postings;
pub mod reading;
pub mod schema;
pub mod scoring;
pub mod searcher;
pub mod segment;
pub mod spans;
pub mod storage;
pub mod structfile;
pub mod writer;

#[macro_use]
extern crate serde_derive;

use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use std::{io, str::Utf8Error};

/// Per-segment document number; dense in `0..doc_count`.
/// Multi-segment readers translate these through per-segment offsets.
pub type DocNum = u32;

#[derive(Debug)]
pub enum Error {
    /// No table-of-contents file exists; the index has never been committed.
    EmptyIndex,
    /// The TOC carries a format tag this build does not understand.
    IndexVersion(i32),
    /// The TOC header's size/sentinel probe does not match this platform.
    ArchMismatch,
    LockTimeout(String),
    TermNotFound(String, String),
    UnknownField(String),
    FieldConfig(String),
    /// A matcher movement method was called after exhaustion.
    ReadTooFar,
    /// Quality methods called on a matcher tree that cannot bound scores.
    NoQualityAvailable,
    /// Re-deleting a deleted docnum, or un-deleting a live one.
    DeleteState(DocNum),
    DocNumOutOfRange(DocNum),
    FileNotFound(String),
    FileExists(String),
    SchemaFrozen,
    IO(io::Error),
    Json(serde_json::Error),
    Utf8DecodeError(Utf8Error),
    Corrupt(String),
    Context(String, Box<Error>),
}

impl Error {
    pub fn with_context<S>(self, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Context(msg.into(), Box::new(self))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error::Utf8DecodeError(err)
    }
}
