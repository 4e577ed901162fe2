//! Write-ahead log.
//!
//! Every commit is logged before the store is touched: one `Begin`, one
//! `Put`/`Delete` per mutation (canonical and projection keys alike), and
//! one `Commit` carrying the sequence number, flushed as a unit. Recovery
//! replays only transactions whose `Commit` record made it to disk;
//! anything after the last complete record is a torn tail and is cut off.

pub(crate) mod crc;
mod reader;
mod record;
mod writer;

pub(crate) use reader::WalReader;
pub(crate) use record::WalRecord;
pub(crate) use writer::WalWriter;
