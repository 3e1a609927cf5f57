use std::io::{self, Read, Seek, SeekFrom};

use fleet_core::{FleetError, ObjectId, Result};
use rusqlite::blob::Blob;
use rusqlite::{Connection, DatabaseName, Transaction, TransactionBehavior};
use tracing::warn;

use crate::session::SqlContext;

/// Forward-only reader over one stored blob.
///
/// The stream owns a read transaction for its whole lifetime so the blob
/// cannot change underneath it. Dropping the stream commits that
/// transaction, since statements run on the session meanwhile join it.
/// While a stream is open its session cannot begin another transaction.
pub struct FileStream<'conn> {
    blob: Option<Blob<'conn>>,
    tx: Option<Transaction<'conn>>,
    len: u64,
    pos: u64,
}

impl<'conn> FileStream<'conn> {
    pub(crate) fn open(conn: &'conn Connection, object: ObjectId) -> Result<Self> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred).ctx("begin read transaction")?;
        let blob = conn
            .blob_open(DatabaseName::Main, "blob", "data", object.get(), true)
            .ctx("open blob")?;
        let len = blob.len() as u64;
        Ok(Self { blob: Some(blob), tx: Some(tx), len, pos: 0 })
    }

    /// Stored length in bytes (compressed length for compressed files).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(FleetError::Unsupported("set_len"))
    }
}

impl Read for FileStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(blob) = self.blob.as_mut() else {
            return Ok(0);
        };
        let n = blob.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileStream<'_> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "download streams cannot seek"))
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

impl Drop for FileStream<'_> {
    fn drop(&mut self) {
        // the blob handle must close before the transaction can commit
        drop(self.blob.take());
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.commit() {
                warn!(error = %e, "download transaction failed to commit; writes made during the stream are lost");
            }
        }
    }
}
