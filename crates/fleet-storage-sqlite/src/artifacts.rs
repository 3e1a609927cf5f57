use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fleet_core::{
    is_precompressed, mime_for_path, File, FileId, FleetError, ObjectId, Result, GZIP_MIME,
};
use fleet_storage::ArtifactStore;
use rusqlite::blob::ZeroBlob;
use rusqlite::{params, DatabaseName};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::rows;
use crate::session::{expect_unique, is_unique_violation, query_unique, Session, SqlContext};
use crate::stream::FileStream;

/// Uploads larger than this are rejected before anything is written.
pub const MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Copy granularity between local files and stored blobs.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// The bytes that actually go into the blob table.
enum Staged {
    Original(PathBuf),
    Compressed(NamedTempFile),
}

impl Staged {
    fn path(&self) -> &Path {
        match self {
            Staged::Original(p) => p,
            Staged::Compressed(tmp) => tmp.path(),
        }
    }

    fn compressed_mime(&self) -> Option<&'static str> {
        match self {
            Staged::Original(_) => None,
            Staged::Compressed(_) => Some(GZIP_MIME),
        }
    }

    /// Removing the temporary file never fails the upload.
    fn cleanup(self) {
        if let Staged::Compressed(tmp) = self {
            let path = tmp.path().to_path_buf();
            if let Err(e) = tmp.close() {
                warn!(path = %path.display(), error = %e, "could not remove compressed temp file");
            }
        }
    }
}

fn md5_hex(path: &Path) -> Result<String> {
    let mut src = fs::File::open(path)?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(hex::encode(ctx.compute().0))
}

fn stage(path: &Path, mime: &str) -> Result<Staged> {
    if is_precompressed(mime) {
        return Ok(Staged::Original(path.to_path_buf()));
    }
    let tmp = NamedTempFile::new()?;
    let mut src = fs::File::open(path)?;
    let mut gz = GzEncoder::new(tmp.as_file(), Compression::default());
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        gz.write_all(&buf[..n])?;
    }
    gz.finish()?;
    Ok(Staged::Compressed(tmp))
}

impl Session {
    /// Stores the content unless `found`, the result of an earlier digest
    /// lookup, already names a row. An insert that loses the race to a
    /// concurrent upload of the same content returns the winner's row.
    fn store_or_reuse(&self, path: &Path, size: u64, md5: &str, hidden: bool, found: Option<File>) -> Result<File> {
        if let Some(existing) = found {
            debug!(path = %path.display(), md5, file = %existing.id, "content already stored");
            return Ok(existing);
        }
        match self.store_new(path, size, md5, hidden) {
            Err(FleetError::Conflict { .. }) => {
                debug!(md5, "upload raced a concurrent insert, retrying lookup");
                self.file_by_md5(md5)?.ok_or_else(|| FleetError::not_found("file", md5))
            }
            other => other,
        }
    }

    fn store_new(&self, path: &Path, size: u64, md5: &str, hidden: bool) -> Result<File> {
        let mime = mime_for_path(path);
        let staged = stage(path, mime)?;
        let stored = self.insert_blob(&staged, path, size, md5, mime, hidden);
        staged.cleanup();
        stored
    }

    fn insert_blob(&self, staged: &Staged, path: &Path, size: u64, md5: &str, mime: &str, hidden: bool) -> Result<File> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stored_len = fs::metadata(staged.path())?.len();
        let zero = i32::try_from(stored_len).map_err(|_| FleetError::SizeLimit {
            path: path.to_path_buf(),
            size: stored_len,
            limit: i32::MAX as u64,
        })?;

        let tx = self.begin()?;
        tx.execute("INSERT INTO blob(data) VALUES (?1)", [ZeroBlob(zero)])
            .ctx("create blob")?;
        let object = ObjectId(tx.last_insert_rowid());
        {
            let mut blob = tx
                .blob_open(DatabaseName::Main, "blob", "data", object.get(), false)
                .ctx("open blob for writing")?;
            let mut src = fs::File::open(staged.path())?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = src.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                blob.write_all(&buf[..n])?;
            }
        }

        let inserted = tx.execute(
            "INSERT INTO file(md5, object_id, size, mime, compressed_mime, hidden, filename)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![md5, object.get(), size as i64, mime, staged.compressed_mime(), hidden, filename],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(FleetError::Conflict { entity: "file", key: md5.to_string() })
            }
            Err(e) => return Err(FleetError::Transaction(format!("insert file: {e}"))),
        }
        let id = FileId(tx.last_insert_rowid());
        let file = expect_unique(&tx, "SELECT * FROM file WHERE id = ?1", [id.get()], "file", id, rows::file)?;
        tx.commit().ctx("commit upload")?;
        info!(
            filename = %file.filename,
            md5,
            size,
            stored = stored_len,
            compressed = file.compressed_mime.is_some(),
            file = %file.id,
            "stored file"
        );
        Ok(file)
    }

    /// Stream a file's original bytes, gunzipping when it was stored compressed.
    pub fn open_decoded(&self, file: &File) -> Result<Box<dyn Read + '_>> {
        let stream = self.download(file)?;
        if file.compressed_mime.is_some() {
            Ok(Box::new(GzDecoder::new(stream)))
        } else {
            Ok(Box::new(stream))
        }
    }
}

impl ArtifactStore for Session {
    type Reader<'a> = FileStream<'a>;

    fn upload(&self, path: &Path, hidden: bool) -> Result<File> {
        let size = fs::metadata(path)?.len();
        if size > MAX_UPLOAD_SIZE {
            return Err(FleetError::SizeLimit { path: path.to_path_buf(), size, limit: MAX_UPLOAD_SIZE });
        }
        let md5 = md5_hex(path)?;
        let found = self.file_by_md5(&md5)?;
        self.store_or_reuse(path, size, &md5, hidden, found)
    }

    fn file(&self, id: FileId) -> Result<File> {
        expect_unique(&self.conn, "SELECT * FROM file WHERE id = ?1", [id.get()], "file", id, rows::file)
    }

    fn file_by_md5(&self, md5: &str) -> Result<Option<File>> {
        query_unique(&self.conn, "SELECT * FROM file WHERE md5 = ?1", [md5], "file", md5, rows::file)
    }

    fn set_hidden(&self, id: FileId, hidden: bool) -> Result<()> {
        let changed = self
            .conn
            .execute("UPDATE file SET hidden = ?1 WHERE id = ?2", params![hidden, id.get()])
            .ctx("set hidden")?;
        if changed == 0 {
            return Err(FleetError::not_found("file", id));
        }
        Ok(())
    }

    fn download(&self, file: &File) -> Result<FileStream<'_>> {
        FileStream::open(&self.conn, file.object_id)
    }

    fn blob_size(&self, file: &File) -> Result<u64> {
        let len: i64 = expect_unique(
            &self.conn,
            "SELECT length(data) FROM blob WHERE id = ?1",
            [file.object_id.get()],
            "blob",
            file.object_id,
            |r| r.get(0),
        )?;
        Ok(len as u64)
    }

    fn size_of_file(&self, id: FileId) -> Result<u64> {
        let file = self.file(id)?;
        self.blob_size(&file)
    }
}
