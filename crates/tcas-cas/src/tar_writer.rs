//! Tar archive building and entry reads. Member offsets point at the
//! header block, so a read seeks straight to an entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Archive, Builder, EntryType, Header};
use tcas_digest::DigestWriter;
use tcas_types::DigestType;

use crate::layout;

/// Size and digest of a completed archive file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishedArchive {
    pub size: u64,
    pub digest: String,
}

/// Sequential tar writer.
///
/// Entries go to `<archive>.tmp`; [`finish`](Self::finish) writes the tar
/// trailer, fsyncs and renames to the final path, so a complete archive file
/// never exists in a partial state.
pub struct TarArchiveBuilder {
    archive_id: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    builder: Builder<DigestWriter<BufWriter<File>>>,
}

impl TarArchiveBuilder {
    pub fn create(
        archive_id: impl Into<String>,
        tmp_path: PathBuf,
        final_path: PathBuf,
        digest_type: DigestType,
    ) -> io::Result<Self> {
        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(&tmp_path)?;
        let builder = Builder::new(DigestWriter::new(BufWriter::new(file), digest_type));
        Ok(Self {
            archive_id: archive_id.into(),
            tmp_path,
            final_path,
            builder,
        })
    }

    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    /// Bytes written so far, trailer excluded.
    pub fn bytes_written(&self) -> u64 {
        self.builder.get_ref().bytes_written()
    }

    /// Append one entry named `name` with exactly `size` bytes from `data`.
    /// Returns the offset of the entry's first header block.
    pub fn append(&mut self, name: &str, size: u64, data: impl Read) -> io::Result<u64> {
        let offset = self.bytes_written();
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        let mut data = ExactReader {
            inner: data.take(size),
            remaining: size,
        };
        self.builder.append_data(&mut header, name, &mut data)?;
        Ok(offset)
    }

    pub fn finish(self) -> io::Result<FinishedArchive> {
        let writer = self.builder.into_inner()?;
        let (mut buffered, digest, size) = writer.finish();
        buffered.flush()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        if let Some(parent) = self.final_path.parent() {
            layout::sync_dir(parent)?;
        }
        Ok(FinishedArchive { size, digest })
    }

    /// Drop the partial archive.
    pub fn abort(self) -> io::Result<()> {
        let tmp_path = self.tmp_path.clone();
        drop(self);
        layout::remove_if_exists(&tmp_path).map(|_| ())
    }
}

/// Fails with `UnexpectedEof` if the source ends before `remaining` bytes;
/// the tar builder would otherwise pad a short entry silently.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended {} bytes early", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Open the entry whose header starts at `offset` in an archive file.
/// Returns the entry name and a reader limited to its content.
pub fn open_entry(archive_path: &Path, offset: u64) -> io::Result<(String, io::Take<File>)> {
    let mut file = File::open(archive_path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut archive = Archive::new(file);
    let (name, data_position, size) = {
        let mut entries = archive.entries()?;
        let entry = entries
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no tar entry at offset"))??;
        let name = entry.path()?.to_string_lossy().into_owned();
        (name, entry.raw_file_position(), entry.size())
    };
    let mut file = archive.into_inner();
    file.seek(SeekFrom::Start(offset + data_position))?;
    Ok((name, file.take(size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcas_digest::Digester;

    fn builder(dir: &Path) -> TarArchiveBuilder {
        TarArchiveBuilder::create(
            "a.tar",
            dir.join("a.tar.tmp"),
            dir.join("a.tar"),
            DigestType::Sha256,
        )
        .unwrap()
    }

    #[test]
    fn entries_are_readable_by_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(dir.path());
        let long_name = "n".repeat(150);

        let o1 = b.append("first", 5, &b"hello"[..]).unwrap();
        let o2 = b.append(&long_name, 3, &b"abc"[..]).unwrap();
        let o3 = b.append("third", 0, &b""[..]).unwrap();
        assert_eq!(o1, 0);
        assert!(o2 > o1 && o3 > o2);

        let finished = b.finish().unwrap();
        let path = dir.path().join("a.tar");
        assert!(!dir.path().join("a.tar.tmp").exists());
        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len() as u64, finished.size);
        assert_eq!(finished.digest, Digester::digest_hex(DigestType::Sha256, &on_disk));

        for (offset, name, content) in [(o1, "first", "hello"), (o2, long_name.as_str(), "abc"), (o3, "third", "")] {
            let (entry_name, mut reader) = open_entry(&path, offset).unwrap();
            assert_eq!(entry_name, name);
            let mut data = String::new();
            reader.read_to_string(&mut data).unwrap();
            assert_eq!(data, content);
        }
    }

    #[test]
    fn archive_is_a_standard_tar() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(dir.path());
        b.append("x", 1, &b"1"[..]).unwrap();
        b.append("y", 2, &b"22"[..]).unwrap();
        b.finish().unwrap();

        let mut archive = Archive::new(File::open(dir.path().join("a.tar")).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn short_source_fails_the_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(dir.path());
        assert!(b.append("x", 10, &b"abc"[..]).is_err());
        b.abort().unwrap();
        assert!(!dir.path().join("a.tar.tmp").exists());
        assert!(!dir.path().join("a.tar").exists());
    }
}
