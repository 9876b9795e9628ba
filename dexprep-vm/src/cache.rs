//! The cache-container open/write protocol: acquires an exclusive file
//! lock, detects the unlinked-and-replaced race, validates the
//! dependency manifest against the running VM's view of the world, and
//! on success writes the rewritten image back with a fresh manifest and
//! checksum.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use dexprep_image::container::{
    decode_opt_chunks, rolling_checksum, ContainerHeader, DependencyManifest, OptChunk,
};

use crate::error::PrepareError;

/// A thin wrapper over `flock(2)`: a small struct around one syscall
/// rather than a dedicated file-locking crate.
pub struct FileLock {
    file: File,
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn unlock(file: &File) {
        let fd = file.as_raw_fd();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }

    pub fn inode(file: &File) -> io::Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(file.metadata()?.ino())
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub fn lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn unlock(_file: &File) {}

    pub fn inode(_file: &File) -> io::Result<u64> {
        Ok(0)
    }
}

impl FileLock {
    /// Acquires an exclusive lock on an already-open file.
    pub fn acquire(file: File) -> std::io::Result<Self> {
        sys::lock_exclusive(&file)?;
        Ok(FileLock { file })
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    fn inode(&self) -> std::io::Result<u64> {
        sys::inode(&self.file)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        sys::unlock(&self.file);
    }
}

/// The outcome of opening a cache file: either a fresh, empty container
/// ready to be populated, or a validated existing one.
pub enum OpenOutcome {
    New(FileLock),
    Valid {
        lock: FileLock,
        header: ContainerHeader,
        manifest: DependencyManifest,
        opt_chunks: Vec<OptChunk>,
    },
}

const RETRY_SLEEP: Duration = Duration::from_millis(5);
const MAX_RETRIES: u32 = 8;

/// Opens `path`, handling the unlinked-and-replaced race by retrying a
/// bounded number of times.
pub fn open(path: &Path, actual: &DependencyManifest) -> Result<OpenOutcome, PrepareError> {
    for _ in 0..MAX_RETRIES {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let mut lock = FileLock::acquire(file)?;

        let fd_inode = lock.inode()?;
        let path_inode = sys::inode(&File::open(path)?)?;
        if fd_inode != path_inode {
            drop(lock);
            std::thread::sleep(RETRY_SLEEP);
            continue;
        }

        let len = lock.file().metadata()?.len();
        if len == 0 {
            return Ok(OpenOutcome::New(lock));
        }

        let mut bytes = Vec::new();
        lock.file().seek(SeekFrom::Start(0))?;
        lock.file().read_to_end(&mut bytes)?;

        let header = match ContainerHeader::decode(&bytes) {
            Ok(h) => h,
            Err(_) => {
                discard(&mut lock, path)?;
                return Ok(OpenOutcome::New(lock));
            }
        };

        let deps_region = bytes
            .get(header.deps_offset as usize..(header.deps_offset + header.deps_length) as usize)
            .ok_or_else(|| PrepareError::InternalError("cache deps region out of bounds".to_string()))?;
        let manifest = match DependencyManifest::decode(deps_region) {
            Ok(m) => m,
            Err(_) => {
                discard(&mut lock, path)?;
                return Ok(OpenOutcome::New(lock));
            }
        };

        if manifest.is_stale_against(actual) {
            discard(&mut lock, path)?;
            return Ok(OpenOutcome::New(lock));
        }

        let opt_region = bytes
            .get(header.opt_offset as usize..(header.opt_offset + header.opt_length) as usize)
            .ok_or_else(|| PrepareError::InternalError("cache opt region out of bounds".to_string()))?;
        let opt_chunks = match decode_opt_chunks(opt_region) {
            Ok(chunks) => chunks,
            Err(_) => {
                discard(&mut lock, path)?;
                return Ok(OpenOutcome::New(lock));
            }
        };

        return Ok(OpenOutcome::Valid { lock, header, manifest, opt_chunks });
    }
    Err(PrepareError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "cache file repeatedly replaced while opening",
    )))
}

/// Discards a stale or corrupt cache file: unlink the pathname first, so
/// processes still mapping the old fd keep seeing the old bytes, then
/// truncate the still-open fd to zero so a fresh write starts clean.
fn discard(lock: &mut FileLock, path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    lock.file().set_len(0)?;
    Ok(())
}

/// Writes the finalized container: image, then 8-byte-aligned deps
/// region, then chunked opt region, then the header with its rolling
/// checksum, `fsync`-ing before the header is made visible.
pub fn write_container(
    lock: &mut FileLock,
    image: &[u8],
    manifest: &DependencyManifest,
    opt_chunks: &[OptChunk],
) -> Result<(), PrepareError> {
    const HEADER_LEN: u64 = 40;
    let image_offset = HEADER_LEN;
    let image_length = image.len() as u32;

    let mut deps_offset = image_offset + image_length as u64;
    deps_offset = (deps_offset + 7) / 8 * 8;
    let deps_bytes = manifest.encode();
    let deps_length = deps_bytes.len() as u32;

    let opt_offset = deps_offset + deps_length as u64;
    let opt_bytes = dexprep_image::container::encode_opt_chunks(opt_chunks);
    let opt_length = opt_bytes.len() as u32;

    let file = lock.file();
    file.set_len(0)?;
    file.seek(SeekFrom::Start(image_offset))?;
    file.write_all(image)?;
    file.seek(SeekFrom::Start(deps_offset))?;
    file.write_all(&deps_bytes)?;
    file.seek(SeekFrom::Start(opt_offset))?;
    file.write_all(&opt_bytes)?;

    let checksum = rolling_checksum(&deps_bytes, &opt_bytes);
    let header = ContainerHeader {
        version: ContainerHeader::empty().version,
        image_offset: image_offset as u32,
        image_length,
        deps_offset: deps_offset as u32,
        deps_length,
        opt_offset: opt_offset as u32,
        opt_length,
        flags: 0,
        deps_opt_checksum: checksum,
    };

    file.sync_all()?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexprep_image::container::BootClasspathEntry;

    fn manifest() -> DependencyManifest {
        DependencyManifest {
            source_mtime: 100,
            source_crc: 0xABCD,
            vm_build_number: 1,
            boot_classpath: vec![BootClasspathEntry {
                name: "core.dex".to_string(),
                sha1: [1; 20],
            }],
        }
    }

    #[test]
    fn opening_a_fresh_path_signals_new() {
        let dir = std::env::temp_dir().join(format!("dexprep-cache-test-{}", std::process::id()));
        let outcome = open(&dir, &manifest()).unwrap();
        assert!(matches!(outcome, OpenOutcome::New(_)));
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn write_then_reopen_round_trips_the_manifest() {
        let path = std::env::temp_dir().join(format!("dexprep-cache-roundtrip-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let m = manifest();
        {
            let outcome = open(&path, &m).unwrap();
            let OpenOutcome::New(mut lock) = outcome else {
                panic!("expected a fresh cache file");
            };
            write_container(&mut lock, b"image-bytes", &m, &[]).unwrap();
        }
        let outcome = open(&path, &m).unwrap();
        match outcome {
            OpenOutcome::Valid { manifest, opt_chunks, .. } => {
                assert_eq!(manifest, m);
                assert!(opt_chunks.is_empty());
            }
            OpenOutcome::New(_) => panic!("expected the freshly written cache to validate"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn stale_manifest_triggers_rebuild_signal() {
        let path = std::env::temp_dir().join(format!("dexprep-cache-stale-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let m = manifest();
        {
            let outcome = open(&path, &m).unwrap();
            let OpenOutcome::New(mut lock) = outcome else {
                panic!("expected a fresh cache file");
            };
            write_container(&mut lock, b"image-bytes", &m, &[]).unwrap();
        }
        let mut stale = m.clone();
        stale.source_crc = 0xFFFF;
        let outcome = open(&path, &stale).unwrap();
        assert!(matches!(outcome, OpenOutcome::New(_)));
        let _ = std::fs::remove_file(&path);
    }
}
