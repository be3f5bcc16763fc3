//! On-disk content store.
//!
//! Chunks live under `blocks/<cid>/<index>.chunk` next to the CID's
//! `manifest.json`. Every write goes through a private directory under
//! `staging/` that is renamed into `blocks/` only once it is complete, so a
//! CID directory is either fully present or absent.

use crate::chunker::FileChunker;
use crate::cid::Cid;
use crate::error::{Result, StoreError};
use crate::manifest::Manifest;
use crate::tree_hash::IncrementalTreeHasher;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const BLOCKS_DIR: &str = "blocks";
const STAGING_DIR: &str = "staging";
const MANIFEST_FILE: &str = "manifest.json";

/// Content-addressed chunk store
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    chunker: FileChunker,
}

impl ContentStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// Leftover staging directories from an interrupted process are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(StoreError::InvalidChunkSize(chunk_size));
        }

        let root = root.into();
        fs::create_dir_all(root.join(BLOCKS_DIR))?;

        let staging = root.join(STAGING_DIR);
        if staging.exists() {
            for entry in fs::read_dir(&staging)? {
                let path = entry?.path();
                if let Err(e) = remove_path(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove stale staging entry");
                }
            }
        }
        fs::create_dir_all(&staging)?;

        Ok(Self {
            root,
            chunker: FileChunker::with_chunk_size(chunk_size),
        })
    }

    /// Store root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chunk size used for new content
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunker.chunk_size()
    }

    /// Chunk, hash and persist a local file
    ///
    /// Returns the CID and manifest. Adding content that is already stored
    /// leaves the store untouched and returns the same CID.
    ///
    /// # Errors
    ///
    /// - [`StoreError::FileNotFound`] if `path` is missing, unreadable or not a file
    /// - [`StoreError::Io`] if writing the chunks fails (nothing is published)
    pub fn add(&self, path: impl AsRef<Path>) -> Result<(Cid, Manifest)> {
        let path = path.as_ref();
        let not_found = || StoreError::FileNotFound(path.to_path_buf());

        let mut file = File::open(path).map_err(|_| not_found())?;
        let metadata = file.metadata().map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let chunk_size = self.chunker.chunk_size();
        let staging = StagingDir::create(&self.root)?;
        let mut hasher = IncrementalTreeHasher::new(chunk_size);
        let mut buffer = vec![0u8; chunk_size];
        let mut index = 0u64;

        loop {
            let filled = read_full(&mut file, &mut buffer).map_err(|e| {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    not_found()
                } else {
                    StoreError::Io(e)
                }
            })?;
            if filled == 0 {
                break;
            }

            let chunk = &buffer[..filled];
            hasher.update(chunk);
            fs::write(staging.path().join(chunk_file_name(index)), chunk)?;
            index += 1;

            if filled < chunk_size {
                break;
            }
        }

        let tree = hasher.finalize();
        let manifest = Manifest::from_tree(filename, &tree);
        let cid = tree.cid();

        fs::write(staging.path().join(MANIFEST_FILE), manifest.to_json()?)?;
        self.publish(staging, &cid)?;

        tracing::debug!(
            cid = %cid.short(),
            path = %path.display(),
            size = tree.file_size,
            chunks = tree.chunk_count(),
            "added file to content store"
        );

        Ok((cid, manifest))
    }

    /// Whether a CID is fully stored
    #[must_use]
    pub fn contains(&self, cid: &Cid) -> bool {
        self.content_dir(cid).join(MANIFEST_FILE).is_file()
    }

    /// Load the manifest for a CID
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContentNotFound`] if the CID is not stored.
    pub fn manifest(&self, cid: &Cid) -> Result<Manifest> {
        let path = self.content_dir(cid).join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::ContentNotFound(*cid),
            _ => StoreError::Io(e),
        })?;
        Manifest::from_json(&bytes)
    }

    /// Read one chunk
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContentNotFound`] / [`StoreError::ChunkNotFound`]
    /// if absent.
    pub fn get_chunk(&self, cid: &Cid, index: u64) -> Result<Vec<u8>> {
        let dir = self.content_dir(cid);
        if !dir.is_dir() {
            return Err(StoreError::ContentNotFound(*cid));
        }
        read_chunk(&dir, cid, index)
    }

    /// Lazily reassemble a CID, verifying every chunk as it is read
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContentNotFound`] if the CID is not stored.
    pub fn reassemble(&self, cid: &Cid) -> Result<ChunkStream> {
        let manifest = self.manifest(cid)?;
        Ok(ChunkStream {
            dir: self.content_dir(cid),
            cid: *cid,
            manifest,
            next: 0,
        })
    }

    /// Write the reassembled content to `destination`
    ///
    /// Data goes to a hidden temp file in the destination directory and is
    /// renamed into place after the whole-file hash checks out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] on any hash mismatch and
    /// [`StoreError::Io`] on write failure; `destination` is untouched then.
    pub fn export_to(&self, cid: &Cid, destination: impl AsRef<Path>) -> Result<u64> {
        let destination = destination.as_ref();
        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let stem = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let tmp = parent.join(format!(".{stem}.part-{}", random_suffix()));

        let result = self.write_verified(cid, &tmp).and_then(|written| {
            fs::rename(&tmp, destination)?;
            Ok(written)
        });

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn write_verified(&self, cid: &Cid, tmp: &Path) -> Result<u64> {
        let mut stream = self.reassemble(cid)?;
        let expected_hash = stream.manifest().file_hash;
        let mut out = File::create(tmp)?;
        let mut file_hasher = blake3::Hasher::new();
        let mut written = 0u64;

        for chunk in stream.by_ref() {
            let chunk = chunk?;
            file_hasher.update(&chunk);
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        out.sync_all()?;

        if *file_hasher.finalize().as_bytes() != expected_hash {
            return Err(StoreError::integrity(*cid, "whole-file hash mismatch"));
        }
        Ok(written)
    }

    /// Start a staged import of remote content
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] if the manifest does not match its
    /// own CID, or an I/O error creating the staging directory.
    pub fn begin_import(&self, manifest: Manifest) -> Result<Staging> {
        let cid = manifest.cid();
        manifest.verify(&cid)?;

        let received = vec![false; manifest.chunk_count() as usize];
        Ok(Staging {
            store: self.clone(),
            dir: Some(StagingDir::create(&self.root)?),
            cid,
            manifest,
            received,
        })
    }

    /// Delete a CID and all its chunks
    ///
    /// Returns `false` if the CID was not stored.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if removal fails.
    pub fn remove(&self, cid: &Cid) -> Result<bool> {
        let dir = self.content_dir(cid);
        if !dir.exists() {
            return Ok(false);
        }

        // Move aside first so readers never observe a half-deleted CID
        let graveyard = self
            .root
            .join(STAGING_DIR)
            .join(format!("rm-{}", random_suffix()));
        fs::rename(&dir, &graveyard)?;
        fs::remove_dir_all(&graveyard)?;
        Ok(true)
    }

    /// List stored CIDs
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the blocks directory cannot be read.
    pub fn list(&self) -> Result<Vec<Cid>> {
        let mut cids = Vec::new();
        for entry in fs::read_dir(self.root.join(BLOCKS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            match name.to_string_lossy().parse::<Cid>() {
                Ok(cid) if self.contains(&cid) => cids.push(cid),
                Ok(_) => {}
                Err(e) => tracing::debug!(entry = ?name, error = %e, "skipping foreign entry in blocks"),
            }
        }
        cids.sort();
        Ok(cids)
    }

    fn content_dir(&self, cid: &Cid) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(cid.to_string())
    }

    fn publish(&self, staging: StagingDir, cid: &Cid) -> Result<()> {
        let target = self.content_dir(cid);
        if target.exists() {
            return Ok(());
        }

        match fs::rename(staging.path(), &target) {
            Ok(()) => {
                staging.disarm();
                Ok(())
            }
            // A concurrent add of the same bytes won the race
            Err(_) if self.contains(cid) => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Staged import of remote content
///
/// Chunks are verified as they are written. Dropping an uncommitted staging
/// removes everything it wrote.
#[derive(Debug)]
pub struct Staging {
    store: ContentStore,
    dir: Option<StagingDir>,
    cid: Cid,
    manifest: Manifest,
    received: Vec<bool>,
}

impl Staging {
    /// CID being imported
    #[must_use]
    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// Manifest being imported
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Whether a chunk has been written
    #[must_use]
    pub fn has_chunk(&self, index: u64) -> bool {
        self.received.get(index as usize).copied().unwrap_or(false)
    }

    /// Number of chunks still missing
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.received.iter().filter(|r| !**r).count() as u64
    }

    /// Verify and write one chunk
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] if the bytes do not match the
    /// manifest (nothing is written) or an I/O error.
    pub fn put_chunk(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if !self.manifest.verify_chunk(index, data) {
            return Err(StoreError::integrity(
                self.cid,
                format!("chunk {index} hash mismatch"),
            ));
        }

        let dir = self.dir_path()?;
        fs::write(dir.join(chunk_file_name(index)), data)?;
        self.received[index as usize] = true;
        Ok(())
    }

    /// Publish the import into the store
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Incomplete`] if chunks are missing.
    pub fn commit(mut self) -> Result<Cid> {
        let missing = self.missing();
        if missing > 0 {
            return Err(StoreError::Incomplete {
                cid: self.cid,
                missing,
            });
        }

        self.manifest.verify(&self.cid)?;

        let dir = self
            .dir
            .take()
            .ok_or_else(|| StoreError::Manifest("staging already consumed".to_string()))?;
        fs::write(dir.path().join(MANIFEST_FILE), self.manifest.to_json()?)?;
        self.store.publish(dir, &self.cid)?;
        Ok(self.cid)
    }

    fn dir_path(&self) -> Result<&Path> {
        self.dir
            .as_ref()
            .map(StagingDir::path)
            .ok_or_else(|| StoreError::Manifest("staging already consumed".to_string()))
    }
}

/// Lazy, restartable sequence of verified chunks in index order
#[derive(Debug)]
pub struct ChunkStream {
    dir: PathBuf,
    cid: Cid,
    manifest: Manifest,
    next: u64,
}

impl ChunkStream {
    /// Manifest of the content being streamed
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Rewind to the first chunk
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.manifest.chunk_count() {
            return None;
        }

        let index = self.next;
        self.next += 1;

        let result = read_chunk(&self.dir, &self.cid, index).and_then(|data| {
            if self.manifest.verify_chunk(index, &data) {
                Ok(data)
            } else {
                Err(StoreError::integrity(
                    self.cid,
                    format!("stored chunk {index} hash mismatch"),
                ))
            }
        });

        // Stop after the first failure
        if result.is_err() {
            self.next = self.manifest.chunk_count();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.manifest.chunk_count().saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

/// Staging directory removed on drop unless published
#[derive(Debug)]
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn create(root: &Path) -> Result<Self> {
        let path = root.join(STAGING_DIR).join(random_suffix());
        fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            armed: true,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to clean staging directory");
                }
            }
        }
    }
}

fn chunk_file_name(index: u64) -> String {
    format!("{index}.chunk")
}

fn read_chunk(dir: &Path, cid: &Cid, index: u64) -> Result<Vec<u8>> {
    fs::read(dir.join(chunk_file_name(index))).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::ChunkNotFound { cid: *cid, index },
        _ => StoreError::Io(e),
    })
}

/// Fill `buf` as far as the reader allows; returns bytes read (short only at EOF)
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        bytes = (nanos as u64 ^ u64::from(std::process::id())).to_le_bytes();
    }
    hex::encode(bytes)
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
