/*!
 * Shared Memory Segment
 * Named file-backed mapping shared by every process that opens the queue
 */

use super::types::{
    QueueHeader, HEADER_SIZE, LAYOUT_VERSION, MAX_DATA_BYTES, MAX_NAME_LEN, MAX_QUEUE_CAPACITY,
    MIN_DATA_BYTES, SEGMENT_EXTENSION, SEGMENT_MAGIC,
};
use crate::core::config::{OpenMode, QueueConfig};
use crate::core::wait::Backoff;
use crate::ipc::core::types::{IpcError, IpcResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info};

/// Mapped queue segment
///
/// The mapping stays valid for the lifetime of this value; dropping it
/// unmaps this process's view but never removes the backing file.
pub struct SharedSegment {
    name: String,
    path: PathBuf,
    base: NonNull<u8>,
    len: usize,
    created: bool,
    _mmap: MmapMut,
    _file: File,
}

// SAFETY: all shared state behind `base` is either atomic (header) or only
// touched while the in-segment lock is held (ring).
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Path of the backing file for `name` under `dir`
    pub fn segment_path(dir: &Path, name: &str) -> IpcResult<PathBuf> {
        validate_name(name)?;
        Ok(dir.join(format!("{}.{}", name, SEGMENT_EXTENSION)))
    }

    /// Open the named segment, creating it when the open mode allows
    pub fn create_or_open(config: &QueueConfig) -> IpcResult<Self> {
        validate_geometry(config)?;
        let path = Self::segment_path(&config.directory, &config.name)?;

        if config.open_mode == OpenMode::CreateOrOpen {
            fs::create_dir_all(&config.directory)
                .map_err(|e| IpcError::from_io(e, "Failed to create segment directory"))?;
            if let Some(segment) = Self::create_new(&path, config)? {
                return Ok(segment);
            }
        }

        Self::open_existing(&path, config)
    }

    /// Create the backing file; `None` when another process got there first
    fn create_new(path: &Path, config: &QueueConfig) -> IpcResult<Option<Self>> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o660)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(IpcError::from_io(e, "Failed to create segment")),
        };

        let len = HEADER_SIZE + config.data_bytes;
        let mapped = file
            .set_len(len as u64)
            .map_err(|e| IpcError::from_io(e, "Failed to size segment"))
            .and_then(|_| map(&file, len));

        let mmap = match mapped {
            Ok(mmap) => mmap,
            Err(e) => {
                // Never leave a half-built segment behind for openers to wait on
                let _ = fs::remove_file(path);
                return Err(e);
            }
        };

        let segment = Self::attach(config, path, file, mmap, len, true);
        let header = segment.header();
        header.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        header.capacity.store(config.capacity, Ordering::Relaxed);
        header.data_len.store(config.data_bytes as u64, Ordering::Relaxed);
        header.magic.store(SEGMENT_MAGIC, Ordering::Release);

        info!(
            queue = %config.name,
            path = %path.display(),
            capacity = config.capacity,
            data_bytes = config.data_bytes,
            "Created shared queue segment"
        );
        Ok(Some(segment))
    }

    /// Attach to a segment some other handle created
    fn open_existing(path: &Path, config: &QueueConfig) -> IpcResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => IpcError::QueueDoesNotExist(config.name.clone()),
                _ => IpcError::from_io(e, "Failed to open segment"),
            })?;

        let deadline = Instant::now() + config.init_timeout;
        let len = wait_for_size(&file, deadline)?;
        let mmap = map(&file, len)?;

        let segment = Self::attach(config, path, file, mmap, len, false);
        segment.wait_for_magic(deadline)?;

        let header = segment.header();
        let version = header.version.load(Ordering::Acquire);
        if version != LAYOUT_VERSION {
            return Err(IpcError::InitializationFailed(format!(
                "Segment layout version {} (expected {})",
                version, LAYOUT_VERSION
            )));
        }
        let data_len = header.data_len.load(Ordering::Acquire) as usize;
        if HEADER_SIZE + data_len > len || data_len < MIN_DATA_BYTES {
            return Err(IpcError::Corrupted(format!(
                "Ring of {} bytes does not fit a {} byte segment",
                data_len, len
            )));
        }

        debug!(queue = %config.name, path = %path.display(), "Attached to shared queue segment");
        Ok(segment)
    }

    fn attach(
        config: &QueueConfig,
        path: &Path,
        file: File,
        mut mmap: MmapMut,
        len: usize,
        created: bool,
    ) -> Self {
        // Moving the MmapMut below does not move the mapping itself
        let base = NonNull::new(mmap.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            name: config.name.clone(),
            path: path.to_path_buf(),
            base,
            len,
            created,
            _mmap: mmap,
            _file: file,
        }
    }

    /// Header at the start of the mapping
    #[inline]
    pub fn header(&self) -> &QueueHeader {
        header_at(self.base)
    }

    /// Record ring following the header
    ///
    /// # Safety
    /// The caller must hold the segment lock for as long as the slice lives
    /// and must not create a second slice over the ring meanwhile.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn ring(&self) -> &mut [u8] {
        let data_len = self.header().data_len.load(Ordering::Relaxed) as usize;
        std::slice::from_raw_parts_mut(self.base.as_ptr().add(HEADER_SIZE), data_len)
    }

    /// Ring length in bytes
    pub fn data_len(&self) -> usize {
        self.header().data_len.load(Ordering::Relaxed) as usize
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this handle created the segment
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Delete the backing file; existing mappings stay usable until dropped
    pub fn remove(dir: &Path, name: &str) -> IpcResult<()> {
        let path = Self::segment_path(dir, name)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => IpcError::QueueDoesNotExist(name.to_string()),
            _ => IpcError::from_io(e, "Failed to remove segment"),
        })?;
        info!(queue = name, path = %path.display(), "Removed shared queue segment");
        Ok(())
    }

    pub fn exists(dir: &Path, name: &str) -> bool {
        Self::segment_path(dir, name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn wait_for_magic(&self, deadline: Instant) -> IpcResult<()> {
        let mut backoff = Backoff::default();
        loop {
            match self.header().magic.load(Ordering::Acquire) {
                SEGMENT_MAGIC => return Ok(()),
                0 if Instant::now() < deadline => backoff.snooze_until(Some(deadline)),
                0 => {
                    return Err(IpcError::InitializationFailed(format!(
                        "Segment {} was never initialized",
                        self.path.display()
                    )))
                }
                other => {
                    return Err(IpcError::InitializationFailed(format!(
                        "Segment {} has foreign magic {:#x}",
                        self.path.display(),
                        other
                    )))
                }
            }
        }
    }
}

fn header_at<'a>(base: NonNull<u8>) -> &'a QueueHeader {
    // SAFETY: every mapping is at least HEADER_SIZE long and page aligned,
    // and QueueHeader consists solely of atomics, valid for any bit pattern
    // including the zero fill of a fresh file.
    unsafe { &*(base.as_ptr() as *const QueueHeader) }
}

fn map(file: &File, len: usize) -> IpcResult<MmapMut> {
    // SAFETY: the file is only ever resized by its creator before the magic
    // is published, so the mapping never outlives the file's length.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
        .map_err(|e| IpcError::from_io(e, "Failed to map segment"))
}

fn wait_for_size(file: &File, deadline: Instant) -> IpcResult<usize> {
    let mut backoff = Backoff::default();
    loop {
        let len = file
            .metadata()
            .map_err(|e| IpcError::from_io(e, "Failed to stat segment"))?
            .len() as usize;
        if len >= HEADER_SIZE + MIN_DATA_BYTES {
            return Ok(len);
        }
        if Instant::now() >= deadline {
            return Err(IpcError::InitializationFailed(format!(
                "Segment is {} bytes, creator never sized it",
                len
            )));
        }
        backoff.snooze_until(Some(deadline));
    }
}

fn validate_name(name: &str) -> IpcResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(IpcError::InvalidArgument(format!(
            "Queue name must be 1..={} bytes",
            MAX_NAME_LEN
        )));
    }
    if name.contains(['/', '\\', '\0']) || name.starts_with('.') {
        return Err(IpcError::InvalidArgument(format!(
            "Queue name {:?} contains path characters",
            name
        )));
    }
    Ok(())
}

fn validate_geometry(config: &QueueConfig) -> IpcResult<()> {
    if config.capacity == 0 || config.capacity > MAX_QUEUE_CAPACITY {
        return Err(IpcError::InvalidArgument(format!(
            "Capacity {} outside 1..={}",
            config.capacity, MAX_QUEUE_CAPACITY
        )));
    }
    if !(MIN_DATA_BYTES..=MAX_DATA_BYTES).contains(&config.data_bytes) {
        return Err(IpcError::InvalidArgument(format!(
            "Ring size {} outside {}..={}",
            config.data_bytes, MIN_DATA_BYTES, MAX_DATA_BYTES
        )));
    }
    Ok(())
}
