//! The mapped ring file

use crate::layout::*;
use crate::{TaskRingError, TaskRingResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use tracing::{debug, info};

/// One peer's mapping of the ring file; unmapped on drop.
pub struct TaskRegion {
    base: NonNull<u8>,
    geom: TaskRingGeometry,
    path: PathBuf,
    _map: MmapMut,
    _file: File,
}

// SAFETY: the region is plain shared memory; each peer touches only the
// fields the SPSC protocol gives it
unsafe impl Send for TaskRegion {}

impl std::fmt::Debug for TaskRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegion")
            .field("path", &self.path)
            .field("geom", &self.geom)
            .finish()
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TaskRingError + '_ {
    move |source| TaskRingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl TaskRegion {
    /// Create the ring file, or attach to an existing ring of the same
    /// geometry without resetting it. A file holding a ring of a different
    /// shape is an error; a file without a ring header is reinitialized.
    pub fn create(path: impl AsRef<Path>, geom: TaskRingGeometry) -> TaskRingResult<Self> {
        let path = path.as_ref();
        geom.validate()?;

        if let Some(existing) = Self::probe(path)? {
            let expected = Header::for_geometry(&geom);
            if existing.magic == RING_MAGIC {
                if let Some(reason) = existing.mismatch(&expected) {
                    return Err(TaskRingError::Mismatch {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
                let region = Self::open(path)?;
                debug!(path = %path.display(), "attached to existing task ring");
                return Ok(region);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err(path))?;
        file.set_len(geom.file_len()).map_err(io_err(path))?;

        let mut region = Self::map(path, file, geom)?;
        region.init();
        info!(
            path = %path.display(),
            slots = geom.slots(),
            region_bytes = geom.region_bytes,
            data_offset = geom.data_offset(),
            "task ring created"
        );
        Ok(region)
    }

    /// Attach to an existing ring, taking its geometry from the header.
    pub fn open(path: impl AsRef<Path>) -> TaskRingResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(io_err(path)(io::Error::from(io::ErrorKind::NotFound)));
        }
        let header = Self::probe(path)?.ok_or_else(|| TaskRingError::Mismatch {
            path: path.to_path_buf(),
            reason: "file too short for a ring header".into(),
        })?;
        let geom = header.geometry().ok_or_else(|| TaskRingError::Mismatch {
            path: path.to_path_buf(),
            reason: header
                .mismatch(&Header::for_geometry(&TaskRingGeometry::default()))
                .unwrap_or_else(|| "inconsistent header".into()),
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err(path))?;
        let len = file.metadata().map_err(io_err(path))?.len();
        if len != geom.file_len() {
            return Err(TaskRingError::Mismatch {
                path: path.to_path_buf(),
                reason: format!("file is {len} bytes, header describes {}", geom.file_len()),
            });
        }
        Self::map(path, file, geom)
    }

    /// Header of an existing file, `None` if the file is missing or shorter
    /// than a header.
    fn probe(path: &Path) -> TaskRingResult<Option<Header>> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path)(e)),
        };
        let mut buf = [0u8; HEADER_LEN];
        match io::Read::read_exact(&mut file, &mut buf) {
            Ok(()) => Ok(Header::decode(&buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(io_err(path)(e)),
        }
    }

    fn map(path: &Path, file: File, geom: TaskRingGeometry) -> TaskRingResult<Self> {
        // SAFETY: the file is sized to the layout; concurrent access from the
        // peer follows the SPSC protocol
        let mut map = unsafe { MmapMut::map_mut(&file).map_err(io_err(path))? };
        let base = NonNull::new(map.as_mut_ptr()).ok_or_else(|| TaskRingError::Io {
            path: path.to_path_buf(),
            source: io::Error::from(io::ErrorKind::AddrNotAvailable),
        })?;
        Ok(Self {
            base,
            geom,
            path: path.to_path_buf(),
            _map: map,
            _file: file,
        })
    }

    /// Write the header and clear indices and slots
    fn init(&mut self) {
        // SAFETY: the header and slot array lie inside the mapping and no
        // peer is attached yet
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.geom.data_offset()) };
        bytes.fill(0);
        Header::for_geometry(&self.geom).encode(bytes);
    }

    /// Ring geometry
    pub fn geometry(&self) -> TaskRingGeometry {
        self.geom
    }

    /// Ring file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn mask(&self) -> u32 {
        self.geom.mask()
    }

    pub(crate) fn region_bytes(&self) -> usize {
        self.geom.region_bytes as usize
    }

    fn word(&self, off: usize) -> &AtomicU32 {
        // SAFETY: callers pass 4-aligned offsets inside the header or slot
        // array; both peers access these words atomically
        unsafe { &*(self.base.as_ptr().add(off) as *const AtomicU32) }
    }

    pub(crate) fn head(&self) -> &AtomicU32 {
        self.word(OFF_HEAD)
    }

    pub(crate) fn tail(&self) -> &AtomicU32 {
        self.word(OFF_TAIL)
    }

    pub(crate) fn bump(&self) -> &AtomicU32 {
        self.word(OFF_BUMP)
    }

    pub(crate) fn slot(&self, idx: u32) -> &AtomicU32 {
        self.word(HEADER_LEN + 4 * (idx & self.mask()) as usize)
    }

    /// Base of the slab; `region_bytes` long
    pub(crate) fn slab(&self) -> *mut u8 {
        // SAFETY: data_offset is inside the mapping
        unsafe { self.base.as_ptr().add(self.geom.data_offset()) }
    }
}
