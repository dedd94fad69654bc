use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use filebuffer::FileBuffer;

/// How the compressed input is read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoReadMethod {
    /// One shared file handle, seek + read under a lock.
    Sequential,
    /// Positioned reads, no shared cursor. Best for many worker threads.
    Pread,
    /// Memory-mapped file.
    Mmap,
}

impl Default for IoReadMethod {
    fn default() -> Self {
        IoReadMethod::Pread
    }
}

/// Byte-addressable source shared between all decoding threads. Each worker
/// owns its own `BitReader` over one of these.
pub trait FileReader: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Short reads only
    /// happen at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn size(&self) -> u64;
}

/// Fully in-memory source, used for preloaded pipes and in tests.
pub struct MemoryFileReader {
    data: Box<[u8]>,
}

impl MemoryFileReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }
}

impl FileReader for MemoryFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset.min(self.data.len() as u64) as usize;
        let available = self.data.len() - offset;
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&self.data[offset..offset + count]);
        Ok(count)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

pub struct SequentialFileReader {
    file: Mutex<SeekState>,
    size: u64,
}

struct SeekState {
    file: File,
    position: u64,
}

impl SequentialFileReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(SeekState { file, position: 0 }),
            size,
        })
    }
}

impl FileReader for SequentialFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.file.lock().unwrap();
        if state.position != offset {
            state.file.seek(SeekFrom::Start(offset))?;
            state.position = offset;
        }

        let mut total = 0;
        while total < buf.len() {
            match state.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Cursor state is unknown after a failed read.
                    state.position = u64::MAX;
                    return Err(err);
                }
            }
        }
        state.position = offset + total as u64;
        Ok(total)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

pub struct PreadFileReader {
    file: File,
    size: u64,
}

impl PreadFileReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl FileReader for PreadFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut total = 0;
        while total < buf.len() {
            match self.file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

pub struct MmapFileReader {
    buffer: FileBuffer,
}

impl MmapFileReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            buffer: FileBuffer::open(path)?,
        })
    }
}

impl FileReader for MmapFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset.min(self.buffer.len() as u64) as usize;
        let count = (self.buffer.len() - offset).min(buf.len());
        buf[..count].copy_from_slice(&self.buffer[offset..offset + count]);
        Ok(count)
    }

    fn size(&self) -> u64 {
        self.buffer.len() as u64
    }
}

pub fn open_file(path: impl AsRef<Path>, method: IoReadMethod) -> io::Result<Arc<dyn FileReader>> {
    Ok(match method {
        IoReadMethod::Sequential => Arc::new(SequentialFileReader::open(path)?),
        IoReadMethod::Pread => Arc::new(PreadFileReader::open(path)?),
        IoReadMethod::Mmap => Arc::new(MmapFileReader::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reader_clips_at_end() {
        let reader = MemoryFileReader::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(reader.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(reader.read_at(100, &mut buf).unwrap(), 0);
        assert_eq!(reader.size(), 5);
    }
}
