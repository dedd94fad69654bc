//! Parallel random-access gzip decompression.
//!
//! A single logical gzip (or zlib, raw deflate, bgzf, pigz) stream is
//! decoded across many cores: a speculative block finder lets worker threads
//! start decoding chunks without knowing the preceding 32 KiB window, a
//! marker-resolution pass reconciles their output once the real window
//! cascades in from the left, and a persistent seekpoint index makes later
//! `seek` calls O(1).
//!
//! ```no_run
//! use pargz_rs::{Config, ParallelGzipReader};
//!
//! let mut reader = ParallelGzipReader::open("data.gz", Config::default()).unwrap();
//! let mut out = vec![0u8; 4096];
//! reader.seek(std::io::SeekFrom::Start(1 << 30)).unwrap();
//! let n = reader.read(&mut out).unwrap();
//! println!("{} bytes at offset 1 GiB", n);
//! ```

#[macro_use]
extern crate static_assertions;

pub mod bitstream;
pub mod block_finder;
pub mod block_map;
pub mod cache;
pub mod chunk;
pub mod chunk_decoder;
pub mod crc32;
pub mod decompress_deflate;
pub mod decompress_gzip;
pub mod error;
pub mod file_reader;
pub mod gzip_reader;
pub mod huffman;
pub mod index;
pub mod marker;
pub mod parallel_reader;
pub mod prefetcher;
pub mod streamed_results;
pub mod thread_pool;
pub mod window;

mod deflate_constants;

#[doc(hidden)]
pub mod testing;

pub use crate::decompress_gzip::StreamKind;
pub use crate::error::{PargzError, Result};
pub use crate::file_reader::IoReadMethod;
pub use crate::gzip_reader::GzipReader;
pub use crate::index::{GzipIndex, IndexFormat};
pub use crate::parallel_reader::{Config, ParallelGzipReader, ReaderStatistics};

pub use crate::deflate_constants::DEFLATE_WINDOW_SIZE as WINDOW_SIZE;
