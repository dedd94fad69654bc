//! End-to-end properties over synthetic streams: identical output for any
//! parallelism/chunk-size combination, random access equivalence, index
//! interoperability, and concurrent reader instances.

use std::io::SeekFrom;
use std::sync::Arc;

use pargz_rs::file_reader::MemoryFileReader;
use pargz_rs::index::{read_index, write_index, IndexFormat};
use pargz_rs::testing::{self, DeflateOp, DeflateWriter};
use pargz_rs::{Config, ParallelGzipReader};

/// A gzip file mixing every block type, back-references across block
/// boundaries, and pigz flush markers.
fn mixed_stream(target_bytes: usize, seed: u64) -> (Vec<u8>, Vec<u8>) {
    let mut writer = DeflateWriter::new();
    let mut payload: Vec<u8> = Vec::new();
    let mut state = seed | 1;
    let mut step = 0u64;

    while payload.len() < target_bytes {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        match step % 5 {
            0 => {
                let block: Vec<u8> = (0..3000u64)
                    .map(|i| (state.wrapping_add(i * 37) % 251) as u8)
                    .collect();
                writer.stored_block(&block, false);
                payload.extend_from_slice(&block);
            }
            1 => {
                let block: Vec<u8> = (0..800u64)
                    .map(|i| (state.wrapping_add(i * 11) % 256) as u8)
                    .collect();
                writer.dynamic_block_from_bytes(&block, false);
                payload.extend_from_slice(&block);
            }
            2 => {
                // Fixed block with matches into earlier output.
                writer.begin_fixed_block(false);
                for i in 0..32u64 {
                    let byte = (state.wrapping_add(i) % 256) as u8;
                    writer.literal(byte);
                    payload.push(byte);
                }
                if payload.len() > 4096 {
                    writer.match_ref(64, 4000);
                    let from = payload.len() - 4000;
                    for i in 0..64 {
                        let byte = payload[from + i];
                        payload.push(byte);
                    }
                }
                writer.end_block();
            }
            3 => {
                // Dynamic block whose matches reach across the block
                // boundary into the previous blocks.
                let distance = 1 + (state % 2000) as u16;
                if payload.len() > distance as usize {
                    let ops = [
                        DeflateOp::Match {
                            length: 20,
                            distance,
                        },
                        DeflateOp::Literal(b'|'),
                    ];
                    writer.dynamic_block_ops(&ops, false);
                    let from = payload.len() - distance as usize;
                    for i in 0..20 {
                        let byte = payload[from + i];
                        payload.push(byte);
                    }
                    payload.push(b'|');
                }
            }
            _ => {
                writer.pigz_flush_marker();
            }
        }
        step += 1;
    }
    writer.stored_block(b"tail", true);
    payload.extend_from_slice(b"tail");
    (testing::gzip_wrap(&writer.finish(), &payload), payload)
}

fn reader_over(file: &[u8], parallelism: usize, chunk_size: usize) -> ParallelGzipReader {
    ParallelGzipReader::new(
        Arc::new(MemoryFileReader::new(file.to_vec())),
        Config {
            parallelism,
            chunk_size,
            ..Config::default()
        },
    )
    .unwrap()
}

fn read_all(reader: &mut ParallelGzipReader) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let count = reader.read(&mut buf).unwrap();
        if count == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..count]);
    }
}

#[test]
fn output_independent_of_parallelism_and_chunk_size() {
    let (file, payload) = mixed_stream(600_000, 0x5EED);
    for parallelism in [1, 2, 8] {
        for chunk_size in [32 * 1024, 100 * 1024, 1 << 20] {
            let mut reader = reader_over(&file, parallelism, chunk_size);
            let out = read_all(&mut reader);
            assert_eq!(
                out, payload,
                "divergence at P={} chunk={}",
                parallelism, chunk_size
            );
        }
    }
}

#[test]
fn random_access_equals_slicing() {
    let (file, payload) = mixed_stream(400_000, 0xACCE55);
    let mut reader = reader_over(&file, 4, 64 * 1024);

    let mut offset = 17usize;
    for i in 0..24 {
        let length = 1 + (i * 997) % 9000;
        let position = offset % payload.len();
        reader.seek(SeekFrom::Start(position as u64)).unwrap();
        let mut out = vec![0u8; length];
        let mut total = 0;
        while total < length {
            let count = reader.read(&mut out[total..]).unwrap();
            if count == 0 {
                break;
            }
            total += count;
        }
        let expected = &payload[position..(position + length).min(payload.len())];
        assert_eq!(&out[..total], expected, "seek to {}", position);
        offset = offset.wrapping_mul(31).wrapping_add(7919);
    }
}

#[test]
fn index_export_reimport_all_formats() {
    let (file, payload) = mixed_stream(300_000, 0x1DE);
    let mut reader = reader_over(&file, 2, 64 * 1024);
    let index = reader.export_index().unwrap();

    for format in [
        IndexFormat::Native,
        IndexFormat::IndexedGzip,
        IndexFormat::Gztool,
    ] {
        let mut bytes = Vec::new();
        write_index(&mut bytes, &index, format).unwrap();
        let reread = read_index(&mut bytes.as_slice()).unwrap();
        assert!(
            index.same_seekpoints(&reread),
            "seekpoints changed through {:?}",
            format
        );

        let mut fresh = reader_over(&file, 2, 64 * 1024);
        fresh.import_index(reread).unwrap();
        assert_eq!(fresh.size(), Some(payload.len() as u64));

        fresh.seek(SeekFrom::Start(123_456)).unwrap();
        let mut out = vec![0u8; 2048];
        let mut total = 0;
        while total < out.len() {
            let count = fresh.read(&mut out[total..]).unwrap();
            if count == 0 {
                break;
            }
            total += count;
        }
        assert_eq!(&out[..total], &payload[123_456..123_456 + total]);
        assert!(total > 0, "no data after import of {:?}", format);
    }
}

#[test]
fn bgzf_stream_round_trip() {
    let mut file = Vec::new();
    let mut payload = Vec::new();
    for i in 0..40u32 {
        let member: Vec<u8> = (0..2500u32)
            .map(|j| ((i * 131 + j * 17) % 256) as u8)
            .collect();
        file.extend_from_slice(&testing::bgzf_member_stored(&member));
        payload.extend_from_slice(&member);
    }
    let mut reader = reader_over(&file, 4, 16 * 1024);
    assert_eq!(read_all(&mut reader), payload);
}

#[test]
fn many_readers_in_parallel() {
    use rayon::prelude::*;

    let fixtures: Vec<(Vec<u8>, Vec<u8>)> =
        (0..8u64).map(|i| mixed_stream(120_000, 0xBEEF + i)).collect();

    fixtures.par_iter().for_each(|(file, payload)| {
        let mut reader = reader_over(file, 2, 48 * 1024);
        assert_eq!(&read_all(&mut reader), payload);
    });
}

#[test]
fn zero_length_and_tiny_payloads() {
    for payload in [b"".to_vec(), b"a".to_vec(), vec![0u8; 31]] {
        let file = testing::gzip_member_stored(&payload);
        let mut reader = reader_over(&file, 2, 32 * 1024);
        assert_eq!(read_all(&mut reader), payload);
        assert_eq!(reader.size(), Some(payload.len() as u64));
    }
}
