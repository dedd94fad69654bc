use std::fs::File;
use std::io::{BufWriter, Read, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use structopt::StructOpt;

use pargz_rs::file_reader::MemoryFileReader;
use pargz_rs::gzip_reader::analyze;
use pargz_rs::index::{read_index, write_index};
use pargz_rs::{Config, GzipIndex, IndexFormat, IoReadMethod, ParallelGzipReader};

#[derive(StructOpt)]
#[structopt(
    name = "pargz",
    about = "Parallel random-access gzip decompression with seekable indexes"
)]
struct PargzParams {
    /// Compressed input file; standard input when omitted.
    input: Option<PathBuf>,

    /// Decompress (the only mode; accepted for gzip compatibility).
    #[structopt(short = "d", long)]
    #[allow(unused)]
    decompress: bool,

    /// Write decompressed data to standard output.
    #[structopt(short = "c", long = "stdout")]
    to_stdout: bool,

    /// Output file path.
    #[structopt(short, long)]
    output: Option<PathBuf>,

    /// Overwrite existing output files.
    #[structopt(short, long)]
    force: bool,

    /// Keep the input file (do not delete it after decompression).
    #[structopt(short, long)]
    keep: bool,

    /// Verify integrity without writing output.
    #[structopt(short, long)]
    test: bool,

    /// Decoder threads (0 = all available cores).
    #[structopt(short = "P", long = "decoder-parallelism", default_value = "0")]
    decoder_parallelism: usize,

    /// Chunk size in KiB.
    #[structopt(long = "chunk-size", default_value = "4096")]
    chunk_size_kib: usize,

    /// Verify CRC32 checksums (default).
    #[structopt(long = "verify", conflicts_with = "no_verify")]
    #[allow(unused)]
    verify: bool,

    /// Skip CRC32 verification.
    #[structopt(long = "no-verify")]
    no_verify: bool,

    /// Load a seekpoint index before decoding.
    #[structopt(long = "import-index")]
    import_index: Option<PathBuf>,

    /// Save the seekpoint index after decoding.
    #[structopt(long = "export-index")]
    export_index: Option<PathBuf>,

    /// Index file layout.
    #[structopt(long = "index-format", default_value = "native",
                possible_values = &["native", "indexed_gzip", "gztool", "gztool-with-lines"])]
    index_format: String,

    /// Decode only the given ranges: comma-separated SIZE@OFFSET with unit
    /// suffixes Ki/Mi/Gi and L for line units.
    #[structopt(long)]
    ranges: Option<String>,

    /// Print the decompressed byte count instead of the data.
    #[structopt(long)]
    count: bool,

    /// Print the decompressed line count instead of the data.
    #[structopt(long = "count-lines")]
    count_lines: bool,

    /// Print per-block stream geometry.
    #[structopt(long)]
    analyze: bool,

    /// How the compressed input is read.
    #[structopt(long = "io-read-method", default_value = "pread",
                possible_values = &["sequential", "pread", "mmap"])]
    io_read_method: String,

    /// More diagnostics on standard error.
    #[structopt(short, long)]
    verbose: bool,

    /// Suppress non-error output.
    #[structopt(short, long)]
    quiet: bool,

    /// Print licenses of bundled third-party code.
    #[structopt(long = "oss-attributions")]
    oss_attributions: bool,
}

/// One parsed `SIZE@OFFSET` entry.
#[derive(Debug, Clone, Copy)]
struct OutputRange {
    size: u64,
    offset: u64,
    line_units: bool,
}

fn parse_suffixed(text: &str) -> anyhow::Result<(u64, bool)> {
    let text = text.trim();
    let (number, multiplier, lines) = if let Some(rest) = text.strip_suffix("Ki") {
        (rest, 1024u64, false)
    } else if let Some(rest) = text.strip_suffix("Mi") {
        (rest, 1024 * 1024, false)
    } else if let Some(rest) = text.strip_suffix("Gi") {
        (rest, 1024 * 1024 * 1024, false)
    } else if let Some(rest) = text.strip_suffix('L') {
        (rest, 1, true)
    } else {
        (text, 1, false)
    };
    let value: u64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid number in range: {:?}", text))?;
    Ok((value * multiplier, lines))
}

fn parse_ranges(list: &str) -> anyhow::Result<Vec<OutputRange>> {
    let mut ranges = Vec::new();
    for entry in list.split(',') {
        let (size_text, offset_text) = entry
            .split_once('@')
            .with_context(|| format!("range {:?} is not SIZE@OFFSET", entry))?;
        let (size, size_lines) = parse_suffixed(size_text)?;
        let (offset, offset_lines) = parse_suffixed(offset_text)?;
        ranges.push(OutputRange {
            size,
            offset,
            line_units: size_lines || offset_lines,
        });
    }
    Ok(ranges)
}

fn index_format_of(name: &str) -> IndexFormat {
    match name {
        "indexed_gzip" => IndexFormat::IndexedGzip,
        "gztool" => IndexFormat::Gztool,
        "gztool-with-lines" => IndexFormat::GztoolWithLines,
        _ => IndexFormat::Native,
    }
}

fn io_method_of(name: &str) -> IoReadMethod {
    match name {
        "sequential" => IoReadMethod::Sequential,
        "mmap" => IoReadMethod::Mmap,
        _ => IoReadMethod::Pread,
    }
}

const OSS_ATTRIBUTIONS: &str = "\
pargz-rs bundles no third-party code; it links the following crates:
  adler32            (Zlib)
  crc32fast          (MIT OR Apache-2.0)
  filebuffer         (Apache-2.0)
  static_assertions  (MIT OR Apache-2.0)
  structopt          (MIT OR Apache-2.0)
  nightly-quirks     (MIT OR Apache-2.0)
  log, env_logger    (MIT OR Apache-2.0)
  lazy_static        (MIT OR Apache-2.0)
  anyhow             (MIT OR Apache-2.0)
The deflate decoding core follows the algorithms of libdeflate
(Eric Biggers, MIT).";

fn main() {
    let params = PargzParams::from_args();
    let filter = if params.quiet {
        "error"
    } else if params.verbose {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(error) = run(params) {
        log::error!("{:#}", error);
        std::process::exit(1);
    }
}

fn run(params: PargzParams) -> anyhow::Result<()> {
    if params.oss_attributions {
        println!("{}", OSS_ATTRIBUTIONS);
        return Ok(());
    }

    let config = Config {
        parallelism: params.decoder_parallelism,
        chunk_size: params.chunk_size_kib.max(32) * 1024,
        verify_crc: !params.no_verify,
        io_read_method: io_method_of(&params.io_read_method),
        track_line_offsets: params.count_lines
            || params.index_format == "gztool-with-lines"
            || params
                .ranges
                .as_deref()
                .map_or(false, |ranges| ranges.contains('L')),
        ..Config::default()
    };

    let mut reader = match &params.input {
        Some(path) => {
            if !path.exists() {
                bail!("input file {:?} does not exist", path);
            }
            ParallelGzipReader::open(path, config.clone())?
        }
        None => {
            // Standard input is preloaded: random access needs a seekable
            // source.
            let mut data = Vec::new();
            std::io::stdin().lock().read_to_end(&mut data)?;
            ParallelGzipReader::new(Arc::new(MemoryFileReader::new(data)), config.clone())?
        }
    };

    if params.analyze {
        let source = match &params.input {
            Some(path) => pargz_rs::file_reader::open_file(path, config.io_read_method)?,
            None => bail!("--analyze requires a file input"),
        };
        let reports = analyze(source, reader.stream_kind())?;
        let mut kinds = [0usize; 3];
        for report in &reports {
            println!(
                "member {:3}  {:>14?}  final={}  at bit {:>12}  {:>9} bits -> {:>9} bytes",
                report.member_index,
                report.kind,
                report.final_block as u8,
                report.encoded_offset_bits,
                report.encoded_size_bits,
                report.decoded_size_bytes
            );
            kinds[match report.kind {
                pargz_rs::decompress_deflate::BlockKind::Uncompressed => 0,
                pargz_rs::decompress_deflate::BlockKind::FixedHuffman => 1,
                pargz_rs::decompress_deflate::BlockKind::DynamicHuffman => 2,
            }] += 1;
        }
        println!(
            "blocks: {} uncompressed, {} fixed, {} dynamic",
            kinds[0], kinds[1], kinds[2]
        );
        return Ok(());
    }

    if let Some(path) = &params.import_index {
        let mut file = File::open(path).with_context(|| format!("opening index {:?}", path))?;
        let index: GzipIndex = read_index(&mut file)?;
        reader.import_index(index)?;
        log::debug!("imported index from {:?}", path);
    }

    let counts_requested = params.count || params.count_lines;
    // Counts normally replace the data output; `-c` keeps the data flowing
    // to stdout and pushes the counts to stderr instead.
    let data_to_stdout =
        !params.test && (params.to_stdout || (!counts_requested && output_path(&params).is_none()));

    let mut sink: Box<dyn Write> = if params.test || (counts_requested && !params.to_stdout) {
        Box::new(std::io::sink())
    } else if let Some(path) = output_path(&params) {
        if path.exists() && !params.force {
            bail!("output file {:?} exists, use --force to overwrite", path);
        }
        Box::new(BufWriter::new(
            File::create(&path).with_context(|| format!("creating {:?}", path))?,
        ))
    } else {
        Box::new(BufWriter::new(std::io::stdout()))
    };

    let mut total_bytes = 0u64;
    let mut total_lines = 0u64;

    match params.ranges.as_deref() {
        Some(list) => {
            for range in parse_ranges(list)? {
                if range.line_units {
                    let start = reader.seek_to_line(range.offset)?;
                    let end = reader.seek_to_line(range.offset + range.size)?;
                    reader.seek(SeekFrom::Start(start))?;
                    copy_exact(&mut reader, &mut sink, end - start, &mut total_bytes, &mut total_lines, params.count_lines)?;
                } else {
                    reader.seek(SeekFrom::Start(range.offset))?;
                    copy_exact(&mut reader, &mut sink, range.size, &mut total_bytes, &mut total_lines, params.count_lines)?;
                }
            }
        }
        None => {
            copy_exact(
                &mut reader,
                &mut sink,
                u64::MAX,
                &mut total_bytes,
                &mut total_lines,
                params.count_lines,
            )?;
        }
    }
    sink.flush()?;

    if let Some(path) = &params.export_index {
        let index = reader.export_index()?;
        let mut file =
            File::create(path).with_context(|| format!("creating index {:?}", path))?;
        write_index(&mut file, &index, index_format_of(&params.index_format))?;
        log::debug!(
            "exported {} seekpoints to {:?}",
            index.checkpoints.len(),
            path
        );
    }

    if counts_requested {
        // Counts go to stdout unless decompressed data went there.
        let mut report = |line: String| {
            if data_to_stdout {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        };
        if params.count {
            report(format!("{}", total_bytes));
        }
        if params.count_lines {
            let lines = reader.line_count().unwrap_or(total_lines);
            report(format!("{}", lines));
        }
    }

    if params.verbose {
        let statistics = reader.statistics();
        eprintln!(
            "chunks: {} stitched, {} sequential fallbacks, {} speculative attempts",
            statistics.chunks_stitched,
            statistics.sequential_fallbacks,
            statistics.speculative_attempts
        );
        eprintln!(
            "cache: {} hits, {} misses, {} evictions; {} prefetches",
            statistics.cache_hits,
            statistics.cache_misses,
            statistics.cache_evictions,
            statistics.prefetches_issued
        );
    }

    // gzip semantics: successful decompression to a file removes the input.
    if let (Some(input), Some(_)) = (&params.input, output_path(&params)) {
        if !params.keep && !params.test && !counts_requested {
            std::fs::remove_file(input).with_context(|| format!("removing {:?}", input))?;
        }
    }
    Ok(())
}

fn output_path(params: &PargzParams) -> Option<PathBuf> {
    if params.to_stdout || params.test || params.count || params.count_lines {
        return None;
    }
    if let Some(output) = &params.output {
        return Some(output.clone());
    }
    let input = params.input.as_ref()?;
    match input.extension() {
        Some(ext) if ext == "gz" || ext == "bgz" || ext == "gzip" || ext == "zz" => {
            Some(input.with_extension(""))
        }
        _ => None, // unknown extension: default to stdout
    }
}

fn copy_exact(
    reader: &mut ParallelGzipReader,
    sink: &mut dyn Write,
    mut remaining: u64,
    total_bytes: &mut u64,
    total_lines: &mut u64,
    count_lines: bool,
) -> anyhow::Result<()> {
    let mut buffer = vec![0u8; 1 << 20];
    while remaining > 0 {
        let step = buffer.len().min(remaining.min(usize::MAX as u64) as usize);
        let count = reader.read(&mut buffer[..step])?;
        if count == 0 {
            break;
        }
        sink.write_all(&buffer[..count])?;
        *total_bytes += count as u64;
        if count_lines {
            *total_lines += buffer[..count].iter().filter(|&&b| b == b'\n').count() as u64;
        }
        remaining -= count as u64;
    }
    Ok(())
}
