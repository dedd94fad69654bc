use std::fmt;
use std::io;

/// Error taxonomy of the whole decoder stack.
///
/// Speculative chunk starts treat the Huffman/block errors as retryable (the
/// finder advances to the next candidate); everything else is fatal for the
/// stream.
#[derive(Debug)]
pub enum PargzError {
    /* Stream framing */
    UnexpectedEof,
    InvalidMagic,
    UnsupportedCompressionMethod(u8),
    InvalidFlags(u8),
    HeaderCrcMismatch { stored: u16, computed: u16 },
    ChecksumMismatch { stored: u32, computed: u32 },
    SizeMismatch { stored: u32, computed: u32 },

    /* Huffman construction */
    InvalidCodeLengths,
    BloatingHuffmanCoding,
    EmptyAlphabet,
    InvalidHuffmanCode,

    /* Deflate decode */
    InvalidBlock,
    InvalidDistance,
    InvalidLength,
    InvalidBlockType(u8),

    /* Chunked decoding */
    NoValidBlockFound,
    ChunkExceededBudget,

    /* Index files */
    IndexFormatInvalid(&'static str),
    IndexVersionUnsupported(u64),
    IndexStreamMismatch,

    Cancelled,
    IoError(io::Error),
}

impl fmt::Display for PargzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidMagic => write!(f, "invalid stream magic bytes"),
            Self::UnsupportedCompressionMethod(cm) => {
                write!(f, "unsupported compression method {}", cm)
            }
            Self::InvalidFlags(flags) => write!(f, "invalid header flags {:#04x}", flags),
            Self::HeaderCrcMismatch { stored, computed } => write!(
                f,
                "gzip header CRC mismatch (stored {:#06x}, computed {:#06x})",
                stored, computed
            ),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch (stored {:#010x}, computed {:#010x})",
                stored, computed
            ),
            Self::SizeMismatch { stored, computed } => write!(
                f,
                "decompressed size mismatch (stored {}, computed {})",
                stored, computed
            ),
            Self::InvalidCodeLengths => write!(f, "code length exceeds the maximum"),
            Self::BloatingHuffmanCoding => {
                write!(f, "non-optimal Huffman coding does not fill the codespace")
            }
            Self::EmptyAlphabet => write!(f, "no symbols in Huffman alphabet"),
            Self::InvalidHuffmanCode => write!(f, "overfull Huffman code"),
            Self::InvalidBlock => write!(f, "invalid deflate block"),
            Self::InvalidDistance => write!(f, "invalid back-reference distance"),
            Self::InvalidLength => write!(f, "invalid back-reference length"),
            Self::InvalidBlockType(ty) => write!(f, "invalid deflate block type {}", ty),
            Self::NoValidBlockFound => write!(f, "no valid deflate block found in search range"),
            Self::ChunkExceededBudget => write!(f, "chunk decoding exceeded its output budget"),
            Self::IndexFormatInvalid(what) => write!(f, "invalid index file: {}", what),
            Self::IndexVersionUnsupported(version) => {
                write!(f, "unsupported index version {}", version)
            }
            Self::IndexStreamMismatch => {
                write!(f, "index does not belong to the compressed stream")
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for PargzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PargzError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::IoError(err)
        }
    }
}

impl PargzError {
    /// True for errors that only invalidate one speculative block-start
    /// candidate, so the chunk decoder may retry from the next one.
    pub fn is_recoverable_guess(&self) -> bool {
        matches!(
            self,
            Self::InvalidCodeLengths
                | Self::BloatingHuffmanCoding
                | Self::EmptyAlphabet
                | Self::InvalidHuffmanCode
                | Self::InvalidBlock
                | Self::InvalidDistance
                | Self::InvalidLength
                | Self::InvalidBlockType(_)
        )
    }
}

impl From<PargzError> for io::Error {
    fn from(err: PargzError) -> Self {
        match err {
            PargzError::UnexpectedEof => io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            PargzError::IoError(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PargzError>;
