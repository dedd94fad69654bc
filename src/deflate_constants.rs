/* Symbol counts and codeword limits of RFC 1951. */

pub const DEFLATE_NUM_PRECODE_SYMS: usize = 19;
pub const DEFLATE_NUM_LITLEN_SYMS: usize = 288;
pub const DEFLATE_NUM_OFFSET_SYMS: usize = 32;

pub const DEFLATE_MAX_CODEWORD_LEN: u8 = 15;
pub const DEFLATE_MAX_PRE_CODEWORD_LEN: u8 = 7;

pub const DEFLATE_BLOCKTYPE_UNCOMPRESSED: u8 = 0;
pub const DEFLATE_BLOCKTYPE_STATIC_HUFFMAN: u8 = 1;
pub const DEFLATE_BLOCKTYPE_DYNAMIC_HUFFMAN: u8 = 2;

pub const DEFLATE_MAX_MATCH_LEN: usize = 258;

pub const DEFLATE_WINDOW_SIZE: usize = 32 * 1024;
pub const DEFLATE_WINDOW_MASK: usize = DEFLATE_WINDOW_SIZE - 1;

const_assert!(DEFLATE_WINDOW_SIZE.is_power_of_two());

/// First marker value; markers are `MARKER_BASE + window_position`.
pub const MARKER_BASE: u16 = 256;

/* The order in which precode lengths are stored. */
pub const DEFLATE_PRECODE_LENS_PERMUTATION: [u8; DEFLATE_NUM_PRECODE_SYMS] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/* Length bases and extra bit counts for litlen symbols 257..=285.
 * Symbols 286 and 287 never occur in valid data. */
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
pub const LENGTH_EXTRA_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/* Distance bases and extra bit counts for distance symbols 0..=29.
 * Symbols 30 and 31 never occur in valid data. */
pub const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
pub const DISTANCE_EXTRA_BITS: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Code lengths of the fixed literal/length code of RFC 1951 §3.2.6.
pub fn fixed_litlen_lengths() -> [u8; DEFLATE_NUM_LITLEN_SYMS] {
    let mut lengths = [0u8; DEFLATE_NUM_LITLEN_SYMS];
    for (symbol, len) in lengths.iter_mut().enumerate() {
        *len = match symbol {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    lengths
}

/// Code lengths of the fixed distance code (all 5 bits).
pub fn fixed_distance_lengths() -> [u8; DEFLATE_NUM_OFFSET_SYMS] {
    [5u8; DEFLATE_NUM_OFFSET_SYMS]
}
