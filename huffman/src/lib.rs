//! Canonical Huffman code construction and decode, shared by the `.dat` and
//! texture codecs.
//!
//! A tree is built once from a flat list of `(symbol, bit_length)`
//! registrations (either a per-block dynamic tree or one of the two static
//! bootstrap dictionaries) and then decoded against a bit stream one symbol
//! at a time. Codes of up to [`MAX_BITS_HASH`] bits are resolved in O(1)
//! through a prefix hash; longer codes fall back to a linear scan over a
//! left-aligned compare table. Both the construction and decode algorithms
//! are ported from `build_huffmantree`/`read_code` in the original
//! `huffmanTreeUtils.cpp`.

use gw2_bitstream::BitSource;
use gw2_error::CodecError;

/// Codes longer than this many bits miss the prefix hash and fall back to
/// the linear compare table. Fixed across both codecs in the original source.
pub const MAX_BITS_HASH: u32 = 8;
const HASH_TABLE_SIZE: usize = 1 << MAX_BITS_HASH;

/// Maximum representable code length. Fixed across both codecs.
pub const MAX_CODE_BITS_LENGTH: usize = 32;

/// Read-only decode tables for a Huffman tree over at most `MAX_SYMBOL_VALUE`
/// distinct symbols.
pub struct HuffmanTree<const MAX_SYMBOL_VALUE: usize> {
    code_comparison: [u32; MAX_CODE_BITS_LENGTH],
    symbol_value_offset: [u16; MAX_CODE_BITS_LENGTH],
    code_bits: [u8; MAX_CODE_BITS_LENGTH],
    compare_len: usize,
    symbol_value: [u16; MAX_SYMBOL_VALUE],

    symbol_value_hash: [Option<u16>; HASH_TABLE_SIZE],
    code_bits_hash: [u8; HASH_TABLE_SIZE],

    is_empty: bool,
}

impl<const MAX_SYMBOL_VALUE: usize> HuffmanTree<MAX_SYMBOL_VALUE> {
    fn empty() -> Self {
        Self {
            code_comparison: [0; MAX_CODE_BITS_LENGTH],
            symbol_value_offset: [0; MAX_CODE_BITS_LENGTH],
            code_bits: [0; MAX_CODE_BITS_LENGTH],
            compare_len: 0,
            symbol_value: [0; MAX_SYMBOL_VALUE],
            symbol_value_hash: [None; HASH_TABLE_SIZE],
            code_bits_hash: [0; HASH_TABLE_SIZE],
            is_empty: true,
        }
    }

    /// Whether any symbol was registered when this tree was built. Decoding
    /// from an empty tree is always a `CorruptStream` error.
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// Decode the next symbol from `source`.
    pub fn read_code<S: BitSource>(&self, source: &mut S) -> Result<u16, CodecError> {
        if self.is_empty {
            return Err(CodecError::CorruptStream("decoding from an empty Huffman tree"));
        }

        // Ensure a full 32 bits are buffered, matching `need_bits(state, 32)`;
        // the value itself isn't used here, only the side effect of filling
        // the register so the peeks below never need to pull mid-decode.
        source.read_lazy(32)?;

        let hash_index = source.read_lazy(MAX_BITS_HASH as u8)? as usize;
        if let Some(symbol) = self.symbol_value_hash[hash_index] {
            source.drop(self.code_bits_hash[hash_index])?;
            return Ok(symbol);
        }

        let peek32 = source.read_lazy(32)?;
        let mut index = 0usize;
        while index < self.compare_len && peek32 < self.code_comparison[index] {
            index += 1;
        }
        if index >= self.compare_len {
            return Err(CodecError::CorruptStream("Huffman code longer than any registered code length"));
        }

        let bits = self.code_bits[index];
        let symbol_index = self.symbol_value_offset[index] as usize
            - ((peek32 - self.code_comparison[index]) >> (32 - bits)) as usize;
        let symbol = self.symbol_value[symbol_index];
        source.drop(bits)?;
        Ok(symbol)
    }
}

/// Scratch state used while assembling a [`HuffmanTree`]: a per-length
/// singly-linked chain of symbols, built in LIFO registration order.
pub struct HuffmanTreeBuilder<const MAX_SYMBOL_VALUE: usize> {
    bits_head: [Option<u16>; MAX_CODE_BITS_LENGTH],
    bits_body: [Option<u16>; MAX_SYMBOL_VALUE],
}

impl<const MAX_SYMBOL_VALUE: usize> Default for HuffmanTreeBuilder<MAX_SYMBOL_VALUE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_SYMBOL_VALUE: usize> HuffmanTreeBuilder<MAX_SYMBOL_VALUE> {
    pub fn new() -> Self {
        Self { bits_head: [None; MAX_CODE_BITS_LENGTH], bits_body: [None; MAX_SYMBOL_VALUE] }
    }

    pub fn clear(&mut self) {
        self.bits_head = [None; MAX_CODE_BITS_LENGTH];
        self.bits_body = [None; MAX_SYMBOL_VALUE];
    }

    /// Register `symbol` at code length `bits` (prepending it to that
    /// length's chain).
    pub fn add_symbol(&mut self, symbol: u16, bits: u8) -> Result<(), CodecError> {
        if bits == 0 || bits as usize >= MAX_CODE_BITS_LENGTH {
            return Err(CodecError::InvalidArgument("Huffman code length out of range"));
        }
        if symbol as usize >= MAX_SYMBOL_VALUE {
            return Err(CodecError::InvalidArgument("Huffman symbol value out of range"));
        }

        self.bits_body[symbol as usize] = self.bits_head[bits as usize];
        self.bits_head[bits as usize] = Some(symbol);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.bits_head.iter().all(Option::is_none)
    }

    /// Assign canonical codes to every registered symbol and produce the
    /// read-only decode tables. Returns an empty tree (never an error) if no
    /// symbol was registered — callers are expected to check
    /// [`HuffmanTree::is_empty`] themselves, matching the source's "an empty
    /// tree description ends the stream gracefully" behaviour.
    pub fn build(&self) -> HuffmanTree<MAX_SYMBOL_VALUE> {
        let mut tree = HuffmanTree::empty();
        if self.is_empty() {
            return tree;
        }

        let mut code: u32 = 0;
        let mut bits: usize = 0;

        while bits <= MAX_BITS_HASH as usize {
            if let Some(head) = self.bits_head[bits] {
                tree.is_empty = false;

                let mut current = Some(head);
                while let Some(symbol) = current {
                    let hash_start = code.wrapping_shl((MAX_BITS_HASH as usize - bits) as u32);
                    let hash_end = code.wrapping_add(1).wrapping_shl((MAX_BITS_HASH as usize - bits) as u32);
                    for hash_value in hash_start..hash_end {
                        tree.symbol_value_hash[hash_value as usize] = Some(symbol);
                        tree.code_bits_hash[hash_value as usize] = bits as u8;
                    }

                    current = self.bits_body[symbol as usize];
                    code = code.wrapping_sub(1);
                }
            }
            code = code.wrapping_shl(1).wrapping_add(1);
            bits += 1;
        }

        let mut symbol_offset: usize = 0;
        while bits < MAX_CODE_BITS_LENGTH {
            if let Some(head) = self.bits_head[bits] {
                tree.is_empty = false;

                let mut current = Some(head);
                while let Some(symbol) = current {
                    tree.symbol_value[symbol_offset] = symbol;
                    symbol_offset += 1;
                    current = self.bits_body[symbol as usize];
                    code = code.wrapping_sub(1);
                }

                let index = tree.compare_len;
                tree.code_comparison[index] = code.wrapping_add(1).wrapping_shl((32 - bits) as u32);
                tree.code_bits[index] = bits as u8;
                tree.symbol_value_offset[index] = (symbol_offset - 1) as u16;
                tree.compare_len += 1;
            }
            code = code.wrapping_shl(1).wrapping_add(1);
            bits += 1;
        }

        tree
    }
}
