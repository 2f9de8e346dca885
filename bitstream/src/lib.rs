//! MSB-first bit readers used to pull Huffman codes and raw fields out of a
//! Gw2 `.dat` archive payload or texture block stream.
//!
//! Both readers share one register algorithm (a growable MSB-first bit
//! buffer, refilled a whole word at a time) but differ in one respect: the
//! `.dat` stream silently discards one 32-bit word every `skip_period` words
//! to match ArenaNet's chunked storage format, while the texture stream reads
//! its word array straight through with no such policy.

use bitvec::{field::BitField, order::Msb0, slice::BitSlice, vec::BitVec, view::BitView};
use byteorder::{ByteOrder, LittleEndian};
use gw2_error::CodecError;

/// Read-only view over an input buffer as a sequence of little-endian 32-bit
/// words, zero-padding the final partial word if the byte length isn't a
/// multiple of 4.
struct WordSource<'a> {
    bytes: &'a [u8],
}

impl<'a> WordSource<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn word_count(&self) -> usize {
        self.bytes.len().div_ceil(4)
    }

    fn word_at(&self, index: usize) -> u32 {
        let start = index * 4;
        let mut buf = [0u8; 4];
        let available = self.bytes.len().saturating_sub(start).min(4);
        if available > 0 {
            buf[..available].copy_from_slice(&self.bytes[start..start + available]);
        }
        LittleEndian::read_u32(&buf)
    }
}

/// Once the already-consumed prefix of `buffered` grows past this many bits,
/// `pull` drains it off and resets the cursor to the front. Bounds the
/// buffer's growth; in practice at most one word is ever pulled ahead of what
/// a single `read_lazy`/`drop` call needs.
const COMPACT_AFTER_BITS: usize = 256;

/// The shared MSB-first bit buffer, pull-on-demand refill, and (optional)
/// periodic word-skip logic common to `BitStream` and `WordStream`.
///
/// Grounded on the teacher's (`uefi_decompress`) use of
/// `bitvec::{BitSlice, Msb0}` for the equivalent Huffman-coded bit cursor:
/// each pulled 32-bit word is appended to a `BitVec<u8, Msb0>` via its
/// big-endian byte representation (reading a little-endian word MSB-first is
/// the same bit order as reading that value's big-endian bytes), and a single
/// `cursor` tracks how much of the buffer has been consumed. `peek`/`drop`
/// read and advance that cursor directly through `BitSlice::load_be`, rather
/// than hand-rolling the equivalent shift arithmetic over a pair of `u32`
/// registers.
struct Register<'a> {
    source: WordSource<'a>,
    word_position: usize,
    skip_period_words: Option<usize>,
    buffered: BitVec<u8, Msb0>,
    cursor: usize,
    consumed_bits: u64,
    is_empty: bool,
}

impl<'a> Register<'a> {
    fn new(bytes: &'a [u8], skip_period_words: Option<usize>) -> Self {
        Self {
            source: WordSource::new(bytes),
            word_position: 0,
            skip_period_words,
            buffered: BitVec::new(),
            cursor: 0,
            consumed_bits: 0,
            is_empty: false,
        }
    }

    fn available_bits(&self) -> usize {
        self.buffered.len() - self.cursor
    }

    fn pull(&mut self) -> Result<(), CodecError> {
        if let Some(period) = self.skip_period_words {
            if period > 0 && (self.word_position + 1) % period == 0 {
                log::trace!("skipping chunk-boundary word at position {}", self.word_position);
                self.word_position += 1;
            }
        }

        let value = if self.word_position >= self.source.word_count() {
            if self.is_empty {
                return Err(CodecError::UnexpectedEof);
            }
            self.is_empty = true;
            0u32
        } else {
            self.source.word_at(self.word_position)
        };

        self.buffered.extend_from_bitslice(value.to_be_bytes().view_bits::<Msb0>());
        self.word_position += 1;

        if self.cursor >= COMPACT_AFTER_BITS {
            self.buffered.drain(..self.cursor);
            self.cursor = 0;
        }

        Ok(())
    }

    fn ensure(&mut self, bits: u8) -> Result<(), CodecError> {
        if bits > 32 {
            return Err(CodecError::InvalidArgument("cannot request more than 32 bits at once"));
        }
        if self.available_bits() < bits as usize {
            self.pull()?;
        }
        Ok(())
    }

    fn window(&self, bits: u8) -> &BitSlice<u8, Msb0> {
        &self.buffered[self.cursor..self.cursor + bits as usize]
    }

    fn peek(&mut self, bits: u8) -> Result<u32, CodecError> {
        if bits == 0 {
            return Ok(0);
        }
        self.ensure(bits)?;
        Ok(self.window(bits).load_be::<u32>())
    }

    fn drop_bits(&mut self, bits: u8) -> Result<(), CodecError> {
        if bits > 32 {
            return Err(CodecError::InvalidArgument("cannot drop more than 32 bits at once"));
        }
        if bits > 0 {
            self.ensure(bits)?;
        }
        self.cursor += bits as usize;
        self.consumed_bits += bits as u64;
        Ok(())
    }

    fn position_bits(&self) -> u64 {
        self.consumed_bits
    }

    fn remaining_bytes(&self) -> usize {
        self.source.bytes.len().saturating_sub((self.consumed_bits / 8) as usize)
    }

    /// Drop the most-recently pulled, still-unconsumed word from the buffer
    /// and rewind the source cursor so it gets re-fetched fresh. Used between
    /// the texture inflater's bit-mapped passes and its terminal raw-word
    /// passes, which re-read whole words directly.
    fn rewind_one_word_if_buffered(&mut self) {
        if self.available_bits() >= 32 {
            let new_len = self.buffered.len() - 32;
            self.buffered.truncate(new_len);
            self.word_position = self.word_position.saturating_sub(1);
        }
    }
}

/// Common surface the Huffman decoder reads through, so one `HuffmanTree`
/// implementation works over either `BitStream` or `WordStream`.
pub trait BitSource {
    fn read_lazy(&mut self, bits: u8) -> Result<u32, CodecError>;
    fn drop(&mut self, bits: u8) -> Result<(), CodecError>;
    fn read(&mut self, bits: u8) -> Result<u32, CodecError> {
        let value = self.read_lazy(bits)?;
        self.drop(bits)?;
        Ok(value)
    }
}

/// MSB-first reader over the `.dat` input stream, dropping one 32-bit word
/// every `skip_period_words` words (nominally 16384) to match ArenaNet's
/// chunked storage layout.
pub struct BitStream<'a> {
    register: Register<'a>,
}

impl<'a> BitStream<'a> {
    /// `skip_period_words` of `0` disables the skip policy entirely.
    pub fn new(bytes: &'a [u8], skip_period_words: u32) -> Self {
        let period = if skip_period_words == 0 { None } else { Some(skip_period_words as usize) };
        Self { register: Register::new(bytes, period) }
    }

    /// Peek the next `bits` (1..=32) without advancing the stream.
    pub fn read_lazy(&mut self, bits: u8) -> Result<u32, CodecError> {
        self.register.peek(bits)
    }

    /// Advance the stream by `bits` (0..=32).
    pub fn drop(&mut self, bits: u8) -> Result<(), CodecError> {
        self.register.drop_bits(bits)
    }

    /// Peek then advance: the usual way to consume a fixed-width field.
    pub fn read(&mut self, bits: u8) -> Result<u32, CodecError> {
        let value = self.register.peek(bits)?;
        self.register.drop_bits(bits)?;
        Ok(value)
    }

    /// Number of bits consumed so far.
    pub fn position_bits(&self) -> u64 {
        self.register.position_bits()
    }

    /// Upper bound on the number of input bytes not yet consumed.
    pub fn remaining_bytes(&self) -> usize {
        self.register.remaining_bytes()
    }
}

impl BitSource for BitStream<'_> {
    fn read_lazy(&mut self, bits: u8) -> Result<u32, CodecError> {
        BitStream::read_lazy(self, bits)
    }

    fn drop(&mut self, bits: u8) -> Result<(), CodecError> {
        BitStream::drop(self, bits)
    }
}

/// MSB-first reader over the texture word stream. Structurally identical to
/// `BitStream` but never applies a periodic skip — see `SPEC_FULL.md` §3 for
/// why this diverges from the shared C++ `pull_byte` helper it's grounded on.
pub struct WordStream<'a> {
    register: Register<'a>,
}

impl<'a> WordStream<'a> {
    pub fn new(words: &'a [u8]) -> Self {
        Self { register: Register::new(words, None) }
    }

    pub fn read_lazy(&mut self, bits: u8) -> Result<u32, CodecError> {
        self.register.peek(bits)
    }

    pub fn drop(&mut self, bits: u8) -> Result<(), CodecError> {
        self.register.drop_bits(bits)
    }

    pub fn read(&mut self, bits: u8) -> Result<u32, CodecError> {
        let value = self.register.peek(bits)?;
        self.register.drop_bits(bits)?;
        Ok(value)
    }

    pub fn position_bits(&self) -> u64 {
        self.register.position_bits()
    }

    /// Index of the next word `pull` will fetch from the underlying word
    /// array. Mirrors the original `state_data.input_position` field, which
    /// the texture codec's terminal raw-word passes compare directly against
    /// the word array's length to detect truncated input.
    pub fn word_position(&self) -> usize {
        self.register.word_position
    }

    /// Rewind the word cursor by one word if a full word is still buffered.
    /// Used by the texture inflater between the bit-mapped passes and the
    /// terminal raw-word copy passes, which re-read whole words directly.
    pub fn rewind_one_word_if_buffered(&mut self) {
        self.register.rewind_one_word_if_buffered();
    }

    /// True once the underlying word array has been exhausted (one past the
    /// last real word has already been synthesised as zero).
    pub fn is_exhausted(&self) -> bool {
        self.register.is_empty
    }
}

impl BitSource for WordStream<'_> {
    fn read_lazy(&mut self, bits: u8) -> Result<u32, CodecError> {
        WordStream::read_lazy(self, bits)
    }

    fn drop(&mut self, bits: u8) -> Result<(), CodecError> {
        WordStream::drop(self, bits)
    }
}
