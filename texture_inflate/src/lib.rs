//! Reconstructs DXT1-5 / ATI1-2 / 3Dc / BC6H / BC7 texture block streams from
//! a compact per-block-map encoding, using the shared texture Huffman
//! dictionary to decode run lengths over the block grid.
//!
//! Ported from `inflateTextureFileBuffer.cpp`: `deduceFormat`'s four-CC
//! table, six `decode_*` compression passes driven by flag bits in
//! `compression_flags`, then two terminal raw-word passes that copy
//! remaining uncompressed block words straight from the input.

use gw2_bitstream::WordStream;
use gw2_error::CodecError;
use gw2_static_dicts::texture_dictionary;

const FF_COLOR: u16 = 0x10;
const FF_ALPHA: u16 = 0x20;
const FF_DEDUCEDALPHACOMP: u16 = 0x40;
const FF_PLAINCOMP: u16 = 0x80;
const FF_BICOLORCOMP: u16 = 0x200;
const FF_HDR: u16 = 0x400;
const FF_BPTC: u16 = 0x800;

const CF_DECODE_WHITE_COLOR: u32 = 0x01;
const CF_DECODE_CONSTANT_ALPHA_FROM_4_BITS: u32 = 0x02;
const CF_DECODE_CONSTANT_ALPHA_FROM_8_BITS: u32 = 0x04;
const CF_DECODE_PLAIN_COLOR: u32 = 0x08;
const CF_DECODE_BPTC_FLOAT: u32 = 0x10;
const CF_DECODE_BPTC_UNORM: u32 = 0x20;

/// Per-format bit-layout constants, one entry per supported four-CC.
#[derive(Clone, Copy)]
struct Format {
    flag_data: u16,
    pixel_size_bits: u16,
}

/// A format resolved against a specific image's dimensions: everything the
/// six compression passes and the terminal raw-word passes need to compute
/// output offsets.
struct FullFormat {
    format: Format,
    pixel_blocks: u32,
    bytes_pixel_blocks: u32,
    bytes_component: u32,
    two_component: bool,
}

/// Header fields read from a full (non-block) texture stream via
/// [`inflate_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnetImage {
    pub identifier: u32,
    pub format: u32,
    pub width: u16,
    pub height: u16,
}

/// Result buffer of [`inflate_texture_block`]: either freshly allocated by
/// the decoder or the caller-supplied slice it decoded into.
pub enum TextureBuffer<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a mut [u8]),
}

impl TextureBuffer<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            TextureBuffer::Owned(v) => v,
            TextureBuffer::Borrowed(s) => s,
        }
    }
}

fn deduce_format(four_cc: u32) -> Result<Format, CodecError> {
    let format = match four_cc {
        0x31545844 => Format { flag_data: FF_COLOR | FF_ALPHA | FF_DEDUCEDALPHACOMP, pixel_size_bits: 4 }, // DXT1
        0x32545844 | 0x33545844 | 0x34545844 => Format { flag_data: FF_COLOR | FF_ALPHA | FF_PLAINCOMP, pixel_size_bits: 8 }, // DXT2/3/4
        0x35545844 => Format { flag_data: FF_COLOR | FF_ALPHA | FF_PLAINCOMP, pixel_size_bits: 8 }, // DXT5
        0x41545844 | 0x4C545844 => Format { flag_data: FF_ALPHA | FF_PLAINCOMP, pixel_size_bits: 4 }, // DXTA/DXTL
        0x4E545844 | 0x58434433 => Format { flag_data: FF_BICOLORCOMP, pixel_size_bits: 8 }, // DXTN/3DCX
        0x48364342 => Format { flag_data: FF_COLOR | FF_HDR | FF_BPTC, pixel_size_bits: 8 }, // BC6H
        0x58374342 => Format { flag_data: FF_COLOR | FF_ALPHA | FF_BPTC, pixel_size_bits: 8 }, // BC7
        other => return Err(CodecError::UnsupportedFormat(other)),
    };
    Ok(format)
}

fn derive_full_format(format: Format, width: u16, height: u16) -> FullFormat {
    let pixel_blocks = ((width as u32 + 3) / 4) * ((height as u32 + 3) / 4);
    let bytes_pixel_blocks = (format.pixel_size_bits as u32 * 4 * 4) / 8;
    let two_component = (format.flag_data & (FF_PLAINCOMP | FF_COLOR | FF_ALPHA)) == (FF_PLAINCOMP | FF_COLOR | FF_ALPHA)
        || (format.flag_data & FF_BICOLORCOMP) != 0
        || (format.flag_data & FF_BPTC) != 0;
    let bytes_component = bytes_pixel_blocks / if two_component { 2 } else { 1 };
    FullFormat { format, pixel_blocks, bytes_pixel_blocks, bytes_component, two_component }
}

/// Advances `pixel_block_position` past every block already marked in
/// `bitmap`, matching the "skip already-resolved blocks" loop every pass
/// repeats after walking one run.
fn skip_marked(bitmap: &[bool], pos: &mut u32) {
    while (*pos as usize) < bitmap.len() && bitmap[*pos as usize] {
        *pos += 1;
    }
}

fn decode_white_color(
    input: &mut WordStream<'_>,
    alpha_bitmap: &mut [bool],
    color_bitmap: &mut [bool],
    full_format: &FullFormat,
    output: &mut [u8],
) -> Result<(), CodecError> {
    let dict = texture_dictionary();
    let mut pos = 0u32;
    while pos < full_format.pixel_blocks {
        let mut run = dict.read_code(input)?;
        let flag = input.read(1)?;

        while run > 0 {
            if !color_bitmap[pos as usize] {
                if flag != 0 {
                    let offset = (full_format.bytes_pixel_blocks * pos) as usize;
                    output[offset..offset + 8].copy_from_slice(&0xFFFF_FFFF_FFFF_FFFEu64.to_le_bytes());
                    alpha_bitmap[pos as usize] = true;
                    color_bitmap[pos as usize] = true;
                }
                run -= 1;
            }
            pos += 1;
        }

        skip_marked(color_bitmap, &mut pos);
    }
    Ok(())
}

fn decode_constant_alpha(
    input: &mut WordStream<'_>,
    alpha_bitmap: &mut [bool],
    full_format: &FullFormat,
    output: &mut [u8],
    alpha_bits: u8,
) -> Result<(), CodecError> {
    let alpha_value_byte = input.read(alpha_bits)? as u64;
    let alpha_value: u64 = if alpha_bits == 4 {
        let nibble = alpha_value_byte & 0xF;
        let byte = nibble | (nibble << 4);
        let word16 = byte | (byte << 8);
        let dword32 = word16 | (word16 << 16);
        dword32 | (dword32 << 32)
    } else {
        alpha_value_byte | (alpha_value_byte << 8)
    };
    let zero_data: u64 = 0;

    let dict = texture_dictionary();
    let mut pos = 0u32;
    while pos < full_format.pixel_blocks {
        let mut run = dict.read_code(input)?;

        let flag = input.read(1)?;
        let is_not_null = input.read_lazy(1)?;
        if flag != 0 {
            input.drop(1)?;
        }

        while run > 0 {
            if !alpha_bitmap[pos as usize] {
                if flag != 0 {
                    let source = if is_not_null != 0 { alpha_value } else { zero_data };
                    let offset = (full_format.bytes_pixel_blocks * pos) as usize;
                    let n = full_format.bytes_component as usize;
                    output[offset..offset + n].copy_from_slice(&source.to_le_bytes()[..n]);
                    alpha_bitmap[pos as usize] = true;
                }
                run -= 1;
            }
            pos += 1;
        }

        skip_marked(alpha_bitmap, &mut pos);
    }
    Ok(())
}

/// Quantize-then-dequantize one 5 (or 6, for green) bit channel, matching
/// `decode_plain_color`'s `temp_*_data_1`/`_2` pair. `shift`/`round_shift`
/// are `(3, 2)` for red/blue and `(2, 4)` for green.
fn quantize_channel(value: u32, drop_bits: u8, shift: u8, round_shift: u8) -> (u32, u32) {
    let q1 = (value.wrapping_sub(value >> drop_bits)) >> shift;
    let mask = (1u32 << (8 - shift)).wrapping_sub(1);
    let q1 = q1 & ((mask << 0) | mask); // keep within the channel's natural bit width
    let q2 = ((q1 << shift).wrapping_add(q1 >> round_shift)) & 0xFFFF;
    (q1, q2)
}

/// `decode_plain_color`'s comparison ratio for one channel: `12 * (value -
/// q2) / (8 - (all-low-bits-of-q1-set ? 1 : 0))`, computed in signed
/// arithmetic (the source's implicit `int` promotion) then reinterpreted as
/// `u32` the same way the original assigns a possibly-negative `int` into a
/// `uint32_t`.
fn comparison_ratio(value: u32, q2: u32, q1: u32, low_bit_mask: u32) -> u32 {
    let denom = 8 - if (q1 & low_bit_mask) == low_bit_mask { 1 } else { 0 };
    let numerator = 12i64 * (value as i64 - q2 as i64);
    (numerator / denom as i64) as u32
}

/// Picks `(v1, v2)` from a channel's comparison ratio, per `decode_plain_color`.
fn select_values(q1: u32, cmp: u32) -> (u32, u32) {
    if cmp < 2 {
        (q1, q1)
    } else if cmp < 6 {
        (q1, q1 + 1)
    } else if cmp < 10 {
        (q1 + 1, q1)
    } else {
        (q1 + 1, q1 + 1)
    }
}

fn decode_plain_color(
    input: &mut WordStream<'_>,
    color_bitmap: &mut [bool],
    full_format: &FullFormat,
    output: &mut [u8],
) -> Result<(), CodecError> {
    let blue_data = input.read(8)?;
    let green_data = input.read(8)?;
    let red_data = input.read(8)?;

    let (q1_red, q2_red) = quantize_channel(red_data, 5, 3, 2);
    let (q1_blue, q2_blue) = quantize_channel(blue_data, 5, 3, 2);
    let (q1_green, q2_green) = quantize_channel(green_data, 6, 2, 4);

    let cmp_red = comparison_ratio(red_data, q2_red, q1_red, 0x11);
    let cmp_blue = comparison_ratio(blue_data, q2_blue, q1_blue, 0x11);
    let cmp_green = comparison_ratio(green_data, q2_green, q1_green, 0x1111);

    let (value_red_1, value_red_2) = select_values(q1_red, cmp_red);
    let (value_blue_1, value_blue_2) = select_values(q1_blue, cmp_blue);
    let (value_green_1, value_green_2) = select_values(q1_green, cmp_green);

    let mut value_color_1 = value_red_1 | ((value_green_1 | (value_blue_1 << 6)) << 5);
    let mut value_color_2 = value_red_2 | ((value_green_2 | (value_blue_2 << 6)) << 5);

    let mut temp_value_1 = 0u32;
    let mut temp_value_2 = 0u32;

    if value_red_1 != value_red_2 {
        temp_value_1 = temp_value_1.wrapping_add(if value_red_1 == q1_red { cmp_red } else { 12u32.wrapping_sub(cmp_red) });
        temp_value_2 += 1;
    }
    if value_blue_1 != value_blue_2 {
        temp_value_1 = temp_value_1.wrapping_add(if value_blue_1 == q1_blue { cmp_blue } else { 12u32.wrapping_sub(cmp_blue) });
        temp_value_2 += 1;
    }
    if value_green_1 != value_green_2 {
        temp_value_1 = temp_value_1.wrapping_add(if value_green_1 == q1_green { cmp_green } else { 12u32.wrapping_sub(cmp_green) });
        temp_value_2 += 1;
    }

    if temp_value_2 > 0 {
        temp_value_1 = (temp_value_1.wrapping_add(temp_value_2 / 2)) / temp_value_2;
    }

    let special_case_dxt1 = (full_format.format.flag_data & FF_DEDUCEDALPHACOMP) != 0
        && (temp_value_1 == 5 || temp_value_1 == 6 || temp_value_2 != 0);

    if temp_value_2 > 0 && !special_case_dxt1 {
        if value_color_2 == 0xFFFF {
            temp_value_1 = 12;
            value_color_1 = value_color_1.wrapping_sub(1);
        } else {
            temp_value_1 = 0;
            value_color_2 = value_color_2.wrapping_add(1);
        }
    }

    if value_color_2 >= value_color_1 {
        std::mem::swap(&mut value_color_1, &mut value_color_2);
        temp_value_1 = 12u32.wrapping_sub(temp_value_1);
    }

    let color_selected = if special_case_dxt1 {
        2u64
    } else if temp_value_1 < 2 {
        0
    } else if temp_value_1 < 6 {
        2
    } else if temp_value_1 < 10 {
        3
    } else {
        1
    };

    let sel_byte = color_selected | (color_selected << 2) | ((color_selected | (color_selected << 2)) << 4);
    let sel_word = sel_byte | (sel_byte << 8);
    let selectors = sel_word | (sel_word << 16);
    let final_value: u64 = value_color_1 as u64 | ((value_color_2 as u64) << 16) | (selectors << 32);

    let dict = texture_dictionary();
    let mut pos = 0u32;
    while pos < full_format.pixel_blocks {
        let mut run = dict.read_code(input)?;
        let flag = input.read(1)?;

        while run > 0 {
            if !color_bitmap[pos as usize] {
                if flag != 0 {
                    let base = full_format.bytes_pixel_blocks * pos;
                    let offset = (base + if full_format.two_component { full_format.bytes_component } else { 0 }) as usize;
                    let n = full_format.bytes_component as usize;
                    output[offset..offset + n].copy_from_slice(&final_value.to_le_bytes()[..n]);
                    color_bitmap[pos as usize] = true;
                }
                run -= 1;
            }
            pos += 1;
        }

        skip_marked(color_bitmap, &mut pos);
    }
    Ok(())
}

fn decode_bptc_float(
    input: &mut WordStream<'_>,
    alpha_bitmap: &mut [bool],
    color_bitmap: &mut [bool],
    full_format: &FullFormat,
    output: &mut [u8],
) -> Result<(), CodecError> {
    let dict = texture_dictionary();
    let mut pos = 0u32;
    while pos < full_format.pixel_blocks {
        let mut run = dict.read_code(input)?;
        let flag = input.read(1)?;

        while run > 0 {
            if !color_bitmap[pos as usize] {
                if flag != 0 {
                    let offset = (full_format.bytes_pixel_blocks * pos) as usize;
                    output[offset..offset + 4].copy_from_slice(&1.0f32.to_le_bytes());
                    alpha_bitmap[pos as usize] = true;
                    color_bitmap[pos as usize] = true;
                }
                run -= 1;
            }
            pos += 1;
        }

        skip_marked(color_bitmap, &mut pos);
    }
    Ok(())
}

fn decode_bptc_unorm(
    input: &mut WordStream<'_>,
    alpha_bitmap: &mut [bool],
    color_bitmap: &mut [bool],
    full_format: &FullFormat,
    output: &mut [u8],
) -> Result<(), CodecError> {
    let dict = texture_dictionary();
    let mut pos = 0u32;
    while pos < full_format.pixel_blocks {
        let mut run = dict.read_code(input)?;
        let flag = input.read(1)?;

        while run > 0 {
            if !color_bitmap[pos as usize] {
                if flag != 0 {
                    let offset = (full_format.bytes_pixel_blocks * pos) as usize;
                    let n = full_format.bytes_component as usize;
                    output[offset..offset + n].fill(0xFF);
                    alpha_bitmap[pos as usize] = true;
                    color_bitmap[pos as usize] = true;
                }
                run -= 1;
            }
            pos += 1;
        }

        skip_marked(color_bitmap, &mut pos);
    }
    Ok(())
}

/// Runs one compressed chunk: the six optional bitmap passes, then the two
/// terminal raw-word passes that copy whatever blocks are still unset
/// straight from the input. `total_words` is the input's word count
/// (`input.len() / 4`, truncating any trailing partial word, matching the
/// original's `input_size = iinput_size / 4`).
fn inflate_data(input: &mut WordStream<'_>, full_format: &FullFormat, total_words: usize, output: &mut [u8]) -> Result<(), CodecError> {
    // The header fields read before this call (identifier/format/width/height,
    // or nothing at all for the block-buffer entry point) total a multiple of
    // 32 bits, so the stream is already word-aligned here; no explicit
    // register reset is needed to match the source's `head = bits = buffer = 0`.
    let _data_size = input.read(32)?;
    let compression_flags = input.read(32)?;

    log::trace!(
        "texture chunk: compression_flags={compression_flags:#x} pixel_blocks={}",
        full_format.pixel_blocks
    );

    let pixel_blocks = full_format.pixel_blocks as usize;
    let mut color_bitmap = vec![false; pixel_blocks];
    let mut alpha_bitmap = vec![false; pixel_blocks];

    if compression_flags & CF_DECODE_WHITE_COLOR != 0 {
        decode_white_color(input, &mut alpha_bitmap, &mut color_bitmap, full_format, output)?;
    }
    if compression_flags & CF_DECODE_CONSTANT_ALPHA_FROM_4_BITS != 0 {
        decode_constant_alpha(input, &mut alpha_bitmap, full_format, output, 4)?;
    }
    if compression_flags & CF_DECODE_CONSTANT_ALPHA_FROM_8_BITS != 0 {
        decode_constant_alpha(input, &mut alpha_bitmap, full_format, output, 8)?;
    }
    if compression_flags & CF_DECODE_PLAIN_COLOR != 0 {
        decode_plain_color(input, &mut color_bitmap, full_format, output)?;
    }
    if compression_flags & CF_DECODE_BPTC_FLOAT != 0 {
        decode_bptc_float(input, &mut alpha_bitmap, &mut color_bitmap, full_format, output)?;
    }
    if compression_flags & CF_DECODE_BPTC_UNORM != 0 {
        decode_bptc_unorm(input, &mut alpha_bitmap, &mut color_bitmap, full_format, output)?;
    }

    input.rewind_one_word_if_buffered();

    let format_flags = full_format.format.flag_data;
    if (format_flags & FF_ALPHA != 0 && format_flags & FF_DEDUCEDALPHACOMP == 0) || format_flags & FF_BICOLORCOMP != 0 {
        for (i, set) in alpha_bitmap.iter().enumerate() {
            if input.word_position() >= total_words {
                log::debug!("texture alpha terminal pass truncated at block {i}, remaining blocks left zeroed");
                break;
            }
            if *set {
                continue;
            }
            let offset = full_format.bytes_pixel_blocks as usize * i;
            let word = input.read(32)?;
            output[offset..offset + 4].copy_from_slice(&word.to_le_bytes());

            if full_format.bytes_component > 4 {
                if input.word_position() >= total_words {
                    log::debug!("texture alpha terminal pass truncated at block {i} (second word), remaining blocks left zeroed");
                    break;
                }
                let word = input.read(32)?;
                output[offset + 4..offset + 8].copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    if format_flags & FF_COLOR != 0 || format_flags & FF_BICOLORCOMP != 0 {
        let component_offset = if full_format.two_component { full_format.bytes_component as usize } else { 0 };
        for (i, set) in color_bitmap.iter().enumerate() {
            if input.word_position() >= total_words {
                log::debug!("texture color terminal pass truncated at block {i}, remaining blocks left zeroed");
                break;
            }
            if *set {
                continue;
            }
            let offset = full_format.bytes_pixel_blocks as usize * i + component_offset;
            let word = input.read(32)?;
            output[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
        }

        if full_format.bytes_component > 4 {
            for (i, set) in color_bitmap.iter().enumerate() {
                if input.word_position() >= total_words {
                    log::debug!("texture color terminal pass truncated at block {i} (second word), remaining blocks left zeroed");
                    break;
                }
                if *set {
                    continue;
                }
                let offset = full_format.bytes_pixel_blocks as usize * i + 4 + component_offset;
                let word = input.read(32)?;
                output[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    Ok(())
}

/// Inflate a full texture stream: header (identifier, four-CC, width,
/// height) followed by one compressed chunk.
pub fn inflate_texture(input: &[u8]) -> Result<(AnetImage, Vec<u8>), CodecError> {
    if input.is_empty() {
        return Err(CodecError::InvalidArgument("texture input buffer is empty"));
    }

    let total_words = input.len() / 4;
    let mut stream = WordStream::new(input);

    let identifier = stream.read(32)?;
    let format_four_cc = stream.read(32)?;
    let width = stream.read(16)? as u16;
    let height = stream.read(16)? as u16;

    let format = deduce_format(format_four_cc)?;
    let full_format = derive_full_format(format, width, height);
    let output_size = (full_format.bytes_pixel_blocks * full_format.pixel_blocks) as usize;

    let mut output = vec![0u8; output_size];
    inflate_data(&mut stream, &full_format, total_words, &mut output)?;

    Ok((AnetImage { identifier, format: format_four_cc, width, height }, output))
}

/// Inflate a single texture block-map chunk: no identifier/format/dimension
/// header, since the caller already knows them. If `output` is `None`, the
/// decoder allocates and returns an owned buffer; otherwise it decodes
/// directly into the caller's slice.
pub fn inflate_texture_block<'a>(
    width: u16,
    height: u16,
    format_four_cc: u32,
    input: &[u8],
    output: Option<&'a mut [u8]>,
) -> Result<TextureBuffer<'a>, CodecError> {
    if input.is_empty() {
        return Err(CodecError::InvalidArgument("texture input buffer is empty"));
    }
    if let Some(ref buf) = output {
        if buf.is_empty() {
            return Err(CodecError::InvalidArgument("output buffer is not null and its size is not defined"));
        }
    }

    let format = deduce_format(format_four_cc)?;
    let full_format = derive_full_format(format, width, height);
    let output_size = (full_format.bytes_pixel_blocks * full_format.pixel_blocks) as usize;

    let total_words = input.len() / 4;
    let mut stream = WordStream::new(input);

    let mut buffer = match output {
        Some(buf) => {
            if buf.len() < output_size {
                return Err(CodecError::BufferTooSmall { needed: output_size, got: buf.len() });
            }
            TextureBuffer::Borrowed(buf)
        }
        None => TextureBuffer::Owned(vec![0u8; output_size]),
    };

    let out_slice: &mut [u8] = match &mut buffer {
        TextureBuffer::Owned(v) => v,
        TextureBuffer::Borrowed(s) => s,
    };
    inflate_data(&mut stream, &full_format, total_words, out_slice)?;

    Ok(buffer)
}
