//! Error type shared by the bitstream, Huffman, and inflater crates.

use core::fmt;

/// Errors produced while decoding a Gw2 `.dat` payload or texture block stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bit stream ran out of input while bits were still required to
    /// satisfy a `read`/`peek` request.
    UnexpectedEof,
    /// A Huffman decode mismatch, symbol count overflow, or invalid
    /// length/offset code was encountered. Carries a short static
    /// description of which check failed.
    CorruptStream(&'static str),
    /// The texture header's four-character-code did not match any known
    /// pixel format.
    UnsupportedFormat(u32),
    /// A caller-supplied output buffer was smaller than the format requires.
    BufferTooSmall { needed: usize, got: usize },
    /// A precondition on a public entry point was violated (null/empty
    /// input, a bit-width request outside `[1, 32]`, and similar).
    InvalidArgument(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof => write!(f, "unexpected end of input while reading bit stream"),
            CodecError::CorruptStream(reason) => write!(f, "corrupt compressed stream: {reason}"),
            CodecError::UnsupportedFormat(fourcc) => {
                write!(f, "unsupported texture format (four-character-code {fourcc:#010x})")
            }
            CodecError::BufferTooSmall { needed, got } => {
                write!(f, "output buffer too small: needed {needed} bytes, got {got}")
            }
            CodecError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_mention_the_offending_value() {
        let err = CodecError::UnsupportedFormat(0x3154_5844);
        assert!(err.to_string().contains("31545844"));

        let err = CodecError::BufferTooSmall { needed: 64, got: 32 };
        assert!(err.to_string().contains("64"));
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn is_a_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&CodecError::UnexpectedEof);
    }
}
