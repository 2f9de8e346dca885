//! Decompression codecs for Guild Wars 2 `.dat` archive payloads.
//!
//! This crate is a thin aggregator: the actual codecs live in the
//! `gw2_dat_inflate` and `gw2_texture_inflate` crates and are re-exported
//! here behind Cargo features so downstream crates can pull in only the
//! decoder they need.

pub use gw2_error::CodecError;

#[cfg(feature = "dat")]
pub use gw2_dat_inflate as dat_inflate;

#[cfg(feature = "texture")]
pub use gw2_texture_inflate as texture_inflate;
