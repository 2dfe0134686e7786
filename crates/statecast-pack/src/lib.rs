//! Compact binary value codec used by the statecast wire formats.
//!
//! A MessagePack encoder and decoder over [`PackValue`]. Besides the usual
//! JSON shapes the codec carries the `undefined` marker (`0xc1`), binary
//! blobs and extension values, which the schema codec uses to tag
//! structured values with their node ids.

mod decoder;
mod encoder;
mod error;
mod value;
mod writer;

pub use decoder::{MsgPackDecoder, MAX_DEPTH};
pub use encoder::MsgPackEncoder;
pub use error::PackError;
pub use value::PackValue;
pub use writer::Writer;

/// Encodes a single value into a fresh buffer.
pub fn encode(value: &PackValue) -> Vec<u8> {
    MsgPackEncoder::new().encode(value)
}

/// Decodes exactly one value; bytes left over after it are an error.
pub fn decode(input: &[u8]) -> Result<PackValue, PackError> {
    let mut decoder = MsgPackDecoder::new(input);
    let value = decoder.read_any()?;
    decoder.finish()?;
    Ok(value)
}
