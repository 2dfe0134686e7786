use thiserror::Error;

/// Errors produced while decoding MessagePack input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid marker byte at offset {0}")]
    InvalidByte(usize),
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("map key is not a string")]
    NotStr,
    #[error("{0} trailing byte(s) after the decoded value")]
    TrailingBytes(usize),
    #[error("input nests deeper than {0} levels")]
    TooDeep(usize),
}
