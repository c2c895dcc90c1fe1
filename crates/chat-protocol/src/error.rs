/// Errors raised while decoding inbound payload frames.
///
/// These never escape [`FrameParser::parse`](crate::FrameParser::parse):
/// a bad payload drops the frame and is logged, the connection carries on.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed function data: {0}")]
    MalformedFunctionData(String),

    #[error("unterminated {0} frame")]
    UnterminatedFrame(&'static str),

    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
