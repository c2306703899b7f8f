//! # Socket
//!
//! Client side of the legacy feed: resolve the configured host, open one TCP
//! connection with keep-alive, and read newline-delimited records from it
//! under a sliding idle timeout. Blank lines never leave this module;
//! undecodable bytes are replaced, never fatal.

pub mod reader;
pub mod resolver;

pub use reader::{
    is_content_line, open, FeedFrame, FeedLineCodec, SocketLineReader, DEFAULT_MAX_LINE_LENGTH,
};
pub use resolver::{first_endpoint, resolve, Endpoint};
