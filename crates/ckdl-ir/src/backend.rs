//! The back-end response protocol.
//!
//! Back ends read a single [`crate::Partial`] or [`crate::Bundle`] on stdin
//! and write a stream of length-delimited [`Response`] messages on stdout.
//! The compiler treats back ends as opaque processes; these messages are
//! defined here so both sides agree on the frame contents.

use prost::Message;

/// One frame of back-end output.
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(oneof = "response::Type", tags = "1, 2")]
    pub r#type: Option<response::Type>,
}

pub mod response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Log(super::Log),
        #[prost(message, tag = "2")]
        Result(super::GeneratedFile),
    }
}

/// A log line from a back end, with optional structured values.
#[derive(Clone, PartialEq, Message)]
pub struct Log {
    #[prost(enumeration = "log::Level", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    /// Trace lines, outermost first, as rendered by the back end.
    #[prost(string, repeated, tag = "3")]
    pub trace: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<log::Value>,
}

pub mod log {
    use prost::Message;

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Level {
        Info = 0,
        Error = 1,
    }

    /// A key/value pair attached to a log line (string values only in v1).
    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub key: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }
}

/// A generated artifact emitted by a back end.
#[derive(Clone, PartialEq, Message)]
pub struct GeneratedFile {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub contents: Vec<u8>,
}
