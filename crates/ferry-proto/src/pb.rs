//! Protobuf wire types for the binary encoding.
//!
//! Hand-maintained mirror of `proto/message.proto`; kept in lockstep with
//! [`crate::message::Message`] by the conversions in [`crate::codec`].

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "MessageType", tag = "2")]
    pub r#type: i32,
    #[prost(string, tag = "3")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub recipient: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub conversation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub group_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "7")]
    pub is_group: bool,
    #[prost(string, tag = "8")]
    pub content: ::prost::alloc::string::String,
    #[prost(int64, tag = "9")]
    pub timestamp: i64,
    #[prost(enumeration = "MessageStatus", tag = "10")]
    pub status: i32,
    #[prost(int32, tag = "11")]
    pub status_code: i32,
    #[prost(string, tag = "12")]
    pub request_id: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "13")]
    pub metadata: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(message, optional, tag = "14")]
    pub error: ::core::option::Option<ErrorInfo>,
    #[prost(message, optional, tag = "15")]
    pub media: ::core::option::Option<MediaInfo>,
    #[prost(bool, tag = "16")]
    pub handled_by_local: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub details: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaInfo {
    #[prost(string, tag = "1")]
    pub mime_type: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub size_bytes: u64,
    #[prost(uint32, tag = "3")]
    pub width: u32,
    #[prost(uint32, tag = "4")]
    pub height: u32,
    #[prost(uint64, tag = "5")]
    pub duration_ms: u64,
    #[prost(string, tag = "6")]
    pub url: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Unknown = 0,
    Text = 1,
    Image = 2,
    File = 3,
    Audio = 4,
    Video = 5,
    Ping = 6,
    Pong = 7,
    Status = 8,
    Error = 9,
    Command = 10,
    Response = 11,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageStatus {
    Unknown = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
    Failed = 4,
    Unsent = 5,
}
