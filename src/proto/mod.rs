//! Wire messages of the HTTP API, generated from `api.proto` and encoded as
//! protobuf or camelCase JSON.

include!(concat!(env!("OUT_DIR"), "/api.rs"));
