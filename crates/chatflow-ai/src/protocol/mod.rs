//! Wire encodings for streamed replies

mod data_stream;

pub use data_stream::{
    DATA_STREAM_HEADER, EncodedStream, FINISH_TAG, PROTOCOL_VERSION, STREAM_PROTOCOL_HEADER,
    StreamProtocol, TOKEN_TAG, encode_finish, encode_stream, encode_token,
};
