//! Streaming encode for download bodies

use std::io;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use super::ObfuscationCodec;

/// Stream `reader` through the codec block by block, carrying the keystream
/// offset across blocks so the output equals a one-shot encode.
pub fn encode_reader<R>(
    reader: R,
    codec: ObfuscationCodec,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Send + 'static,
{
    let mut offset = 0u64;
    ReaderStream::new(reader).map(move |block| {
        block.map(|bytes| {
            let mut buf = bytes.to_vec();
            codec.apply_at(&mut buf, offset);
            offset += buf.len() as u64;
            Bytes::from(buf)
        })
    })
}
