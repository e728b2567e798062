use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Body stream handed to the request handler
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Stream a cached entry from disk
pub fn file_stream(file: File, buffer_size: usize) -> ByteStream {
    ReaderStream::with_capacity(file, buffer_size).boxed()
}

/// Adapt a reqwest body into a [`ByteStream`]
pub fn response_stream(response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other))
        .boxed()
}
