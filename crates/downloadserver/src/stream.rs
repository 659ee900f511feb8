// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chunk-by-chunk gzip transforms over response bodies.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use futures::StreamExt;

use crate::params::Params;
use crate::store::ByteStream;

/// Transform applied to a download's body on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransform {
    Passthrough,
    Gzip,
    Gunzip,
}

impl StreamTransform {
    /// `gz` asks for a compressed body, `nogz` for a decompressed one.
    pub fn from_params(params: &Params) -> Self {
        if params.has("gz") {
            Self::Gzip
        } else if params.has("nogz") {
            Self::Gunzip
        } else {
            Self::Passthrough
        }
    }

    pub fn apply(self, body: ByteStream) -> ByteStream {
        match self {
            Self::Passthrough => body,
            Self::Gzip => transcode(body, GzEncoder::new(Vec::new(), Compression::default())),
            Self::Gunzip => transcode(body, GzDecoder::new(Vec::new())),
        }
    }
}

/// A streaming codec writing into an in-memory buffer.
trait Transcoder: Send + 'static {
    /// Feeds `chunk` in, returning whatever output is ready.
    fn push(&mut self, chunk: &[u8]) -> std::io::Result<Bytes>;
    /// Flushes the remaining output.
    fn finish(self) -> std::io::Result<Bytes>;
}

impl Transcoder for GzEncoder<Vec<u8>> {
    fn push(&mut self, chunk: &[u8]) -> std::io::Result<Bytes> {
        self.write_all(chunk)?;
        Ok(std::mem::take(self.get_mut()).into())
    }

    fn finish(self) -> std::io::Result<Bytes> {
        GzEncoder::finish(self).map(Bytes::from)
    }
}

impl Transcoder for GzDecoder<Vec<u8>> {
    fn push(&mut self, chunk: &[u8]) -> std::io::Result<Bytes> {
        self.write_all(chunk)?;
        Ok(std::mem::take(self.get_mut()).into())
    }

    fn finish(self) -> std::io::Result<Bytes> {
        GzDecoder::finish(self).map(Bytes::from)
    }
}

fn transcode<T: Transcoder>(body: ByteStream, coder: T) -> ByteStream {
    // `None` once the stream has ended or failed.
    let state = (body, Some(coder));
    futures::stream::unfold(state, |(mut body, mut coder)| async move {
        let active = coder.as_mut()?;
        loop {
            match body.next().await {
                Some(Ok(chunk)) => match active.push(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Some((Ok(out), (body, coder))),
                    Err(err) => return Some((Err(err), (body, None))),
                },
                Some(Err(err)) => return Some((Err(err), (body, None))),
                None => {
                    let rest = coder.take()?.finish();
                    return Some((rest, (body, None)));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Read;

    fn chunked(data: &[u8], size: usize) -> ByteStream {
        let chunks: Vec<std::io::Result<Bytes>> = data
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    async fn collect(body: ByteStream) -> std::io::Result<Vec<u8>> {
        let chunks: Vec<Bytes> = body.try_collect().await?;
        Ok(chunks.concat())
    }

    fn sample() -> Vec<u8> {
        (0..50_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn gzip_output_is_readable_gzip() {
        let data = sample();
        let compressed = collect(StreamTransform::Gzip.apply(chunked(&data, 4096)))
            .await
            .unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = vec![];
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[tokio::test]
    async fn gunzip_undoes_gzip_across_odd_chunk_boundaries() {
        let data = sample();
        let compressed = collect(StreamTransform::Gzip.apply(chunked(&data, 1000)))
            .await
            .unwrap();
        let restored = collect(StreamTransform::Gunzip.apply(chunked(&compressed, 7)))
            .await
            .unwrap();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn gunzip_of_garbage_fails() {
        let result = collect(StreamTransform::Gunzip.apply(chunked(b"definitely not gzip", 5))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn upstream_errors_end_the_stream() {
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::ErrorKind::ConnectionReset.into()),
            Ok(Bytes::from_static(b"def")),
        ];
        let out: Vec<_> = StreamTransform::Gzip
            .apply(futures::stream::iter(items).boxed())
            .collect()
            .await;
        assert!(out.last().unwrap().is_err());
    }

    #[test]
    fn transform_from_params() {
        assert_eq!(
            StreamTransform::from_params(&Params::parse(Some("gz"))),
            StreamTransform::Gzip
        );
        assert_eq!(
            StreamTransform::from_params(&Params::parse(Some("nogz"))),
            StreamTransform::Gunzip
        );
        assert_eq!(
            StreamTransform::from_params(&Params::default()),
            StreamTransform::Passthrough
        );
    }
}
