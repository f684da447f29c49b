//! `multipart/mixed` request bodies carrying a JSON `meta` part and a raw
//! `file` part.
//!
//! reqwest's own multipart support only emits `multipart/form-data`, and the
//! hosting endpoint requires `multipart/mixed`, so the framing is written by
//! hand. The file part is streamed from disk and the file is reopened for
//! every send, which keeps the body replayable for a retried request.

use std::io;
use std::path::{Path, PathBuf};

use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use rand::{Rng, distr::Alphanumeric};
use reqwest::Body;
use tokio::fs::File;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::api::error::ApiError;

pub const PART_META: &str = "meta";
pub const PART_FILE: &str = "file";

const BOUNDARY_LEN: usize = 30;

#[derive(Debug, Clone)]
pub struct MultipartFile {
    boundary: String,
    meta: Bytes,
    path: PathBuf,
}

impl MultipartFile {
    pub fn new(meta: Vec<u8>, path: impl Into<PathBuf>) -> Self {
        let mut rng = rand::rng();
        let boundary = std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
            .take(BOUNDARY_LEN)
            .collect();

        Self {
            boundary,
            meta: Bytes::from(meta),
            path: path.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary())
    }

    fn head(&self) -> Bytes {
        let mut head = BytesMut::new();
        head.extend_from_slice(self.part_header(PART_META).as_bytes());
        head.extend_from_slice(&self.meta);
        head.extend_from_slice(b"\r\n");
        head.extend_from_slice(self.part_header(PART_FILE).as_bytes());
        head.freeze()
    }

    fn part_header(&self, name: &str) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
            self.boundary, name
        )
    }

    fn tail(&self) -> Bytes {
        Bytes::from(format!("\r\n--{}--\r\n", self.boundary))
    }

    /// Open the file and return the full encoded body as a byte stream.
    /// The file handle lives inside the stream and is closed when it is dropped.
    pub async fn open_stream(&self) -> Result<BoxStream<'static, io::Result<Bytes>>, ApiError> {
        let file = File::open(&self.path).await.map_err(|source| ApiError::File {
            path: self.path.clone(),
            source,
        })?;

        let contents = FramedRead::new(file, BytesCodec::new()).map_ok(BytesMut::freeze);

        let head = stream::once(futures_util::future::ready(Ok::<_, io::Error>(self.head())));
        let tail = stream::once(futures_util::future::ready(Ok::<_, io::Error>(self.tail())));

        Ok(head.chain(contents).chain(tail).boxed())
    }

    pub async fn into_body(self) -> Result<Body, ApiError> {
        Ok(Body::wrap_stream(self.open_stream().await?))
    }
}
