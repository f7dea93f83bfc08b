use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, info};

use homedash_core::{CameraDescriptor, SourceKind};

use crate::error::{Result, StreamError};
use crate::mjpeg::MjpegDemuxer;

/// Something a producer can pull JPEG frames from.
#[async_trait]
pub trait FrameSource: Send {
    /// Next JPEG frame. Errors are per-frame; the producer keeps calling.
    async fn next_frame(&mut self) -> Result<Bytes>;

    /// Drop any open connection so the next call starts over.
    fn reset(&mut self) {}
}

/// Build the source matching the camera's kind.
pub fn source_for(descriptor: &CameraDescriptor, client: Client, timeout: Duration) -> Box<dyn FrameSource> {
    let url = descriptor.source_url();
    match descriptor.kind {
        SourceKind::Esp => Box::new(EspStreamSource::new(client, url, timeout)),
        SourceKind::Robot => Box::new(SnapshotSource::new(client, url, timeout)),
    }
}

/// Persistent MJPEG pull from an ESP32 camera.
pub struct EspStreamSource {
    client: Client,
    url: String,
    connect_timeout: Duration,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    demuxer: MjpegDemuxer,
}

impl EspStreamSource {
    pub fn new(client: Client, url: String, connect_timeout: Duration) -> Self {
        Self { client, url, connect_timeout, body: None, demuxer: MjpegDemuxer::new() }
    }

    async fn connect(&mut self) -> Result<()> {
        // No read timeout: a stalled stream surfaces as a read error and a reconnect.
        let response = tokio::time::timeout(self.connect_timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| StreamError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))??;
        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }
        info!(url = %self.url, "MJPEG stream connected");
        self.body = Some(response.bytes_stream().boxed());
        self.demuxer.clear();
        Ok(())
    }
}

#[async_trait]
impl FrameSource for EspStreamSource {
    async fn next_frame(&mut self) -> Result<Bytes> {
        if self.body.is_none() {
            self.connect().await?;
        }
        loop {
            if let Some(frame) = self.demuxer.latest_frame() {
                return Ok(frame);
            }
            let Some(body) = self.body.as_mut() else {
                return Err(StreamError::StreamEnded);
            };
            match body.next().await {
                Some(Ok(chunk)) => self.demuxer.push(&chunk),
                Some(Err(e)) => {
                    self.reset();
                    return Err(e.into());
                }
                None => {
                    self.reset();
                    return Err(StreamError::StreamEnded);
                }
            }
        }
    }

    fn reset(&mut self) {
        if self.body.take().is_some() {
            debug!(url = %self.url, "dropping MJPEG connection");
        }
        self.demuxer.clear();
    }
}

/// One-shot snapshot polling, used for robot cameras.
pub struct SnapshotSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl SnapshotSource {
    pub fn new(client: Client, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    async fn next_frame(&mut self) -> Result<Bytes> {
        let response = self.client.get(&self.url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(StreamError::EmptyFrame);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const FRAME_A: &[u8] = b"\xFF\xD8frame-a\xFF\xD9";
    const FRAME_B: &[u8] = b"\xFF\xD8frame-b\xFF\xD9";

    fn client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    async fn read_request(sock: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = format!("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", jpeg.len()).into_bytes();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[tokio::test]
    async fn esp_source_yields_frames_then_reports_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (next_tx, next_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            sock.write_all(&part(FRAME_A)).await.unwrap();
            sock.flush().await.unwrap();
            let _ = next_rx.await;
            sock.write_all(&part(FRAME_B)).await.unwrap();
            sock.shutdown().await.unwrap();
        });

        let mut source = EspStreamSource::new(client(), format!("http://{}/stream", addr), Duration::from_secs(2));
        assert_eq!(source.next_frame().await.unwrap(), Bytes::from_static(FRAME_A));
        next_tx.send(()).unwrap();
        assert_eq!(source.next_frame().await.unwrap(), Bytes::from_static(FRAME_B));

        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, StreamError::StreamEnded | StreamError::Http(_)), "got {:?}", err);
        assert!(source.body.is_none());
    }

    #[tokio::test]
    async fn esp_source_unreachable_device_is_an_error() {
        // bind then drop so nothing is listening on the port
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let mut source = EspStreamSource::new(client(), format!("http://{}/stream", addr), Duration::from_millis(500));
        assert!(source.next_frame().await.is_err());
    }

    async fn serve(responses: Vec<Vec<u8>>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                read_request(&mut sock).await;
                sock.write_all(&response).await.unwrap();
                sock.shutdown().await.unwrap();
            }
        });
        addr
    }

    fn http(status: &str, body: &[u8]) -> Vec<u8> {
        let mut out =
            format!("HTTP/1.1 {}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", status, body.len())
                .into_bytes();
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn snapshot_source_checks_status_and_body() {
        let addr = serve(vec![http("200 OK", FRAME_A), http("503 Service Unavailable", b""), http("200 OK", b"")]).await;
        let mut source = SnapshotSource::new(client(), format!("http://{}/capture", addr), Duration::from_secs(2));

        assert_eq!(source.next_frame().await.unwrap(), Bytes::from_static(FRAME_A));
        assert!(matches!(source.next_frame().await.unwrap_err(), StreamError::Status(503)));
        assert!(matches!(source.next_frame().await.unwrap_err(), StreamError::EmptyFrame));
    }
}
