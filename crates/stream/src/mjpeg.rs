//! Splitting a multipart MJPEG byte stream into JPEG frames, and framing
//! JPEG frames back into multipart parts for browsers.

use bytes::{Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Accumulates chunks read from an MJPEG pull connection. Boundary lines and
/// part headers are skipped by scanning for JPEG start/end markers.
#[derive(Default)]
pub struct MjpegDemuxer {
    pending: BytesMut,
}

impl MjpegDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            // A frame this large is garbage; drop the oldest bytes and resync.
            let overflow = self.pending.len() - MAX_PENDING_BYTES;
            let _ = self.pending.split_to(overflow);
        }
    }

    /// Newest complete frame buffered so far. Older complete frames are
    /// discarded, the source is read for freshness not completeness.
    pub fn latest_frame(&mut self) -> Option<Bytes> {
        let mut latest = None;
        loop {
            let Some(start) = find_marker(&self.pending, &JPEG_SOI) else {
                // keep a trailing 0xFF, it may be half of the next SOI
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                let drop = self.pending.len() - keep;
                let _ = self.pending.split_to(drop);
                break;
            };
            let Some(end_rel) = find_marker(&self.pending[start + 2..], &JPEG_EOI) else {
                let _ = self.pending.split_to(start);
                break;
            };
            let end = start + 2 + end_rel + 2;
            let mut frame = self.pending.split_to(end);
            latest = Some(frame.split_off(start).freeze());
        }
        latest
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}

/// One multipart part carrying `jpeg`.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut out = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn esp_part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = b"--123456789000000000000987654321\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn skips_part_headers() {
        let mut demux = MjpegDemuxer::new();
        let frame = fake_jpeg(b"abc");
        demux.push(&esp_part(&frame));
        assert_eq!(demux.latest_frame().as_deref(), Some(frame.as_slice()));
        assert!(demux.latest_frame().is_none());
    }

    #[test]
    fn reassembles_frame_split_across_reads() {
        let mut demux = MjpegDemuxer::new();
        let part = esp_part(&fake_jpeg(b"hello-world"));
        let (a, b) = part.split_at(part.len() / 2);
        demux.push(a);
        assert!(demux.latest_frame().is_none());
        demux.push(b);
        assert_eq!(demux.latest_frame().as_deref(), Some(fake_jpeg(b"hello-world").as_slice()));
    }

    #[test]
    fn soi_split_between_reads_is_kept() {
        let mut demux = MjpegDemuxer::new();
        demux.push(b"--frame\r\n\r\n\xFF");
        assert!(demux.latest_frame().is_none());
        demux.push(b"\xD8xyz\xFF\xD9");
        assert_eq!(demux.latest_frame().as_deref(), Some(&b"\xFF\xD8xyz\xFF\xD9"[..]));
    }

    #[test]
    fn returns_newest_of_several_buffered_frames() {
        let mut demux = MjpegDemuxer::new();
        let mut chunk = esp_part(&fake_jpeg(b"111"));
        chunk.extend(esp_part(&fake_jpeg(b"222")));
        demux.push(&chunk);
        assert_eq!(demux.latest_frame().as_deref(), Some(fake_jpeg(b"222").as_slice()));
    }

    #[test]
    fn part_is_framed_with_boundary() {
        let part = multipart_part(b"\xFF\xD8\xFF\xD9");
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 4\r\n\r\n"));
        assert!(part.ends_with(b"\xFF\xD9\r\n"));
    }
}
