use std::io;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Destination of the bytes a response writer forwards.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_all(&mut self, data: Bytes) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for Vec<u8> {
    async fn write_all(&mut self, data: Bytes) -> io::Result<()> {
        self.extend_from_slice(&data);
        Ok(())
    }
}

/// Sink feeding an axum response body through a bounded channel.
///
/// Each forwarded write becomes one body frame. A dropped receiver means
/// the client went away and surfaces as [`io::ErrorKind::BrokenPipe`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl ChannelSink {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn write_all(&mut self, data: Bytes) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

/// Create a connected sink and streaming response body.
#[must_use]
pub fn channel_body(capacity: usize) -> (ChannelSink, Body) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    (ChannelSink { tx }, Body::from_stream(frames))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every forwarded frame and flush; can be told to fail writes.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) frames: Vec<Bytes>,
        pub(crate) flushes: usize,
        pub(crate) broken: bool,
    }

    impl RecordingSink {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.frames.concat()
        }

        pub(crate) fn text(&self) -> String {
            String::from_utf8(self.bytes()).unwrap()
        }
    }

    #[async_trait]
    impl ResponseSink for RecordingSink {
        async fn write_all(&mut self, data: Bytes) -> io::Result<()> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.frames.push(data);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_body_delivers_frames_in_order() {
        let (mut sink, body) = channel_body(4);
        let writer = tokio::spawn(async move {
            sink.write_all(Bytes::from_static(b"data: a\n\n")).await.unwrap();
            sink.write_all(Bytes::new()).await.unwrap();
            sink.write_all(Bytes::from_static(b"data: b\n\n")).await.unwrap();
        });

        let collected = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        writer.await.unwrap();
        assert_eq!(&collected[..], b"data: a\n\ndata: b\n\n");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_client() {
        let (mut sink, body) = channel_body(1);
        drop(body);
        assert!(sink.is_closed());
        let err = sink
            .write_all(Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
