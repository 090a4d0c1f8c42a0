//! In-memory broker used by the consumer tests.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use qreader::protocol::{build_frame, FrameType, Message, MessageId, MAGIC_V1};
use qreader::transport::{BoxedStream, QueuedConnector};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// How long any single expectation may wait.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A command read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub raw: Vec<u8>,
}

impl Received {
    pub fn verb(&self) -> &str {
        let end = self
            .raw
            .iter()
            .position(|b| *b == b' ' || *b == b'\n')
            .unwrap_or(self.raw.len());
        std::str::from_utf8(&self.raw[..end]).unwrap()
    }

    /// Raw id of FIN/REQ/TOUCH.
    pub fn id(&self) -> [u8; 16] {
        let start = self.verb().len() + 1;
        self.raw[start..start + 16].try_into().unwrap()
    }

    /// Text after the id, without the newline (the REQ delay).
    pub fn trailing(&self) -> String {
        let start = self.verb().len() + 1 + 16 + 1;
        String::from_utf8(self.raw[start..self.raw.len() - 1].to_vec()).unwrap()
    }
}

/// Broker end of one connection.
pub struct MockBroker {
    stream: DuplexStream,
}

impl MockBroker {
    pub async fn expect_magic(&mut self) {
        let mut magic = [0u8; 4];
        tokio::time::timeout(STEP_TIMEOUT, self.stream.read_exact(&mut magic))
            .await
            .expect("magic in time")
            .expect("magic bytes");
        assert_eq!(&magic, MAGIC_V1);
    }

    /// Accept the connection: magic, `SUB topic channel`, `OK`.
    pub async fn accept(&mut self, topic: &str, channel: &str) {
        self.expect_magic().await;
        let sub = self.read_command().await;
        assert_eq!(sub.raw, format!("SUB {} {}\n", topic, channel).into_bytes());
        self.send_frame(FrameType::Response, b"OK").await;
    }

    /// Read the next complete command.
    pub async fn read_command(&mut self) -> Received {
        tokio::time::timeout(STEP_TIMEOUT, self.read_command_inner())
            .await
            .expect("command in time")
    }

    async fn read_command_inner(&mut self) -> Received {
        let mut raw = Vec::new();
        loop {
            let b = self.stream.read_u8().await.expect("command byte");
            raw.push(b);
            if b == b' ' || b == b'\n' {
                break;
            }
        }
        let verb = raw[..raw.len() - 1].to_vec();

        if raw.last() == Some(&b'\n') {
            if verb == b"IDENTIFY" {
                let len = self.stream.read_u32().await.expect("identify length");
                let mut body = vec![0u8; len as usize];
                self.stream.read_exact(&mut body).await.expect("identify body");
                raw.extend_from_slice(&len.to_be_bytes());
                raw.extend(body);
            }
            return Received { raw };
        }

        if matches!(&verb[..], b"FIN" | b"REQ" | b"TOUCH") {
            let mut id = [0u8; 16];
            self.stream.read_exact(&mut id).await.expect("message id");
            raw.extend_from_slice(&id);
        }
        loop {
            let b = self.stream.read_u8().await.expect("command byte");
            raw.push(b);
            if b == b'\n' {
                break;
            }
        }
        Received { raw }
    }

    /// Read commands until one with `verb` arrives, returning it.
    pub async fn read_until(&mut self, verb: &str) -> Received {
        loop {
            let cmd = self.read_command().await;
            if cmd.verb() == verb {
                return cmd;
            }
        }
    }

    pub async fn send_frame(&mut self, frame_type: FrameType, payload: &[u8]) {
        self.stream
            .write_all(&build_frame(frame_type, payload))
            .await
            .expect("write frame");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write bytes");
    }

    pub async fn send_message(&mut self, id: [u8; 16], attempts: u16, body: &[u8]) {
        let message = Message::new(
            MessageId::from(id),
            Bytes::copy_from_slice(body),
            1_700_000_000_000_000_000,
            attempts,
        );
        self.send_frame(FrameType::Message, &message.encode()).await;
    }

    /// Write several message frames with a single write, so the client
    /// reads them together.
    pub async fn send_burst(&mut self, ids: &[[u8; 16]], body: &[u8]) {
        let mut bytes = Vec::new();
        for id in ids {
            let message = Message::new(
                MessageId::from(*id),
                Bytes::copy_from_slice(body),
                1_700_000_000_000_000_000,
                1,
            );
            bytes.extend(build_frame(FrameType::Message, &message.encode()));
        }
        self.send_raw(&bytes).await;
    }

    pub async fn send_heartbeat(&mut self) {
        self.send_frame(FrameType::Response, b"_heartbeat_").await;
    }

    /// Wait for the client to close its end, returning anything still unread.
    pub async fn expect_eof(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        tokio::time::timeout(STEP_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("client closed in time")
            .expect("read to end");
        rest
    }
}

/// `n` in-memory connections: a connector for the consumer and the broker ends.
pub fn brokers(n: usize) -> (QueuedConnector, Vec<MockBroker>) {
    let mut clients: Vec<BoxedStream> = Vec::new();
    let mut brokers = Vec::new();
    for _ in 0..n {
        let (client, broker) = duplex(64 * 1024);
        clients.push(Box::new(client));
        brokers.push(MockBroker { stream: broker });
    }
    (QueuedConnector::new(clients), brokers)
}

/// Printable 16-byte id: `msg-` followed by the zero-padded number.
pub fn message_id(n: u32) -> [u8; 16] {
    let text = format!("msg-{:012}", n);
    text.as_bytes().try_into().unwrap()
}
