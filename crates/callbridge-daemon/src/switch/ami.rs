//! Minimal manager-protocol client
//!
//! Speaks just enough of the switch's manager interface for the reconciler:
//! login on connect, the `QueueStatus` action with its event batch, and
//! `DBGet` for a number's home queue. Frames are blank-line-terminated
//! `Key: Value` blocks. The connection is opened lazily and dropped on any
//! protocol or IO error, so the next request reconnects from scratch.

use super::{QueueMemberEvent, SwitchClient};
use crate::config::AmiConfig;
use async_trait::async_trait;
use callbridge_common::{BridgeError, Result};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One `Key: Value` frame
type Frame = HashMap<String, String>;

fn switch_err(message: impl Into<String>) -> BridgeError {
    BridgeError::Switch(message.into())
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn send_action(&mut self, action: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut block = format!("Action: {action}\r\n");
        for (key, value) in fields {
            block.push_str(&format!("{key}: {value}\r\n"));
        }
        block.push_str("\r\n");
        self.writer.write_all(block.as_bytes()).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut frame = Frame::new();
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(switch_err("connection closed by switch"));
            }
            let line = line.trim_end();
            if line.is_empty() {
                return Ok(frame);
            }
            if let Some((key, value)) = line.split_once(':') {
                frame.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
}

/// Manager-protocol [`SwitchClient`]
pub struct AmiClient {
    config: AmiConfig,
    conn: Mutex<Option<Connection>>,
    events: Mutex<Vec<QueueMemberEvent>>,
}

impl AmiClient {
    pub fn new(config: AmiConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let addr = self.config.addr();
        debug!("Connecting to switch manager at {}", addr);
        let stream = tokio::time::timeout(self.config.read_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| switch_err(format!("timed out connecting to {addr}")))?
            .map_err(|e| switch_err(format!("cannot connect to {addr}: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        // Greeting line, e.g. "Asterisk Call Manager/5.0"
        let mut greeting = String::new();
        self.with_timeout(conn.reader.read_line(&mut greeting)).await??;

        conn.send_action(
            "Login",
            &[
                ("Username", &self.config.username),
                ("Secret", &self.config.secret),
            ],
        )
        .await?;
        let reply = self.with_timeout(conn.read_frame()).await??;
        if reply.get("Response").map(String::as_str) != Some("Success") {
            return Err(switch_err(format!(
                "login rejected: {}",
                reply.get("Message").map(String::as_str).unwrap_or("no message")
            )));
        }

        info!("Logged in to switch manager at {}", addr);
        Ok(conn)
    }

    async fn with_timeout<T>(
        &self,
        future: impl std::future::Future<Output = T>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.read_timeout(), future)
            .await
            .map_err(|_| switch_err("switch response timed out"))
    }

    async fn collect_queue_status(&self, conn: &mut Connection) -> Result<Vec<QueueMemberEvent>> {
        conn.send_action("QueueStatus", &[]).await?;
        let mut batch = Vec::new();
        loop {
            let frame = self.with_timeout(conn.read_frame()).await??;
            match frame.get("Event").map(String::as_str) {
                Some("QueueMember") => {
                    let (Some(queue), Some(name)) = (frame.get("Queue"), frame.get("Name")) else {
                        warn!("QueueMember event without Queue/Name, skipping");
                        continue;
                    };
                    batch.push(QueueMemberEvent {
                        queue: queue.clone(),
                        name: name.clone(),
                    });
                }
                Some("QueueStatusComplete") => return Ok(batch),
                // Response acknowledgement and unrelated events
                _ => continue,
            }
        }
    }

    async fn lookup_home_queue(&self, conn: &mut Connection, number: &str) -> Result<String> {
        conn.send_action(
            "DBGet",
            &[("Family", &self.config.home_queue_family), ("Key", number)],
        )
        .await?;
        loop {
            let frame = self.with_timeout(conn.read_frame()).await??;
            if frame.get("Response").map(String::as_str) == Some("Error") {
                return Err(switch_err(format!("no home queue for {number}")));
            }
            if frame.get("Event").map(String::as_str) == Some("DBGetResponse") {
                let value = frame.get("Val").map(String::as_str).unwrap_or("");
                // Only the first line names the queue
                let queue = value.lines().next().unwrap_or("").trim();
                if queue.is_empty() {
                    return Err(switch_err(format!("empty home queue for {number}")));
                }
                return Ok(queue.to_string());
            }
        }
    }

    /// Take the (lazily opened) connection out of its slot; on success the
    /// caller puts it back, on failure it stays dropped so the next request
    /// starts clean.
    async fn take_connection(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<Connection>>,
    ) -> Result<Connection> {
        match guard.take() {
            Some(conn) => Ok(conn),
            None => self.connect().await,
        }
    }
}

#[async_trait]
impl SwitchClient for AmiClient {
    async fn request_queue_status(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let mut conn = self.take_connection(&mut guard).await?;
        let batch = self.collect_queue_status(&mut conn).await?;
        *guard = Some(conn);
        drop(guard);

        debug!("Queue status yielded {} member entries", batch.len());
        *self.events.lock().await = batch;
        Ok(())
    }

    async fn queue_events(&self) -> Vec<QueueMemberEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    async fn home_queue(&self, number: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;
        let mut conn = self.take_connection(&mut guard).await?;
        let queue = self.lookup_home_queue(&mut conn, number).await?;
        *guard = Some(conn);
        Ok(queue)
    }
}
