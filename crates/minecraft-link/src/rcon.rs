//! Source RCON client, as spoken by the vanilla server's `enable-rcon` console.
//!
//! Frame layout (little endian): `len:i32 | id:i32 | kind:i32 | body | 0 | 0`,
//! where `len` counts everything after itself. Long replies are split over
//! several frames with the same id, so every command is followed by an empty
//! sentinel frame and the reply is read until the sentinel's answer arrives.

use core::{
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};
use std::io;

use anyhow::{Context as _, Result, anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info};

pub const KIND_LOGIN: i32 = 3;
pub const KIND_COMMAND: i32 = 2;
pub const KIND_AUTH_RESPONSE: i32 = 2;
pub const KIND_RESPONSE: i32 = 0;

/// Frame header after the length prefix: id + kind + two NULs.
const OVERHEAD: usize = 10;
const MAX_FRAME: usize = 64 * 1024;
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct RconCodec;

impl Decoder for RconCodec {
    type Item = Packet;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Packet>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0_u8; 4];
        prefix.copy_from_slice(&src[..4]);
        let len = usize::try_from(i32::from_le_bytes(prefix))
            .ok()
            .filter(|len| (OVERHEAD..=MAX_FRAME).contains(len))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad RCON frame length"))?;
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let mut frame = src.split_to(len);
        let id = frame.get_i32_le();
        let kind = frame.get_i32_le();
        let body = String::from_utf8_lossy(&frame[..frame.len() - 2]).into_owned();
        Ok(Some(Packet { id, kind, body }))
    }
}

impl Encoder<Packet> for RconCodec {
    type Error = io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> io::Result<()> {
        let len = i32::try_from(packet.body.len() + OVERHEAD)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "RCON body too long"))?;
        dst.reserve(packet.body.len() + OVERHEAD + 4);
        dst.put_i32_le(len);
        dst.put_i32_le(packet.id);
        dst.put_i32_le(packet.kind);
        dst.put_slice(packet.body.as_bytes());
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}

type Connection = Framed<TcpStream, RconCodec>;

/// One lazily opened, shared RCON connection. A broken connection is reopened
/// on the next command.
#[derive(Debug)]
pub struct RconClient {
    address: String,
    password: String,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicI32,
}

impl RconClient {
    #[must_use]
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            conn: Mutex::new(None),
            next_id: AtomicI32::new(1),
        }
    }

    fn next_id(&self) -> i32 {
        // Wraps long before overflow; -1 is the auth-failure id.
        self.next_id.fetch_add(1, Ordering::Relaxed).rem_euclid(1 << 30)
    }

    /// Runs `command` on the server console and returns its output.
    ///
    /// # Errors
    ///
    /// Fails when the console cannot be reached, rejects the password, or the
    /// exchange times out.
    pub async fn command(&self, command: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;
        let reused = guard.is_some();
        if !reused {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            bail!("RCON connection unavailable");
        };
        match self.exchange(conn, command).await {
            Ok(output) => Ok(output),
            Err(e) if reused => {
                debug!(error = %e, "RCON connection went stale; reconnecting");
                *guard = None;
                let conn = guard.insert(self.connect().await?);
                let result = self.exchange(conn, command).await;
                if result.is_err() {
                    *guard = None;
                }
                result
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| anyhow!("connecting to RCON at {} timed out", self.address))?
            .with_context(|| format!("connecting to RCON at {}", self.address))?;
        let mut conn = Framed::new(stream, RconCodec);
        let id = self.next_id();
        conn.send(Packet {
            id,
            kind: KIND_LOGIN,
            body: self.password.clone(),
        })
        .await
        .context("sending RCON login")?;
        let reply = timeout(IO_TIMEOUT, next_packet(&mut conn))
            .await
            .map_err(|_| anyhow!("RCON login timed out"))??;
        if reply.id == -1 {
            bail!("RCON rejected the password");
        }
        info!(address = %self.address, "RCON connected");
        Ok(conn)
    }

    async fn exchange(&self, conn: &mut Connection, command: &str) -> Result<String> {
        let id = self.next_id();
        let sentinel = self.next_id();
        conn.send(Packet {
            id,
            kind: KIND_COMMAND,
            body: command.to_owned(),
        })
        .await?;
        conn.send(Packet {
            id: sentinel,
            kind: KIND_RESPONSE,
            body: String::new(),
        })
        .await?;

        let read = async {
            let mut output = String::new();
            loop {
                let packet = next_packet(conn).await?;
                if packet.id == sentinel {
                    return Ok::<_, anyhow::Error>(output);
                }
                if packet.id == id {
                    output.push_str(&packet.body);
                }
            }
        };
        let output = timeout(IO_TIMEOUT, read)
            .await
            .map_err(|_| anyhow!("RCON reply to {command:?} timed out"))??;
        debug!(command, output = %output, "RCON command");
        Ok(output)
    }
}

async fn next_packet(conn: &mut Connection) -> Result<Packet> {
    match conn.next().await {
        Some(packet) => Ok(packet?),
        None => bail!("RCON connection closed"),
    }
}
