//! Follows the server's `latest.log` and turns chat, join and leave lines into
//! [`GameEvent`]s.

use core::time::Duration;
use std::{io::SeekFrom, path::Path};

use anyhow::Result;
use bridge_core::GameEvent;
use regex::Regex;
use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncSeekExt as _},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct LogParser {
    line: Regex,
    chat: Regex,
    joined: Regex,
    left: Regex,
}

impl LogParser {
    /// # Errors
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            // `[12:00:00] [Server thread/INFO]: msg` and `[12:00:00 INFO]: msg`
            line: Regex::new(r"^\[[0-9:]+(?:\] \[[^\]]*/| )INFO\]: (.*)$")?,
            chat: Regex::new(r"^<([^>\s]+)> (.*)$")?,
            joined: Regex::new(r"^(\w+) joined the game$")?,
            left: Regex::new(r"^(\w+) left the game$")?,
        })
    }

    #[must_use]
    pub fn parse(&self, line: &str) -> Option<GameEvent> {
        let message = self.line.captures(line.trim_end())?.get(1)?.as_str();
        let message = message.strip_prefix("[Not Secure] ").unwrap_or(message);
        if let Some(caps) = self.chat.captures(message) {
            return Some(GameEvent::Chat {
                player: caps[1].to_owned(),
                content: caps[2].to_owned(),
            });
        }
        if let Some(caps) = self.joined.captures(message) {
            return Some(GameEvent::Joined {
                player: caps[1].to_owned(),
            });
        }
        self.left.captures(message).map(|caps| GameEvent::Left {
            player: caps[1].to_owned(),
        })
    }
}

/// Tails `path` from its current end until `cancel` fires. A file that shrinks
/// or disappears is reopened from the start once it exists again.
pub async fn follow_log(
    path: &Path,
    parser: LogParser,
    tx: mpsc::Sender<GameEvent>,
    cancel: CancellationToken,
) {
    let mut file: Option<File> = None;
    let mut position = 0_u64;
    let mut partial: Vec<u8> = Vec::new();
    let mut first_open = true;

    info!(file = %path.display(), "Following server log");
    loop {
        if file.is_none() {
            match File::open(path).await {
                Ok(mut opened) => {
                    position = if first_open {
                        opened.seek(SeekFrom::End(0)).await.unwrap_or(0)
                    } else {
                        0
                    };
                    first_open = false;
                    partial.clear();
                    file = Some(opened);
                    debug!(position, "Log file opened");
                }
                Err(e) => debug!(error = %e, "Log file not available yet"),
            }
        }

        if let Some(current) = file.as_mut() {
            match read_more(path, current, &mut position).await {
                Ok(Some(chunk)) => {
                    partial.extend_from_slice(&chunk);
                    // Decode whole lines only; a read may end inside a multi-byte character.
                    while let Some(end) = partial.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = partial.drain(..=end).collect();
                        let line = String::from_utf8_lossy(&raw);
                        if let Some(event) = parser.parse(&line)
                            && tx.send(event).await.is_err()
                        {
                            return;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Lost the server log; reopening");
                    file = None;
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => {
                info!("Stopped following server log");
                return;
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Reads whatever was appended since `position`. A file that is now shorter
/// than `position` has been truncated or rotated and is an error.
async fn read_more(path: &Path, file: &mut File, position: &mut u64) -> Result<Option<Vec<u8>>> {
    let on_disk = tokio::fs::metadata(path).await?.len();
    let opened = file.metadata().await?.len();
    if on_disk < *position || opened < *position {
        anyhow::bail!("log file was truncated or rotated");
    }
    if opened == *position {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(*position)).await?;
    let mut buf = Vec::new();
    let read = file.read_to_end(&mut buf).await?;
    *position += read as u64;
    Ok(Some(buf))
}
