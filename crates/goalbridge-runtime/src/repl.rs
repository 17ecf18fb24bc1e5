//! REPL wire protocol and command vocabulary.
//!
//! Request: `length: u32 LE`, `opcode: u32 LE = 10`, then `length` bytes of
//! form text. Response: free text; success iff it contains `OK!`.

use std::time::Duration;

use goalbridge_core::ids::{self, Category};
use goalbridge_core::{GlobalId, SyncError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const EVAL_OPCODE: u32 = 10;
pub const ACK_MARKER: &str = "OK!";
const REPLY_BUF: usize = 1024;

/// Welcome text must contain both (version number in between is ignored).
pub const WELCOME_MARKERS: [&str; 2] = ["Connected to OpenGOAL", "nREPL!"];

/// Compilation form; gets the longer compile timeout.
pub const COMPILE_FORM: &str = "(mi)";

pub const START_CUE_FORM: &str = "(dotimes (i 1) (sound-play-by-name (static-sound-name \"start-options\") (new-sound-id) 1024 0 0 (sound-group sfx) #t))";

pub const SUCCESS_CUE_FORM: &str = "(dotimes (i 1) (sound-play-by-name (static-sound-name \"menu-close\") (new-sound-id) 1024 0 0 (sound-group sfx) #t))";

/// Connect handshake, in order. Every form must be acknowledged.
pub const HANDSHAKE_FORMS: [&str; 6] = [
    // Listen to the game's internal socket.
    "(lt)",
    // Version banner as a visual cue while compiling.
    "(set! *debug-segment* #t)",
    START_CUE_FORM,
    COMPILE_FORM,
    SUCCESS_CUE_FORM,
    "(set! *cheat-mode* #f)",
];

pub fn encode_form(form: &str) -> Vec<u8> {
    let body = form.as_bytes();
    let mut frame = Vec::with_capacity(8 + body.len());
    // Forms are short text; a form over 4 GiB is not representable on the wire.
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&EVAL_OPCODE.to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

pub fn is_ack(reply: &str) -> bool {
    reply.contains(ACK_MARKER)
}

pub fn welcome_ok(message: &str) -> bool {
    WELCOME_MARKERS.iter().all(|m| message.contains(m))
}

/// Pickup type the game uses for each category.
pub fn pickup_type(category: Category) -> &'static str {
    match category {
        Category::Collectible => "fuel-cell",
        Category::SubCollectible => "buzzer",
        Category::Milestone => "ap-special",
        Category::OrbBundle => "money",
    }
}

/// Form that grants the item `global` to the player.
///
/// Orb bundles grant `orb_bundle_size` orbs and need it configured.
pub fn unlock_form(global: GlobalId, orb_bundle_size: Option<u32>) -> Result<String, SyncError> {
    let (category, local) = ids::to_local(global)?;
    let amount = match category {
        Category::OrbBundle => orb_bundle_size.ok_or(SyncError::CategoryDisabled(category))?,
        Category::Collectible | Category::SubCollectible | Category::Milestone => local,
    };
    Ok(format!(
        "(send-event *target* 'get-archipelago (pickup-type {}) (the float {amount}))",
        pickup_type(category)
    ))
}

// ─── Session ────────────────────────────────────────────────────────

/// One connected REPL socket. Strictly one outstanding request at a time.
pub struct ReplSession {
    stream: TcpStream,
    peer: String,
}

impl ReplSession {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, SyncError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(SyncError::SocketIoFault(format!(
                    "cannot connect to REPL at {addr}: {e}"
                )));
            }
            Err(_) => {
                return Err(SyncError::SocketIoFault(format!(
                    "connect to REPL at {addr} timed out"
                )));
            }
        };
        Ok(Self {
            stream,
            peer: addr.to_string(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read whatever the REPL sends within `timeout`. `None` if it sent nothing.
    pub async fn read_reply(&mut self, timeout: Duration) -> Result<Option<String>, SyncError> {
        let mut buf = [0u8; REPLY_BUF];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(SyncError::SocketIoFault(format!(
                "REPL at {} closed the connection",
                self.peer
            ))),
            Ok(Ok(n)) => Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Ok(Err(e)) => Err(SyncError::SocketIoFault(format!(
                "read from REPL at {} failed: {e}",
                self.peer
            ))),
            Err(_) => Ok(None),
        }
    }

    /// Send one form and wait for its reply.
    pub async fn send_form(&mut self, form: &str, timeout: Duration) -> Result<String, SyncError> {
        let frame = encode_form(form);
        match tokio::time::timeout(timeout, self.stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(SyncError::SocketIoFault(format!(
                    "write to REPL at {} failed: {e}",
                    self.peer
                )));
            }
            Err(_) => {
                return Err(SyncError::SocketIoFault(format!(
                    "write to REPL at {} timed out",
                    self.peer
                )));
            }
        }
        self.read_reply(timeout).await?.ok_or_else(|| {
            SyncError::SocketIoFault(format!("no reply from REPL within {timeout:?}"))
        })
    }
}
