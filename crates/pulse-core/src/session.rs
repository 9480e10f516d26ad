//! Session state and session-id helpers

use uuid::Uuid;

/// Per-app session state.
///
/// The id, start and length are each independently settable through the
/// app facade; a session is considered active once an id exists, at which
/// point every beacon carries `rt.si`, `rt.ss` and `rt.sl`.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Session id. `None` until the caller or the configuration seeds one.
    pub id: Option<String>,
    /// Session start, wall-clock milliseconds.
    pub start: u64,
    /// Number of beacons (or caller-defined units) in this session.
    pub length: u64,
}

impl SessionState {
    /// Fresh session state with a start stamp but no id yet.
    pub fn new(start_ms: u64) -> Self {
        Self {
            id: None,
            start: start_ms,
            length: 0,
        }
    }

    /// Begin a session: set or generate the id, reset the length, stamp
    /// the start. Returns the id now in effect.
    pub fn start_session(&mut self, id: Option<String>, now_ms: u64) -> String {
        let id = id.unwrap_or_else(generate_session_id);
        self.id = Some(id.clone());
        self.length = 0;
        self.start = now_ms;
        id
    }
}

/// Generate a pseudo-random session id in RFC 4122 v4 form.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// A session descriptor exposed by a Boomerang instance on the same page,
/// used to continue its session instead of starting a fresh one.
#[derive(Debug, Clone)]
pub struct BoomerangSession {
    /// Foreign session id.
    pub id: String,
    /// Foreign session start, wall-clock milliseconds.
    pub start: u64,
    /// Foreign session length.
    pub length: u64,
}

impl BoomerangSession {
    /// Whether the descriptor is complete enough to transfer.
    pub fn is_transferable(&self) -> bool {
        !self.id.is_empty() && self.start > 0 && self.length > 0
    }

    /// The composite id a transferred session adopts:
    /// `<id>-<base36(round(start / 1000))>`.
    pub fn composite_id(&self) -> String {
        let seconds = ((self.start as f64) / 1000.0).round() as u64;
        format!("{}-{}", self.id, to_base36(seconds))
    }
}

/// Lowercase base-36 rendering of an integer.
fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
