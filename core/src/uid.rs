//! Session identifier generation
//!
//! Identifiers are TS6 style: the 3 character server id followed by 6 base-36
//! characters, 9 characters in total. Identifiers introduced by a remote
//! server are accepted as given, cut to the same length.

/// Unique identifier for a session
pub type Uid = String;

/// Length of every session identifier
pub const UID_LEN: usize = 9;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of distinct local identifiers per server id
pub const UID_SPACE: u64 = 36u64.pow(6);

/// Generates local identifiers in sequence
#[derive(Debug)]
pub struct UidGenerator {
    sid: String,
    counter: u64,
}

impl UidGenerator {
    /// Create a generator for the given server id
    pub fn new(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            counter: 0,
        }
    }

    /// The server id prefix
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Generate the next identifier. The sequence repeats after
    /// [`UID_SPACE`] identifiers.
    pub fn next_uid(&mut self) -> Uid {
        let n = self.counter;
        self.counter = (self.counter + 1) % UID_SPACE;
        format!("{}{}", self.sid, base36_encode_6(n))
    }

    /// Generate the next identifier for which `in_use` is false, or `None`
    /// once every identifier is taken
    pub fn next_free(&mut self, in_use: impl Fn(&str) -> bool) -> Option<Uid> {
        (0..UID_SPACE)
            .map(|_| self.next_uid())
            .find(|uid| !in_use(uid))
    }
}

/// Normalize an identifier received from a remote server
pub fn accept_remote(uid: &str) -> Uid {
    uid.chars().take(UID_LEN).collect()
}

/// Encode a number as a 6-character base36 string
fn base36_encode_6(mut n: u64) -> String {
    let mut result = [b'A'; 6];

    for i in (0..6).rev() {
        result[i] = ALPHABET[(n % 36) as usize];
        n /= 36;
    }

    String::from_utf8_lossy(&result).into_owned()
}
