//! Mode letter sets
//!
//! User modes, notice masks and operator mode grants are all sets of letters
//! in the range `A`..=`z`. They are stored as a 64-bit set indexed by the
//! letter's offset from `A`; letters outside the range are ignored.

use crate::session::Session;
use std::fmt;

/// Operator user mode
pub const MODE_OPER: char = 'o';
/// Server notice mask user mode
pub const MODE_SNOMASK: char = 's';
/// Wallops user mode
pub const MODE_WALLOPS: char = 'w';
/// Invisible user mode
pub const MODE_INVISIBLE: char = 'i';

const FIRST: char = 'A';
const LAST: char = 'z';

/// Set of mode letters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeSet(u64);

fn slot(letter: char) -> Option<u32> {
    if (FIRST..=LAST).contains(&letter) {
        Some(letter as u32 - FIRST as u32)
    } else {
        None
    }
}

impl ModeSet {
    /// Empty set
    pub const fn new() -> Self {
        Self(0)
    }

    /// Every letter in range
    pub fn all() -> Self {
        let mut set = Self::new();
        for letter in FIRST..=LAST {
            set.insert(letter);
        }
        set
    }

    /// Parse a letter string; `*` anywhere selects every letter
    pub fn from_letters(letters: &str) -> Self {
        if letters.contains('*') {
            return Self::all();
        }
        let mut set = Self::new();
        for letter in letters.chars() {
            set.insert(letter);
        }
        set
    }

    /// Whether `letter` is a letter this set can hold
    pub fn is_valid(letter: char) -> bool {
        slot(letter).is_some()
    }

    /// Check whether `letter` is set
    pub fn contains(&self, letter: char) -> bool {
        slot(letter).map_or(false, |bit| self.0 & (1 << bit) != 0)
    }

    /// Set or clear `letter`. Returns false if the letter is out of range.
    pub fn set(&mut self, letter: char, on: bool) -> bool {
        match slot(letter) {
            Some(bit) => {
                if on {
                    self.0 |= 1 << bit;
                } else {
                    self.0 &= !(1 << bit);
                }
                true
            }
            None => false,
        }
    }

    /// Add `letter`
    pub fn insert(&mut self, letter: char) -> bool {
        self.set(letter, true)
    }

    /// Remove `letter`
    pub fn remove(&mut self, letter: char) -> bool {
        self.set(letter, false)
    }

    /// Add every letter of `other`
    pub fn union_with(&mut self, other: ModeSet) {
        self.0 |= other.0;
    }

    /// Letters set in both
    pub fn intersection(&self, other: ModeSet) -> ModeSet {
        ModeSet(self.0 & other.0)
    }

    /// Check if no letter is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Clear every letter
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Letters in ascending order
    pub fn letters(&self) -> String {
        (FIRST..=LAST).filter(|&c| self.contains(c)).collect()
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letters())
    }
}

/// The mode handling collaborator
pub trait ModeHandlers {
    /// Whether user mode `letter` may only be held by operators
    fn needs_oper(&self, letter: char) -> bool;

    /// Apply a user mode change such as `-ow` to `session`
    fn apply(&self, session: &mut Session, change: &str);

    /// Change string removing every operator-only user mode
    fn oper_only_removal(&self) -> String {
        let mut change = String::from("-");
        change.extend((FIRST..=LAST).filter(|&c| self.needs_oper(c)));
        change
    }
}

/// Mode handler with a fixed set of operator-only user modes
#[derive(Debug, Clone, Default)]
pub struct StaticModeHandlers {
    oper_only: ModeSet,
}

impl StaticModeHandlers {
    pub fn new(oper_only: &str) -> Self {
        Self {
            oper_only: ModeSet::from_letters(oper_only),
        }
    }
}

impl ModeHandlers for StaticModeHandlers {
    fn needs_oper(&self, letter: char) -> bool {
        self.oper_only.contains(letter)
    }

    fn apply(&self, session: &mut Session, change: &str) {
        let mut adding = true;
        for c in change.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                letter => {
                    session.set_mode(letter, adding);
                }
            }
        }
    }
}

/// Outcome of applying a notice mask change string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoticeMaskChange {
    /// Canonical form of what actually changed, e.g. `+ab-c`
    pub applied: String,
    /// Letters that are not enabled masks, in the order seen
    pub unknown: Vec<char>,
}

/// Apply a `+`/`-`/`*`/letter change string to `mask`.
///
/// `enabled` tells which letters are notice masks the server knows about.
/// Letters that are already in the requested state produce no output.
pub fn apply_notice_masks<F>(mask: &mut ModeSet, change: &str, enabled: F) -> NoticeMaskChange
where
    F: Fn(char) -> bool,
{
    let mut result = NoticeMaskChange::default();
    let mut adding = true;
    let mut last_sign: Option<bool> = None;

    let mut flip = |mask: &mut ModeSet, letter: char, adding: bool, out: &mut String| {
        if mask.contains(letter) == adding {
            return;
        }
        if last_sign != Some(adding) {
            out.push(if adding { '+' } else { '-' });
            last_sign = Some(adding);
        }
        mask.set(letter, adding);
        out.push(letter);
    };

    for c in change.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            '*' => {
                for letter in FIRST..=LAST {
                    if enabled(letter) {
                        flip(mask, letter, adding, &mut result.applied);
                    }
                }
            }
            letter if ModeSet::is_valid(letter) && enabled(letter) => {
                flip(mask, letter, adding, &mut result.applied);
            }
            letter => result.unknown.push(letter),
        }
    }

    result
}
