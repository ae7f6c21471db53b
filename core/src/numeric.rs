//! Numeric replies sent by the session core

/// Numeric reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NumericReply {
    // Connection registration
    RplWelcome = 1,
    RplYourHost = 2,
    RplCreated = 3,
    RplMyInfo = 4,
    RplYourId = 42,

    // Rules
    RplRules = 232,
    RplRulesStart = 308,
    RplRulesEnd = 309,

    // Message of the day
    RplMotd = 372,
    RplMotdStart = 375,
    RplMotdEnd = 376,

    RplYoureOper = 381,
    RplYourDisplayedHost = 396,

    // Errors
    ErrNoMotd = 422,
    ErrNoRules = 434,
    ErrUnknownSnomask = 501,
}

impl NumericReply {
    /// Get the numeric code as a u16
    pub fn numeric_code(&self) -> u16 {
        *self as u16
    }

    /// Get the numeric code as a zero-padded string
    pub fn code(&self) -> String {
        format!("{:03}", self.numeric_code())
    }

    /// Render the full line: `:server 001 text`
    pub fn line(&self, server: &str, text: &str) -> String {
        format!(":{} {} {}", server, self.code(), text)
    }
}
