use std::fmt;

/// Where an authenticated submission stands.
///
/// Each state is entered once the reply to the command that leads into it
/// carried the expected code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// TCP and TLS are up; nothing has been read yet.
    Connected,
    /// `220` greeting received.
    Greeted,
    /// `EHLO` accepted.
    Helod,
    /// `AUTH LOGIN` accepted; the server is prompting for the username.
    AuthUsernameSent,
    /// Username accepted; the server is prompting for the password.
    AuthPasswordSent,
    Authenticated,
    SenderSet,
    RecipientSet,
    /// `DATA` accepted; the server is waiting for the message.
    DataMode,
    /// The message was accepted for delivery.
    MessageSent,
    Closed,
}

impl State {
    /// The reply code that must arrive to enter this state.
    #[must_use]
    pub const fn expected_code(self) -> Option<u16> {
        match self {
            Self::Greeted => Some(220),
            Self::Helod | Self::SenderSet | Self::RecipientSet | Self::MessageSent => Some(250),
            Self::AuthUsernameSent | Self::AuthPasswordSent => Some(334),
            Self::Authenticated => Some(235),
            Self::DataMode => Some(354),
            Self::Connected | Self::Closed => None,
        }
    }

    /// Name of the step that leads into this state, used in errors and logs.
    #[must_use]
    pub const fn step(self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Greeted => "greeting",
            Self::Helod => "EHLO",
            Self::AuthUsernameSent => "AUTH LOGIN",
            Self::AuthPasswordSent => "AUTH LOGIN username",
            Self::Authenticated => "AUTH LOGIN password",
            Self::SenderSet => "MAIL FROM",
            Self::RecipientSet => "RCPT TO",
            Self::DataMode => "DATA",
            Self::MessageSent => "end of DATA",
            Self::Closed => "QUIT",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_codes() {
        assert_eq!(State::Greeted.expected_code(), Some(220));
        assert_eq!(State::AuthUsernameSent.expected_code(), Some(334));
        assert_eq!(State::AuthPasswordSent.expected_code(), Some(334));
        assert_eq!(State::Authenticated.expected_code(), Some(235));
        assert_eq!(State::DataMode.expected_code(), Some(354));
        assert_eq!(State::MessageSent.expected_code(), Some(250));
        assert_eq!(State::Closed.expected_code(), None);
    }
}
