use strum_macros::{Display, EnumIter, FromRepr};

/// Message types carried in the 16-bit command field of a frame.
#[derive(FromRepr, Display, EnumIter, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Keep-alive. Answered with `0x01` under the same code.
    Heartbeat = 0x0001,

    /// Device asks which server it should report to.
    ServerQuery = 0x0002,

    /// Device logs in. Answered under [`Command::LoginResponse`].
    Login = 0x5000,

    /// Only ever sent by the server.
    LoginResponse = 0x4000,

    Position = 0x9955,

    /// Position recorded while offline, prefixed by a 6 byte timestamp.
    PositionLogged = 0x9016,

    Alarm = 0x9999,

    Rfid = 0x9966,

    /// A batch of positions the device failed to deliver earlier.
    Retransmission = 0x6688,

    ObdRealtime = 0x9901,

    ObdAggregate = 0x9902,
}

impl Command {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        command.code()
    }
}


#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn codes_map_to_commands() {
        assert_eq!(Command::from_repr(0x9955), Some(Command::Position));
        assert_eq!(Command::from_repr(0x6688), Some(Command::Retransmission));
        assert_eq!(Command::from_repr(0x1234), None);
        assert_eq!(u16::from(Command::LoginResponse), 0x4000);
    }

    #[test]
    fn codes_are_distinct() {
        for command in Command::iter() {
            assert_eq!(Command::from_repr(command.code()), Some(command));
        }
    }
}
