use std::{net::SocketAddr, sync::Arc};

use bytes::Buf;
use thiserror::Error;

use crate::protocol::{
    alarm::{input_change, Alarm},
    codec::{ascii, Frame, FrameError},
    commands::Command,
    identity::DeviceIdentity,
    sentences::{decode_obd_aggregate, decode_obd_realtime, decode_regular, decode_rfid},
};
use crate::report::{Position, PROTOCOL};
use crate::session::{AckChannel, DeviceId, DeviceRegistry, LastFixProvider, ServerConfig};

/// Historical timestamp in front of a `POSITION_LOGGED` sentence.
const LOGGED_TIMESTAMP_SIZE: usize = 6;

const CARD_SLOTS: usize = 15;

const RECORD_DELIMITER: u8 = b'\\';

const ACK_OK: u8 = 0x01;


#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("{what} truncated (needed {needed} bytes, {available} available)")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },
}


/// Outcome of decoding one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// Handshake, unknown device or command, or a sentence that didn't match.
    Nothing,
    Position(Position),
    /// Retransmitted records in wire order.
    Positions(Vec<Position>),
}

impl Decoded {
    pub fn into_positions(self) -> Vec<Position> {
        match self {
            Decoded::Nothing => vec![],
            Decoded::Position(position) => vec![position],
            Decoded::Positions(positions) => positions,
        }
    }
}

impl From<Option<Position>> for Decoded {
    fn from(position: Option<Position>) -> Self {
        position.map_or(Decoded::Nothing, Decoded::Position)
    }
}


/// A live connection frames can be answered on.
pub struct Connection<'a> {
    pub channel: &'a mut dyn AckChannel,
    pub remote: SocketAddr,
}


fn take<'a>(payload: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
    if payload.len() < len {
        return Err(DecodeError::Truncated { what, needed: len, available: payload.len() });
    }

    let (head, tail) = payload.split_at(len);
    *payload = tail;
    Ok(head)
}

fn take_u8(payload: &mut &[u8], what: &'static str) -> Result<u8, DecodeError> {
    Ok(take(payload, 1, what)?[0])
}


/// Turns frames into positions, answering handshakes along the way.
///
/// Holds no per-connection state, so one decoder can be shared by every connection.
#[derive(Clone)]
pub struct MeiligaoDecoder {
    registry: Arc<dyn DeviceRegistry>,
    fixes: Arc<dyn LastFixProvider>,
    config: Arc<dyn ServerConfig>,
}

impl MeiligaoDecoder {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        fixes: Arc<dyn LastFixProvider>,
        config: Arc<dyn ServerConfig>,
    ) -> Self {
        Self { registry, fixes, config }
    }

    /// Decode a buffer holding exactly one frame.
    pub fn decode_bytes(&self, buf: &[u8], connection: Option<Connection<'_>>) -> Result<Decoded, DecodeError> {
        let frame = Frame::parse(buf)?;
        self.decode(&frame, connection)
    }

    /// Decode one frame. Handshakes are only answered when `connection` is given;
    /// without one (replaying stored frames) they decode to nothing.
    pub fn decode(&self, frame: &Frame, connection: Option<Connection<'_>>) -> Result<Decoded, DecodeError> {
        let command = frame.command();

        if let (Some(connection), Some(command)) = (connection, command) {
            if let Some(reply) = self.handshake_reply(frame, command, connection.channel.local_addr()) {
                tracing::debug!(%command, remote = %connection.remote, "answering handshake");
                connection.channel.send(reply, connection.remote);
                return Ok(Decoded::Nothing);
            }
        }

        let identity = DeviceIdentity::decode(&frame.id);
        let candidates = identity.candidates();
        if candidates.is_empty() {
            tracing::debug!(id = %hex::encode(frame.id), "empty device identity");
            return Ok(Decoded::Nothing);
        }

        let Some(device) = self.registry.resolve(&candidates) else {
            tracing::debug!(%identity, "unknown device");
            return Ok(Decoded::Nothing);
        };

        let Some(command) = command else {
            tracing::debug!(command = frame.command, %device, "unsupported command");
            return Ok(Decoded::Nothing);
        };

        let mut payload = &frame.payload[..];

        if command == Command::Retransmission {
            return Ok(Decoded::Positions(self.decode_retransmission(payload, device)?));
        }

        let mut position = Position::new(device);

        match command {
            Command::Alarm => {
                let code = take_u8(&mut payload, "alarm code")?;
                position.alarm = Alarm::from_code(code);
                if let Some((input, active)) = input_change(code) {
                    position.inputs.insert(input, active);
                }
            }
            Command::PositionLogged => {
                take(&mut payload, LOGGED_TIMESTAMP_SIZE, "logged timestamp")?;
            }
            Command::Rfid => {
                let cards = take(&mut payload, CARD_SLOTS * 4, "card block")?;
                decode_cards(cards, &mut position);
            }
            Command::ObdRealtime | Command::ObdAggregate => {
                position.seed(self.fixes.last_fix(device));
            }
            _ => {}
        }

        let sentence = ascii(payload);

        let decoded = match command {
            Command::Position | Command::PositionLogged | Command::Alarm => decode_regular(position, &sentence),
            Command::Rfid => decode_rfid(position, &sentence),
            Command::ObdRealtime => decode_obd_realtime(position, &sentence),
            Command::ObdAggregate => decode_obd_aggregate(position, &sentence),
            _ => return Ok(Decoded::Nothing),
        };

        if decoded.is_none() {
            tracing::debug!(%command, %device, %sentence, "dropping sentence that did not match");
        }

        Ok(decoded.into())
    }

    fn handshake_reply(&self, frame: &Frame, command: Command, local: SocketAddr) -> Option<Frame> {
        let reply = match command {
            Command::Login => Frame::new(frame.id, Command::LoginResponse, vec![ACK_OK]),
            Command::Heartbeat => Frame::new(frame.id, Command::Heartbeat, vec![ACK_OK]),
            Command::ServerQuery => {
                let server = self
                    .config
                    .server_address(PROTOCOL)
                    .unwrap_or_else(|| format!("{}:{}", local.ip(), local.port()));

                Frame::new(frame.id, Command::ServerQuery, server.into_bytes())
            }
            _ => return None,
        };

        Some(reply)
    }

    /// `count`, then per record: an alarm byte and a sentence, records separated by `\`.
    fn decode_retransmission(&self, mut payload: &[u8], device: DeviceId) -> Result<Vec<Position>, DecodeError> {
        let count = take_u8(&mut payload, "record count")?;

        let mut positions = Vec::with_capacity(count.into());

        for n in 0..count {
            take_u8(&mut payload, "record alarm")?; // not reported for replayed records

            let end = payload
                .iter()
                .position(|b| *b == RECORD_DELIMITER)
                .unwrap_or(payload.len());

            let record = take(&mut payload, end, "record")?;
            let sentence = ascii(record);

            match decode_regular(Position::new(device), &sentence) {
                Some(position) => positions.push(position),
                None => tracing::debug!(record = n, %device, %sentence, "dropping retransmitted record"),
            }

            if !payload.is_empty() {
                payload.advance(1); // delimiter
            }
        }

        Ok(positions)
    }
}

/// Fifteen big-endian card numbers; zero marks an empty slot.
fn decode_cards(mut cards: &[u8], position: &mut Position) {
    for slot in 1..=CARD_SLOTS {
        let card = cards.get_u32();
        if card != 0 {
            let card = format!("{card:010}");
            position.set(format!("card{slot}"), card.as_str());
            position.unique_id = Some(card);
        }
    }
}
