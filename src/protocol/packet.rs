//! Packet definitions
//!
//! Each packet is a one-byte id followed by the fields listed in its schema.
//! Encoding and decoding go through the field-descriptor driver so that the
//! schema is the single source of truth for field order and width.

use super::{decode_fields, encode_fields, CodecError, CodecResult, FieldKind, Metadata, Value, Wire};
use crate::buffer::ByteBuffer;

/// Packet identifiers
pub mod packet_id {
    pub const KEEP_ALIVE: u8 = 0x00;
    pub const LOGIN: u8 = 0x01;
    pub const HANDSHAKE: u8 = 0x02;
    pub const CHAT: u8 = 0x03;
    pub const SPAWN_POSITION: u8 = 0x06;
    pub const PLAYER_POSITION_LOOK: u8 = 0x0D;
    pub const ENTITY_METADATA: u8 = 0x28;
    pub const PRE_CHUNK: u8 = 0x32;
    pub const DISCONNECT: u8 = 0xFF;
}

const KEEP_ALIVE_FIELDS: &[FieldKind] = &[];
const LOGIN_FIELDS: &[FieldKind] = &[
    FieldKind::Int,
    FieldKind::String16,
    FieldKind::Long,
    FieldKind::Byte,
];
const STRING16_FIELD: &[FieldKind] = &[FieldKind::String16];
const SPAWN_POSITION_FIELDS: &[FieldKind] = &[FieldKind::Int, FieldKind::Int, FieldKind::Int];
const POSITION_LOOK_FIELDS: &[FieldKind] = &[
    FieldKind::Double,
    FieldKind::Double,
    FieldKind::Double,
    FieldKind::Double,
    FieldKind::Float,
    FieldKind::Float,
    FieldKind::Boolean,
];
const ENTITY_METADATA_FIELDS: &[FieldKind] = &[FieldKind::Int, FieldKind::Metadata];
const PRE_CHUNK_FIELDS: &[FieldKind] = &[FieldKind::Int, FieldKind::Int, FieldKind::Boolean];

/// Field layout of the packet with the given id
pub fn schema(id: u8) -> Option<&'static [FieldKind]> {
    Some(match id {
        packet_id::KEEP_ALIVE => KEEP_ALIVE_FIELDS,
        packet_id::LOGIN => LOGIN_FIELDS,
        packet_id::HANDSHAKE | packet_id::CHAT | packet_id::DISCONNECT => STRING16_FIELD,
        packet_id::SPAWN_POSITION => SPAWN_POSITION_FIELDS,
        packet_id::PLAYER_POSITION_LOOK => POSITION_LOOK_FIELDS,
        packet_id::ENTITY_METADATA => ENTITY_METADATA_FIELDS,
        packet_id::PRE_CHUNK => PRE_CHUNK_FIELDS,
        _ => return None,
    })
}

/// All packets this server understands
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Sent periodically in both directions
    KeepAlive,

    /// Client: protocol version + username. Server: entity id + empty name.
    Login {
        id: i32,
        username: String,
        map_seed: i64,
        dimension: i8,
    },

    /// Connection hash exchange, before login
    Handshake {
        username: String,
    },

    Chat {
        message: String,
    },

    /// Compass target
    SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    },

    PlayerPositionLook {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },

    EntityMetadata {
        entity_id: i32,
        metadata: Metadata,
    },

    /// Tell the client to allocate (`load`) or free a chunk column
    PreChunk {
        x: i32,
        z: i32,
        load: bool,
    },

    /// Kick, or a client leaving
    Disconnect {
        reason: String,
    },
}

impl Packet {
    /// Get the packet identifier
    pub fn id(&self) -> u8 {
        match self {
            Packet::KeepAlive => packet_id::KEEP_ALIVE,
            Packet::Login { .. } => packet_id::LOGIN,
            Packet::Handshake { .. } => packet_id::HANDSHAKE,
            Packet::Chat { .. } => packet_id::CHAT,
            Packet::SpawnPosition { .. } => packet_id::SPAWN_POSITION,
            Packet::PlayerPositionLook { .. } => packet_id::PLAYER_POSITION_LOOK,
            Packet::EntityMetadata { .. } => packet_id::ENTITY_METADATA,
            Packet::PreChunk { .. } => packet_id::PRE_CHUNK,
            Packet::Disconnect { .. } => packet_id::DISCONNECT,
        }
    }

    /// Field values in schema order
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Packet::KeepAlive => vec![],
            Packet::Login {
                id,
                username,
                map_seed,
                dimension,
            } => vec![
                Value::Int(*id),
                Value::String16(username.clone()),
                Value::Long(*map_seed),
                Value::Byte(*dimension),
            ],
            Packet::Handshake { username } => vec![Value::String16(username.clone())],
            Packet::Chat { message } => vec![Value::String16(message.clone())],
            Packet::SpawnPosition { x, y, z } => {
                vec![Value::Int(*x), Value::Int(*y), Value::Int(*z)]
            }
            Packet::PlayerPositionLook {
                x,
                y,
                stance,
                z,
                yaw,
                pitch,
                on_ground,
            } => vec![
                Value::Double(*x),
                Value::Double(*y),
                Value::Double(*stance),
                Value::Double(*z),
                Value::Float(*yaw),
                Value::Float(*pitch),
                Value::Boolean(*on_ground),
            ],
            Packet::EntityMetadata {
                entity_id,
                metadata,
            } => vec![Value::Int(*entity_id), Value::Metadata(metadata.clone())],
            Packet::PreChunk { x, z, load } => {
                vec![Value::Int(*x), Value::Int(*z), Value::Boolean(*load)]
            }
            Packet::Disconnect { reason } => vec![Value::String16(reason.clone())],
        }
    }

    /// Rebuild a packet from values decoded with its schema
    pub fn from_values(id: u8, values: Vec<Value>) -> CodecResult<Self> {
        let mut fields = values.into_iter();
        let mut next = || fields.next();

        let packet = match id {
            packet_id::KEEP_ALIVE => Some(Packet::KeepAlive),
            packet_id::LOGIN => match (next(), next(), next(), next()) {
                (
                    Some(Value::Int(id)),
                    Some(Value::String16(username)),
                    Some(Value::Long(map_seed)),
                    Some(Value::Byte(dimension)),
                ) => Some(Packet::Login {
                    id,
                    username,
                    map_seed,
                    dimension,
                }),
                _ => None,
            },
            packet_id::HANDSHAKE => match next() {
                Some(Value::String16(username)) => Some(Packet::Handshake { username }),
                _ => None,
            },
            packet_id::CHAT => match next() {
                Some(Value::String16(message)) => Some(Packet::Chat { message }),
                _ => None,
            },
            packet_id::DISCONNECT => match next() {
                Some(Value::String16(reason)) => Some(Packet::Disconnect { reason }),
                _ => None,
            },
            packet_id::SPAWN_POSITION => match (next(), next(), next()) {
                (Some(Value::Int(x)), Some(Value::Int(y)), Some(Value::Int(z))) => {
                    Some(Packet::SpawnPosition { x, y, z })
                }
                _ => None,
            },
            packet_id::PLAYER_POSITION_LOOK => {
                match (next(), next(), next(), next(), next(), next(), next()) {
                    (
                        Some(Value::Double(x)),
                        Some(Value::Double(y)),
                        Some(Value::Double(stance)),
                        Some(Value::Double(z)),
                        Some(Value::Float(yaw)),
                        Some(Value::Float(pitch)),
                        Some(Value::Boolean(on_ground)),
                    ) => Some(Packet::PlayerPositionLook {
                        x,
                        y,
                        stance,
                        z,
                        yaw,
                        pitch,
                        on_ground,
                    }),
                    _ => None,
                }
            }
            packet_id::ENTITY_METADATA => match (next(), next()) {
                (Some(Value::Int(entity_id)), Some(Value::Metadata(metadata))) => {
                    Some(Packet::EntityMetadata {
                        entity_id,
                        metadata,
                    })
                }
                _ => None,
            },
            packet_id::PRE_CHUNK => match (next(), next(), next()) {
                (Some(Value::Int(x)), Some(Value::Int(z)), Some(Value::Boolean(load))) => {
                    Some(Packet::PreChunk { x, z, load })
                }
                _ => None,
            },
            _ => None,
        };

        packet.ok_or(CodecError::UnknownPacket(id))
    }

    /// Append the packet, id first
    ///
    /// On error nothing is appended.
    pub fn encode(&self, buf: &mut ByteBuffer<'_>) -> CodecResult<()> {
        let id = self.id();
        let fields = schema(id).ok_or(CodecError::UnknownPacket(id))?;

        let mut scratch = ByteBuffer::new();
        id.encode(&mut scratch);
        encode_fields(&mut scratch, fields, &self.to_values())?;

        buf.add_buffer(&mut scratch);
        Ok(())
    }

    /// Take one complete packet from the front of `buf`
    ///
    /// Returns `Ok(None)` without consuming anything if the packet has not
    /// fully arrived yet.
    pub fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Option<Self>> {
        let Some(&id) = buf.content().first() else {
            return Ok(None);
        };
        let fields = schema(id).ok_or(CodecError::UnknownPacket(id))?;

        let mut scratch = ByteBuffer::from(&buf.content()[1..]);
        let values = match decode_fields(&mut scratch, fields) {
            Ok(values) => values,
            Err(e) if e.is_incomplete() => return Ok(None),
            Err(e) => return Err(e),
        };

        let consumed = buf.len() - scratch.len();
        buf.drain(consumed)?;

        Self::from_values(id, values).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MetadataValue;

    fn encoded(packet: &Packet) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        packet.encode(&mut buf).unwrap();
        buf.content().to_vec()
    }

    #[test]
    fn test_pre_chunk_layout() {
        let bytes = encoded(&Packet::PreChunk {
            x: 1,
            z: -1,
            load: true,
        });
        assert_eq!(
            bytes,
            vec![0x32, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]
        );
    }

    #[test]
    fn test_disconnect_layout() {
        let bytes = encoded(&Packet::Disconnect {
            reason: "Bye".to_string(),
        });
        assert_eq!(bytes, vec![0xFF, 0x00, 0x03, 0x00, b'B', 0x00, b'y', 0x00, b'e']);
    }

    #[test]
    fn test_roundtrip_every_packet() {
        let packets = vec![
            Packet::KeepAlive,
            Packet::Login {
                id: 14,
                username: "notch".to_string(),
                map_seed: -42,
                dimension: -1,
            },
            Packet::Handshake {
                username: "notch".to_string(),
            },
            Packet::Chat {
                message: "hello \u{263A}".to_string(),
            },
            Packet::SpawnPosition { x: 0, y: 64, z: -8 },
            Packet::PlayerPositionLook {
                x: 0.5,
                y: 65.0,
                stance: 66.62,
                z: -0.5,
                yaw: 90.0,
                pitch: -10.0,
                on_ground: true,
            },
            Packet::EntityMetadata {
                entity_id: 7,
                metadata: Metadata::new().with(0, MetadataValue::Byte(0x02)),
            },
            Packet::PreChunk {
                x: 3,
                z: 4,
                load: false,
            },
            Packet::Disconnect {
                reason: "kicked".to_string(),
            },
        ];

        let mut buf = ByteBuffer::new();
        for packet in &packets {
            packet.encode(&mut buf).unwrap();
        }
        for packet in &packets {
            assert_eq!(Packet::decode(&mut buf).unwrap().as_ref(), Some(packet));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_packet_waits_for_more() {
        let bytes = encoded(&Packet::SpawnPosition { x: 1, y: 2, z: 3 });

        let mut buf = ByteBuffer::new();
        for (i, byte) in bytes.iter().enumerate() {
            assert_eq!(Packet::decode(&mut buf).unwrap(), None);
            assert_eq!(buf.len(), i);
            buf.add(&[*byte]);
        }
        assert_eq!(
            Packet::decode(&mut buf).unwrap(),
            Some(Packet::SpawnPosition { x: 1, y: 2, z: 3 })
        );
    }

    #[test]
    fn test_unknown_packet_id() {
        let mut buf = ByteBuffer::from(vec![0xEE, 0x00]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(CodecError::UnknownPacket(0xEE))
        ));
    }

    #[test]
    fn test_from_values_rejects_wrong_shape() {
        assert!(matches!(
            Packet::from_values(packet_id::CHAT, vec![Value::Int(1)]),
            Err(CodecError::UnknownPacket(packet_id::CHAT))
        ));
    }
}
