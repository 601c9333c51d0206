//! Session logic run on the worker pool
//!
//! Handles the login sequence, keep-alives and chat. Logged-in players are
//! kept in a `ConcurrentMap` keyed by connection id, which is also what
//! broadcasts iterate.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::connection::{ConnectionHandle, ConnectionId};
use crate::arith;
use crate::job::{DispatchError, DispatchResult, Job, JobData, JobHandler, JobType};
use crate::map::ConcurrentMap;
use crate::protocol::{Packet, PROTOCOL_VERSION};

/// Hash sent back on handshake when no account check is done
pub const OFFLINE_CONNECTION_HASH: &str = "-";

/// Where new players appear, in block coordinates
const SPAWN: (i32, i32, i32) = (0, 0, 0);

/// Chunk columns are 16 blocks wide
const CHUNK_WIDTH: i32 = 16;

const INCOMPATIBLE_VERSION: &str = "Client version is incompatible with this server.";
const SERVER_FULL: &str = "The server is full.";

/// A logged-in player
#[derive(Debug)]
pub struct Player {
    pub entity_id: i32,
    pub username: String,
    pub connection: ConnectionHandle,
}

/// Settings the session logic needs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_name: String,
    /// Lines sent to each player after login
    pub motd: Vec<String>,
    pub max_players: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_name: "craftnet".to_string(),
            motd: vec!["Welcome!".to_string()],
            max_players: 20,
        }
    }
}

/// Game-facing handler for client jobs
pub struct SessionHandler {
    config: SessionConfig,
    players: ConcurrentMap<Arc<Player>>,
    /// Places taken, counted ahead of `players` so logins cannot overfill
    online: AtomicUsize,
    next_entity_id: AtomicI32,
}

impl SessionHandler {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            players: ConcurrentMap::new(),
            online: AtomicUsize::new(0),
            next_entity_id: AtomicI32::new(1),
        }
    }

    pub fn players(&self) -> &ConcurrentMap<Arc<Player>> {
        &self.players
    }

    pub fn player(&self, connection: ConnectionId) -> Option<Arc<Player>> {
        self.players.get(connection as i64)
    }

    /// Send a packet to every logged-in player
    pub fn broadcast(&self, packet: Packet) {
        self.players.for_each(|_, player| {
            if let Err(e) = player.connection.send(packet.clone()) {
                tracing::debug!(
                    "Broadcast to connection {} skipped: {}",
                    player.connection.id(),
                    e
                );
            }
            ControlFlow::Continue(())
        });
    }

    fn chat_all(&self, message: String) {
        tracing::info!("[chat] {}", message);
        self.broadcast(Packet::Chat { message });
    }

    /// Take one of the `max_players` places, if any is left
    fn reserve_place(&self) -> bool {
        self.online
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.config.max_players).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_place(&self) {
        self.online.fetch_sub(1, Ordering::AcqRel);
    }

    fn handle_packet(&self, connection: &ConnectionHandle, packet: &Packet) -> DispatchResult<()> {
        let reply = |packet: Packet| {
            connection
                .send(packet)
                .map_err(|e| DispatchError::Job(e.to_string()))
        };

        match packet {
            Packet::KeepAlive => reply(Packet::KeepAlive),

            Packet::Handshake { username } => {
                tracing::debug!("Handshake from {} ({})", username, connection.addr());
                reply(Packet::Handshake {
                    username: OFFLINE_CONNECTION_HASH.to_string(),
                })
            }

            Packet::Login { id, username, .. } => self.login(connection, *id, username),

            Packet::Chat { message } => {
                let Some(player) = self.player(connection.id()) else {
                    tracing::debug!("Chat from connection {} before login", connection.id());
                    return Ok(());
                };
                self.chat_all(format!("<{}> {}", player.username, message));
                Ok(())
            }

            Packet::Disconnect { reason } => {
                tracing::debug!("Connection {} leaving: {}", connection.id(), reason);
                Ok(())
            }

            other => {
                tracing::trace!(
                    "Ignoring packet {:#04x} from connection {}",
                    other.id(),
                    connection.id()
                );
                Ok(())
            }
        }
    }

    fn login(
        &self,
        connection: &ConnectionHandle,
        version: i32,
        username: &str,
    ) -> DispatchResult<()> {
        let kick = |reason: &str| {
            connection
                .kick(reason)
                .map_err(|e| DispatchError::Job(e.to_string()))
        };

        if version != PROTOCOL_VERSION {
            tracing::info!(
                "Rejecting {} ({}): protocol {} != {}",
                username,
                connection.addr(),
                version,
                PROTOCOL_VERSION
            );
            return kick(INCOMPATIBLE_VERSION);
        }

        let key = connection.id() as i64;
        if self.players.has_key(key) {
            tracing::warn!("Connection {} sent a second login", connection.id());
            return Ok(());
        }
        if !self.reserve_place() {
            return kick(SERVER_FULL);
        }

        let player = Arc::new(Player {
            entity_id: self.next_entity_id.fetch_add(1, Ordering::Relaxed),
            username: username.to_string(),
            connection: connection.clone(),
        });

        let (spawn_x, spawn_y, spawn_z) = SPAWN;
        let mut welcome = vec![
            Packet::Login {
                id: player.entity_id,
                username: String::new(),
                map_seed: 0,
                dimension: 0,
            },
            Packet::PreChunk {
                x: arith::div(spawn_x, CHUNK_WIDTH),
                z: arith::div(spawn_z, CHUNK_WIDTH),
                load: true,
            },
            Packet::SpawnPosition {
                x: spawn_x,
                y: spawn_y,
                z: spawn_z,
            },
            Packet::PlayerPositionLook {
                x: f64::from(spawn_x),
                y: f64::from(spawn_y),
                stance: f64::from(spawn_y),
                z: f64::from(spawn_z),
                yaw: 0.0,
                pitch: 0.0,
                on_ground: false,
            },
        ];
        welcome.extend(self.config.motd.iter().map(|line| Packet::Chat {
            message: line.clone(),
        }));

        for packet in welcome {
            if let Err(e) = connection.send(packet) {
                self.release_place();
                return Err(DispatchError::Job(e.to_string()));
            }
        }

        self.players.put(key, player.clone());
        tracing::info!(
            "{} logged in (entity {}, {})",
            player.username,
            player.entity_id,
            connection.addr()
        );

        self.chat_all(format!(
            "Player {} has joined {}!",
            player.username, self.config.server_name
        ));
        Ok(())
    }

    fn leave(&self, connection: &ConnectionHandle) {
        if let Some(player) = self.players.delete(connection.id() as i64) {
            self.release_place();
            tracing::info!("{} left the game", player.username);
            self.chat_all(format!("Player {} has left.", player.username));
        }
    }
}

#[async_trait]
impl JobHandler for SessionHandler {
    async fn handle(&self, job: &Job) -> DispatchResult<()> {
        match (job.kind(), job.data()) {
            (JobType::ClientConnect, JobData::Client(connection)) => {
                tracing::debug!("Connection {} from {}", connection.id(), connection.addr());
                Ok(())
            }
            (JobType::ClientDisconnect, JobData::Client(connection)) => {
                self.leave(connection);
                Ok(())
            }
            (JobType::ClientProcess, JobData::ClientProcess(process)) => {
                self.handle_packet(&process.connection, &process.packet)
            }
            (kind, _) => Err(DispatchError::Job(format!(
                "{:?} job with mismatched payload",
                kind
            ))),
        }
    }
}
