// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One worker that runs a single command on a single connection
//! (spec.md §4.7).

use super::connection::ServConn;
use crate::protocol::{self, format_value_line, MsgLine, StoreVerb, RESP_END, RESP_NOT_STORED, RESP_STORED};
use crate::storage::{Engine, IndexError, MetaItem};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandlerState {
    Ready = 0,
    Running = 1,
    Idle = 2,
    Quit = 3,
}

impl From<u8> for HandlerState {
    fn from(v: u8) -> Self {
        match v {
            1 => HandlerState::Running,
            2 => HandlerState::Idle,
            3 => HandlerState::Quit,
            _ => HandlerState::Ready,
        }
    }
}

/// A pooled worker (spec.md C8). `id` is assigned as the pool's current
/// length at creation time (spec.md §9: the original's `count − 1`
/// scheme is a bug; this assigns the index before append).
pub struct Handler {
    pub id: usize,
    state: AtomicU8,
}

impl Handler {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: AtomicU8::new(HandlerState::Ready as u8),
        }
    }

    pub fn state(&self) -> HandlerState {
        HandlerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: HandlerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn mark_quit(&self) {
        self.set_state(HandlerState::Quit);
    }

    /// Run one command on `conn`. Cancels the admission timer on entry
    /// (spec.md §9: the timer must not fire on an in-flight connection).
    pub async fn process(&self, mut conn: ServConn, engine: Arc<Engine>, min_expiration: i64) {
        conn.cancel_admission_timer();
        self.set_state(HandlerState::Running);

        if let Err(err) = self.process_inner(&mut conn, &engine, min_expiration).await {
            tracing::debug!(handler = self.id, seq = conn.seq, error = %err, "command failed");
        }

        let _ = conn.writer.flush().await;
        self.set_state(HandlerState::Idle);
    }

    async fn process_inner(
        &self,
        conn: &mut ServConn,
        engine: &Arc<Engine>,
        min_expiration: i64,
    ) -> Result<(), std::io::Error> {
        let mut line = String::new();
        let n = conn.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(()); // client closed before sending a command
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        tracing::debug!(handler = self.id, seq = conn.seq, command = trimmed, "read command");

        let parsed = match protocol::parse_command_line(trimmed.as_bytes()) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(handler = self.id, error = %err, "unsupported or malformed command");
                return Ok(());
            }
        };

        match parsed {
            MsgLine::Store {
                verb,
                key,
                flags,
                expiration,
                bytes,
                cas_id: _,
            } => {
                self.handle_store(conn, engine, verb, key, flags, expiration, bytes, min_expiration)
                    .await
            }
            MsgLine::Retrieve { with_cas, keys } => {
                self.handle_retrieve(conn, engine, with_cas, keys).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_store(
        &self,
        conn: &mut ServConn,
        engine: &Arc<Engine>,
        verb: StoreVerb,
        key: Vec<u8>,
        flags: u32,
        expiration: i64,
        bytes: u64,
        min_expiration: i64,
    ) -> Result<(), std::io::Error> {
        let now = Instant::now();
        let clamped_exp = expiration.max(min_expiration).max(0) as u64;
        let lifetime = Duration::from_secs(clamped_exp);

        let item = MetaItem::new(key.clone(), flags, now, lifetime, bytes, Vec::new());
        let insert_result: Result<(), IndexError> = match verb {
            StoreVerb::Set | StoreVerb::Cas => {
                // spec.md §9: cas is treated as set, the cas field ignored.
                engine.index.set(item);
                Ok(())
            }
            StoreVerb::Add => engine.index.add(item, now),
            StoreVerb::Replace => engine.index.replace(item, now),
        };

        if insert_result.is_err() {
            conn.writer.write_all(RESP_NOT_STORED).await?;
            return Ok(());
        }

        let slots = match engine.allocator.allocate(bytes) {
            Ok(s) => s,
            Err(_) => {
                engine.index.remove(&key);
                conn.writer.write_all(RESP_NOT_STORED).await?;
                return Ok(());
            }
        };
        engine.index.update_slots(&key, slots.clone(), bytes);

        let mut bytes_left = bytes;
        for handle in &slots {
            let chunk_len = bytes_left.min(handle.capacity() as u64) as usize;
            let mut buf = vec![0u8; chunk_len];
            if let Err(err) = conn.reader.read_exact(&mut buf).await {
                engine.index.remove(&key);
                conn.writer.write_all(RESP_NOT_STORED).await?;
                return Err(err);
            }
            if handle.commit(&key, &buf, now, lifetime).is_err() {
                engine.index.remove(&key);
                conn.writer.write_all(RESP_NOT_STORED).await?;
                return Ok(());
            }
            bytes_left -= chunk_len as u64;
        }

        // Consume the trailing CRLF after the data block (spec.md §4.6 grammar).
        let mut terminator = [0u8; 2];
        let _ = conn.reader.read_exact(&mut terminator).await;

        conn.writer.write_all(RESP_STORED).await?;
        Ok(())
    }

    async fn handle_retrieve(
        &self,
        conn: &mut ServConn,
        engine: &Arc<Engine>,
        with_cas: bool,
        keys: Vec<Vec<u8>>,
    ) -> Result<(), std::io::Error> {
        let now = Instant::now();
        for key in keys {
            if let Some((flags, data)) = engine.index.get(&key, now) {
                let cas_id = if with_cas { Some(0u64) } else { None };
                conn.writer
                    .write_all(&format_value_line(&key, flags, data.len() as u64, cas_id))
                    .await?;
                conn.writer.write_all(&data).await?;
                conn.writer.write_all(b"\r\n").await?;
            }
        }
        conn.writer.write_all(RESP_END).await?;
        Ok(())
    }
}
