// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single accepted connection plus the bookkeeping the dispatcher
//! needs to hand it to a Handler and cancel its admission timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;

/// One accepted connection, with its sequence number in the accept
/// order and the flag its admission timer watches (spec.md §9: the
/// timer must be cancelled at handover so it never closes an in-flight
/// connection).
pub struct ServConn {
    pub seq: u64,
    pub reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    pub writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
    pub admission_cancelled: Arc<AtomicBool>,
}

impl ServConn {
    pub fn new(stream: TcpStream, seq: u64) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            seq,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            admission_cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the admission timer cancelled (called once the dispatcher
    /// hands this connection to a Handler).
    pub fn cancel_admission_timer(&self) {
        self.admission_cancelled.store(true, Ordering::SeqCst);
    }
}
