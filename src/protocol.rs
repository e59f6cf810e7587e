// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command-line parsing and response formatting for the wire protocol
//! (spec.md §4.6).

use thiserror::Error;

/// Maximum key length, shared with the storage layer.
pub const MAX_KEY_LEN: usize = crate::storage::MAX_KEY_LEN;

pub const RESP_STORED: &[u8] = b"STORED\r\n";
pub const RESP_NOT_STORED: &[u8] = b"NOT_STORED\r\n";
pub const RESP_END: &[u8] = b"END\r\n";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("wrong number of arguments for {0}")]
    WrongArity(&'static str),
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid numeric field: {0}")]
    InvalidNumber(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
    Cas,
}

/// A fully parsed request line (spec.md §4.6 grammar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgLine {
    Store {
        verb: StoreVerb,
        key: Vec<u8>,
        flags: u32,
        expiration: i64,
        bytes: u64,
        /// Present only for `cas`; ignored per spec.md §9 (cas treated
        /// as set).
        cas_id: Option<u64>,
    },
    Retrieve {
        with_cas: bool,
        keys: Vec<Vec<u8>>,
    },
}

/// `valid_key(k) ⇔ 1 ≤ |k| ≤ 250 ∧ ∀i. k[i] > 0x20 ∧ k[i] ≠ 0x7F` (spec.md §8 Property 1).
pub fn valid_key(key: &[u8]) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.iter().all(|&b| b > 0x20 && b != 0x7F)
}

/// Parse one command line (without its line terminator).
pub fn parse_command_line(line: &[u8]) -> Result<MsgLine, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidNumber("line"))?;
    let mut parts = text.split(' ').filter(|s| !s.is_empty());
    let cmd = parts.next().ok_or(ProtocolError::WrongArity("command"))?;

    match cmd {
        "set" | "add" | "replace" => parse_store(cmd, parts, false),
        "cas" => parse_store(cmd, parts, true),
        "get" => parse_retrieve(parts, false),
        "gets" => parse_retrieve(parts, true),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_store<'a>(
    cmd: &'static str,
    mut parts: impl Iterator<Item = &'a str>,
    expect_cas: bool,
) -> Result<MsgLine, ProtocolError> {
    let verb = match cmd {
        "set" => StoreVerb::Set,
        "add" => StoreVerb::Add,
        "replace" => StoreVerb::Replace,
        "cas" => StoreVerb::Cas,
        _ => unreachable!(),
    };

    let key = parts.next().ok_or(ProtocolError::WrongArity(cmd))?;
    let key = key.as_bytes();
    if !valid_key(key) {
        return Err(ProtocolError::InvalidKey);
    }

    let flags: u32 = parts
        .next()
        .ok_or(ProtocolError::WrongArity(cmd))?
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber("flags"))?;
    let expiration: i64 = parts
        .next()
        .ok_or(ProtocolError::WrongArity(cmd))?
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber("expiration"))?;
    let bytes: u64 = parts
        .next()
        .ok_or(ProtocolError::WrongArity(cmd))?
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber("bytes"))?;

    let cas_id = if expect_cas {
        Some(
            parts
                .next()
                .ok_or(ProtocolError::WrongArity(cmd))?
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidNumber("cas_id"))?,
        )
    } else {
        None
    };

    if parts.next().is_some() {
        return Err(ProtocolError::WrongArity(cmd));
    }

    Ok(MsgLine::Store {
        verb,
        key: key.to_vec(),
        flags,
        expiration,
        bytes,
        cas_id,
    })
}

fn parse_retrieve<'a>(
    parts: impl Iterator<Item = &'a str>,
    with_cas: bool,
) -> Result<MsgLine, ProtocolError> {
    let keys: Vec<Vec<u8>> = parts.map(|s| s.as_bytes().to_vec()).collect();
    if keys.is_empty() {
        return Err(ProtocolError::WrongArity(if with_cas { "gets" } else { "get" }));
    }
    for key in &keys {
        if !valid_key(key) {
            return Err(ProtocolError::InvalidKey);
        }
    }
    Ok(MsgLine::Retrieve { with_cas, keys })
}

/// Format a `VALUE` line. Length is the full 64-bit byte length (spec.md
/// §9: the original's 32-bit truncation is not carried forward).
pub fn format_value_line(key: &[u8], flags: u32, byte_length: u64, cas_id: Option<u64>) -> Vec<u8> {
    let mut line = Vec::with_capacity(key.len() + 32);
    line.extend_from_slice(b"VALUE ");
    line.extend_from_slice(key);
    line.extend_from_slice(format!(" {} {}", flags, byte_length).as_bytes());
    if let Some(id) = cas_id {
        line.extend_from_slice(format!(" {}", id).as_bytes());
    }
    line.extend_from_slice(b"\r\n");
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_key_accepts_printable_ascii() {
        assert!(valid_key(b"hello"));
        assert!(valid_key(&[b'a'; 250]));
    }

    #[test]
    fn valid_key_rejects_empty_and_oversized() {
        assert!(!valid_key(b""));
        assert!(!valid_key(&[b'a'; 251]));
    }

    #[test]
    fn valid_key_rejects_control_and_space_and_del() {
        assert!(!valid_key(b"has space"));
        assert!(!valid_key(b"tab\t"));
        assert!(!valid_key(&[0x7F]));
        assert!(!valid_key(&[0x01]));
    }

    #[test]
    fn parses_set_command() {
        let parsed = parse_command_line(b"set hello 0 120 11").unwrap();
        assert_eq!(
            parsed,
            MsgLine::Store {
                verb: StoreVerb::Set,
                key: b"hello".to_vec(),
                flags: 0,
                expiration: 120,
                bytes: 11,
                cas_id: None,
            }
        );
    }

    #[test]
    fn parses_cas_command_with_extra_field() {
        let parsed = parse_command_line(b"cas k1 0 120 1 42").unwrap();
        assert_eq!(
            parsed,
            MsgLine::Store {
                verb: StoreVerb::Cas,
                key: b"k1".to_vec(),
                flags: 0,
                expiration: 120,
                bytes: 1,
                cas_id: Some(42),
            }
        );
    }

    #[test]
    fn parses_get_and_gets() {
        assert_eq!(
            parse_command_line(b"get hello").unwrap(),
            MsgLine::Retrieve {
                with_cas: false,
                keys: vec![b"hello".to_vec()]
            }
        );
        assert_eq!(
            parse_command_line(b"gets hello").unwrap(),
            MsgLine::Retrieve {
                with_cas: true,
                keys: vec![b"hello".to_vec()]
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        let err = parse_command_line(b"frobnicate x").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(_)));
    }

    #[test]
    fn rejects_store_with_missing_fields() {
        let err = parse_command_line(b"set hello 0").unwrap_err();
        assert!(matches!(err, ProtocolError::WrongArity(_)));
    }

    #[test]
    fn rejects_store_with_bad_key() {
        let err = parse_command_line(b"set \"bad key\" 0 120 1").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidKey | ProtocolError::WrongArity(_)));
    }

    #[test]
    fn format_value_line_uses_64_bit_length() {
        let line = format_value_line(b"hello", 0, 11, None);
        assert_eq!(line, b"VALUE hello 0 11\r\n");
    }

    #[test]
    fn format_value_line_includes_cas_id() {
        let line = format_value_line(b"k", 7, 3, Some(99));
        assert_eq!(line, b"VALUE k 7 3 99\r\n");
    }
}
