//! Tolerant signal scanner for streamed model output
//!
//! The model streams something that is meant to look like `{"s":"working","p":"..."}`
//! but is not guaranteed to be valid JSON at any chunk boundary. Keys may be
//! upper or lower case, quotes may be single, double, backslash-escaped or
//! mismatched, and any token may be split across two chunks.
//!
//! [`scan`] is a pure function over the pending buffer. It reports the first
//! complete signal and how many leading bytes the caller may drop. A
//! candidate that is cut off by the end of the buffer is left unconsumed so
//! the next call sees it reassembled.

use translation_workflow_sdk::Phase;

/// A recognised signal in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `s` key paired with a phase name
    Phase(Phase),
    /// `p` key paired with an opening value quote: the model is emitting content
    Content,
}

/// Result of one scan over a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scan {
    pub signal: Option<Signal>,
    /// Leading bytes that can be discarded; always a char boundary
    pub consumed: usize,
}

enum Token {
    Quote(usize),
    Partial,
    Other,
}

enum Probe {
    Found(Signal, usize),
    Partial,
    Miss,
}

/// Scan `buffer` for the first complete signal.
///
/// Returns `consumed == buffer.len()` when nothing in the buffer can still
/// grow into a signal.
pub fn scan(buffer: &str) -> Scan {
    let bytes = buffer.as_bytes();

    for start in 0..bytes.len() {
        if !matches!(bytes[start], b'"' | b'\'' | b'\\') {
            continue;
        }
        match probe(bytes, start) {
            Probe::Found(signal, end) => {
                return Scan {
                    signal: Some(signal),
                    consumed: end,
                }
            }
            Probe::Partial => {
                return Scan {
                    signal: None,
                    consumed: start,
                }
            }
            Probe::Miss => {}
        }
    }

    Scan {
        signal: None,
        consumed: bytes.len(),
    }
}

fn quote_at(bytes: &[u8], i: usize) -> Token {
    match bytes.get(i) {
        None => Token::Partial,
        Some(b'"' | b'\'') => Token::Quote(1),
        Some(b'\\') => match bytes.get(i + 1) {
            None => Token::Partial,
            Some(b'"' | b'\'') => Token::Quote(2),
            Some(_) => Token::Other,
        },
        Some(_) => Token::Other,
    }
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        i += 1;
    }
    i
}

fn probe(bytes: &[u8], start: usize) -> Probe {
    let mut i = match quote_at(bytes, start) {
        Token::Quote(len) => start + len,
        Token::Partial => return Probe::Partial,
        Token::Other => return Probe::Miss,
    };

    let key = match bytes.get(i) {
        None => return Probe::Partial,
        Some(b) => b.to_ascii_lowercase(),
    };
    if key != b's' && key != b'p' {
        return Probe::Miss;
    }
    i += 1;

    match quote_at(bytes, i) {
        Token::Quote(len) => i += len,
        Token::Partial => return Probe::Partial,
        Token::Other => return Probe::Miss,
    }

    i = skip_whitespace(bytes, i);
    match bytes.get(i) {
        None => return Probe::Partial,
        Some(b':') => i += 1,
        Some(_) => return Probe::Miss,
    }
    i = skip_whitespace(bytes, i);

    match quote_at(bytes, i) {
        Token::Quote(len) => i += len,
        Token::Partial => return Probe::Partial,
        Token::Other => return Probe::Miss,
    }

    if key == b'p' {
        return Probe::Found(Signal::Content, i);
    }

    let value_start = i;
    loop {
        match quote_at(bytes, i) {
            Token::Quote(len) => {
                return match phase_from_bytes(&bytes[value_start..i]) {
                    Some(phase) => Probe::Found(Signal::Phase(phase), i + len),
                    None => Probe::Miss,
                };
            }
            Token::Partial => return Probe::Partial,
            Token::Other => {
                i += 1;
                if !is_phase_prefix(&bytes[value_start..i]) {
                    return Probe::Miss;
                }
            }
        }
    }
}

fn is_phase_prefix(value: &[u8]) -> bool {
    Phase::ALL.iter().any(|phase| {
        let name = phase.as_str().as_bytes();
        name.len() >= value.len() && name[..value.len()].eq_ignore_ascii_case(value)
    })
}

fn phase_from_bytes(value: &[u8]) -> Option<Phase> {
    Phase::ALL
        .into_iter()
        .find(|phase| phase.as_str().as_bytes().eq_ignore_ascii_case(value))
}
