//! Wire framing of the MC protocol.
//!
//! ASCII, `\n` terminated:
//!
//! ```text
//! request   <verb> <arg> <arg> ...        verb starts with '!' or '?'
//! success   [<payload>] ok
//! error     e<digit>
//! comment   # ...
//! ```
//!
//! Payload decoders are plain functions so every query picks its decoder at
//! compile time.

use resin_common::mc::codes::CommError;
use resin_common::mc::error::McError;
use std::borrow::Cow;
use std::fmt;

// ─── Command ────────────────────────────────────────────────────────

/// A primitive command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Text(String),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Self::Int(i64::from(v))
            }
        })*
    };
}

int_arg!(i8, u8, i16, u16, i32, u32, i64);

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A verb plus ordered arguments. Built per call, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Cow<'static, str>,
    args: Vec<Arg>,
}

impl Command {
    pub fn new(verb: impl Into<Cow<'static, str>>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<A: Into<Arg>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Line as written to the port, newline included.
    pub fn frame(&self) -> String {
        format!("{self}\n")
    }
}

impl From<&'static str> for Command {
    fn from(verb: &'static str) -> Self {
        Self::new(verb)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ─── Response ───────────────────────────────────────────────────────

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Err(CommError),
}

impl Response {
    /// Turn a refusal into [`McError::CommandError`].
    pub fn into_result(self) -> Result<Option<String>, McError> {
        match self {
            Self::Ok(payload) => Ok(payload),
            Self::Err(code) => Err(McError::CommandError(code)),
        }
    }
}

/// Classification of a received line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Response),
    Comment(String),
    Other(String),
}

/// Classify one stripped line.
pub fn parse_line(line: &str) -> Frame {
    if line.starts_with('#') {
        return Frame::Comment(line.to_string());
    }
    if let Some(head) = line.strip_suffix("ok") {
        let payload = head.trim();
        let payload = (!payload.is_empty()).then(|| payload.to_string());
        return Frame::Response(Response::Ok(payload));
    }
    let mut chars = line.chars();
    if let (Some('e'), Some(code), None) = (chars.next(), chars.next(), chars.next()) {
        return Frame::Response(Response::Err(CommError::from_char(code)));
    }
    Frame::Other(line.to_string())
}

// ─── Payload Decoders ───────────────────────────────────────────────

fn require(payload: Option<&str>) -> Result<&str, McError> {
    payload.ok_or_else(|| McError::ProtocolError("expected payload, got bare ok".to_string()))
}

fn bad(payload: &str, what: &str) -> McError {
    McError::ProtocolError(format!("cannot decode '{payload}' as {what}"))
}

pub fn decode_int(payload: Option<&str>) -> Result<i32, McError> {
    let text = require(payload)?;
    text.trim().parse().map_err(|_| bad(text, "integer"))
}

/// Space separated integers in `radix`.
pub fn decode_int_list_radix(payload: Option<&str>, radix: u32) -> Result<Vec<i32>, McError> {
    let text = require(payload)?;
    text.split_whitespace()
        .map(|item| i32::from_str_radix(item, radix).map_err(|_| bad(text, "integer list")))
        .collect()
}

pub fn decode_int_list(payload: Option<&str>) -> Result<Vec<i32>, McError> {
    decode_int_list_radix(payload, 10)
}

/// Integer list scaled by `factor`, e.g. tenths of a degree to degrees.
pub fn decode_scaled_list(payload: Option<&str>, factor: f64) -> Result<Vec<f64>, McError> {
    Ok(decode_int_list(payload)?
        .into_iter()
        .map(|v| f64::from(v) * factor)
        .collect())
}

pub fn decode_bool(payload: Option<&str>) -> Result<bool, McError> {
    Ok(require(payload)?.trim() == "1")
}

/// Integer expanded into `bit_count` flags, LSB first.
pub fn decode_bits(payload: Option<&str>, bit_count: usize) -> Result<Vec<bool>, McError> {
    check_width(bit_count)?;
    let text = require(payload)?;
    let word: u64 = text.trim().parse().map_err(|_| bad(text, "bit field"))?;
    Ok((0..bit_count).map(|i| word & (1u64 << i) != 0).collect())
}

/// Flags packed into an integer, LSB first. At most [`MAX_BITS`] flags.
pub fn encode_bits(bits: &[bool]) -> Result<u64, McError> {
    check_width(bits.len())?;
    Ok(bits
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0u64, |word, (i, _)| word | (1u64 << i)))
}

/// Widest bit field carried in one integer.
pub const MAX_BITS: usize = u64::BITS as usize;

fn check_width(bit_count: usize) -> Result<(), McError> {
    if bit_count > MAX_BITS {
        return Err(McError::ProtocolError(format!(
            "{bit_count} flags do not fit a {MAX_BITS} bit field"
        )));
    }
    Ok(())
}

/// Hex encoded ASCII string.
pub fn decode_hexed_string(payload: Option<&str>) -> Result<String, McError> {
    let text = require(payload)?.trim();
    if text.len() % 2 != 0 {
        return Err(bad(text, "hex string"));
    }
    let bytes = (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| bad(text, "hex string"))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    String::from_utf8(bytes).map_err(|_| bad(text, "ASCII"))
}

/// Payload as text, empty for a bare `ok`.
pub fn decode_text(payload: Option<&str>) -> Result<String, McError> {
    Ok(payload.unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_framing() {
        let cmd = Command::new("!ticf").args([1, 2, 3]).arg(-4);
        assert_eq!(cmd.frame(), "!ticf 1 2 3 -4\n");
        assert_eq!(Command::new("?").frame(), "?\n");
        assert_eq!(Command::new("!uled").arg(true).arg(0u32).to_string(), "!uled 1 0");
        assert_eq!(Command::new("!frpm").arg("2000 3300 1000").to_string(), "!frpm 2000 3300 1000");
    }

    #[test]
    fn ok_with_payload() {
        assert_eq!(
            parse_line("42 ok"),
            Frame::Response(Response::Ok(Some("42".to_string())))
        );
    }

    #[test]
    fn bare_ok() {
        assert_eq!(parse_line("ok"), Frame::Response(Response::Ok(None)));
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            parse_line("e3"),
            Frame::Response(Response::Err(CommError::SyntaxError))
        );
        assert_eq!(
            parse_line("e9"),
            Frame::Response(Response::Err(CommError::Unspecified))
        );
        assert_eq!(parse_line("e33"), Frame::Other("e33".to_string()));
    }

    #[test]
    fn comments_and_garbage() {
        assert_eq!(parse_line("# homing"), Frame::Comment("# homing".to_string()));
        assert_eq!(parse_line("garbage"), Frame::Other("garbage".to_string()));
        assert_eq!(parse_line("ready"), Frame::Other("ready".to_string()));
    }

    #[test]
    fn response_into_result() {
        assert_eq!(Response::Ok(None).into_result(), Ok(None));
        assert_eq!(
            Response::Err(CommError::Busy).into_result(),
            Err(McError::CommandError(CommError::Busy))
        );
    }

    #[test]
    fn decoders() {
        assert_eq!(decode_int(Some("-12")), Ok(-12));
        assert!(decode_int(Some("x")).is_err());
        assert!(decode_int(None).is_err());
        assert_eq!(decode_int_list(Some("6 198")), Ok(vec![6, 198]));
        assert_eq!(decode_int_list_radix(Some("ff 10"), 16), Ok(vec![255, 16]));
        assert_eq!(decode_scaled_list(Some("215 -5"), 0.1).unwrap()[1], -0.5);
        assert_eq!(decode_bool(Some("1")), Ok(true));
        assert_eq!(decode_bool(Some("0")), Ok(false));
        assert_eq!(decode_bits(Some("5"), 4), Ok(vec![true, false, true, false]));
        assert_eq!(decode_hexed_string(Some("43 5a")).is_err(), true);
        assert_eq!(decode_hexed_string(Some("435a3031")), Ok("CZ01".to_string()));
        assert_eq!(decode_text(None), Ok(String::new()));
    }

    #[test]
    fn bits_round_trip() {
        assert_eq!(encode_bits(&[true, false, true]), Ok(5));
        assert_eq!(decode_bits(Some("5"), 3), Ok(vec![true, false, true]));
    }

    #[test]
    fn oversized_bit_fields_are_rejected() {
        assert_eq!(encode_bits(&[true; MAX_BITS]), Ok(u64::MAX));
        assert!(matches!(
            encode_bits(&[false; MAX_BITS + 1]),
            Err(McError::ProtocolError(_))
        ));
        assert!(matches!(
            decode_bits(Some("1"), MAX_BITS + 1),
            Err(McError::ProtocolError(_))
        ));
    }
}
