// ABOUTME: Dataframe grammar: identifier bytes, ACK/DAT/UPS/ERR/NAK keywords, and the hex-encoded value list
// ABOUTME: Pure encode/decode primitives; packet assembly with response-control paging lives in slave::transfer / master::transfer

use thiserror::Error;

/// Request/response kind, selected by a single ASCII identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    GetVar,
    SetVar,
    Command,
    Upstream,
    Downstream,
    Unknown,
}

impl Identifier {
    pub fn to_byte(self) -> u8 {
        match self {
            Identifier::GetVar => b'?',
            Identifier::SetVar => b'!',
            Identifier::Command => b':',
            Identifier::Upstream => b'>',
            Identifier::Downstream => b'<',
            Identifier::Unknown => b'#',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'?' => Some(Identifier::GetVar),
            b'!' => Some(Identifier::SetVar),
            b':' => Some(Identifier::Command),
            b'>' => Some(Identifier::Upstream),
            b'<' => Some(Identifier::Downstream),
            b'#' => Some(Identifier::Unknown),
            _ => None,
        }
    }
}

/// Acknowledgement keyword carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Success,
    SuccessData,
    SuccessUpstream,
    Error,
    Unknown,
}

impl AckKind {
    pub fn keyword(self) -> &'static str {
        match self {
            AckKind::Success => "ACK",
            AckKind::SuccessData => "DAT",
            AckKind::SuccessUpstream => "UPS",
            AckKind::Error => "ERR",
            AckKind::Unknown => "NAK",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "ACK" => Some(AckKind::Success),
            "DAT" => Some(AckKind::SuccessData),
            "UPS" => Some(AckKind::SuccessUpstream),
            "ERR" => Some(AckKind::Error),
            "NAK" => Some(AckKind::Unknown),
            _ => None,
        }
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub num: i16,
    pub kind: Identifier,
    pub values: Vec<u32>,
}

/// The result of matching a leading ACK keyword: at most 4 leading bytes are
/// consumed (the keyword plus an optional `;`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMatch {
    pub ack: AckKind,
    /// Bytes consumed from the input: 3 for the bare keyword, 4 if followed
    /// by `;`.
    pub consumed: usize,
    /// Whether a `;` immediately followed the keyword.
    pub has_separator: bool,
}

/// Codec-level errors. Slave and master error taxonomies map these onto
/// their own numbered variants; this enum only needs to carry enough detail
/// for that mapping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("no identifier byte found in request")]
    RequestIdentifierNotFound,

    #[error("variable/command number could not be decoded as hex")]
    VariableNumberConversionFailed,

    #[error("request value could not be decoded as hex")]
    RequestValueConversionFailed,

    #[error("hex digit string exceeds 8 digits or is empty")]
    NumberConversionFailed,

    #[error("unrecognized ACK keyword")]
    AcknowledgeUnknown,
}

/// Encodes `v` as uppercase hex with the minimum number of digits (at least
/// one digit, no leading zeroes beyond that).
pub fn encode_hex(v: u32) -> String {
    format!("{v:X}")
}

/// Decodes 1..=8 uppercase-or-lowercase hex digits. More than 8 digits (or
/// zero digits) is a conversion failure.
pub fn decode_hex(s: &[u8]) -> Result<u32, CodecError> {
    if s.is_empty() || s.len() > 8 {
        return Err(CodecError::NumberConversionFailed);
    }
    let text = std::str::from_utf8(s).map_err(|_| CodecError::NumberConversionFailed)?;
    u32::from_str_radix(text, 16).map_err(|_| CodecError::NumberConversionFailed)
}

/// Decodes a `num_hex` field (1..=4 hex digits; empty is 0) into the 16-bit
/// request/command number.
pub fn decode_num(s: &[u8]) -> Result<i16, CodecError> {
    if s.is_empty() {
        return Ok(0);
    }
    if s.len() > 4 {
        return Err(CodecError::VariableNumberConversionFailed);
    }
    let v = decode_hex(s).map_err(|_| CodecError::VariableNumberConversionFailed)?;
    Ok(v as u16 as i16)
}

/// Parses a request dataframe body (STX/ETX already stripped).
///
/// Scans left-to-right for the first identifier byte, decodes the prefix as
/// the request number, and (for `!`/`:`/`>`) decodes a comma-separated hex
/// value list from the tail, capped at `max_values` (excess is truncated).
pub fn parse_request(body: &[u8], max_values: usize) -> Result<Request, CodecError> {
    let ident_pos = body
        .iter()
        .position(|&b| Identifier::from_byte(b).is_some())
        .ok_or(CodecError::RequestIdentifierNotFound)?;

    let kind = Identifier::from_byte(body[ident_pos]).expect("position matched from_byte");
    let num = decode_num(&body[..ident_pos])?;

    let tail = &body[ident_pos + 1..];
    let mut values = Vec::new();
    if !tail.is_empty() {
        for chunk in tail.split(|&b| b == b',') {
            if values.len() >= max_values {
                break;
            }
            values.push(decode_hex(chunk).map_err(|_| CodecError::RequestValueConversionFailed)?);
        }
    }

    Ok(Request { num, kind, values })
}

/// Encodes a request dataframe body: `num_hex` + identifier + an optional
/// comma-separated hex value list (no separator before the first value).
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&encode_hex(req.num as u16 as u32));
    out.push(req.kind.to_byte() as char);
    let values: Vec<String> = req.values.iter().map(|&v| encode_hex(v)).collect();
    out.push_str(&values.join(","));
    out.into_bytes()
}

/// Matches a 3-letter ACK keyword (optionally followed by `;`) at the start
/// of `bytes`.
pub fn check_ack(bytes: &[u8]) -> Option<AckMatch> {
    if bytes.len() < 3 {
        return None;
    }
    let keyword = std::str::from_utf8(&bytes[..3]).ok()?;
    let ack = AckKind::from_keyword(keyword)?;
    let has_separator = bytes.get(3) == Some(&b';');
    Some(AckMatch {
        ack,
        consumed: if has_separator { 4 } else { 3 },
        has_separator,
    })
}

/// Parses a comma-separated hex value list (no leading/trailing separators
/// expected; an empty slice yields an empty list).
pub fn parse_value_list(bytes: &[u8]) -> Result<Vec<u32>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bytes
        .split(|&b| b == b',')
        .map(decode_hex)
        .collect::<Result<Vec<u32>, CodecError>>()
        .map_err(|_| CodecError::NumberConversionFailed)
}

/// Formats a value list as comma-separated hex, trimming nothing (callers
/// trim for remaining TX capacity before calling this).
pub fn format_value_list(values: &[u32]) -> String {
    values
        .iter()
        .map(|&v| encode_hex(v))
        .collect::<Vec<_>>()
        .join(",")
}
