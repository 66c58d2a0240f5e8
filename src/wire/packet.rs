//! Request and response frames.
//!
//! A frame is a sequence of typed netstrings that starts with an empty
//! start marker (`Q` for requests, `A` for responses) and ends with the
//! `0z\n` end marker. Field types are listed in [`field`].
//!
//! Requests are assembled once into three segments so the payload can be
//! written straight from the caller's buffer:
//!
//! - header: every field up to and including the payload prefix `<len>k`
//! - payload
//! - trailer: the payload terminator `,` and the end marker

use crate::request::Attributes;
use crate::wire::context::Context;
use crate::wire::netstring::{NetString, NetStringWriter};

use bytes::Bytes;
use std::ops::Range;

pub mod field {
    pub const REQUEST_START: u8 = b'Q';
    pub const RESPONSE_START: u8 = b'A';

    pub const CLIENT_ID: u8 = b'a';
    pub const REQUEST_ID: u8 = b'b';
    pub const SERVICE_KEY: u8 = b'c';

    pub const NO_WAIT: u8 = b'e';
    pub const NO_REMOTE: u8 = b'f';
    pub const NO_RETRY: u8 = b'g';
    pub const KEEP_AFFINITY: u8 = b'h';
    pub const NEED_AFFINITY: u8 = b'i';

    pub const CONTEXT: u8 = b'j';
    pub const CONTEXT_KEY: u8 = b'k';
    pub const CONTEXT_VALUE: u8 = b'v';

    pub const REQUEST_DATA: u8 = b'k';
    pub const TIMEOUT_MS: u8 = b'l';

    pub const FAULT_CODE: u8 = b'p';
    pub const RESPONSE_DATA: u8 = b'q';
    pub const FAULT_TEXT: u8 = b'r';
    pub const SERVICE_ID: u8 = b's';

    pub const END: u8 = b'z';
}

const ATTRIBUTE_FIELDS: [(Attributes, u8); 5] = [
    (Attributes::NO_WAIT, field::NO_WAIT),
    (Attributes::NO_REMOTE, field::NO_REMOTE),
    (Attributes::NO_RETRY, field::NO_RETRY),
    (Attributes::KEEP_AFFINITY, field::KEEP_AFFINITY),
    (Attributes::NEED_AFFINITY, field::NEED_AFFINITY),
];

/// Everything in a request frame other than the payload.
#[derive(Debug, Clone)]
pub struct RequestHeader<'a> {
    pub request_id: u32,
    pub client_id: &'a str,
    pub service_key: &'a str,
    pub timeout_ms: u64,
    pub attributes: Attributes,
    pub context: &'a Context,
}

/// Builds the three outbound segments of a request frame.
pub fn assemble_request(header: &RequestHeader<'_>, payload: Bytes) -> [Bytes; 3] {
    let mut pre = NetStringWriter::new();
    pre.append_empty(field::REQUEST_START)
        .append_int(field::REQUEST_ID, i64::from(header.request_id))
        .append(field::CLIENT_ID, header.client_id.as_bytes())
        .append(field::SERVICE_KEY, header.service_key.as_bytes())
        .append_int(field::TIMEOUT_MS, header.timeout_ms as i64);

    for (attribute, marker) in ATTRIBUTE_FIELDS {
        if header.attributes.contains(attribute) {
            pre.append_empty(marker);
        }
    }

    if !header.context.is_empty() {
        pre.append(field::CONTEXT, &header.context.encode());
    }

    let mut post = NetStringWriter::new();
    if !payload.is_empty() {
        pre.append_prefix(field::REQUEST_DATA, payload.len());
        post.append_end(field::END);
        let mut trailer = vec![b','];
        trailer.extend_from_slice(&post.into_bytes());

        return [Bytes::from(pre.into_bytes()), payload, Bytes::from(trailer)];
    }

    pre.append_end(field::END);
    [Bytes::from(pre.into_bytes()), Bytes::new(), Bytes::new()]
}

/// Fields extracted from a request or response frame.
///
/// `data` indexes the payload (`k` in requests, `q` in responses) within the
/// buffer the frame was decoded from.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub request_id: Option<u32>,
    pub client_id: String,
    pub service_key: String,
    pub service_id: String,
    pub timeout_ms: Option<u64>,
    pub attributes: Attributes,
    pub context: Context,
    pub data: Range<usize>,
    pub fault_code: i32,
    pub fault_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    NeedStart,
    Accepting,
    Complete,
}

/// Accumulates the netstrings of one frame.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    start: u8,
    state: DecodeState,
    seen: [bool; 128],
    packet: DecodedPacket,
}

impl PacketDecoder {
    pub fn request() -> Self {
        Self::new(field::REQUEST_START)
    }

    pub fn response() -> Self {
        Self::new(field::RESPONSE_START)
    }

    fn new(start: u8) -> Self {
        Self {
            start,
            state: DecodeState::NeedStart,
            seen: [false; 128],
            packet: DecodedPacket::default(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.start);
    }

    pub fn is_complete(&self) -> bool {
        self.state == DecodeState::Complete
    }

    pub fn packet(&self) -> &DecodedPacket {
        &self.packet
    }

    pub fn into_packet(self) -> DecodedPacket {
        self.packet
    }

    /// Applies one netstring parsed from `buffer`.
    pub fn add(&mut self, ns: &NetString, buffer: &[u8]) -> Result<(), String> {
        let data = &buffer[ns.data.clone()];

        match self.state {
            DecodeState::Complete => return Err("data after end of packet".to_string()),
            DecodeState::NeedStart => {
                if ns.field != self.start {
                    return Err(format!(
                        "packet starts with type {:?}, expected {:?}",
                        ns.field as char, self.start as char
                    ));
                }
                self.state = DecodeState::Accepting;
                return Ok(());
            }
            DecodeState::Accepting => {}
        }

        let slot = usize::from(ns.field);
        if slot < self.seen.len() {
            if self.seen[slot] {
                return Err(format!("duplicate field type {:?}", ns.field as char));
            }
            self.seen[slot] = true;
        }

        let packet = &mut self.packet;
        match ns.field {
            field::END => self.state = DecodeState::Complete,
            field::REQUEST_ID => packet.request_id = Some(parse_number(data, "request id")?),
            field::CLIENT_ID => packet.client_id = text(data, "client id")?,
            field::SERVICE_KEY => packet.service_key = text(data, "service key")?,
            field::SERVICE_ID => packet.service_id = text(data, "service id")?,
            field::TIMEOUT_MS => packet.timeout_ms = Some(parse_number(data, "timeout")?),
            field::CONTEXT => packet.context = Context::decode(data)?,
            field::FAULT_CODE => packet.fault_code = parse_number(data, "fault code")?,
            field::FAULT_TEXT => packet.fault_text = text(data, "fault text")?,
            field::REQUEST_DATA if self.start == field::REQUEST_START => {
                packet.data = ns.data.clone();
            }
            field::RESPONSE_DATA if self.start == field::RESPONSE_START => {
                packet.data = ns.data.clone();
            }
            marker => {
                if let Some((attribute, _)) =
                    ATTRIBUTE_FIELDS.iter().find(|(_, m)| *m == marker)
                {
                    packet.attributes.insert(*attribute);
                }
            }
        }

        Ok(())
    }
}

fn text(data: &[u8], what: &str) -> Result<String, String> {
    String::from_utf8(data.to_vec()).map_err(|_| format!("{what} is not UTF-8"))
}

fn parse_number<T: std::str::FromStr>(data: &[u8], what: &str) -> Result<T, String> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("{what} is not a number"))
}

/// Builds a response frame answering `request`.
///
/// Services use this; the engine only ever decodes responses.
pub fn assemble_response(
    request: &DecodedPacket,
    service_id: &str,
    fault: Option<(i32, &str)>,
    payload: &[u8],
) -> Vec<u8> {
    let mut writer = NetStringWriter::new();
    writer.append_empty(field::RESPONSE_START);
    if let Some(id) = request.request_id {
        writer.append_int(field::REQUEST_ID, i64::from(id));
    }
    writer
        .append(field::CLIENT_ID, request.client_id.as_bytes())
        .append(field::SERVICE_ID, service_id.as_bytes());

    if let Some((code, text)) = fault {
        writer
            .append_int(field::FAULT_CODE, i64::from(code))
            .append(field::FAULT_TEXT, text.as_bytes());
    }

    writer.append(field::RESPONSE_DATA, payload);
    writer.append_end(field::END);

    writer.into_bytes()
}
