//! Minecraft Java-Edition handshake sniffing.
//!
//! A representative layer-7 sniffer: decodes the initial handshake frame
//! (and, for login attempts, the LoginStart packet that follows) from the
//! connection's peek buffer so that TCP rules can route on the requested
//! host or player name before a single byte is forwarded.
//!
//! Frame layout:
//!
//! ```text
//! VarInt packetLen | VarInt packetId(=0x00) | VarInt protoVersion
//! | VarInt hostLen | bytes host | u16 port (big-endian)
//! | VarInt nextState (1=status, 2=login)
//! ```

use async_trait::async_trait;

use crate::error::Error;
use crate::rule::TcpRuleMatch;
use crate::tcp::TcpContext;

/// VarInts are at most five bytes on the wire.
pub const MAX_VARINT_LEN: usize = 5;

/// Defensive cap on the framed handshake length.
const MAX_FRAME_LEN: usize = 8192;

/// Upper bound on a LoginStart username length. The protocol caps names at
/// 16 characters; anything larger is a malformed or hostile frame.
const MAX_USERNAME_LEN: usize = 256;

/// Enough bytes past the handshake to decode the LoginStart length, packet
/// id and username length (three VarInts).
const LOGIN_PREFIX_LEN: usize = 3 * MAX_VARINT_LEN;

/// Decoded handshake fields. Short streams leave later fields at their
/// defaults; `is_login_start` is only set once a LoginStart packet id has
/// been seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub requested_host: String,
    pub requested_port: u16,
    pub protocol_version: i32,
    pub next_state: i32,
    pub username: String,
    pub is_login_start: bool,
}

/// Decode a little-endian base-128 VarInt. Returns the value and the number
/// of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(i32, usize), Error> {
    if data.is_empty() {
        return Err(Error::bad_wire("empty VarInt"));
    }
    let mut value: u32 = 0;
    for (i, b) in data.iter().enumerate() {
        value |= u32::from(b & 0x7f) << (7 * i as u32);
        if b & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
        if i + 1 >= MAX_VARINT_LEN {
            return Err(Error::bad_wire("VarInt too large"));
        }
    }
    Err(Error::bad_wire("incomplete VarInt"))
}

/// Encode a value as a VarInt.
pub fn encode_varint(value: i32) -> Vec<u8> {
    let mut v = value as u32;
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Peek and decode the handshake (and LoginStart, for login attempts) from
/// the context.
///
/// Peeks never consume: the original bytes are still forwarded verbatim by
/// whatever service wins the route. If the stream has not yet delivered
/// enough bytes, the partial struct decoded so far is returned with `Ok`;
/// the caller's rule will simply not match and the route falls through.
pub async fn sniff_handshake(ctx: &TcpContext) -> Result<HandshakeInfo, Error> {
    let mut info = HandshakeInfo::default();

    let data = ctx.peek(MAX_VARINT_LEN).await.map_err(Error::Peek)?;
    if data.len() < MAX_VARINT_LEN {
        return Ok(info);
    }
    let (payload_len, prefix_len) = decode_varint(&data)
        .map_err(|_| Error::bad_wire("malformed handshake length prefix"))?;
    let payload_len =
        usize::try_from(payload_len).map_err(|_| Error::bad_wire("negative handshake length"))?;

    let total = prefix_len + payload_len;
    if total > MAX_FRAME_LEN {
        return Err(Error::bad_wire("handshake size exceeds safety limit"));
    }

    let data = ctx.peek(total).await.map_err(Error::Peek)?;
    if data.len() < total {
        return Ok(info);
    }

    let mut offset = prefix_len;

    // Packet id, expected 0x00.
    let (_, n) = decode_varint(&data[offset..])
        .map_err(|_| Error::bad_wire("malformed handshake packet id"))?;
    offset += n;

    let (version, n) =
        decode_varint(&data[offset..]).map_err(|_| Error::bad_wire("malformed protocol version"))?;
    info.protocol_version = version;
    offset += n;

    let (host_len, n) =
        decode_varint(&data[offset..]).map_err(|_| Error::bad_wire("malformed host length"))?;
    offset += n;
    let host_len =
        usize::try_from(host_len).map_err(|_| Error::bad_wire("negative host length"))?;
    let host_end = offset
        .checked_add(host_len)
        .filter(|end| end + 2 <= total)
        .ok_or_else(|| Error::bad_wire("host length out of bounds"))?;
    info.requested_host = String::from_utf8_lossy(&data[offset..host_end]).into_owned();
    offset = host_end;

    info.requested_port = u16::from_be_bytes([data[offset], data[offset + 1]]);
    offset += 2;

    let (state, _n) =
        decode_varint(&data[offset..]).map_err(|_| Error::bad_wire("malformed next state"))?;
    info.next_state = state;

    if state != 2 {
        // Not a login attempt, stop here.
        return Ok(info);
    }

    let login_offset = total;
    let extended = ctx
        .peek(login_offset + LOGIN_PREFIX_LEN)
        .await
        .map_err(Error::Peek)?;
    if extended.len() < login_offset + LOGIN_PREFIX_LEN {
        return Ok(info);
    }
    let login = &extended[login_offset..];

    let mut lo = 0;
    let Ok((_, n)) = decode_varint(&login[lo..]) else {
        return Ok(info);
    };
    lo += n;
    let Ok((packet_id, n)) = decode_varint(&login[lo..]) else {
        return Ok(info);
    };
    lo += n;
    if packet_id != 0 {
        return Ok(info);
    }
    info.is_login_start = true;

    let (user_len, n) =
        decode_varint(&login[lo..]).map_err(|_| Error::bad_wire("malformed username length"))?;
    lo += n;
    let user_len =
        usize::try_from(user_len).map_err(|_| Error::bad_wire("negative username length"))?;
    if user_len > MAX_USERNAME_LEN {
        return Err(Error::bad_wire("username length out of bounds"));
    }

    let needed = login_offset + lo + user_len;
    let full = ctx.peek(needed).await.map_err(Error::Peek)?;
    if full.len() < needed {
        return Ok(info);
    }
    let start = login_offset + lo;
    info.username = String::from_utf8_lossy(&full[start..start + user_len]).into_owned();

    Ok(info)
}

/// Matches when the handshake's requested host is one of `hosts`.
pub(crate) struct HostMinecraft {
    pub hosts: Vec<String>,
}

#[async_trait]
impl TcpRuleMatch for HostMinecraft {
    async fn matches(&self, ctx: &TcpContext) -> bool {
        match sniff_handshake(ctx).await {
            Ok(info) => self.hosts.iter().any(|h| *h == info.requested_host),
            Err(_) => false,
        }
    }
}

/// Matches on the LoginStart player name. Permissive while no LoginStart
/// has arrived yet (status pings keep flowing to the same backend).
pub(crate) struct PlayerMinecraft {
    pub players: Vec<String>,
    pub negate: bool,
}

#[async_trait]
impl TcpRuleMatch for PlayerMinecraft {
    async fn matches(&self, ctx: &TcpContext) -> bool {
        let info = match sniff_handshake(ctx).await {
            Ok(info) => info,
            Err(_) => return false,
        };
        if !info.is_login_start {
            return true;
        }
        let listed = self.players.iter().any(|p| *p == info.username);
        if self.negate {
            !listed
        } else {
            listed
        }
    }
}

/// Build the framed handshake bytes a Java-Edition client would send.
/// Used by tests and kept here so the layout lives next to the decoder.
pub fn encode_handshake(host: &str, port: u16, next_state: i32) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&encode_varint(0x00));
    payload.extend_from_slice(&encode_varint(757));
    payload.extend_from_slice(&encode_varint(host.len() as i32));
    payload.extend_from_slice(host.as_bytes());
    payload.extend_from_slice(&port.to_be_bytes());
    payload.extend_from_slice(&encode_varint(next_state));

    let mut frame = encode_varint(payload.len() as i32);
    frame.extend_from_slice(&payload);
    frame
}

/// Build the LoginStart frame that follows a `next_state == 2` handshake.
pub fn encode_login_start(username: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&encode_varint(0x00));
    payload.extend_from_slice(&encode_varint(username.len() as i32));
    payload.extend_from_slice(username.as_bytes());

    let mut frame = encode_varint(payload.len() as i32);
    frame.extend_from_slice(&payload);
    frame
}
