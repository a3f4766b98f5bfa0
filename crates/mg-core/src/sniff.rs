//! Protocol sniffing over peeked bytes.
//!
//! Pure classification helpers; all I/O stays with the caller so that every
//! sniffer shares the connection's single peek buffer.

/// TLS handshake record content type.
pub const TLS_HANDSHAKE_BYTE: u8 = 0x16;

/// Length of the TLS record header.
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// HTTP/1.x request prefixes the HTTP runtime claims. HTTP/2 prior
/// knowledge (`PRI * HTTP/2.0`) is deliberately not in the set.
const HTTP_PREFIXES: [&[u8; 5]; 9] = [
    b"GET /", b"HEAD ", b"POST ", b"PUT /", b"DELET", b"CONNE", b"OPTIO", b"TRACE", b"PATCH",
];

/// True when the first byte announces a TLS handshake record.
pub fn is_tls_client_hello(first: u8) -> bool {
    first == TLS_HANDSHAKE_BYTE
}

/// True when a five-byte prefix matches one of the HTTP/1.x verbs.
pub fn looks_like_http(prefix: &[u8]) -> bool {
    if prefix.len() < 5 {
        return false;
    }
    HTTP_PREFIXES.iter().any(|p| &prefix[..5] == *p)
}

/// Total record length (header included) announced by a TLS record header.
pub fn tls_record_len(header: &[u8]) -> Option<usize> {
    if header.len() < TLS_RECORD_HEADER_LEN || header[0] != TLS_HANDSHAKE_BYTE {
        return None;
    }
    let payload = u16::from_be_bytes([header[3], header[4]]) as usize;
    Some(TLS_RECORD_HEADER_LEN + payload)
}
