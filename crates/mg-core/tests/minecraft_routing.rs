//! Minecraft handshake sniffing and routing.

mod common;

use std::time::Duration;

use mg_core::conn::{PeekableStream, SharedConn};
use mg_core::minecraft::{encode_handshake, encode_login_start, sniff_handshake};
use mg_core::rule;
use mg_core::tcp::{tcp_reverse_proxy, TcpContext, TcpHandlerCompiler, TcpRoute};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use common::{connect, free_port, spawn_server, start_entrypoint};

/// Build a dispatch context over a real socket pair, keeping the client
/// side alive so peeks do not see EOF.
async fn context_for(payload: &[u8]) -> (TcpContext, SharedConn, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let mut client = TcpStream::connect(addr).await.expect("connect");
    let (server_side, _) = listener.accept().await.expect("accept");

    client.write_all(payload).await.expect("write");
    client.flush().await.expect("flush");

    let seat = SharedConn::new(PeekableStream::new(server_side));
    let ctx = TcpContext::capture(&seat).await.expect("capture");
    (ctx, seat, client)
}

#[tokio::test]
async fn sniffs_status_handshake() {
    let frame = encode_handshake("mc.local", 25565, 1);
    let (ctx, _seat, _client) = context_for(&frame).await;

    let info = sniff_handshake(&ctx).await.expect("sniff");
    assert_eq!(info.requested_host, "mc.local");
    assert_eq!(info.requested_port, 25565);
    assert_eq!(info.next_state, 1);
    assert!(!info.is_login_start);
    assert!(info.username.is_empty());
}

#[tokio::test]
async fn sniffs_login_start_username() {
    let mut bytes = encode_handshake("mc.local", 25565, 2);
    bytes.extend_from_slice(&encode_login_start("alice"));
    let (ctx, _seat, _client) = context_for(&bytes).await;

    let info = sniff_handshake(&ctx).await.expect("sniff");
    assert_eq!(info.requested_host, "mc.local");
    assert_eq!(info.next_state, 2);
    assert!(info.is_login_start);
    assert_eq!(info.username, "alice");
}

/// A short stream (login frame not yet delivered) yields the partial struct
/// with no error, so rules fall through instead of failing.
#[tokio::test]
async fn short_login_frame_is_partial_not_error() {
    let bytes = encode_handshake("mc.local", 25565, 2);
    let (ctx, _seat, client) = context_for(&bytes).await;
    drop(client); // EOF right after the handshake

    let info = sniff_handshake(&ctx).await.expect("sniff");
    assert_eq!(info.requested_host, "mc.local");
    assert!(!info.is_login_start);
}

#[tokio::test]
async fn minecraft_rules_match_on_host_and_player() {
    let mut bytes = encode_handshake("mc.local", 25565, 2);
    bytes.extend_from_slice(&encode_login_start("alice"));
    let (ctx, _seat, _client) = context_for(&bytes).await;

    assert!(rule::host_minecraft(["mc.local"]).matches_tcp(&ctx).await);
    assert!(!rule::host_minecraft(["other.local"]).matches_tcp(&ctx).await);
    assert!(rule::player_minecraft(["alice"]).matches_tcp(&ctx).await);
    assert!(!rule::player_minecraft(["bob"]).matches_tcp(&ctx).await);
    assert!(rule::not_player_minecraft(["bob"]).matches_tcp(&ctx).await);
    assert!(!rule::not_player_minecraft(["alice"]).matches_tcp(&ctx).await);
}

/// Before LoginStart arrives the player rules are permissive.
#[tokio::test]
async fn player_rules_are_permissive_for_status_pings() {
    let bytes = encode_handshake("mc.local", 25565, 1);
    let (ctx, _seat, _client) = context_for(&bytes).await;

    assert!(rule::player_minecraft(["alice"]).matches_tcp(&ctx).await);
    assert!(rule::not_player_minecraft(["alice"]).matches_tcp(&ctx).await);
}

/// An oversized length prefix is rejected, so hostile frames cannot force
/// unbounded peeks.
#[tokio::test]
async fn oversized_frame_is_rejected() {
    let mut bytes = mg_core::minecraft::encode_varint(9000);
    bytes.extend_from_slice(&[0u8; 16]);
    let (ctx, _seat, _client) = context_for(&bytes).await;

    assert!(sniff_handshake(&ctx).await.is_err());
    assert!(!rule::host_minecraft(["mc.local"]).matches_tcp(&ctx).await);
}

/// S5: a Minecraft login routes through the TCP reverse proxy and the
/// upstream receives the handshake bytes verbatim.
#[tokio::test]
async fn minecraft_login_routes_to_upstream_verbatim() {
    // Upstream echo server: assert the forwarded bytes, then answer.
    let upstream = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let upstream_addr = upstream.local_addr().expect("addr");

    let mut expected = encode_handshake("mc.local", 25565, 2);
    expected.extend_from_slice(&encode_login_start("alice"));
    let sent = expected.clone();

    let upstream_task = tokio::spawn(async move {
        let (mut conn, _) = upstream.accept().await.expect("accept");
        let mut got = vec![0u8; expected.len()];
        conn.read_exact(&mut got).await.expect("read handshake");
        assert_eq!(got, expected, "handshake must arrive unconsumed");
        conn.write_all(b"PONG").await.expect("write");
    });

    let (server, _cancel) = spawn_server();
    let mut tcp = TcpHandlerCompiler::new();
    tcp.register_service("mc-upstream", tcp_reverse_proxy(upstream_addr.to_string()));
    tcp.register_router("mc").register_route(
        "local",
        TcpRoute::new(rule::host_minecraft(["mc.local"]), "mc-upstream"),
    );
    server.register_tcp_handler("minecraft", tcp.compile(["mc"]));

    let port = free_port().await;
    start_entrypoint(&server, "minecraft", port).await;

    let mut client = connect(port).await;
    client.write_all(&sent).await.expect("send handshake");

    let mut pong = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut pong))
        .await
        .expect("upstream answer in time")
        .expect("read");
    assert_eq!(&pong, b"PONG");

    upstream_task.await.expect("upstream assertions");
}
