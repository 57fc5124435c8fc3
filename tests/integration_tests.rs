//! End-to-end tests over real WebSocket connections: a server bound to an
//! ephemeral port and raw client transports speaking the wire protocol.

use futures_util::{SinkExt, StreamExt};
use server::network::{Server, ServerConfig};
use shared::protocol::{
    encode_client_message, parse_server_message, ClientMessage, ServerMessage,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Instant phase timers and a fast tick so matches resolve in well under a
/// second of wall time.
fn fast_config(max_players: usize) -> ServerConfig {
    ServerConfig {
        tick_rate: 50,
        max_players,
        countdown_secs: 0,
        lobby_return_secs: 0,
    }
}

async fn start_server(config: ServerConfig) -> SocketAddr {
    let mut server = Server::bind("127.0.0.1:0", config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    let text = encode_client_message(msg).unwrap();
    ws.send(Message::Text(text)).await.unwrap();
}

async fn join(ws: &mut Ws, id: &str, nickname: &str) {
    send(
        ws,
        &ClientMessage::Join {
            id: id.to_string(),
            nickname: nickname.to_string(),
        },
    )
    .await;
}

async fn ready(ws: &mut Ws, id: &str) {
    send(
        ws,
        &ClientMessage::Ready {
            id: id.to_string(),
            is_ready: true,
        },
    )
    .await;
}

/// Reads frames until one matches the predicate, skipping everything else.
async fn recv_until<F>(ws: &mut Ws, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    timeout(RECV_TIMEOUT, async {
        loop {
            let frame = ws
                .next()
                .await
                .expect("connection closed while waiting")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                let msg = parse_server_message(&text).expect("unparseable server frame");
                if pred(&msg) {
                    return msg;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for a matching message")
}

#[tokio::test]
async fn test_join_broadcasts_lobby_roster() {
    let addr = start_server(fast_config(8)).await;

    let mut c1 = connect(addr).await;
    join(&mut c1, "p1", "Alice").await;
    let msg = recv_until(&mut c1, |m| matches!(m, ServerMessage::LobbyUpdate { .. })).await;
    let ServerMessage::LobbyUpdate { players } = msg else {
        unreachable!()
    };
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].nickname, "Alice");
    assert!(!players[0].is_ready);

    // The second join is visible to the first client too.
    let mut c2 = connect(addr).await;
    join(&mut c2, "p2", "Bob").await;
    let msg = recv_until(&mut c1, |m| {
        matches!(m, ServerMessage::LobbyUpdate { players } if players.len() == 2)
    })
    .await;
    let ServerMessage::LobbyUpdate { players } = msg else {
        unreachable!()
    };
    assert!(players.iter().any(|p| p.nickname == "Bob"));
}

#[tokio::test]
async fn test_full_match_flow() {
    let addr = start_server(fast_config(8)).await;

    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;
    join(&mut c1, "p1", "Alice").await;
    join(&mut c2, "p2", "Bob").await;

    ready(&mut c1, "p1").await;
    ready(&mut c2, "p2").await;

    // Both readiness flips in: the match announcement reaches everyone.
    let msg = recv_until(&mut c2, |m| matches!(m, ServerMessage::StartMatch { .. })).await;
    let ServerMessage::StartMatch { players, .. } = msg else {
        unreachable!()
    };
    assert_eq!(players.len(), 2);
    assert!(players.iter().all(|p| !p.is_dead && p.score == 0));

    // Snapshots start flowing with a monotonically increasing tick.
    let msg = recv_until(&mut c1, |m| {
        matches!(m, ServerMessage::GameStateUpdate { .. })
    })
    .await;
    let ServerMessage::GameStateUpdate { tick: first, .. } = msg else {
        unreachable!()
    };
    let msg = recv_until(&mut c1, |m| {
        matches!(m, ServerMessage::GameStateUpdate { tick, .. } if *tick > first)
    })
    .await;
    let ServerMessage::GameStateUpdate { players, .. } = msg else {
        unreachable!()
    };
    assert_eq!(players.len(), 2);

    // Nobody flaps, so both birds fall out of bounds on the same tick and
    // the match ends without a winner.
    recv_until(&mut c1, |m| {
        matches!(m, ServerMessage::PlayerDied { id, .. } if id == "p2")
    })
    .await;
    let msg = recv_until(&mut c1, |m| matches!(m, ServerMessage::MatchOver { .. })).await;
    let ServerMessage::MatchOver {
        winner_nickname, ..
    } = msg
    else {
        unreachable!()
    };
    assert_eq!(winner_nickname, "No one");

    // Lobby return clears readiness for the next round.
    let msg = recv_until(&mut c2, |m| {
        matches!(m, ServerMessage::LobbyUpdate { players } if players.iter().all(|p| !p.is_ready))
    })
    .await;
    let ServerMessage::LobbyUpdate { players } = msg else {
        unreachable!()
    };
    assert_eq!(players.len(), 2);
    assert!(players.iter().all(|p| !p.is_dead && p.score == 0));
}

#[tokio::test]
async fn test_room_full_gets_error_then_close() {
    let addr = start_server(fast_config(1)).await;

    let mut c1 = connect(addr).await;
    join(&mut c1, "p1", "Alice").await;
    recv_until(&mut c1, |m| matches!(m, ServerMessage::LobbyUpdate { .. })).await;

    let mut c2 = connect(addr).await;
    join(&mut c2, "p2", "Bob").await;

    let msg = recv_until(&mut c2, |m| matches!(m, ServerMessage::Error { .. })).await;
    let ServerMessage::Error { message } = msg else {
        unreachable!()
    };
    assert_eq!(message, "Room full.");

    // The transport is closed after the error.
    let end = timeout(RECV_TIMEOUT, async {
        loop {
            match c2.next().await {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "rejected transport was never closed");
}

#[tokio::test]
async fn test_rejoin_takes_over_session() {
    let addr = start_server(fast_config(4)).await;

    let mut c1 = connect(addr).await;
    join(&mut c1, "p1", "Alice").await;
    recv_until(&mut c1, |m| matches!(m, ServerMessage::LobbyUpdate { .. })).await;

    // Same identity from a new transport: latest connection wins.
    let mut c2 = connect(addr).await;
    join(&mut c2, "p1", "Alice").await;
    let msg = recv_until(&mut c2, |m| matches!(m, ServerMessage::LobbyUpdate { .. })).await;
    let ServerMessage::LobbyUpdate { players } = msg else {
        unreachable!()
    };
    assert_eq!(players.len(), 1, "rejoin must not duplicate the player");

    // The replaced transport gets closed by the server.
    let end = timeout(RECV_TIMEOUT, async {
        loop {
            match c1.next().await {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "old transport was never closed");
}
