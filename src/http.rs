//! `warp` route composition and the HTTP listener bootstrap. Grounded on the
//! route shape of this codebase's own admin/liveness endpoints
//! (`api/src/node.rs`: `get().and(accept_text())...and_then(handle)`, a
//! `Cache-Control: no-cache` header on responses that must never be cached)
//! and on `api/src/hyper_serve.rs` for the bind step - simplified here to
//! `warp::serve(..).bind(..)` since this server has a single listener and
//! none of the dual-stack socket tuning `hyper_serve.rs` exists for.

use crate::{
    dispatcher::{Command, DispatcherHandle},
    error::ServerError,
    ids::{generate_label, IdAllocator},
    protocol::ParticipantSnapshot,
    transport,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::oneshot;
use warp::{http::header, reply::Reply, Filter};

fn with_dispatcher(
    dispatcher: DispatcherHandle,
) -> impl Filter<Extract = (DispatcherHandle,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || dispatcher.clone())
}

fn with_allocator(
    allocator: Arc<IdAllocator>,
) -> impl Filter<Extract = (Arc<IdAllocator>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || allocator.clone())
}

/// `GET /` - a short liveness string for load balancers / uptime checks.
fn liveness_route() -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::path::end().and(warp::get()).map(|| {
        warp::reply::with_header(
            "broadcast-tree signaling server is up",
            header::CACHE_CONTROL,
            "no-cache",
        )
    })
}

/// `GET /admin/rooms` - a read-only, internally-consistent snapshot of every
/// participant, obtained by round-tripping through the dispatcher's command
/// channel so it can never observe a torn write (SPEC_FULL.md SS4.7).
fn admin_rooms_route(
    dispatcher: DispatcherHandle,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::path!("admin" / "rooms")
        .and(warp::get())
        .and(with_dispatcher(dispatcher))
        .and_then(handle_admin_rooms)
}

async fn handle_admin_rooms(dispatcher: DispatcherHandle) -> Result<impl Reply, warp::Rejection> {
    let (reply, recv) = oneshot::channel();
    if dispatcher.send(Command::Snapshot { reply }).await.is_err() {
        return Ok(warp::reply::json(&Vec::<ParticipantSnapshot>::new()));
    }
    let snapshot = recv.await.unwrap_or_default();
    Ok(warp::reply::json(&snapshot))
}

/// `GET /ws` - upgrades to the per-participant WebSocket, allocates
/// `(id, label)`, and hands the connection off to `transport::handle_connection`.
fn ws_route(
    dispatcher: DispatcherHandle,
    allocator: Arc<IdAllocator>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_dispatcher(dispatcher))
        .and(with_allocator(allocator))
        .map(|ws: warp::ws::Ws, dispatcher: DispatcherHandle, allocator: Arc<IdAllocator>| {
            ws.on_upgrade(move |socket| async move {
                let id = allocator.next();
                let label = generate_label();
                transport::handle_connection(socket, id, label, dispatcher).await;
            })
        })
}

pub fn routes(
    dispatcher: DispatcherHandle,
    allocator: Arc<IdAllocator>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    liveness_route()
        .or(admin_rooms_route(dispatcher.clone()))
        .or(ws_route(dispatcher, allocator))
}

/// Binds the given routes to `addr` and returns the bound address alongside
/// the server future - mirrors `hyper_serve::serve_it`'s split of "bind now,
/// report what you got" from "drive the future later" so callers (`main`,
/// tests) can log/assert on the real port before awaiting the server.
///
/// Simplified relative to `hyper_serve.rs`: that module builds its own
/// `socket2` listener (`SO_REUSEADDR`, dual-stack tuning) and a manual
/// `hyper::Server`. This single-listener signaling server has no multi-stack
/// requirement, so it leans on `warp::serve` directly; a plain
/// `std::net::TcpListener::bind` first gives a real `io::Error` to report
/// through `ServerError::Bind` instead of `warp::serve(..).bind(..)`'s panic
/// on an unavailable port.
pub fn bind(
    routes: impl Filter<Extract = (impl Reply + 'static,), Error = warp::Rejection> + Clone + Send + Sync + 'static,
    addr: SocketAddr,
) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), ServerError> {
    let probe = std::net::TcpListener::bind(addr).map_err(|source| ServerError::Bind { port: addr.port(), source })?;
    let bound = probe
        .local_addr()
        .map_err(|source| ServerError::Bind { port: addr.port(), source })?;
    drop(probe);
    let (_, fut) = warp::serve(routes).bind_ephemeral(bound);
    Ok((bound, fut))
}
