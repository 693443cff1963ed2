use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::codec::IntCodec;
use crate::error::ProbeError;
use crate::probe::Connection;

/// How many values `doubler --self-check` sends when no count is given.
pub const SELF_CHECK_VALUES: u64 = 100_000;

/// The response the peer sends for each request.
pub fn respond(request: u64) -> u64 {
    request.wrapping_mul(2)
}

/// Accepts clients on `listener` until `shutdown` resolves, answering every
/// request on each connection with [`respond`].
pub async fn serve<F>(listener: TcpListener, max_clients: usize, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    // To limit the number of clients served at once we use a Semaphore. Each
    // accepted client borrows a permit and hands it back when its connection
    // is done.
    let semaphore = Arc::new(Semaphore::new(max_clients));
    // The shutdown future is polled from both selects below, so we pin it once
    // here and keep borrowing it.
    tokio::pin!(shutdown);

    tracing::debug!("Accepting connections at {}", listener.local_addr()?);
    loop {
        // First off, we wait for a permit. While every permit is taken we would
        // otherwise sit here forever, so we race it against the shutdown signal
        // too.
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = semaphore.clone().acquire_owned() => permit?,
        };

        // With a permit in hand, we wait for either the shutdown signal or a new
        // client connection.
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, closing TcpListener");
                break;
            },
            res = listener.accept() => {
                let (stream, addr) = res.context("Error accepting client")?;
                tracing::info!(
                    "Client accepted [addr={}, remaining_permits={}]",
                    addr,
                    semaphore.available_permits()
                );
                // We move the permit to the task so it is dropped once the
                // client is gone. A failing client only ends its own task; the
                // listener keeps accepting.
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream).await {
                        tracing::warn!("Client {} dropped: {:#}", addr, err);
                    }
                    drop(permit);
                });
            }
        }
    }
    Ok(())
}

// Reads requests off the stream one frame at a time and answers each before
// reading the next, so responses go out in request order.
async fn handle_client(stream: TcpStream) -> anyhow::Result<()> {
    let mut frames = Framed::new(stream, IntCodec);
    let mut served = 0u64;
    while let Some(request) = frames.next().await {
        let request = request.context("Error reading request")?;
        frames
            .send(respond(request))
            .await
            .context("Error writing response")?;
        served += 1;
    }
    tracing::info!("Client finished [served={}]", served);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: u64,
    // Bytes received for the last value when the peer closed mid-response.
    pub short_read: Option<usize>,
}

/// Sends `0..count` to the peer at `addr` on one connection and verifies that
/// every response is [`respond`] of its request. A wrong answer is an error.
/// When the peer closes before a full response arrives, we write
/// `Only read N bytes` to `out` and stop there, since nothing more can be read
/// from that connection.
pub async fn check<A, W>(addr: A, count: u64, out: &mut W) -> anyhow::Result<CheckReport>
where
    A: ToSocketAddrs,
    W: Write,
{
    let mut conn = Connection::connect(addr)
        .await
        .context("Error connecting to the peer")?;
    let mut checked = 0;
    for value in 0..count {
        let response = match conn.exchange(value).await {
            Ok(response) => response,
            Err(ProbeError::ShortRead { got }) => {
                tracing::warn!("Short read at value {} [got={}]", value, got);
                writeln!(out, "Only read {} bytes", got)?;
                return Ok(CheckReport {
                    checked,
                    short_read: Some(got),
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to exchange value {}", value))
            }
        };
        let expected = respond(value);
        if response != expected {
            return Err(anyhow!(
                "Peer answered {} with {}, expected {}",
                value,
                response,
                expected
            ));
        }
        checked += 1;
    }
    tracing::info!("Self-check done [checked={}]", checked);
    writeln!(out, "Checked {} values", checked)?;
    Ok(CheckReport {
        checked,
        short_read: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_peer(max_clients: usize) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, max_clients, std::future::pending()));
        addr
    }

    async fn request(stream: &mut TcpStream, value: u64) -> u64 {
        stream.write_all(&codec::encode(value)).await.unwrap();
        let mut buf = [0u8; codec::WIRE_VALUE_LEN];
        stream.read_exact(&mut buf).await.unwrap();
        codec::decode(&buf).unwrap()
    }

    #[test]
    fn responds_with_doubled_value() {
        assert_eq!(respond(0), 0);
        assert_eq!(respond(1000), 2000);
        assert_eq!(respond(1001), 2002);
        assert_eq!(respond(2000), 4000);
        assert_eq!(respond(u64::MAX), u64::MAX - 1);
    }

    #[tokio::test]
    async fn answers_each_request_in_order() {
        let addr = start_peer(2).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for value in 0..=1001 {
            assert_eq!(request(&mut stream, value).await, value * 2);
        }
    }

    #[tokio::test]
    async fn serves_interleaved_clients_independently() {
        let addr = start_peer(4).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        for value in 0..100 {
            assert_eq!(request(&mut first, value).await, value * 2);
            assert_eq!(request(&mut second, value + 1000).await, (value + 1000) * 2);
        }
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let addr = start_peer(1).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut batch = Vec::new();
        for value in 1..=3u64 {
            batch.extend_from_slice(&codec::encode(value));
        }
        stream.write_all(&batch).await.unwrap();

        let mut buf = [0u8; 24];
        stream.read_exact(&mut buf).await.unwrap();
        let responses: Vec<u64> = buf
            .chunks(codec::WIRE_VALUE_LEN)
            .map(|chunk| codec::decode(chunk).unwrap())
            .collect();
        assert_eq!(responses, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, 1, async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn check_passes_against_doubler() {
        let addr = start_peer(1).await;
        let mut out = Vec::new();
        let report = check(addr, 5_000, &mut out).await.unwrap();
        assert_eq!(
            report,
            CheckReport {
                checked: 5_000,
                short_read: None
            }
        );
        assert_eq!(String::from_utf8(out).unwrap(), "Checked 5000 values\n");
    }

    #[tokio::test]
    async fn check_fails_on_wrong_answers() {
        // Echoes requests back instead of doubling them.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; codec::WIRE_VALUE_LEN];
            while stream.read_exact(&mut buf).await.is_ok() {
                if stream.write_all(&buf).await.is_err() {
                    break;
                }
            }
        });

        let mut out = Vec::new();
        let err = check(addr, 10, &mut out).await.unwrap_err();
        // 0 doubled is still 0, so the first mismatch is at 1.
        assert_eq!(err.to_string(), "Peer answered 1 with 1, expected 2");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn check_reports_short_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; codec::WIRE_VALUE_LEN];
            for value in 0..3u64 {
                stream.read_exact(&mut buf).await.unwrap();
                stream.write_all(&codec::encode(value * 2)).await.unwrap();
            }
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&[0, 0, 0, 0, 0]).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let mut out = Vec::new();
        let report = check(addr, 100, &mut out).await.unwrap();
        assert_eq!(
            report,
            CheckReport {
                checked: 3,
                short_read: Some(5)
            }
        );
        assert_eq!(String::from_utf8(out).unwrap(), "Only read 5 bytes\n");
    }
}
