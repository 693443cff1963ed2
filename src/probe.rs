use std::io::Write;
use std::ops::RangeInclusive;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{self, WIRE_VALUE_LEN};
use crate::error::ProbeError;

/// One contiguous run of request/response exchanges over a fixed range.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: &'static str,
    pub values: RangeInclusive<u64>,
}

impl Phase {
    pub const fn new(name: &'static str, values: RangeInclusive<u64>) -> Self {
        Self { name, values }
    }

    // A range covering every u64 has one more value than a u64 can count, so
    // we saturate at u64::MAX instead of overflowing.
    pub fn len(&self) -> u64 {
        if self.values.is_empty() {
            0
        } else {
            (self.values.end() - self.values.start()).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// 1001 values go through fine.
pub const PHASE_A: Phase = Phase::new("A", 0..=1000);
// One more value on the same connection is where the peer was seen to fail.
pub const PHASE_B: Phase = Phase::new("B", 0..=1001);
// Fresh connection, 1001 values again.
pub const PHASE_C: Phase = Phase::new("C", 1000..=2000);

/// Exclusive owner of a single TCP connection to the peer. The socket is
/// closed when the value is dropped.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ProbeError> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(
            "Connected [local={:?}, peer={:?}]",
            stream.local_addr().ok(),
            stream.peer_addr().ok()
        );
        Ok(Self { stream })
    }

    /// Sends one wire value and blocks until exactly one response has been
    /// read back.
    pub async fn exchange(&mut self, value: u64) -> Result<u64, ProbeError> {
        self.stream.write_all(&codec::encode(value)).await?;

        // The response may arrive in pieces, so we keep reading until we have
        // the whole frame. If the peer closes first, we hand the partial bytes
        // to decode, which flags and rejects them.
        let mut buf = [0u8; WIRE_VALUE_LEN];
        let mut filled = 0;
        while filled < WIRE_VALUE_LEN {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        codec::decode(&buf[..filled])
    }

    /// Runs every value of the phase in order and returns the last response,
    /// or `None` when the phase has no values.
    pub async fn run_phase(&mut self, phase: &Phase) -> Result<Option<u64>, ProbeError> {
        tracing::debug!("Starting phase {} [values={}]", phase.name, phase.len());
        let mut last = None;
        for value in phase.values.clone() {
            let response = self.exchange(value).await.map_err(|err| {
                tracing::debug!("Phase {} failed at value {}: {}", phase.name, value, err);
                err
            })?;
            last = Some(response);
        }
        tracing::debug!("Phase {} finished [last={:?}]", phase.name, last);
        Ok(last)
    }
}

#[derive(Debug)]
pub struct ProbeReport {
    pub phase_a: u64,
    pub phase_b: Result<u64, ProbeError>,
    pub phase_c: u64,
}

// What gets printed for phase B: the last response, or the failure.
pub fn phase_b_line(outcome: &Result<u64, ProbeError>) -> String {
    match outcome {
        Ok(value) => value.to_string(),
        Err(err) => format!("Failed to send {} values due to {}", PHASE_B.len(), err),
    }
}

async fn required_phase(conn: &mut Connection, phase: &Phase) -> anyhow::Result<u64> {
    conn.run_phase(phase)
        .await
        .with_context(|| format!("Phase {} failed", phase.name))?
        .with_context(|| format!("Phase {} sent no values", phase.name))
}

/// Runs the three probe phases against `addr`, writing one line to `out` as
/// each phase finishes. Failures in phases A and C abort the probe; a failure
/// in phase B is recorded in the report and the probe moves on to phase C on
/// a new connection.
pub async fn run<A, W>(addr: A, out: &mut W) -> anyhow::Result<ProbeReport>
where
    A: ToSocketAddrs + Clone,
    W: Write,
{
    // Phases A and B share the first connection, which lives only inside this
    // block. Whether phase B finished or failed, we leave the block with plain
    // values, so the socket is closed here and never overlaps with the phase C
    // connection.
    let (phase_a, phase_b) = {
        let mut conn = Connection::connect(addr.clone())
            .await
            .context("Error connecting for phase A")?;
        let phase_a = required_phase(&mut conn, &PHASE_A).await?;
        tracing::info!("Phase {} done [last={}]", PHASE_A.name, phase_a);
        writeln!(out, "{}", phase_a)?;

        // Phase B is the one expected to break, so we keep its error in the
        // report instead of returning it, and carry on to phase C.
        let phase_b = match conn.run_phase(&PHASE_B).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ProbeError::ShortRead { got: 0 }),
            Err(err) => Err(err),
        };
        match &phase_b {
            Ok(value) => tracing::info!("Phase {} done [last={}]", PHASE_B.name, value),
            Err(err) => tracing::warn!("Phase {} failed: {}", PHASE_B.name, err),
        }
        writeln!(out, "{}", phase_b_line(&phase_b))?;
        (phase_a, phase_b)
    };

    // From here on any failure aborts the probe. Lines for A and B have already
    // been written, so the caller still sees how far we got.
    let mut conn = Connection::connect(addr)
        .await
        .context("Error connecting for phase C")?;
    let phase_c = required_phase(&mut conn, &PHASE_C).await?;
    tracing::info!("Phase {} done [last={}]", PHASE_C.name, phase_c);
    writeln!(out, "{}", phase_c)?;

    Ok(ProbeReport {
        phase_a,
        phase_b,
        phase_c,
    })
}
