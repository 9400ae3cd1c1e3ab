//! Sensor readings and the line-oriented feed the daemon reads them from.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};

/// One reading of the cumulative hardware step counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    pub timestamp: DateTime<Utc>,
    pub raw_value: f64,
}

impl SensorEvent {
    pub fn new(timestamp: DateTime<Utc>, raw_value: f64) -> Self {
        Self {
            timestamp,
            raw_value,
        }
    }

    pub fn now(raw_value: f64) -> Self {
        Self::new(Utc::now(), raw_value)
    }

    /// Calendar day the steps are credited to, in the process's timezone.
    pub fn local_date(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Local).date_naive()
    }
}

pub(crate) enum StepCommand {
    Reading(SensorEvent),
    /// Acknowledged once every earlier command has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Cloneable intake for sensor callbacks. `submit` never blocks.
#[derive(Clone)]
pub struct SensorSink {
    tx: mpsc::UnboundedSender<StepCommand>,
}

impl SensorSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StepCommand>) -> Self {
        Self { tx }
    }

    pub fn submit(&self, event: SensorEvent) -> Result<()> {
        self.tx
            .send(StepCommand::Reading(event))
            .map_err(|_| anyhow!("step loop is no longer running"))
    }

    pub(crate) fn barrier(&self) -> Result<oneshot::Receiver<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(StepCommand::Barrier(done_tx))
            .map_err(|_| anyhow!("step loop is no longer running"))?;
        Ok(done_rx)
    }
}

/// Parses `<raw>` or `<rfc3339 timestamp> <raw>`. Blank lines and `#`
/// comments yield `None`.
pub fn parse_reading(line: &str) -> Result<Option<SensorEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let (timestamp, raw) = match (fields.next(), fields.next(), fields.next()) {
        (Some(raw), None, None) => (Utc::now(), raw),
        (Some(ts), Some(raw), None) => {
            let timestamp = DateTime::parse_from_rfc3339(ts)
                .with_context(|| format!("invalid timestamp '{ts}'"))?
                .with_timezone(&Utc);
            (timestamp, raw)
        }
        _ => return Err(anyhow!("expected '<raw>' or '<timestamp> <raw>', got '{line}'")),
    };

    let raw_value: f64 = raw
        .parse()
        .with_context(|| format!("invalid counter value '{raw}'"))?;
    Ok(Some(SensorEvent::new(timestamp, raw_value)))
}

/// Forwards every parsable line of `reader` to `sink` until EOF. Returns the
/// number of readings submitted.
pub async fn pump_lines<R>(reader: R, sink: &SensorSink) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut submitted = 0;

    while let Some(line) = lines.next_line().await.context("failed to read sensor feed")? {
        match parse_reading(&line) {
            Ok(Some(event)) => {
                sink.submit(event)?;
                submitted += 1;
            }
            Ok(None) => {}
            Err(err) => warn!("skipping sensor line: {err:#}"),
        }
    }

    Ok(submitted)
}
