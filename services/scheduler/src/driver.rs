//! JSON-lines front end: one request per input line, one result per output
//! line, in completion order.

use std::time::Duration;

use anyhow::{Context, Result};
use fnsched_model::{ScheduleRequest, StatusCode};
use fnsched_schedule_decision::{cancel_pair, CancelHandle, GroupScheduleResult, ScheduleResult, DEFAULT_GROUP_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::queue_actor::{GroupSpec, SchedulerHandle};

/// Reason given to requests that outlive their schedule timeout.
pub const TIMEOUT_REASON: &str = "schedule timeout";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DriverInput {
    Group(GroupSpec),
    Instance(Box<ScheduleRequest>),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DriverResult {
    Instance(ScheduleResult),
    Group(GroupScheduleResult),
}

#[derive(Debug, Serialize)]
pub struct OutputLine {
    pub request_id: String,
    #[serde(flatten)]
    pub result: DriverResult,
}

/// Wait for `rx`, cancelling through `cancel` once `timeout_ms` passes.
async fn await_with_deadline<T>(mut rx: oneshot::Receiver<T>, cancel: CancelHandle, timeout_ms: i64) -> Option<T> {
    if let Ok(timeout) = u64::try_from(timeout_ms) {
        if timeout > 0 {
            tokio::select! {
                result = &mut rx => return result.ok(),
                _ = tokio::time::sleep(Duration::from_millis(timeout)) => cancel.cancel(TIMEOUT_REASON),
            }
        }
    }
    let result = rx.await.ok();
    drop(cancel);
    result
}

async fn submit(handle: &SchedulerHandle, input: DriverInput, in_flight: &mut JoinSet<Option<OutputLine>>) -> Result<()> {
    let (cancel, tag) = cancel_pair();
    match input {
        DriverInput::Instance(request) => {
            let request_id = request.request_id.clone();
            let timeout_ms = request.instance.schedule_option.schedule_timeout_ms;
            debug!(request_id = %request_id, "Submitting request");
            let rx = handle.schedule(*request, tag).await?;
            in_flight.spawn(async move {
                let result = await_with_deadline(rx, cancel, timeout_ms).await?;
                Some(OutputLine {
                    request_id,
                    result: DriverResult::Instance(result),
                })
            });
        }
        DriverInput::Group(spec) => {
            let request_id = spec.group_id.clone();
            let timeout_ms = spec.timeout_ms.unwrap_or(DEFAULT_GROUP_TIMEOUT_MS);
            debug!(group_id = %request_id, members = spec.requests.len(), "Submitting group");
            let rx = handle.schedule_group(spec, tag).await?;
            in_flight.spawn(async move {
                let result = await_with_deadline(rx, cancel, timeout_ms).await?;
                Some(OutputLine {
                    request_id,
                    result: DriverResult::Group(result),
                })
            });
        }
    }
    Ok(())
}

fn invalid_line(error: &serde_json::Error) -> OutputLine {
    OutputLine {
        request_id: String::new(),
        result: DriverResult::Instance(ScheduleResult::failure(
            StatusCode::ErrParamInvalid,
            format!("invalid request: {error}"),
        )),
    }
}

/// Feed every line of `input` to the scheduler and write results to
/// `output` until input ends and every request is answered, or `shutdown`
/// fires. Returns the number of requests submitted.
pub async fn run_driver<R, W>(
    handle: SchedulerHandle,
    input: R,
    output: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = line_rx.recv().await {
            let mut encoded = serde_json::to_vec(&line).context("failed to encode result")?;
            encoded.push(b'\n');
            output.write_all(&encoded).await.context("failed to write result")?;
            output.flush().await.context("failed to flush results")?;
        }
        anyhow::Ok(())
    });

    let mut lines = input.lines();
    let mut in_flight = JoinSet::new();
    let mut submitted = 0usize;
    let mut input_open = true;

    loop {
        if !input_open && in_flight.is_empty() {
            break;
        }
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(in_flight = in_flight.len(), "Driver received shutdown signal");
                    break;
                }
            }

            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                match done {
                    Ok(Some(line)) => {
                        if line_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => warn!("Request dropped without a result"),
                    Err(e) => warn!(error = %e, "Request task failed"),
                }
            }

            line = lines.next_line(), if input_open => {
                let Some(line) = line.context("failed to read input")? else {
                    debug!(submitted, "Input exhausted");
                    input_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DriverInput>(&line) {
                    Ok(input) => {
                        submit(&handle, input, &mut in_flight).await?;
                        submitted += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping invalid input line");
                        let _ = line_tx.send(invalid_line(&e)).await;
                    }
                }
            }
        }
    }

    in_flight.abort_all();
    drop(line_tx);
    writer.await.context("result writer panicked")??;
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnsched_schedule_decision::{cancel_pair, GroupPolicy};

    #[test]
    fn test_input_shapes() {
        let group = r#"{"group_id":"g1","requests":[{"request_id":"m1"}],"policy":"strict_pack"}"#;
        match serde_json::from_str::<DriverInput>(group).unwrap() {
            DriverInput::Group(spec) => {
                assert_eq!(spec.group_id, "g1");
                assert_eq!(spec.policy, GroupPolicy::StrictPack);
                assert_eq!(spec.requests[0].request_id, "m1");
            }
            DriverInput::Instance(_) => panic!("expected a group"),
        }

        let instance = r#"{"request_id":"req-1","trace_id":"t1"}"#;
        match serde_json::from_str::<DriverInput>(instance).unwrap() {
            DriverInput::Instance(request) => assert_eq!(request.request_id, "req-1"),
            DriverInput::Group(_) => panic!("expected an instance"),
        }
    }

    #[test]
    fn test_output_line_is_flat() {
        let line = OutputLine {
            request_id: "req-1".into(),
            result: DriverResult::Instance(ScheduleResult::failure(StatusCode::ResourceNotEnough, "full")),
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["reason"], "full");
    }

    #[tokio::test]
    async fn test_deadline_cancels_waiting_request() {
        let (tx, rx) = oneshot::channel::<u32>();
        let (cancel, tag) = cancel_pair();
        let waiter = tokio::spawn(await_with_deadline(rx, cancel, 10));
        assert_eq!(tag.cancelled().await.as_deref(), Some(TIMEOUT_REASON));
        tx.send(7).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_no_deadline_without_timeout() {
        let (tx, rx) = oneshot::channel::<u32>();
        let (cancel, tag) = cancel_pair();
        tx.send(1).unwrap();
        assert_eq!(await_with_deadline(rx, cancel, 0).await, Some(1));
        assert_eq!(tag.cancelled().await, None);
    }
}
