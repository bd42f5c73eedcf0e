//! Supervision of a single image pull.

use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::trace;

use super::UpdateError;
use crate::runtime::PullHandle;

/// Drives `pull` to completion under two budgets: `idle` restarts on every
/// progress event, `total` is fixed from the start. Returns the number of
/// progress events seen.
///
/// Whichever timer fires first ends the pull; returning drops the handle,
/// which cancels the pull on the runtime side.
pub async fn supervise_pull(
    mut pull: PullHandle,
    idle: Duration,
    total: Duration,
) -> Result<u64, UpdateError> {
    let total_timer = sleep_until(Instant::now() + total);
    tokio::pin!(total_timer);
    let mut events = 0u64;

    loop {
        let idle_timer = sleep(idle);

        tokio::select! {
            biased;

            _ = &mut total_timer => return Err(UpdateError::TotalTimeout(total)),
            // Progress that is already queued wins over an idle timer that
            // fired in the same poll.
            event = pull.next_event() => match event {
                Some(Ok(ev)) => {
                    events += 1;
                    trace!("Pull progress: {:?} {:?}", ev.status, ev.progress);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(events),
            },
            _ = idle_timer => return Err(UpdateError::IdleTimeout(idle)),
        }
    }
}
