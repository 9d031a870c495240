use core::time::Duration;
use std::{
    sync::Mutex,
    time::Instant,
};

use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum Error {
    #[error("rate limiter wait interrupted by shutdown")]
    Interrupted,
}

/// A token-bucket shaper with a burst size of one.
///
/// The bucket refills at `limit` tokens per second and a caller consumes one
/// token per request. Limit changes are applied by replacing the whole
/// shaper, so waiters on a stale instance run to completion.
#[derive(Debug)]
pub struct Shaper {
    limit: f64,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    prev_ts: Instant,
}

impl Shaper {
    /// Constructs a new [`Shaper`] with the given limit in tokens per second.
    ///
    /// The limit must be non-zero; a zero limit is represented by the absence
    /// of a shaper.
    pub fn new(limit: u64) -> Self {
        let state = State {
            tokens: 1.0,
            prev_ts: Instant::now(),
        };

        Self {
            limit: limit as f64,
            state: Mutex::new(state),
        }
    }

    /// Blocks until the bucket allows one more request.
    ///
    /// Returns an error when the wait is interrupted by `cancel`, leaving the
    /// token unconsumed.
    pub async fn wait(&self, cancel: &Notify) -> Result<(), Error> {
        loop {
            match self.try_take() {
                None => return Ok(()),
                Some(delay) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.notified() => return Err(Error::Interrupted),
                    }
                }
            }
        }
    }

    /// Refills the bucket and takes one token.
    ///
    /// Returns the time to wait for the next token when the bucket is empty.
    fn try_take(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();

        let now = Instant::now();
        let elapsed = now.duration_since(state.prev_ts);
        state.prev_ts = now;

        state.tokens = (state.tokens + self.limit * elapsed.as_secs_f64()).min(1.0);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return None;
        }

        Some(Duration::from_secs_f64((1.0 - state.tokens) / self.limit))
    }
}
