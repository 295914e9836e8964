//! Synchronous request channel to the aggregator.
//!
//! The transport below this interface is out of scope; the controller is
//! handed an implementation at construction time. Requests are blocking and
//! carry at most one bounded response buffer.

use thiserror::Error;

/// Default retry bound for transient failures.
pub const REQUEST_MAX_RETRIES: usize = 3;

/// A single synchronous request against the aggregator.
#[derive(Clone, Debug)]
pub struct Request {
    pub target_category: u8,
    pub command_id: u8,
    pub instance_id: u8,
    pub channel: u8,
    pub payload: Vec<u8>,
    pub expects_response: bool,
}

impl Request {
    pub fn new(target_category: u8, command_id: u8, instance_id: u8, channel: u8) -> Self {
        Request {
            target_category,
            command_id,
            instance_id,
            channel,
            payload: Vec::new(),
            expects_response: false,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn expect_response(mut self) -> Self {
        self.expects_response = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    /// The controller is not in the started state.
    #[error("controller not ready")]
    NotReady,

    /// The addressed peripheral does not exist.
    #[error("no such device")]
    NoSuchDevice,

    /// Transient transport failure, eligible for bounded retry.
    #[error("i/o failure: {0}")]
    Io(String),

    /// The remote side violated the request/response contract. Never retried.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The response did not fit the bounded response buffer.
    #[error("response exceeds buffer limit ({0} bytes)")]
    ResponseTooLarge(usize),
}

/// Executes synchronous requests against the aggregator.
pub trait RequestChannel: Send + Sync {
    fn execute(&self, req: &Request) -> Result<Vec<u8>, RequestError>;
}

/// Issues `req`, retrying up to `attempts` times on transient I/O failure.
/// All other errors fail immediately.
pub fn request_retry(
    channel: &dyn RequestChannel,
    req: &Request,
    attempts: usize,
) -> Result<Vec<u8>, RequestError> {
    let attempts = attempts.max(1);
    let mut last = RequestError::Io(String::new());

    for attempt in 1..=attempts {
        match channel.execute(req) {
            Ok(response) => return Ok(response),
            Err(RequestError::Io(err)) => {
                log::warn!(
                    "request {:#04x}/{:#04x} failed on attempt {}/{}: {}",
                    req.target_category,
                    req.command_id,
                    attempt,
                    attempts,
                    err
                );
                last = RequestError::Io(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FlakyChannel {
        calls: AtomicUsize,
        succeed_after: usize,
    }

    impl RequestChannel for FlakyChannel {
        fn execute(&self, _req: &Request) -> Result<Vec<u8>, RequestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call + 1 >= self.succeed_after {
                Ok(vec![0x01])
            } else {
                Err(RequestError::Io("bus glitch".into()))
            }
        }
    }

    #[test]
    fn retry_recovers_from_transient_failure() {
        let channel = FlakyChannel {
            calls: AtomicUsize::new(0),
            succeed_after: 3,
        };
        let req = Request::new(0x0e, 0x2c, 0x00, 0x01).expect_response();
        let resp = request_retry(&channel, &req, REQUEST_MAX_RETRIES).unwrap();
        assert_eq!(resp, vec![0x01]);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_bound() {
        let channel = FlakyChannel {
            calls: AtomicUsize::new(0),
            succeed_after: 10,
        };
        let req = Request::new(0x0e, 0x2c, 0x00, 0x01).expect_response();
        assert!(matches!(
            request_retry(&channel, &req, 3),
            Err(RequestError::Io(_))
        ));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    struct NotReadyChannel;

    impl RequestChannel for NotReadyChannel {
        fn execute(&self, _req: &Request) -> Result<Vec<u8>, RequestError> {
            Err(RequestError::NotReady)
        }
    }

    #[test]
    fn not_ready_is_not_retried() {
        let req = Request::new(0x15, 0x04, 0x01, 0x02);
        assert!(matches!(
            request_retry(&NotReadyChannel, &req, 5),
            Err(RequestError::NotReady)
        ));
    }
}
