//! A sliding-window rate limiter: at most `num` acquisitions per `period`.
//!
//! Shared across loaders hitting the same host via `Arc`. The window is a bounded
//! ring of recent timestamps behind a mutex; waiting happens outside the lock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Ratelimit {
    num: usize,
    period: Duration,
    last_times: Mutex<VecDeque<Instant>>,
}

impl Ratelimit {
    pub fn new(num: usize, period: Duration) -> Ratelimit {
        Ratelimit {
            num: num.max(1),
            period,
            last_times: Mutex::new(VecDeque::with_capacity(num.max(1))),
        }
    }

    /// Blocks until an acquisition fits in the window, then records it.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut times = self.last_times.lock().unwrap();
                let now = Instant::now();
                while times
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.period)
                {
                    times.pop_front();
                }
                if times.len() < self.num {
                    times.push_back(now);
                    return;
                }
                // Window full: time until the oldest entry drops out
                self.period - now.duration_since(*times.front().unwrap())
            };
            log::debug!("rate limit reached, waiting {:?}", wait);
            std::thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_within_limit_does_not_block() {
        let limit = Ratelimit::new(5, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..5 {
            limit.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_blocks_until_window_slides() {
        let limit = Ratelimit::new(2, Duration::from_millis(50));
        let start = Instant::now();
        limit.acquire();
        limit.acquire();
        limit.acquire();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
