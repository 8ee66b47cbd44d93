use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Token bucket shared by all tool calls; scans hit paid provider APIs.
#[derive(Clone)]
pub struct RateLimiter {
    rps: u32,
    state: std::sync::Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps,
            state: std::sync::Arc::new(Mutex::new(State {
                tokens: rps as f64,
                last: Instant::now(),
            })),
        }
    }

    /// `None` unless `RATE_LIMIT_RPS` is a positive integer.
    pub fn from_env() -> Option<Self> {
        std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|&n| n > 0)
            .map(Self::new)
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }

    pub async fn check(&self) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last);
        state.last = now;

        let capacity = self.rps as f64;
        state.tokens = (state.tokens + elapsed.as_secs_f64() * capacity).min(capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let wait = Duration::from_secs_f64((1.0 - state.tokens) / capacity);
        Err(format!(
            "scan rate limit exceeded ({} per second): try again in ~{}ms",
            self.rps,
            wait.as_millis()
        ))
    }
}
