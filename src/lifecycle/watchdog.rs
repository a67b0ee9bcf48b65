//! Restart budget for crashed services
//!
//! A crashed service may be relaunched at most `max_restarts` times within a
//! sliding window. Once the budget is spent the service stays down until the
//! operator launches again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::WatchdogConfig;

#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_restarts: usize,
    period: Duration,
    restarts: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(max_restarts: usize, period: Duration) -> Self {
        Self {
            max_restarts,
            period,
            restarts: VecDeque::with_capacity(max_restarts),
        }
    }

    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(config.max_restarts, Duration::from_secs(config.period_secs))
    }

    /// Record a restart at `now` if the budget allows one
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.expire(now);
        if self.restarts.len() >= self.max_restarts {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    pub fn remaining(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.max_restarts.saturating_sub(self.restarts.len())
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.restarts.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }
}
