//! 往返延迟统计

use std::collections::VecDeque;
use std::time::Duration;

/// 保留最近若干次请求的往返时间
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<Duration>,
    window: usize,
    threshold: Duration,
}

impl LatencyTracker {
    pub fn new(window: usize, threshold: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
            threshold,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push_back(sample);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    /// 平均延迟是否超过阈值
    pub fn is_slow(&self) -> bool {
        self.average().map_or(false, |avg| avg > self.threshold)
    }
}
