//! Character drain: reveals buffered payload one character per interval,
//! independent of how fast fragments arrive.

use std::collections::VecDeque;
use std::time::Duration;

use crate::scheduler::TimerSlot;

/// FIFO of characters waiting to be revealed plus the single timer that
/// paces them.
///
/// The timer is armed exactly when characters are pending: enqueueing into an
/// idle drain arms it, enqueueing into a running drain only extends the
/// buffer, and revealing the last character leaves it disarmed.
#[derive(Debug)]
pub struct CharDrain {
    pending: VecDeque<char>,
    timer: TimerSlot,
    interval: Duration,
}

impl CharDrain {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            timer: TimerSlot::new(),
            interval,
        }
    }

    /// Queues every character of `fragment` behind what is already pending.
    pub fn enqueue(&mut self, fragment: &str) {
        self.pending.extend(fragment.chars());
        if !self.pending.is_empty() {
            // Refused while a tick is outstanding, which keeps it single.
            self.timer.arm(self.interval);
        }
    }

    /// Waits for the next tick and returns the character it reveals.
    ///
    /// Pends forever while the drain is idle. Cancel-safe.
    pub async fn next_char(&mut self) -> char {
        loop {
            self.timer.fired().await;
            if let Some(ch) = self.pending.pop_front() {
                if !self.pending.is_empty() {
                    self.timer.arm(self.interval);
                }
                return ch;
            }
        }
    }

    /// Takes every pending character at once and stops the timer.
    pub fn flush(&mut self) -> String {
        self.timer.disarm();
        self.pending.drain(..).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_ticking(&self) -> bool {
        self.timer.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn fragments_enqueued_before_a_tick_keep_order() {
        let mut drain = CharDrain::new(TICK);
        drain.enqueue("AB");
        drain.enqueue("CD");
        let mut out = String::new();
        while !drain.is_idle() {
            out.push(drain.next_char().await);
        }
        assert_eq!(out, "ABCD");
        assert!(!drain.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn reveals_at_most_one_character_per_interval() {
        let mut drain = CharDrain::new(TICK);
        drain.enqueue("xyz");
        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            drain.next_char().await;
        }
        assert!(started.elapsed() >= TICK * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drain_restarts_on_enqueue() {
        let mut drain = CharDrain::new(TICK);
        drain.enqueue("a");
        assert_eq!(drain.next_char().await, 'a');
        assert!(!drain.is_ticking());

        tokio::time::sleep(TICK * 5).await;
        drain.enqueue("b");
        assert!(drain.is_ticking());
        assert_eq!(drain.next_char().await, 'b');
    }

    #[tokio::test(start_paused = true)]
    async fn interleaved_enqueues_and_ticks_never_double_arm() {
        // Deterministic interleaving of arrivals and ticks.
        let fragments = ["he", "llo", " ", "wor", "", "ld", "!", "\u{e9}\u{e8}"];
        let mut seed: u32 = 0x2545_f491;
        let mut drain = CharDrain::new(TICK);
        let mut expected = String::new();
        let mut out = String::new();
        let mut next = fragments.iter();

        loop {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let enqueue = seed % 3 != 0;
            if enqueue && let Some(fragment) = next.next() {
                drain.enqueue(fragment);
                expected.push_str(fragment);
            } else if !drain.is_idle() {
                out.push(drain.next_char().await);
            } else if next.len() == 0 {
                break;
            }
            assert_eq!(drain.is_ticking(), !drain.is_idle());
        }

        assert_eq!(out, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_takes_everything_and_disarms() {
        let mut drain = CharDrain::new(TICK);
        drain.enqueue("rest");
        assert_eq!(drain.flush(), "rest");
        assert!(drain.is_idle());
        assert!(!drain.is_ticking());
    }
}
