//! Retransmission scheduling
//!
//! Decides when missing chunks are requested again and how the request is
//! split into MISS frames. Two triggers exist: the read deadline expiring, and
//! the end-of-pass check once as many chunk frames as the pass should carry
//! have been seen while indices are still absent.

use crate::config::ReceiverConfig;
use crate::error::LinkError;
use crate::types::MissFrame;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "logging")]
use tracing::{info, warn};

/// Split missing indices into ordered MISS frames of at most `batch_size`
pub fn batch_missing<I>(missing: I, batch_size: usize) -> Vec<MissFrame>
where
    I: IntoIterator<Item = u16>,
{
    let batch_size = batch_size.max(1);
    let indices: Vec<u16> = missing.into_iter().collect();

    indices
        .chunks(batch_size)
        .map(|batch| MissFrame::new(batch.to_vec()))
        .collect()
}

/// What caused a retransmission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// No frame arrived before the deadline
    Timeout,
    /// The pass delivered its nominal frame count with gaps left
    EndOfPass,
}

/// Timing of retransmission requests and acknowledgments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitPolicy {
    /// Inactivity before a request
    pub timeout: Duration,
    /// Indices per MISS frame
    pub batch_size: usize,
    /// Delay after each MISS frame
    pub miss_interval: Duration,
    /// Delay before switching from receive to transmit
    pub rx_switch_delay: Duration,
    /// Round limit; unbounded when `None`
    pub max_rounds: Option<u32>,
    /// Number of acknowledgments
    pub ack_repeats: u32,
    /// First acknowledgment backoff
    pub ack_backoff: Duration,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self::from(&ReceiverConfig::default())
    }
}

impl From<&ReceiverConfig> for RetransmitPolicy {
    fn from(config: &ReceiverConfig) -> Self {
        Self {
            timeout: config.retransmission_timeout(),
            batch_size: config.miss_batch_size,
            miss_interval: config.miss_interval(),
            rx_switch_delay: config.rx_switch_delay(),
            max_rounds: config.max_retransmit_rounds,
            ack_repeats: config.ack_repeats,
            ack_backoff: config.ack_backoff(),
        }
    }
}

/// Tracks retransmission rounds and the progress of the current pass
#[derive(Debug, Clone)]
pub struct RetransmitScheduler {
    policy: RetransmitPolicy,
    rounds: u32,
    pass_expected: usize,
    pass_seen: usize,
}

impl RetransmitScheduler {
    /// Create a scheduler with no pass in progress
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            policy,
            rounds: 0,
            pass_expected: 0,
            pass_seen: 0,
        }
    }

    /// The policy in force
    pub fn policy(&self) -> &RetransmitPolicy {
        &self.policy
    }

    /// Rounds requested since the last reset
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Begin counting a pass that should deliver `expected` chunk frames
    pub fn start_pass(&mut self, expected: usize) {
        self.pass_expected = expected;
        self.pass_seen = 0;
    }

    /// Count one chunk frame of the current pass
    ///
    /// Only frames that stored a chunk or fell past the declared range
    /// count. Duplicates do not, so a repeated frame cannot end a pass while
    /// the sender is still transmitting it.
    pub fn note_chunk_frame(&mut self) {
        self.pass_seen += 1;
    }

    /// Whether the current pass has carried its nominal frame count
    pub fn pass_exhausted(&self) -> bool {
        self.pass_expected > 0 && self.pass_seen >= self.pass_expected
    }

    /// Deadline for the next read, measured from the last activity
    pub fn deadline(&self, last_activity: Instant) -> Instant {
        last_activity + self.policy.timeout
    }

    /// Plan a retransmission round for `missing`
    ///
    /// Returns `Ok(None)` when nothing is missing. Otherwise counts a round,
    /// starts a new pass sized to the request and returns its MISS frames.
    /// Exceeding the round limit fails with `RetransmitLimit`.
    pub fn plan<I>(
        &mut self,
        missing: I,
        trigger: Trigger,
    ) -> Result<Option<Vec<MissFrame>>, LinkError>
    where
        I: IntoIterator<Item = u16>,
    {
        let frames = batch_missing(missing, self.policy.batch_size);
        let requested: usize = frames.iter().map(|f| f.indices.len()).sum();
        if requested == 0 {
            return Ok(None);
        }

        if let Some(max) = self.policy.max_rounds {
            if self.rounds >= max {
                #[cfg(feature = "logging")]
                warn!(rounds = self.rounds, missing = requested, "Retransmission limit reached");

                return Err(LinkError::RetransmitLimit(self.rounds));
            }
        }

        self.rounds += 1;
        self.start_pass(requested);

        #[cfg(not(feature = "logging"))]
        let _ = trigger;

        #[cfg(feature = "logging")]
        info!(
            round = self.rounds,
            missing = requested,
            frames = frames.len(),
            ?trigger,
            "Requesting retransmission"
        );

        Ok(Some(frames))
    }

    /// Backoff after each acknowledgment: base, 2 x base, 4 x base, ...
    pub fn ack_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.policy.ack_repeats)
            .map(move |i| self.policy.ack_backoff.saturating_mul(2u32.saturating_pow(i)))
    }

    /// Forget rounds and pass progress
    pub fn reset(&mut self) {
        self.rounds = 0;
        self.pass_expected = 0;
        self.pass_seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_missing_sizes() {
        let frames = batch_missing(0..25u16, 10);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].indices, (0..10).collect::<Vec<_>>());
        assert_eq!(frames[2].indices, (20..25).collect::<Vec<_>>());

        assert!(batch_missing(std::iter::empty(), 10).is_empty());
    }

    #[test]
    fn test_plan_nothing_missing() {
        let mut scheduler = RetransmitScheduler::new(RetransmitPolicy::default());
        assert_eq!(scheduler.plan(std::iter::empty::<u16>(), Trigger::Timeout), Ok(None));
        assert_eq!(scheduler.rounds(), 0);
    }

    #[test]
    fn test_plan_starts_pass_of_requested_size() {
        let mut scheduler = RetransmitScheduler::new(RetransmitPolicy::default());
        scheduler.start_pass(5);
        for _ in 0..4 {
            scheduler.note_chunk_frame();
        }
        assert!(!scheduler.pass_exhausted());
        scheduler.note_chunk_frame();
        assert!(scheduler.pass_exhausted());

        let frames = scheduler.plan([2u16, 4], Trigger::EndOfPass).unwrap().unwrap();
        assert_eq!(frames, vec![MissFrame::new(vec![2, 4])]);
        assert_eq!(scheduler.rounds(), 1);
        assert!(!scheduler.pass_exhausted());

        scheduler.note_chunk_frame();
        scheduler.note_chunk_frame();
        assert!(scheduler.pass_exhausted());
    }

    #[test]
    fn test_round_limit() {
        let policy = RetransmitPolicy {
            max_rounds: Some(2),
            ..Default::default()
        };
        let mut scheduler = RetransmitScheduler::new(policy);

        assert!(scheduler.plan([1u16], Trigger::Timeout).unwrap().is_some());
        assert!(scheduler.plan([1u16], Trigger::Timeout).unwrap().is_some());
        assert_eq!(
            scheduler.plan([1u16], Trigger::Timeout),
            Err(LinkError::RetransmitLimit(2))
        );
    }

    #[test]
    fn test_ack_backoff_doubles() {
        let scheduler = RetransmitScheduler::new(RetransmitPolicy::default());
        let delays: Vec<_> = scheduler.ack_delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_ack_backoff_saturates() {
        let policy = RetransmitPolicy {
            ack_repeats: 40,
            ack_backoff: Duration::from_secs(u64::MAX / 2),
            ..Default::default()
        };
        let scheduler = RetransmitScheduler::new(policy);
        let delays: Vec<_> = scheduler.ack_delays().collect();

        assert_eq!(delays.len(), 40);
        assert_eq!(delays[39], Duration::MAX);
    }

    #[tokio::test]
    async fn test_deadline_from_last_activity() {
        let scheduler = RetransmitScheduler::new(RetransmitPolicy::default());
        let now = Instant::now();
        assert_eq!(scheduler.deadline(now), now + Duration::from_secs(10));
    }
}
