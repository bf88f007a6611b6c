// =============================================================================
// WebSocket connection rotation — primary/secondary overlap handover
// =============================================================================
//
// Exchanges drop combined streams after roughly 24h; naive reconnection
// loses tens of seconds of trades. This state machine keeps two
// connections alive during handover instead, per spec.md §4.6. Grounded
// on the teacher's `market_data/trade_stream.rs` connect/read loop,
// generalized from a single permanent connection to a pair that overlaps.
// =============================================================================

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    Rotating,
    Retrying,
}

pub struct RotationConfig {
    pub enabled: bool,
    pub trigger: Duration,
    pub overlap: Duration,
    pub retry_interval: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            enabled: true,
            trigger: Duration::from_millis(79_200_000),
            overlap: Duration::from_millis(600_000),
            retry_interval: Duration::from_millis(300_000),
        }
    }
}

/// Tracks when the connection pair should hand over. Owns no sockets
/// itself — the ingestor's run loop reads `poll()` and acts on the
/// returned `RotationAction`.
pub struct RotationScheduler {
    config: RotationConfig,
    state: RotationState,
    primary_opened_at: Instant,
    secondary_opened_at: Option<Instant>,
    last_retry_at: Option<Instant>,
    pub failed_rotations: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RotationAction {
    None,
    SpawnSecondary,
    RetrySecondary,
    PromoteSecondaryAndClosePrimary,
    FallBackToReactiveReconnect,
}

impl RotationScheduler {
    pub fn new(config: RotationConfig) -> Self {
        RotationScheduler {
            config,
            state: RotationState::Idle,
            primary_opened_at: Instant::now(),
            secondary_opened_at: None,
            last_retry_at: None,
            failed_rotations: 0,
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn on_primary_opened(&mut self) {
        self.primary_opened_at = Instant::now();
    }

    pub fn on_secondary_opened(&mut self) {
        self.secondary_opened_at = Some(Instant::now());
    }

    pub fn on_secondary_open_failed(&mut self) {
        self.last_retry_at = Some(Instant::now());
    }

    /// `force_rotation` is a testing hook, permitted only from `idle`
    /// (spec.md §4.6).
    pub fn force_rotation(&mut self) -> bool {
        if self.state != RotationState::Idle {
            return false;
        }
        self.state = RotationState::Rotating;
        true
    }

    pub fn on_primary_closed_without_secondary(&mut self) -> RotationAction {
        if self.secondary_opened_at.is_none() {
            self.state = RotationState::Idle;
            self.failed_rotations += 1;
            return RotationAction::FallBackToReactiveReconnect;
        }
        RotationAction::None
    }

    /// Called on each ingestor tick; decides the next action based on
    /// elapsed time and current state.
    pub fn poll(&mut self) -> RotationAction {
        if !self.config.enabled {
            return RotationAction::None;
        }
        match self.state {
            RotationState::Idle => {
                if self.primary_opened_at.elapsed() >= self.config.trigger {
                    self.state = RotationState::Rotating;
                    RotationAction::SpawnSecondary
                } else {
                    RotationAction::None
                }
            }
            RotationState::Rotating => match self.secondary_opened_at {
                Some(opened_at) => {
                    if opened_at.elapsed() >= self.config.overlap {
                        self.state = RotationState::Idle;
                        self.primary_opened_at = Instant::now();
                        self.secondary_opened_at = None;
                        RotationAction::PromoteSecondaryAndClosePrimary
                    } else {
                        RotationAction::None
                    }
                }
                None => {
                    let due = self
                        .last_retry_at
                        .map(|t| t.elapsed() >= self.config.retry_interval)
                        .unwrap_or(true);
                    if due {
                        self.state = RotationState::Retrying;
                        RotationAction::RetrySecondary
                    } else {
                        RotationAction::None
                    }
                }
            },
            RotationState::Retrying => {
                let due = self
                    .last_retry_at
                    .map(|t| t.elapsed() >= self.config.retry_interval)
                    .unwrap_or(true);
                if due {
                    self.state = RotationState::Rotating;
                    RotationAction::RetrySecondary
                } else {
                    RotationAction::None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RotationConfig {
        RotationConfig {
            enabled: true,
            trigger: Duration::from_millis(10),
            overlap: Duration::from_millis(10),
            retry_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn force_rotation_only_from_idle() {
        let mut sched = RotationScheduler::new(RotationConfig::default());
        assert!(sched.force_rotation());
        assert_eq!(sched.state(), RotationState::Rotating);
        assert!(!sched.force_rotation());
    }

    #[test]
    fn rotation_triggers_spawn_after_elapsed_trigger() {
        let mut sched = RotationScheduler::new(fast_config());
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(sched.poll(), RotationAction::SpawnSecondary);
        assert_eq!(sched.state(), RotationState::Rotating);
    }

    #[test]
    fn overlap_elapses_then_promotes_secondary() {
        let mut sched = RotationScheduler::new(fast_config());
        sched.force_rotation();
        sched.on_secondary_opened();
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(sched.poll(), RotationAction::PromoteSecondaryAndClosePrimary);
        assert_eq!(sched.state(), RotationState::Idle);
    }

    #[test]
    fn primary_closing_without_secondary_falls_back() {
        let mut sched = RotationScheduler::new(fast_config());
        sched.force_rotation();
        let action = sched.on_primary_closed_without_secondary();
        assert_eq!(action, RotationAction::FallBackToReactiveReconnect);
        assert_eq!(sched.failed_rotations, 1);
        assert_eq!(sched.state(), RotationState::Idle);
    }
}
