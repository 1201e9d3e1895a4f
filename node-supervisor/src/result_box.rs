use crate::error::LaunchError;
use crate::upgrade::UpgradeInfo;
use std::sync::Mutex;

/// What a notification path observed.
#[derive(Debug)]
pub enum Outcome {
    Error(LaunchError),
    Upgrade(UpgradeInfo),
    None,
}

impl Outcome {
    fn is_decisive(&self) -> bool {
        !matches!(self, Outcome::None)
    }
}

/// Slot shared between the paths racing to decide how a run ends.
///
/// Only the first decisive write (an error or an upgrade trigger) is kept.
/// Once the supervisor decided to kill the child for an upgrade, a late error
/// produced by that very kill must not replace the decision, and vice versa.
#[derive(Debug)]
pub struct ResultBox {
    outcome: Mutex<Outcome>,
}

impl Default for ResultBox {
    fn default() -> Self {
        ResultBox {
            outcome: Mutex::new(Outcome::None),
        }
    }
}

impl ResultBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `outcome` was accepted.
    /// Writes of [`Outcome::None`] and writes after a decisive outcome are dropped.
    pub fn try_set(&self, outcome: Outcome) -> bool {
        let mut current = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_decisive() || !outcome.is_decisive() {
            return false;
        }
        *current = outcome;
        true
    }

    pub fn is_decided(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_decisive()
    }

    pub fn into_outcome(self) -> Outcome {
        self.outcome.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn trigger(name: &str) -> UpgradeInfo {
        UpgradeInfo {
            name: name.to_owned(),
            height: 0,
            info: String::new(),
        }
    }

    fn error() -> LaunchError {
        LaunchError::Wait(std::io::Error::other("boom"))
    }

    #[test]
    fn trigger_first_wins() {
        let slot = ResultBox::new();
        assert!(slot.try_set(Outcome::Upgrade(trigger("v2"))));
        assert!(!slot.try_set(Outcome::Error(error())));
        assert_matches!(slot.into_outcome(), Outcome::Upgrade(info) if info.name == "v2");
    }

    #[test]
    fn error_first_wins() {
        let slot = ResultBox::new();
        assert!(slot.try_set(Outcome::Error(error())));
        assert!(!slot.try_set(Outcome::Upgrade(trigger("v2"))));
        assert_matches!(slot.into_outcome(), Outcome::Error(LaunchError::Wait(_)));
    }

    #[test]
    fn none_is_never_accepted() {
        let slot = ResultBox::new();
        assert!(!slot.try_set(Outcome::None));
        assert!(!slot.is_decided());
        assert!(slot.try_set(Outcome::Upgrade(trigger("v2"))));
        assert!(!slot.try_set(Outcome::None));
        assert!(slot.is_decided());
    }

    #[test]
    fn concurrent_writers_single_winner() {
        for _ in 0..100 {
            let slot = Arc::new(ResultBox::new());
            let barrier = Arc::new(Barrier::new(2));

            let upgrade = {
                let slot = slot.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    slot.try_set(Outcome::Upgrade(trigger("v2")))
                })
            };
            let failure = {
                let slot = slot.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    slot.try_set(Outcome::Error(error()))
                })
            };

            let upgrade_won = upgrade.join().unwrap();
            let failure_won = failure.join().unwrap();
            assert_ne!(upgrade_won, failure_won);

            let outcome = Arc::try_unwrap(slot).unwrap().into_outcome();
            if upgrade_won {
                assert_matches!(outcome, Outcome::Upgrade(_));
            } else {
                assert_matches!(outcome, Outcome::Error(_));
            }
        }
    }
}
