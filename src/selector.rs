//! Hysteresis selection of stable frames from adjacent-pair similarity scores.

use serde::{Deserialize, Serialize};

/// Thresholds of the stable-frame hysteresis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// A score strictly above this records a stable frame
    pub stable_threshold: f64,
    /// A score strictly below this re-arms the selector
    pub motion_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            stable_threshold: 0.98,
            motion_threshold: 0.94,
        }
    }
}

/// Selector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// Waiting for content to settle
    Seeking,
    /// A stable frame was recorded, waiting for content to change
    Armed,
}

#[derive(Debug, Clone)]
pub struct StableFrameSelector {
    config: SelectorConfig,
    state: SelectorState,
}

impl StableFrameSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            state: SelectorState::Seeking,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Feed one score; returns true when `score` marks a new stable frame
    pub fn observe(&mut self, score: f64) -> bool {
        match self.state {
            SelectorState::Seeking if score > self.config.stable_threshold => {
                self.state = SelectorState::Armed;
                true
            }
            SelectorState::Armed if score < self.config.motion_threshold => {
                self.state = SelectorState::Seeking;
                false
            }
            _ => false,
        }
    }

    /// Run a full pass over `scores`, returning the recorded indices in order
    pub fn select(&mut self, scores: &[f64]) -> Vec<usize> {
        self.state = SelectorState::Seeking;

        scores
            .iter()
            .enumerate()
            .filter_map(|(index, &score)| self.observe(score).then_some(index))
            .collect()
    }
}

impl Default for StableFrameSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}

/// Select stable frame indices with the given thresholds
pub fn select_stable_frames(scores: &[f64], config: SelectorConfig) -> Vec<usize> {
    StableFrameSelector::new(config).select(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(scores: &[f64]) -> Vec<usize> {
        select_stable_frames(scores, SelectorConfig::default())
    }

    #[test]
    fn test_mixed_sequence() {
        let scores = [0.99, 0.99, 0.93, 0.99, 0.5, 0.99, 0.99, 0.99, 0.99];
        assert_eq!(select(&scores), vec![0, 3, 5]);
    }

    #[test]
    fn test_all_identical_records_first_only() {
        assert_eq!(select(&[1.0; 20]), vec![0]);
    }

    #[test]
    fn test_all_distinct_records_nothing() {
        assert!(select(&[0.5, 0.2, 0.93, 0.1]).is_empty());
        assert!(select(&[]).is_empty());
    }

    #[test]
    fn test_thresholds_are_strict() {
        // Exactly at the thresholds neither records nor re-arms
        assert!(select(&[0.98, 0.98]).is_empty());
        assert_eq!(select(&[0.99, 0.94, 0.99]), vec![0]);
        assert_eq!(select(&[0.99, 0.9399, 0.99]), vec![0, 2]);
    }

    #[test]
    fn test_hysteresis_band_does_not_flap() {
        let scores = [0.99, 0.95, 0.99, 0.96, 0.985, 0.97, 0.99];
        assert_eq!(select(&scores), vec![0]);
    }

    #[test]
    fn test_hysteresis_invariant_on_pseudo_random_scores() {
        // Deterministic LCG so the sequence is reproducible
        let mut seed: u64 = 0x5eed;
        let scores: Vec<f64> = (0..2000)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                0.9 + (seed >> 11) as f64 / (1u64 << 53) as f64 * 0.1
            })
            .collect();

        let stable = select(&scores);
        assert!(!stable.is_empty());

        for window in stable.windows(2) {
            let between = &scores[window[0] + 1..window[1]];
            assert!(
                between.iter().any(|&s| s < 0.94),
                "no motion between {} and {}",
                window[0],
                window[1]
            );
        }
        for &index in &stable {
            assert!(scores[index] > 0.98);
        }
    }

    #[test]
    fn test_select_resets_state() {
        let mut selector = StableFrameSelector::default();
        assert_eq!(selector.select(&[0.99]), vec![0]);
        assert_eq!(selector.state(), SelectorState::Armed);
        assert_eq!(selector.select(&[0.99]), vec![0]);
    }
}
