use serde::{Deserialize, Serialize};

/// Progress counters of one training run. Only the trainer writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub current_epoch: usize,
    pub total_epochs: usize,
    /// Batches processed since epoch 0 (`ni`).
    pub global_iteration: usize,
    pub best_fitness: f64,
    pub is_resumed: bool,
}

impl RunState {
    pub fn new(total_epochs: usize) -> RunState {
        RunState {
            current_epoch: 0,
            total_epochs,
            global_iteration: 0,
            best_fitness: 0.0,
            is_resumed: false,
        }
    }

    /// Folds in one epoch's fitness. Returns true when `fi` is the best so
    /// far (ties included), i.e. the "best" slot should be rewritten.
    pub fn observe_fitness(&mut self, fi: f64) -> bool {
        if fi > self.best_fitness {
            self.best_fitness = fi;
        }
        self.best_fitness == fi
    }

    pub fn is_final_epoch(&self) -> bool {
        self.current_epoch + 1 == self.total_epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fitness_is_running_max() {
        let scores = [0.1, 0.4, 0.2, 0.4, 0.35, 0.6, 0.1];
        let mut state = RunState::new(scores.len());
        let mut best_writes = Vec::new();
        for (e, &fi) in scores.iter().enumerate() {
            if state.observe_fitness(fi) {
                best_writes.push(e);
            }
            let max = scores[..=e].iter().cloned().fold(f64::MIN, f64::max);
            assert_eq!(state.best_fitness, max);
        }
        assert_eq!(best_writes, vec![0, 1, 3, 5]);
    }

    #[test]
    fn resumed_best_is_kept_when_later_epochs_are_worse() {
        let mut state = RunState::new(10);
        state.best_fitness = 0.7;
        assert!(!state.observe_fitness(0.5));
        assert_eq!(state.best_fitness, 0.7);
    }
}
