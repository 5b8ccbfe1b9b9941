use crate::schedule::burn_in::NOMINAL_BATCH_SIZE;

/// Decides on which iterations accumulated gradients are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    steps: usize,
}

impl Accumulator {
    /// Steady-state plan for `batch_size`: `max(round(64 / batch_size), 1)`.
    pub fn new(batch_size: usize) -> Accumulator {
        let steps = (NOMINAL_BATCH_SIZE as f64 / batch_size.max(1) as f64).round_ties_even() as usize;
        Accumulator { steps: steps.max(1) }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn set_steps(&mut self, steps: usize) {
        self.steps = steps.max(1);
    }

    /// An optimizer step (and EMA update) happens iff `ni % steps == 0`.
    pub fn should_step(&self, ni: usize) -> bool {
        ni % self.steps == 0
    }

    /// Factor applied to the loss gradient so accumulated updates match a
    /// batch of 64 regardless of the per-iteration batch size.
    pub fn loss_scale(batch_size: usize) -> f64 {
        batch_size as f64 / NOMINAL_BATCH_SIZE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_16_accumulates_four() {
        let acc = Accumulator::new(16);
        assert_eq!(acc.steps(), 4);
        assert_eq!(Accumulator::loss_scale(16), 0.25);
    }

    #[test]
    fn exactly_one_step_per_window() {
        for k in 1..=7 {
            let mut acc = Accumulator::new(64);
            acc.set_steps(k);
            for start in 0..20 {
                let steps = (start..start + k).filter(|&ni| acc.should_step(ni)).count();
                assert_eq!(steps, 1, "k={k} start={start}");
            }
        }
    }

    #[test]
    fn steps_never_drop_below_one() {
        let mut acc = Accumulator::new(1000);
        assert_eq!(acc.steps(), 1);
        acc.set_steps(0);
        assert_eq!(acc.steps(), 1);
    }
}
