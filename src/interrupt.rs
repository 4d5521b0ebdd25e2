/// Cooperative compile time bound, polled once per fixed point iteration.
/// Returning true abandons the whole procedure.
pub trait InterruptCheck {
    fn should_interrupt(&mut self, phase: &'static str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl InterruptCheck for Never {
    fn should_interrupt(&mut self, _phase: &'static str) -> bool {
        false
    }
}

/// Interrupts after a fixed number of polls.
#[derive(Debug, Clone, Copy)]
pub struct StepBudget {
    remaining: usize,
}

impl StepBudget {
    pub fn new(steps: usize) -> Self {
        Self { remaining: steps }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl InterruptCheck for StepBudget {
    fn should_interrupt(&mut self, phase: &'static str) -> bool {
        if self.remaining == 0 {
            log::debug!("step budget exhausted in {}", phase);
            return true;
        }

        self.remaining -= 1;
        false
    }
}
