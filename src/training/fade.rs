/// Maps an iteration counter to the fade-in blend factor of the stage being
/// grown.
///
/// `alpha()` ramps linearly from 0 towards 1 over `phase_length` steps and is
/// `None` once the phase is over, at which point the stage runs stable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FadeScheduler {
    phase_length: usize,
    step: usize,
}

impl FadeScheduler {
    pub fn new(phase_length: usize) -> Self {
        Self {
            phase_length,
            step: 0,
        }
    }

    /// A phase spanning `epochs` passes over `num_items` examples in batches of `batch_size`.
    pub fn from_epochs(num_items: usize, batch_size: usize, epochs: usize) -> Self {
        let batches = num_items.checked_div(batch_size).unwrap_or(0);
        Self::new(batches * epochs)
    }

    pub fn alpha(&self) -> Option<f32> {
        (!self.is_complete()).then(|| self.step as f32 / self.phase_length as f32)
    }

    pub fn advance(&mut self) {
        if !self.is_complete() {
            self.step += 1;
        }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn is_complete(&self) -> bool {
        self.step >= self.phase_length
    }

    pub fn phase_length(&self) -> usize {
        self.phase_length
    }

    pub fn step(&self) -> usize {
        self.step
    }
}
