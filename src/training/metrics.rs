use std::fmt;

/// Running arithmetic mean of scalar observations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeanMetric {
    sum: f64,
    count: usize,
}

impl MeanMetric {
    pub fn update(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    /// Mean of the observations so far, 0 when there are none.
    pub fn result(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum / self.count as f64) as f32
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-epoch loss accumulators of one training run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GanMetrics {
    pub generator: MeanMetric,
    pub discriminator_fake: MeanMetric,
    pub discriminator_real: MeanMetric,
}

impl GanMetrics {
    pub fn reset(&mut self) {
        self.generator.reset();
        self.discriminator_fake.reset();
        self.discriminator_real.reset();
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            generator: self.generator.result(),
            discriminator_fake: self.discriminator_fake.result(),
            discriminator_real: self.discriminator_real.result(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricsSummary {
    pub generator: f32,
    pub discriminator_fake: f32,
    pub discriminator_real: f32,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "G: {:.4}, D1: {:.4}, D2: {:.4}",
            self.generator, self.discriminator_fake, self.discriminator_real
        )
    }
}
