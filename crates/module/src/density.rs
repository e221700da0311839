/// Picks the variant whose density is closest to the device's.
#[derive(Debug, Clone, Default)]
pub struct DensityResolver {
    densities: Vec<f64>,
}

impl DensityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            densities: Vec::with_capacity(capacity),
        }
    }

    pub fn append_density(&mut self, density: f64) {
        self.densities.push(density);
    }

    /// Index of the density nearest to `target`. Equidistant densities
    /// resolve to the smaller one.
    pub fn select(&self, target: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, &density) in self.densities.iter().enumerate() {
            let distance = (target - density).abs();
            let better = match best {
                None => true,
                Some((best_index, best_distance)) => {
                    distance < best_distance || (distance == best_distance && density < self.densities[best_index])
                },
            };
            if better {
                best = Some((index, distance));
            }
        }
        best.map(|(index, _)| index)
    }
}
