use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How independent units of work (grid points, fit candidates) are run.
/// Chosen once by the caller; results come back in input order either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    Sequential,
    #[default]
    Parallel,
}

impl Scheduling {
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match self {
            Scheduling::Sequential => items.iter().map(f).collect(),
            Scheduling::Parallel => items.par_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_map_keeps_order() {
        let items: Vec<u64> = (0..1000).collect();
        let square = |x: &u64| x * x;
        assert_eq!(
            Scheduling::Parallel.map(&items, square),
            Scheduling::Sequential.map(&items, square)
        );
    }
}
