use crate::utils::error::DetectorError;
use crate::Result;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Seeded train/validation split returning sample indices.
///
/// With `stratify` each label contributes `round(n * fraction)` samples to
/// validation, so both partitions keep the class balance. Both partitions
/// are guaranteed non-empty.
pub fn train_validation_split(
    labels: &Array1<f32>,
    validation_fraction: f32,
    seed: u64,
    stratify: bool,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(DetectorError::InvalidInput(format!(
            "Validation fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }
    if labels.len() < 2 {
        return Err(DetectorError::InvalidInput(format!(
            "Need at least 2 images to split, got {}",
            labels.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);

    let groups: Vec<Vec<usize>> = if stratify {
        let mut by_label: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (index, label) in labels.iter().enumerate() {
            by_label.entry(label.to_bits()).or_default().push(index);
        }
        by_label.into_values().collect()
    } else {
        vec![(0..labels.len()).collect()]
    };

    let mut train = Vec::new();
    let mut validation = Vec::new();

    for mut group in groups {
        group.shuffle(&mut rng);
        let take = ((group.len() as f32) * validation_fraction).round() as usize;
        let take = take.min(group.len());
        validation.extend_from_slice(&group[..take]);
        train.extend_from_slice(&group[take..]);
    }

    // Tiny classes can round to zero on one side
    if validation.is_empty() {
        if let Some(index) = train.pop() {
            validation.push(index);
        }
    } else if train.is_empty() {
        if let Some(index) = validation.pop() {
            train.push(index);
        }
    }

    train.shuffle(&mut rng);
    validation.shuffle(&mut rng);

    Ok((train, validation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(real: usize, fake: usize) -> Array1<f32> {
        std::iter::repeat(0.0)
            .take(real)
            .chain(std::iter::repeat(1.0).take(fake))
            .collect()
    }

    #[test]
    fn test_split_is_a_partition() {
        let labels = labels(30, 20);
        let (train, val) = train_validation_split(&labels, 0.2, 42, true).unwrap();

        assert_eq!(train.len() + val.len(), 50);
        let all: HashSet<usize> = train.iter().chain(val.iter()).copied().collect();
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn test_stratified_split_keeps_class_balance() {
        let labels = labels(30, 20);
        let (_, val) = train_validation_split(&labels, 0.2, 42, true).unwrap();

        let fake_in_val = val.iter().filter(|&&i| labels[i] == 1.0).count();
        assert_eq!(val.len(), 10);
        assert_eq!(fake_in_val, 4);
    }

    #[test]
    fn test_split_is_reproducible() {
        let labels = labels(12, 12);
        let first = train_validation_split(&labels, 0.25, 42, true).unwrap();
        let second = train_validation_split(&labels, 0.25, 42, true).unwrap();
        assert_eq!(first, second);

        let other = train_validation_split(&labels, 0.25, 7, true).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_tiny_dataset_keeps_both_partitions() {
        let labels = labels(1, 1);
        let (train, val) = train_validation_split(&labels, 0.2, 42, true).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(val.len(), 1);
    }

    #[test]
    fn test_split_rejects_bad_input() {
        assert!(train_validation_split(&labels(5, 5), 0.0, 42, true).is_err());
        assert!(train_validation_split(&labels(5, 5), 1.0, 42, false).is_err());
        assert!(train_validation_split(&labels(1, 0), 0.2, 42, false).is_err());
    }
}
