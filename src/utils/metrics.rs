//! Metrics Module for Model Evaluation
//!
//! Binary diagnosis metrics computed once per phase:
//! - Sample-weighted mean loss
//! - ROC AUC of the positive-class probability
//! - F1 of the positive class
//! - Accuracy

use serde::{Deserialize, Serialize};

/// Index of the positive class
pub const POSITIVE_CLASS: usize = 1;

/// Per-phase summary written to the training history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub loss: f64,
    pub auc: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl PhaseMetrics {
    /// Metrics for a phase that saw no samples
    pub fn empty() -> Self {
        Self {
            loss: f64::NAN,
            auc: f64::NAN,
            f1: 0.0,
            accuracy: 0.0,
        }
    }
}

/// Confusion matrix (row = actual, column = predicted), row-major
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// F1 of one class; 0 when precision and recall are both undefined or zero
    pub fn f1(&self, class: usize) -> f64 {
        let tp = self.get(class, class) as f64;
        let predicted: usize = (0..self.num_classes).map(|row| self.get(row, class)).sum();
        let actual: usize = (0..self.num_classes).map(|col| self.get(class, col)).sum();
        let denominator = predicted as f64 + actual as f64;
        if denominator == 0.0 {
            0.0
        } else {
            2.0 * tp / denominator
        }
    }
}

/// ROC AUC via the Mann-Whitney rank statistic with tied scores sharing
/// their average rank. NaN unless both classes are present.
pub fn roc_auc(labels: &[usize], scores: &[f64]) -> f64 {
    let n = labels.len().min(scores.len());
    let positives = labels[..n].iter().filter(|&&l| l == POSITIVE_CLASS).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their mean
        let average = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = average;
        }
        start = end;
    }

    let positive_rank_sum: f64 = (0..n)
        .filter(|&i| labels[i] == POSITIVE_CLASS)
        .map(|i| ranks[i])
        .sum();
    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Collects per-batch outputs over one phase
#[derive(Debug, Clone, Default)]
pub struct PhaseAccumulator {
    loss_sum: f64,
    labels: Vec<usize>,
    predictions: Vec<usize>,
    positive_scores: Vec<f64>,
}

impl PhaseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch. `batch_loss` is the batch mean; `probs` holds one
    /// probability row per sample.
    pub fn add_batch(&mut self, batch_loss: f64, labels: &[usize], probs: &[Vec<f32>]) {
        self.loss_sum += batch_loss * labels.len() as f64;
        self.labels.extend_from_slice(labels);
        for row in probs {
            self.predictions.push(argmax(row));
            self.positive_scores
                .push(row.get(POSITIVE_CLASS).copied().unwrap_or(0.0) as f64);
        }
    }

    pub fn count(&self) -> usize {
        self.labels.len()
    }

    pub fn predictions(&self) -> &[usize] {
        &self.predictions
    }

    /// True when every prediction falls in the same class
    pub fn is_degenerate(&self) -> bool {
        match self.predictions.first() {
            Some(first) => self.predictions.iter().all(|p| p == first),
            None => false,
        }
    }

    pub fn finish(&self, num_classes: usize) -> PhaseMetrics {
        if self.labels.is_empty() {
            return PhaseMetrics::empty();
        }
        let cm = ConfusionMatrix::from_predictions(&self.predictions, &self.labels, num_classes);
        PhaseMetrics {
            loss: self.loss_sum / self.labels.len() as f64,
            auc: roc_auc(&self.labels, &self.positive_scores),
            f1: cm.f1(POSITIVE_CLASS),
            accuracy: cm.accuracy(),
        }
    }
}

/// Index of the largest value; first wins on ties
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

/// Row-wise softmax of host-side logits
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];
        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);

        assert_eq!(cm.get(0, 0), 2);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.total(), 5);
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);
        // Class 1: TP=1, FP=1, FN=1
        assert!((cm.f1(1) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_f1_undefined_is_zero() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0], &[0, 0], 2);
        assert_eq!(cm.f1(1), 0.0);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let labels = [0, 0, 1, 1];
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]), 0.0);
    }

    #[test]
    fn test_auc_ties_share_rank() {
        // One tied pair across classes counts as half a win
        let labels = [0, 1, 0, 1];
        let auc = roc_auc(&labels, &[0.1, 0.5, 0.5, 0.9]);
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_is_nan() {
        assert!(roc_auc(&[1, 1, 1], &[0.2, 0.4, 0.9]).is_nan());
        assert!(roc_auc(&[], &[]).is_nan());
    }

    #[test]
    fn test_phase_accumulator_weights_loss_by_batch_size() {
        let mut acc = PhaseAccumulator::new();
        acc.add_batch(1.0, &[0, 1, 1], &[vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4]]);
        acc.add_batch(4.0, &[0], &[vec![0.3, 0.7]]);

        let metrics = acc.finish(2);
        assert!((metrics.loss - 7.0 / 4.0).abs() < 1e-12);
        assert!((metrics.accuracy - 0.5).abs() < 1e-12);
        assert_eq!(acc.predictions(), &[0, 1, 0, 1]);
        assert!(!acc.is_degenerate());
    }

    #[test]
    fn test_degenerate_predictions() {
        let mut acc = PhaseAccumulator::new();
        acc.add_batch(0.5, &[0, 1], &[vec![0.9, 0.1], vec![0.7, 0.3]]);
        assert!(acc.is_degenerate());
        assert!(!PhaseAccumulator::new().is_degenerate());
    }

    #[test]
    fn test_softmax_and_argmax() {
        let probs = softmax(&[1.0, 1.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert_eq!(argmax(&[0.2, 0.8]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }
}
