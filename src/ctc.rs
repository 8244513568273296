//! Connectionist temporal classification: loss, greedy decoding and label error rate.
//!
//! The blank is the last class (`num_classes - 1`), matching the vocabulary layout of
//! [`Symbols`](crate::dataset::Symbols).

use burn::tensor::{activation::log_softmax, backend::Backend, Int, Tensor, TensorData};

use crate::error::{AsrError, Result};

// Stands in for log(0): finite so that log-sum-exp never sees `-inf - -inf`
const LOG_ZERO: f32 = -1e30;

/// Mean negative log-likelihood of `targets` under the per-frame class scores.
///
/// # Arguments
/// - `logits`: unnormalized scores `[time, batch, num_classes]`
/// - `targets`: label ids per utterance, none of them the blank
/// - `input_lengths`: valid frames per utterance; frames past it are ignored
///
/// # Returns
/// Scalar loss `[1]`, differentiable with respect to `logits`.
pub fn ctc_loss<B: Backend>(
    logits: Tensor<B, 3>,
    targets: &[Vec<u32>],
    input_lengths: &[usize],
) -> Result<Tensor<B, 1>> {
    let [time, batch, num_classes] = logits.dims();
    validate(time, batch, num_classes, targets, input_lengths)?;

    let device = logits.device();
    let blank = (num_classes - 1) as i64;
    let max_labels = targets.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let width = 2 * max_labels + 1;

    // Blank-extended label sequences and the additive masks that drive the recursion
    let mut extended = vec![blank; batch * width];
    let mut skip_mask = vec![LOG_ZERO; batch * width];
    let mut start_mask = vec![LOG_ZERO; batch * width];
    let mut end_index = vec![0i64; batch * 2];
    let mut end_mask = vec![LOG_ZERO; batch * 2];

    for (b, labels) in targets.iter().enumerate() {
        let row = b * width;
        for (i, &label) in labels.iter().enumerate() {
            let s = 2 * i + 1;
            extended[row + s] = label as i64;
            if i > 0 && labels[i - 1] != label {
                skip_mask[row + s] = 0.0;
            }
        }

        start_mask[row] = 0.0;
        end_index[2 * b] = (2 * labels.len()) as i64;
        end_mask[2 * b] = 0.0;
        if !labels.is_empty() {
            start_mask[row + 1] = 0.0;
            end_index[2 * b + 1] = (2 * labels.len() - 1) as i64;
            end_mask[2 * b + 1] = 0.0;
        }
    }

    let mut active = vec![0.0f32; time * batch];
    for (b, &length) in input_lengths.iter().enumerate() {
        for t in 0..length {
            active[t * batch + b] = 1.0;
        }
    }

    let floats = |data: Vec<f32>, shape: [usize; 2]| {
        Tensor::<B, 2>::from_data(TensorData::new(data, shape).convert::<B::FloatElem>(), &device)
    };
    let ints = |data: Vec<i64>, shape: [usize; 2]| {
        Tensor::<B, 2, Int>::from_data(TensorData::new(data, shape).convert::<B::IntElem>(), &device)
    };

    let extended = ints(extended, [batch, width]);
    let skip_mask = floats(skip_mask, [batch, width]);
    let start_mask = floats(start_mask, [batch, width]);
    let end_index = ints(end_index, [batch, 2]);
    let end_mask = floats(end_mask, [batch, 2]);
    let active = floats(active, [time, batch]);

    let log_probs = log_softmax(logits, 2);
    let emissions = |t: usize| {
        log_probs
            .clone()
            .slice([t..t + 1, 0..batch, 0..num_classes])
            .reshape([batch, num_classes])
            .gather(1, extended.clone())
    };
    let log_zero = |columns: usize| Tensor::<B, 2>::full([batch, columns], LOG_ZERO, &device);

    let mut alpha = emissions(0) + start_mask;
    for t in 1..time {
        let stay = alpha.clone();
        let step = Tensor::cat(
            vec![log_zero(1), alpha.clone().slice([0..batch, 0..width - 1])],
            1,
        );
        let skip = Tensor::cat(
            vec![log_zero(2), alpha.clone().slice([0..batch, 0..width - 2])],
            1,
        ) + skip_mask.clone();

        let next = log_add_exp(stay, step, skip) + emissions(t);

        // Utterances that already ended keep their final alphas
        let mask = active.clone().slice([t..t + 1, 0..batch]).reshape([batch, 1]);
        alpha = next * mask.clone() + alpha * mask.neg().add_scalar(1.0);
    }

    let ends = alpha.gather(1, end_index) + end_mask;
    let log_likelihood = log_add_exp_dim(ends);

    Ok(log_likelihood.neg().mean())
}

fn validate(
    time: usize,
    batch: usize,
    num_classes: usize,
    targets: &[Vec<u32>],
    input_lengths: &[usize],
) -> Result<()> {
    if num_classes < 2 {
        return Err(AsrError::Dataset(format!(
            "CTC needs at least one label besides the blank, got {num_classes} classes"
        )));
    }
    if targets.len() != batch || input_lengths.len() != batch {
        return Err(AsrError::Dataset(format!(
            "batch of {batch} logits with {} targets and {} lengths",
            targets.len(),
            input_lengths.len()
        )));
    }

    let blank = (num_classes - 1) as u32;
    for (b, (labels, &length)) in targets.iter().zip(input_lengths).enumerate() {
        if length == 0 || length > time {
            return Err(AsrError::Dataset(format!(
                "utterance {b} has length {length}, logits have {time} frames"
            )));
        }
        if let Some(label) = labels.iter().find(|&&label| label >= blank) {
            return Err(AsrError::Dataset(format!(
                "utterance {b} has label {label}, valid labels are below the blank {blank}"
            )));
        }
        // each repeated label needs a blank frame in between
        let repeats = labels.windows(2).filter(|pair| pair[0] == pair[1]).count();
        if labels.len() + repeats > length {
            return Err(AsrError::Dataset(format!(
                "utterance {b} needs at least {} frames for its {} labels, got {length}",
                labels.len() + repeats,
                labels.len()
            )));
        }
    }
    Ok(())
}

/// Element-wise `log(exp(a) + exp(b) + exp(c))`.
fn log_add_exp<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>, c: Tensor<B, 2>) -> Tensor<B, 2> {
    let max = a.clone().max_pair(b.clone()).max_pair(c.clone()).detach();
    let sum = (a - max.clone()).exp() + (b - max.clone()).exp() + (c - max.clone()).exp();

    max + sum.log()
}

/// `log(sum(exp(x)))` along the last axis of `[batch, n]`, returning `[batch]`.
fn log_add_exp_dim<B: Backend>(input: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = input.dims();
    let max = input.clone().max_dim(1).detach();
    let sum = (input - max.clone()).exp().sum_dim(1);

    (max + sum.log()).reshape([batch])
}

/// Best path decoding: arg-max class per frame, repeats merged, blanks removed.
///
/// # Arguments
/// - `logits`: `[time, batch, num_classes]`
/// - `lengths`: valid frames per utterance
pub fn greedy_decode<B: Backend>(logits: Tensor<B, 3>, lengths: &[usize]) -> Result<Vec<Vec<u32>>> {
    let [time, batch, num_classes] = logits.dims();
    if lengths.len() != batch {
        return Err(AsrError::Dataset(format!(
            "batch of {batch} logits with {} lengths",
            lengths.len()
        )));
    }
    let blank = (num_classes - 1) as u32;

    let best = logits
        .argmax(2)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| AsrError::TensorData(format!("{err:?}")))?;

    let decoded = lengths
        .iter()
        .enumerate()
        .map(|(b, &length)| {
            let mut labels = Vec::new();
            let mut previous = None;
            for t in 0..length.min(time) {
                let id = best[t * batch + b] as u32;
                if Some(id) != previous && id != blank {
                    labels.push(id);
                }
                previous = Some(id);
            }
            labels
        })
        .collect();

    Ok(decoded)
}

/// Levenshtein distance between two label sequences.
pub fn edit_distance<T: PartialEq>(hypothesis: &[T], reference: &[T]) -> usize {
    let mut row: Vec<usize> = (0..=reference.len()).collect();

    for (i, h) in hypothesis.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, r) in reference.iter().enumerate() {
            let substitution = diagonal + usize::from(h != r);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }

    row[reference.len()]
}

/// Mean of `edit_distance / reference_length` over the batch.
///
/// An empty reference scores 0 against an empty hypothesis and 1 otherwise.
pub fn label_error_rate(hypotheses: &[Vec<u32>], references: &[Vec<u32>]) -> Result<f64> {
    if hypotheses.len() != references.len() {
        return Err(AsrError::Dataset(format!(
            "{} hypotheses for {} references",
            hypotheses.len(),
            references.len()
        )));
    }
    if references.is_empty() {
        return Ok(0.0);
    }

    let total: f64 = hypotheses
        .iter()
        .zip(references)
        .map(|(hypothesis, reference)| match reference.len() {
            0 if hypothesis.is_empty() => 0.0,
            0 => 1.0,
            len => edit_distance(hypothesis, reference) as f64 / len as f64,
        })
        .sum();

    Ok(total / references.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    fn logits_from(values: &[f32], shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values.to_vec(), shape), &Default::default())
    }

    fn scalar(tensor: Tensor<B, 1>) -> f32 {
        tensor.into_scalar()
    }

    #[test]
    fn uniform_scores_count_alignments() {
        // 3 frames, 2 classes (label 0 and blank 1), all scores equal: every path has
        // probability 1/8. Alignments of [0]: 0bb, b0b, bb0, 00b, b00, 000 -> 6 paths.
        let logits = logits_from(&[0.0; 6], [3, 1, 2]);
        let loss = scalar(ctc_loss(logits, &[vec![0]], &[3]).unwrap());

        let expected = -(6.0f32 / 8.0).ln();
        assert!((loss - expected).abs() < 1e-5, "{loss} != {expected}");
    }

    #[test]
    fn repeated_labels_need_a_blank() {
        // [0, 0] over 3 frames has the single alignment 0 b 0 -> 1/8
        let logits = logits_from(&[0.0; 6], [3, 1, 2]);
        let loss = scalar(ctc_loss(logits, &[vec![0, 0]], &[3]).unwrap());

        assert!((loss - 8.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn empty_target_is_all_blanks() {
        let logits = logits_from(&[0.0; 4], [2, 1, 2]);
        let loss = scalar(ctc_loss(logits, &[vec![]], &[2]).unwrap());

        assert!((loss - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn frames_past_the_length_are_ignored() {
        // batch of two, second utterance only uses 2 of the 3 frames:
        // [0] over 2 frames: 0b, b0, 00 -> 3/4
        let logits = logits_from(&[0.0; 12], [3, 2, 2]);
        let loss = scalar(ctc_loss(logits, &[vec![0], vec![0]], &[3, 2]).unwrap());

        let expected = (-(6.0f32 / 8.0).ln() - (3.0f32 / 4.0).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn confident_correct_scores_have_low_loss() {
        // labels [0, 1] with blank 2, frames strongly predict 0, 1
        let logits = logits_from(&[10.0, 0.0, 0.0, 0.0, 10.0, 0.0], [2, 1, 3]);
        let loss = scalar(ctc_loss(logits, &[vec![0, 1]], &[2]).unwrap());
        assert!(loss < 1e-3);
    }

    #[test]
    fn loss_is_differentiable() {
        type AD = Autodiff<B>;
        let device = Default::default();
        let logits = Tensor::<AD, 1>::from_floats([0.5, -0.2, 0.1, 0.3, 0.0, -0.4], &device)
            .reshape([3, 1, 2])
            .require_grad();

        let loss = ctc_loss(logits.clone(), &[vec![0]], &[3]).unwrap();
        let grads = loss.backward();
        let grad = logits.grad(&grads).unwrap();

        let values = grad.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        // softmax gradients sum to zero over the classes of each frame
        for frame in values.chunks(2) {
            assert!((frame[0] + frame[1]).abs() < 1e-5);
        }
    }

    #[test]
    fn rejects_impossible_alignments() {
        let logits = logits_from(&[0.0; 4], [2, 1, 2]);
        assert!(ctc_loss(logits.clone(), &[vec![0, 0]], &[2]).is_err());
        assert!(ctc_loss(logits.clone(), &[vec![1]], &[2]).is_err());
        assert!(ctc_loss(logits, &[vec![0]], &[3]).is_err());
    }

    #[test]
    fn greedy_decoding_merges_repeats_and_drops_blanks() {
        // classes: 0, 1, blank 2; best path per frame: 0 0 2 0 1 1 2
        let best = [0, 0, 2, 0, 1, 1, 2];
        let mut values = Vec::new();
        for class in best {
            let mut frame = [0.0f32; 3];
            frame[class] = 1.0;
            values.extend_from_slice(&frame);
        }
        let logits = logits_from(&values, [7, 1, 3]);

        assert_eq!(greedy_decode(logits.clone(), &[7]).unwrap(), vec![vec![0, 0, 1]]);
        assert_eq!(greedy_decode(logits, &[2]).unwrap(), vec![vec![0]]);
    }

    #[test]
    fn edit_distance_and_error_rate() {
        assert_eq!(edit_distance(b"kitten", b"sitting"), 3);
        assert_eq!(edit_distance::<u32>(&[], &[1, 2]), 2);
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 2, 3]), 0);

        let rate = label_error_rate(&[vec![1, 2], vec![], vec![5]], &[vec![1, 3], vec![], vec![]])
            .unwrap();
        assert!((rate - (0.5 + 0.0 + 1.0) / 3.0).abs() < 1e-12);

        assert!(matches!(
            label_error_rate(&[vec![1]], &[vec![1], vec![2]]),
            Err(AsrError::Dataset(_))
        ));
    }
}
