use comms::Frame;
use log::warn;

use crate::{MlErr, Result};

/// The metric carrying the amount of samples a delta was trained on.
pub const NUM_EXAMPLES: &str = "num_examples";

/// Averages the adapter deltas carried by `updates`.
///
/// Each update is weighted by its `num_examples` metric. When no update reports a
/// positive example count the plain mean is used instead.
///
/// # Returns
/// `None` if there are no updates, otherwise the averaged `A` and `B` deltas.
pub fn fedavg(updates: &[Frame]) -> Result<Option<(Vec<f32>, Vec<f32>)>> {
    let Some(first) = updates.first() else {
        return Ok(None);
    };

    let (a_len, b_len) = (first.a.len(), first.b.len());
    for update in updates {
        check("A delta", update.a.len(), a_len)?;
        check("B delta", update.b.len(), b_len)?;
    }

    let counts: Vec<f64> = updates
        .iter()
        .map(|u| u.metadata.metric(NUM_EXAMPLES).unwrap_or(0.).max(0.))
        .collect();

    let total: f64 = counts.iter().sum();
    let weights: Vec<f64> = if total > 0. {
        counts.iter().map(|c| c / total).collect()
    } else {
        warn!(updates = updates.len(); "no update reports examples, using the plain mean");
        vec![1. / updates.len() as f64; updates.len()]
    };

    let mut a = vec![0f64; a_len];
    let mut b = vec![0f64; b_len];

    for (update, weight) in updates.iter().zip(&weights) {
        accumulate(&mut a, &update.a, *weight);
        accumulate(&mut b, &update.b, *weight);
    }

    let narrow = |v: Vec<f64>| v.into_iter().map(|x| x as f32).collect();
    Ok(Some((narrow(a), narrow(b))))
}

/// Adds `delta` to `weights` elementwise.
pub fn apply_delta(weights: &mut [f32], delta: &[f32]) -> Result<()> {
    check("delta", delta.len(), weights.len())?;
    weights.iter_mut().zip(delta).for_each(|(w, d)| *w += d);
    Ok(())
}

fn accumulate(acc: &mut [f64], values: &[f32], weight: f64) {
    acc.iter_mut()
        .zip(values)
        .for_each(|(acc, v)| *acc += *v as f64 * weight);
}

fn check(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::ShapeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}
