/// Running moving average (Wilder's RMA)
///
/// Exponential smoothing with alpha = 1/period, seeded with the first value.
/// The output has the same length as the input.
pub fn calculate_rma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };

    let alpha = 1.0 / period.max(1) as f64;
    let mut rma = first;
    out.push(rma);

    for value in &values[1..] {
        rma = alpha * value + (1.0 - alpha) * rma;
        out.push(rma);
    }

    out
}
