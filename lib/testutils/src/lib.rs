pub fn float_eq(v1: f64, v2: f64, epsilon: f64) -> bool {
    let diff = (v1 - v2).abs();
    diff <= epsilon
}

pub fn assert_float_eq(v1: f64, v2: f64, epsilon: f64) {
    if !float_eq(v1, v2, epsilon) {
        panic!(
            "{} != {} (difference={}, epsilon={})",
            v1,
            v2,
            (v1 - v2).abs(),
            epsilon
        );
    }
}

/// Asserts that two byte slices have the same length and differ by at most
/// `epsilon` per element.
pub fn assert_bytes_close(b1: &[u8], b2: &[u8], epsilon: u8) {
    assert_eq!(
        b1.len(),
        b2.len(),
        "length mismatch: {} != {}",
        b1.len(),
        b2.len()
    );
    for (i, (a, b)) in b1.iter().zip(b2.iter()).enumerate() {
        let diff = a.abs_diff(*b);
        if diff > epsilon {
            panic!(
                "byte {} differs: {} != {} (difference={}, epsilon={})",
                i, a, b, diff, epsilon
            );
        }
    }
}
