pub fn assert_exact(label: &str, expected: f64, got: f64) {
    assert!(
        expected == got,
        "{}: expected exactly {:.9}, got {:.9}",
        label,
        expected,
        got
    );
}

pub fn assert_rel_close(label: &str, expected: f64, got: f64, rtol: f64) {
    let denom = expected.abs().max(1e-300);
    let rel = ((expected - got).abs()) / denom;
    assert!(
        rel < rtol,
        "{}: expected ~= {:.9}, got {:.9}, rel_err={:.6e}, rtol={:.6e}",
        label,
        expected,
        got,
        rel,
        rtol
    );
}

/// `|expected − got| <= atol + rtol·|expected|`, for values that may be zero.
pub fn assert_close(label: &str, expected: f64, got: f64, rtol: f64, atol: f64) {
    let err = (expected - got).abs();
    assert!(
        err <= atol + rtol * expected.abs(),
        "{}: expected ~= {:.12}, got {:.12}, abs_err={:.3e} (rtol={:.1e}, atol={:.1e})",
        label,
        expected,
        got,
        err,
        rtol,
        atol
    );
}

pub fn assert_monotone_chain(label: &str, values: &[f64]) {
    for i in 1..values.len() {
        assert!(
            values[i] >= values[i - 1],
            "{}: non-monotone at i={}: {} < {}",
            label,
            i,
            values[i],
            values[i - 1]
        );
    }
}

/// Every value finite; guards must never leak NaN or infinity.
pub fn assert_all_finite(label: &str, values: &[f64]) {
    for (i, v) in values.iter().enumerate() {
        assert!(v.is_finite(), "{}: non-finite value {} at i={}", label, v, i);
    }
}
