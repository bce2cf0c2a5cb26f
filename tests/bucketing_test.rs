use flagsnap_lib::bucket::{bucket, BUCKET_COUNT};

const SAMPLES: usize = 10_000;

fn ids() -> Vec<String> {
    (0..SAMPLES).map(|i| format!("{:016x}", i)).collect()
}

fn buckets(salt: &str, key: &str) -> Vec<f64> {
    ids().iter().map(|id| bucket(salt, key, id) as f64).collect()
}

fn correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[test]
fn test_distinct_keys_are_uncorrelated() {
    let alpha = buckets("v1", "feature::global::alpha");
    let beta = buckets("v1", "feature::global::beta");
    let r = correlation(&alpha, &beta);
    assert!(r.abs() < 0.05, "r = {r}");
}

#[test]
fn test_salt_change_reshuffles() {
    let v1 = buckets("v1", "feature::global::alpha");
    let v2 = buckets("v2", "feature::global::alpha");
    let r = correlation(&v1, &v2);
    assert!(r.abs() < 0.05, "r = {r}");
}

#[test]
fn test_half_rollout_admits_about_half() {
    let admitted = buckets("v1", "feature::global::alpha")
        .iter()
        .filter(|&&b| b < 5_000.0)
        .count();
    let share = admitted as f64 / SAMPLES as f64;
    assert!((share - 0.5).abs() < 0.02, "share = {share}");
}

#[test]
fn test_buckets_spread_over_deciles() {
    let mut deciles = [0usize; 10];
    for b in buckets("v1", "feature::global::alpha") {
        assert!(b < BUCKET_COUNT as f64);
        deciles[(b as usize) / 1_000] += 1;
    }
    for (i, count) in deciles.iter().enumerate() {
        assert!((850..=1_150).contains(count), "decile {i} has {count}");
    }
}
