//! Conversion of Kubernetes quantity strings
//!
//! Usage samples from the metrics API are converted with the narrow rules the
//! frontend relies on: CPU `n`/`m` suffixes to millicores and memory `Ki`/`Mi`
//! suffixes to megabytes. Anything else converts to 0 and is treated as a
//! data-quality gap rather than an error.
//!
//! Node capacities use the general quantity grammar and are reported in cores
//! and GiB.

const NANOCORES_PER_MILLICORE: f64 = 1_000_000.0;
const KIB_PER_MIB: f64 = 1024.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CPU usage string to millicores (`"500000000n"` -> 500, `"250m"` -> 250)
pub fn cpu_usage_millicores(value: &str) -> f64 {
    if let Some(n) = value.strip_suffix('n') {
        parse_or_zero(n) / NANOCORES_PER_MILLICORE
    } else if let Some(m) = value.strip_suffix('m') {
        parse_or_zero(m)
    } else {
        0.0
    }
}

/// Memory usage string to megabytes (`"1048576Ki"` -> 1024, `"512Mi"` -> 512)
pub fn memory_usage_mb(value: &str) -> f64 {
    if let Some(ki) = value.strip_suffix("Ki") {
        parse_or_zero(ki) / KIB_PER_MIB
    } else if let Some(mi) = value.strip_suffix("Mi") {
        parse_or_zero(mi)
    } else {
        0.0
    }
}

fn parse_or_zero(number: &str) -> f64 {
    number.trim().parse::<f64>().unwrap_or(0.0)
}

/// Parse a full quantity (`"4"`, `"3500m"`, `"16318480Ki"`, `"2G"`, `"12e6"`)
/// to its base unit
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    if let Some(exponent) = decimal_exponent(suffix) {
        return Some(number * 10f64.powi(exponent));
    }

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => return None,
    };

    Some(number * multiplier)
}

/// `e3`, `E-2`; a bare `E` is the exa suffix instead
fn decimal_exponent(suffix: &str) -> Option<i32> {
    let digits = suffix.strip_prefix(|c: char| c == 'e' || c == 'E')?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// CPU capacity quantity to cores
pub fn capacity_cores(value: &str) -> f64 {
    parse_quantity(value).unwrap_or(0.0)
}

/// Memory capacity quantity to GiB
pub fn capacity_gib(value: &str) -> f64 {
    parse_quantity(value).map(|b| b / BYTES_PER_GIB).unwrap_or(0.0)
}
