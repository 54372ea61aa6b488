//! Lenient deserializers for device-reported numeric fields.
//!
//! Upstream reporters are inconsistent about JSON types: the same field may
//! arrive as `-65`, `-65.0`, or `"-65"` depending on the app version.  These
//! helpers accept either form.  An uncoercible value (e.g. `"n/a"`) becomes
//! `None` so the surrounding record survives with that field dropped.

use serde::{Deserialize, Deserializer};

/// A JSON scalar that may carry a numeric value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Num(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Num(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
            Scalar::Bool(_) => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            // Device timestamps fit in 2^53 so the f64 detour is lossless.
            Scalar::Num(n) if n.fract() == 0.0 => Some(*n as i64),
            Scalar::Num(_) => None,
            Scalar::Text(s) => s.trim().parse::<i64>().ok(),
            Scalar::Bool(_) => None,
        }
    }
}

/// Accept a float, an integer, or a numeric string; `None` otherwise.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Scalar>::deserialize(deserializer)?;
    Ok(v.and_then(|s| s.as_f64()))
}

/// Accept an integer or a numeric string; `None` otherwise (including floats
/// with a fractional part).
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Scalar>::deserialize(deserializer)?;
    Ok(v.and_then(|s| s.as_i64()))
}

/// Like [`opt_i64`] but narrowed to `i32`; out-of-range values are dropped.
pub fn opt_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Scalar>::deserialize(deserializer)?;
    Ok(v.and_then(|s| s.as_i64()).and_then(|n| i32::try_from(n).ok()))
}

/// Accept a non-negative integer or numeric string; `None` otherwise.
pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Scalar>::deserialize(deserializer)?;
    Ok(v.and_then(|s| s.as_i64()).and_then(|n| u64::try_from(n).ok()))
}

/// Accept a string or a number rendered as its decimal string.
///
/// Used for `data_version`, which some reporters send as `3` and others as
/// `"3"`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Scalar>::deserialize(deserializer)?;
    Ok(v.map(|s| match s {
        Scalar::Text(t) => t,
        Scalar::Num(n) if n.fract() == 0.0 => format!("{}", n as i64),
        Scalar::Num(n) => format!("{n}"),
        Scalar::Bool(b) => format!("{b}"),
    }))
}
