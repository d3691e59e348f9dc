//! Shared utility functions.

/// Round a simulation time to one decimal place.
///
/// Checkpoint advancement and forced-frame injection both funnel through
/// this helper so that a checkpoint time and a forced-frame time for "the
/// same" instant always produce the same chunk/frame key, suppressing
/// floating-point drift across repeated `+= query_interval` additions.
pub fn round1(t: f64) -> f64 {
    (t * 10.0).round() / 10.0
}

/// Turn a simulation time into a hashable, exactly-comparable chunk key.
///
/// `f64` has neither `Eq` nor `Hash`; since every time used as a key has
/// already passed through [`round1`], scaling by 10 and truncating to an
/// integer is exact (no further rounding error is introduced) and gives a
/// key type that behaves correctly in a `HashMap`.
pub fn time_key(t: f64) -> i64 {
    (round1(t) * 10.0).round() as i64
}

/// Quote a SQL identifier for interpolation into a statement, doubling any
/// embedded double-quotes. Table and column names here come from the
/// journal's own metadata tables, never from untrusted external input, but
/// quoting keeps names containing spaces or reserved words working.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
