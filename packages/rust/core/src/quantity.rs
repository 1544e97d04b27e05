//! Quantity resolution: turns a [`QuantitySpec`] into a concrete count.
//!
//! Resolution is a pure function of the quantity and the random source. The
//! context label only tags diagnostics, so the same seed always yields the
//! same counts regardless of how callers label them.

use rand::Rng;
use tracing::warn;

use fixturesmith_shared::{QuantitySpec, Warning};

/// Resolve `spec` to a count, logging (and discarding) any warnings.
pub fn resolve<R: Rng + ?Sized>(spec: &QuantitySpec, context: &str, rng: &mut R) -> u32 {
    let mut warnings = Vec::new();
    resolve_with(spec, context, rng, &mut warnings)
}

/// Resolve `spec` to a count, recording warnings into `warnings`.
///
/// Invalid specs never fail: they resolve to 0 and leave a
/// [`Warning::QuantitySpec`] tagged with `context`.
pub fn resolve_with<R: Rng + ?Sized>(
    spec: &QuantitySpec,
    context: &str,
    rng: &mut R,
    warnings: &mut Vec<Warning>,
) -> u32 {
    match spec {
        QuantitySpec::Exact(n) => *n,
        QuantitySpec::Range(min, max) => {
            let (lo, hi) = match (u32::try_from(*min), u32::try_from(*max)) {
                (Ok(lo), Ok(hi)) => (lo, hi),
                _ => {
                    return soft_fail(
                        context,
                        format!("range [{min}, {max}] has a negative or oversized bound"),
                        warnings,
                    );
                }
            };
            if lo > hi {
                return soft_fail(context, format!("range min {lo} exceeds max {hi}"), warnings);
            }
            rng.random_range(lo..=hi)
        }
        QuantitySpec::Probabilistic {
            chance,
            if_true,
            if_false,
        } => {
            // Also rejects NaN.
            if !(0.0..=1.0).contains(chance) {
                return soft_fail(
                    context,
                    format!("chance {chance} is outside [0, 1]"),
                    warnings,
                );
            }
            let roll: f64 = rng.random();
            let branch = if roll < *chance { if_true } else { if_false };
            resolve_with(branch, context, rng, warnings)
        }
        QuantitySpec::Malformed(reason) => soft_fail(context, reason.clone(), warnings),
    }
}

fn soft_fail(context: &str, reason: String, warnings: &mut Vec<Warning>) -> u32 {
    warn!(context, %reason, "invalid quantity spec, using 0");
    warnings.push(Warning::QuantitySpec {
        context: context.to_string(),
        reason,
    });
    0
}
