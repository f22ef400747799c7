use std::time::Instant;

/// Logs time elapsed since `tt`; no-op unless the `metrics` feature is
/// enabled.
#[cfg(feature = "metrics")]
pub fn metric(label: &str, tt: Instant) {
    log::trace!(
        "metric: {label} = {}",
        humantime::format_duration(tt.elapsed())
    );
}

#[cfg(not(feature = "metrics"))]
pub fn metric(_: &str, _: Instant) {
    //
}
