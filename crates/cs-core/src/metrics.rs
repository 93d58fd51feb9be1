use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

struct Metrics {
    registry: Registry,
    cs_up: IntGaugeVec,
    public_key_downloader_count: IntGauge,
    public_key_downloader_relays_count: IntGaugeVec,
    relay_connection_state: IntGaugeVec,
    directory_lookups_total: IntCounterVec,
    received_events_total: IntCounter,
}

pub const DIRECTORY_LOOKUP_RESULT_SUCCESS: &str = "success";
pub const DIRECTORY_LOOKUP_RESULT_NOT_FOUND: &str = "not_found";
pub const DIRECTORY_LOOKUP_RESULT_ERROR: &str = "error";

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let cs_up = IntGaugeVec::new(Opts::new("cs_up", "Service health"), &["service"])
            .expect("cs_up metric");

        let public_key_downloader_count = IntGauge::with_opts(Opts::new(
            "public_key_downloader_count",
            "Number of running public key downloaders",
        ))
        .expect("public_key_downloader_count metric");

        let public_key_downloader_relays_count = IntGaugeVec::new(
            Opts::new(
                "public_key_downloader_relays_count",
                "Number of relays for a public key downloader",
            ),
            &["public_key"],
        )
        .expect("public_key_downloader_relays_count metric");

        let relay_connection_state = IntGaugeVec::new(
            Opts::new("relay_connection_state", "State of relay connection"),
            &["relay_address", "state"],
        )
        .expect("relay_connection_state metric");

        let directory_lookups_total = IntCounterVec::new(
            Opts::new("directory_lookups_total", "Number of relay directory lookups"),
            &["directory", "result"],
        )
        .expect("directory_lookups_total metric");

        let received_events_total = IntCounter::with_opts(Opts::new(
            "received_events_total",
            "Number of events forwarded from relays into the pipeline",
        ))
        .expect("received_events_total metric");

        registry
            .register(Box::new(cs_up.clone()))
            .expect("register cs_up");
        registry
            .register(Box::new(public_key_downloader_count.clone()))
            .expect("register public_key_downloader_count");
        registry
            .register(Box::new(public_key_downloader_relays_count.clone()))
            .expect("register public_key_downloader_relays_count");
        registry
            .register(Box::new(relay_connection_state.clone()))
            .expect("register relay_connection_state");
        registry
            .register(Box::new(directory_lookups_total.clone()))
            .expect("register directory_lookups_total");
        registry
            .register(Box::new(received_events_total.clone()))
            .expect("register received_events_total");

        Metrics {
            registry,
            cs_up,
            public_key_downloader_count,
            public_key_downloader_relays_count,
            relay_connection_state,
            directory_lookups_total,
            received_events_total,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().cs_up.with_label_values(&[service_name]).set(1);
}

pub fn set_public_key_downloaders(count: usize) {
    metrics()
        .public_key_downloader_count
        .set(count.min(i64::MAX as usize) as i64);
}

pub fn set_public_key_downloader_relays(public_key: &str, count: usize) {
    metrics()
        .public_key_downloader_relays_count
        .with_label_values(&[public_key])
        .set(count.min(i64::MAX as usize) as i64);
}

/// Drops the series of a stopped downloader so it stops being exported.
pub fn remove_public_key_downloader_relays(public_key: &str) {
    if let Err(err) = metrics()
        .public_key_downloader_relays_count
        .remove_label_values(&[public_key])
    {
        tracing::trace!(public_key, error = %err, "no relay count series to remove");
    }
}

/// Tri-state gauge: the active state is set to 1 and every other known state
/// of the same relay to 0.
pub fn set_relay_connection_state(relay_address: &str, active: &str, all_states: &[&str]) {
    let gauge = &metrics().relay_connection_state;
    for state in all_states {
        let value = if *state == active { 1 } else { 0 };
        gauge.with_label_values(&[relay_address, state]).set(value);
    }
}

pub fn inc_directory_lookup(directory: &str, result: &'static str) {
    metrics()
        .directory_lookups_total
        .with_label_values(&[directory, result])
        .inc();
}

pub fn inc_received_events() {
    metrics().received_events_total.inc();
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let metric_families = metrics().registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).to_string()
}
