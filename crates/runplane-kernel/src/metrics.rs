use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{debug, error};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();
static MODEL_SELECTIONS: OnceCell<IntCounterVec> = OnceCell::new();
static QUOTA_EXHAUSTIONS: OnceCell<IntCounterVec> = OnceCell::new();
static PROXY_REQUESTS: OnceCell<IntCounterVec> = OnceCell::new();
static PROXY_TOKENS: OnceCell<IntCounterVec> = OnceCell::new();
static RUNS_FINISHED: OnceCell<IntCounterVec> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register_routing_metrics(registry);
        register_proxy_metrics(registry);
        register_run_metrics(registry);
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

fn register_counter(
    registry: &Registry,
    cell: &OnceCell<IntCounterVec>,
    name: &str,
    help: &str,
    labels: &[&str],
) {
    let counter =
        IntCounterVec::new(Opts::new(name, help), labels).expect("create prometheus counter");
    if let Err(err) = registry.register(Box::new(counter.clone())) {
        error!(?err, metric = name, "failed to register counter");
    }
    let _ = cell.set(counter);
}

fn register_routing_metrics(registry: &Registry) {
    register_counter(
        registry,
        &MODEL_SELECTIONS,
        "runplane_model_selections_total",
        "Model routing decisions grouped by model, step kind and fallback",
        &["model", "step_kind", "fallback"],
    );
    register_counter(
        registry,
        &QUOTA_EXHAUSTIONS,
        "runplane_quota_exhaustions_total",
        "Models marked exhausted within a run",
        &["model"],
    );
}

fn register_proxy_metrics(registry: &Registry) {
    register_counter(
        registry,
        &PROXY_REQUESTS,
        "runplane_proxy_requests_total",
        "Worker proxy calls grouped by kind and result",
        &["kind", "result"],
    );
    register_counter(
        registry,
        &PROXY_TOKENS,
        "runplane_proxy_tokens_total",
        "Proxy token issuance and validation outcomes",
        &["result"],
    );
}

fn register_run_metrics(registry: &Registry) {
    register_counter(
        registry,
        &RUNS_FINISHED,
        "runplane_runs_finished_total",
        "Runs reaching a terminal status",
        &["status"],
    );
}

pub fn record_model_selection(model: &str, step_kind: &str, fallback: bool) {
    register_metrics();
    if let Some(counter) = MODEL_SELECTIONS.get() {
        let fallback = if fallback { "true" } else { "false" };
        counter
            .with_label_values(&[model, step_kind, fallback])
            .inc();
    }
}

pub fn record_quota_exhaustion(model: &str) {
    register_metrics();
    if let Some(counter) = QUOTA_EXHAUSTIONS.get() {
        counter.with_label_values(&[model]).inc();
    }
    debug!(target = "routing", %model, "quota exhaustion recorded");
}

pub fn record_proxy_request(kind: &str, result: &str) {
    register_metrics();
    if let Some(counter) = PROXY_REQUESTS.get() {
        counter.with_label_values(&[kind, result]).inc();
    }
}

pub fn record_proxy_token(result: &str) {
    register_metrics();
    if let Some(counter) = PROXY_TOKENS.get() {
        counter.with_label_values(&[result]).inc();
    }
}

pub fn record_run_finished(status: &str) {
    register_metrics();
    if let Some(counter) = RUNS_FINISHED.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Renders the registry in the Prometheus text format with its content type.
pub fn render() -> Result<(String, String), String> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .map_err(|err| err.to_string())?;
    let body = String::from_utf8(buffer).map_err(|err| err.to_string())?;
    Ok((encoder.format_type().to_string(), body))
}
