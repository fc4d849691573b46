use metrics_exporter_prometheus::PrometheusBuilder;

use crate::core::config::Settings;

pub(crate) const STATUS_POLLS: &str = "wavy_status_polls_total";
pub(crate) const SUBMISSIONS: &str = "wavy_submissions_total";
pub(crate) const ANSWERS_RECORDED: &str = "wavy_answers_recorded_total";
pub(crate) const PUSH_MESSAGES: &str = "wavy_push_messages_total";

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    let Some(addr) = settings.telemetry().metrics_addr else {
        return Ok(());
    };

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

pub(crate) fn record_poll(outcome: &'static str) {
    metrics::counter!(STATUS_POLLS, "outcome" => outcome).increment(1);
}

pub(crate) fn record_submission(outcome: &'static str) {
    metrics::counter!(SUBMISSIONS, "outcome" => outcome).increment(1);
}

pub(crate) fn record_answer() {
    metrics::counter!(ANSWERS_RECORDED).increment(1);
}

pub(crate) fn record_push_message() {
    metrics::counter!(PUSH_MESSAGES).increment(1);
}
