use std::net::SocketAddr;

use crate::service::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotcheck_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotcheck_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: committed checkouts.
pub const CHECKOUTS_TOTAL: &str = "slotcheck_checkouts_total";

/// Counter: checkouts rolled back after a log failure.
pub const CHECKOUT_ROLLBACKS_TOTAL: &str = "slotcheck_checkout_rollbacks_total";

/// Counter: enrollments created by checkout.
pub const ENROLLMENTS_CREATED_TOTAL: &str = "slotcheck_enrollments_created_total";

/// Counter: reservations voided by their timer. Labels: via (lazy, sweep).
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "slotcheck_reservations_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotcheck_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotcheck_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotcheck_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotcheck_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotcheck_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::RegisterBusiness { .. } => "register_business",
        Request::SaveBatch { .. } => "save_batch",
        Request::CancelBatch { .. } => "cancel_batch",
        Request::GetBatch { .. } => "get_batch",
        Request::ListBatches { .. } => "list_batches",
        Request::CheckAdd { .. } => "check_add",
        Request::AddToReservation { .. } => "add_to_reservation",
        Request::RemoveFromReservation { .. } => "remove_from_reservation",
        Request::ClearReservation { .. } => "clear_reservation",
        Request::RemainingSeconds { .. } => "remaining_seconds",
        Request::GetReservation { .. } => "get_reservation",
        Request::Checkout { .. } => "checkout",
        Request::CancelEnrollment { .. } => "cancel_enrollment",
        Request::SwitchEnrollment { .. } => "switch_enrollment",
        Request::SetAutoRenew { .. } => "set_auto_renew",
        Request::GetEnrollment { .. } => "get_enrollment",
        Request::StudentEnrollments { .. } => "student_enrollments",
        Request::GetTransaction { .. } => "get_transaction",
        Request::StudentTransactions { .. } => "student_transactions",
    }
}
