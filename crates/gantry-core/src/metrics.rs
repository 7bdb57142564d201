//! Metric definitions for the gantry deployment pipeline.
//!
//! Counters are recorded through the `metrics` facade at the upload,
//! publish, and mining hot paths. gantry installs no recorder of its own (a
//! deployment run is a short-lived process with no listening surface); an
//! embedding application can install one before calling into the engine and
//! will see every series described here.
//!
//! # Naming
//!
//! Names carry the pipeline stage as a prefix (`upload_`, `publish_`,
//! `pow_`) and the unit or type as a suffix (`_total`, `_bytes`). Labels
//! are kept to low-cardinality result tags.

use metrics::describe_counter;

/// Register descriptions for every metric gantry records.
///
/// Call once at startup, after any recorder is installed.
pub fn describe_metrics() {
    // =========================================================================
    // Upload Engine Metrics
    // =========================================================================

    describe_counter!(
        "upload_attempts_total",
        "Upload attempts per (file, server) pair (label: result)"
    );
    describe_counter!(
        "upload_skipped_total",
        "Uploads skipped because the server already holds the blob"
    );
    describe_counter!(
        "upload_bytes_total",
        "Bytes actually transferred to storage servers"
    );

    // =========================================================================
    // Publisher Metrics
    // =========================================================================

    describe_counter!(
        "publish_events_total",
        "Events published, by overall outcome (label: result)"
    );
    describe_counter!(
        "publish_relay_results_total",
        "Per-relay publish results (label: result)"
    );

    // =========================================================================
    // Proof-of-Work Metrics
    // =========================================================================

    describe_counter!(
        "pow_attempts_total",
        "Mining runs, by outcome (label: outcome)"
    );
}
