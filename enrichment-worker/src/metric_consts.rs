pub const MESSAGES_RECEIVED: &str = "enrichment_messages_received_total";
pub const MESSAGES_HANDLED: &str = "enrichment_messages_handled_total";
pub const MESSAGES_QUARANTINED: &str = "enrichment_messages_quarantined_total";
pub const DECODE_ERRORS: &str = "enrichment_decode_errors_total";
pub const LOOKUP_DURATION: &str = "enrichment_lookup_duration_seconds";
pub const STORE_DURATION: &str = "enrichment_store_duration_seconds";
pub const NO_ROWS_UPDATED: &str = "enrichment_no_rows_updated_total";
