//! Tracing setup and queue designator labels.

/// Initialize a tracing subscriber honoring `RUST_LOG`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

/// Build the queue designator used to label every log line a queue emits,
/// e.g. `DQM-accounts-00-SMFC`. Queue 00 is the lead; its implicit `L` tag
/// is omitted.
pub fn queue_designator(database: &str, queue_number: usize, tags: &str) -> String {
    let shown: String = if queue_number == 0 {
        tags.chars().filter(|&c| c != 'L').collect()
    } else {
        tags.to_string()
    };
    format!("DQM-{database}-{queue_number:02}-{shown}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_designator_drops_implicit_lead_tag() {
        assert_eq!(queue_designator("accounts", 0, "LSMFC"), "DQM-accounts-00-SMFC");
        assert_eq!(queue_designator("accounts", 3, "F"), "DQM-accounts-03-F");
    }
}
