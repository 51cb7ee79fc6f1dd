use tracing_subscriber::EnvFilter;

/// Targets that flood debug-level output with per-frame wire chatter.
/// The relay's own spans stay at the requested level; these are capped
/// at warn unless `RUST_LOG` says otherwise.
const NOISY_TARGETS: &[&str] = &["lapin", "pinky_swear", "polling", "async_io"];

fn default_filter(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Initialize logging for the relay binary.
///
/// `RUST_LOG` takes full control when set; otherwise the given level
/// applies to the relay crates while the AMQP wire stack is quieted.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
