use tracing_subscriber::{filter::Directive, EnvFilter};

/// Install the fmt subscriber. `RUST_LOG` wins; otherwise the library and
/// `bin_target` log at info.
pub fn init_tracing(bin_target: &str) {
    let mut filter = EnvFilter::from_default_env();
    for target in ["pv_simulator", bin_target] {
        if let Ok(directive) = format!("{target}=info").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
