use std::io::Write;

use env_logger::{Builder, Env};

/// Initializes `env_logger` with the `<time> <LEVEL> :: <message>` layout.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} :: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
