use logductd::config::Config;
use logductd::{fresh_start, init_tracing, restore_start, run};
use tracing::error;

fn main() {
    init_tracing();
    let cfg = Config::from_env();

    let event_loop = if cfg.restore { restore_start() } else { fresh_start(&cfg) };

    match event_loop {
        Ok(el) => run(el),
        Err(e) => {
            error!("fatal startup error: {}", e);
            std::process::exit(1);
        }
    }
}
