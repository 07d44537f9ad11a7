/// Daemon configuration.
///
/// Argument parsing proper belongs to an external launcher in the real
/// system; this stays a minimal positional/flag walk over `env::args()`,
/// with an environment-variable fallback for every flag, matching the
/// `JTAG_LOG_DIR`-style overrides used by the other worker daemons in this
/// codebase.
use std::env;

pub const DEFAULT_SOCKET: &str = "/run/logduct.sock";
pub const DEFAULT_LOG_DIR: &str = "/logs";
pub const DEFAULT_IDLE_SECS: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub socket: String,
    pub log_dir: String,
    pub idle_secs: f64,
    pub trust_blindly: bool,
    /// Internal only: set when re-executed by `ReloadCoordinator`. Not
    /// documented on the command line and has no environment fallback.
    pub restore: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: DEFAULT_SOCKET.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            idle_secs: DEFAULT_IDLE_SECS,
            trust_blindly: false,
            restore: false,
        }
    }
}

impl Config {
    /// Parse configuration from the process's own arguments and
    /// environment. Unknown flags are ignored rather than treated as
    /// fatal, since this daemon has no user-facing CLI surface of its
    /// own beyond what the launcher passes it.
    pub fn from_env() -> Self {
        let mut cfg = Config {
            socket: env::var("LOGDUCTD_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET.to_string()),
            log_dir: env::var("LOGDUCTD_LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string()),
            idle_secs: env::var("LOGDUCTD_IDLE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_IDLE_SECS),
            trust_blindly: env::var("LOGDUCTD_TRUST_BLINDLY").is_ok(),
            restore: false,
        };

        let args: Vec<String> = env::args().collect();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-s" | "--socket" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cfg.socket = v.clone();
                    }
                }
                "-d" | "--logdir" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cfg.log_dir = v.clone();
                    }
                }
                "--idle" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        if let Ok(secs) = v.parse() {
                            cfg.idle_secs = secs;
                        }
                    }
                }
                "--trust-blindly" => cfg.trust_blindly = true,
                "--restore" => cfg.restore = true,
                _ => {}
            }
            i += 1;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_tool() {
        let cfg = Config::default();
        assert_eq!(cfg.socket, "/run/logduct.sock");
        assert_eq!(cfg.log_dir, "/logs");
        assert_eq!(cfg.idle_secs, 60.0);
        assert!(!cfg.trust_blindly);
        assert!(!cfg.restore);
    }
}
