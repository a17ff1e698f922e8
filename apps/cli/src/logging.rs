//! Stderr logging bootstrap for the command-line front end.
//! 命令列工具的 stderr 日誌初始化。

use anyhow::{anyhow, Result};
use flexi_logger::{Logger, LoggerHandle};
use log::debug;

pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Starts logging at `level`; a set `RUST_LOG` takes precedence.
/// The returned handle must stay alive for the duration of the command.
pub fn init_logging(level: &str) -> Result<LoggerHandle> {
    let level = normalize_level(level)?;
    let handle = Logger::try_with_env_or_str(level)
        .map_err(|err| anyhow!("invalid log specification `{level}`: {err}"))?
        .log_to_stderr()
        .start()
        .map_err(|err| anyhow!("failed to start logger: {err}"))?;
    debug!(
        "event=cli_start module=cli status=ok level={level} version={}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}

pub fn normalize_level(level: &str) -> Result<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(anyhow!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}
