use anyhow::{anyhow, Context, Result};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt;

/// Parse a level name such as `info` or `DEBUG`
pub fn parse_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim()).map_err(|_| anyhow!("Unknown log level '{}'", level))
}

/// Install the global fmt subscriber
pub fn init(level: &str) -> Result<()> {
    let level = parse_level(level)?;
    fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to install log subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }
}
