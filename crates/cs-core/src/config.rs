use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

/// Reads a whole number of seconds. Zero is rejected because every duration
/// read this way drives a loop interval.
pub fn duration_from_env(name: &str, default_seconds: u64) -> Result<Duration> {
    let value = match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(Duration::from_secs(default_seconds)),
    };
    let seconds = value
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow!("invalid seconds for {name}: {err}"))?;
    if seconds == 0 {
        return Err(anyhow!("{name} must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

pub fn usize_from_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<usize>()
            .map_err(|err| anyhow!("invalid number for {name}: {err}")),
        _ => Ok(default),
    }
}

/// Comma separated list; blank entries are skipped.
pub fn list_from_env(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => split_list(&value),
        _ => default.iter().map(|value| value.to_string()).collect(),
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
