//! Host list acquisition.
//!
//! Hosts come from the command line, from the config file, or from a hosts
//! file with one host per line. Blank lines and `#` comments are skipped.

use std::fs;
use std::path::Path;

use crate::config::ConfigError;

/// Parses hosts-file content into host labels.
pub fn parse_host_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        })
        .flat_map(str::split_whitespace)
        .map(String::from)
        .collect()
}

/// Reads a hosts file.
pub fn read_hosts_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        ConfigError::Io(format!("{}: {}", path.as_ref().display(), e))
    })?;
    Ok(parse_host_list(&content))
}

/// Concatenates host lists in order.
///
/// Repeated hosts are kept: every entry is scanned and reported on its own.
pub fn merge_hosts<I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    lists.into_iter().flatten().collect()
}
