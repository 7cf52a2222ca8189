// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Variable expansion for configuration values.
//!
//! Addresses and paths may reference the host they run on, e.g.
//! `sender = "cert-monitor@${FQDN}"`.

use crate::error::MonitorError;

/// Expand `${NAME}` references in a string.
///
/// Supported variables:
///
/// - `${HOSTNAME}` - Short host name
/// - `${FQDN}` - Host name as reported by the system, including the domain
///   when configured
/// - `${USER}` - Current user name
/// - `${HOME}` - Home directory
/// - `${RUNTIME_DIR}` - `$XDG_RUNTIME_DIR`, falling back to the temp directory
/// - any other name is looked up in the environment
///
/// Unknown variables and unclosed `${` are left unchanged.
///
/// # Examples
///
/// ```
/// use cert_expiry_monitor::config::expand_variables;
///
/// let sender = expand_variables("cert-monitor@${FQDN}").unwrap();
/// assert!(sender.starts_with("cert-monitor@"));
/// ```
pub fn expand_variables(input: &str) -> Result<String, MonitorError> {
    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let absolute_start = start + var_start;

        if let Some(var_end) = result[absolute_start..].find('}') {
            let absolute_end = absolute_start + var_end;
            let var_name = &result[absolute_start + 2..absolute_end];

            if let Some(value) = get_variable_value(var_name) {
                result.replace_range(absolute_start..absolute_end + 1, &value);
                start = absolute_start + value.len();
            } else {
                start = absolute_end + 1;
            }
        } else {
            start = absolute_start + 2;
        }
    }

    Ok(result)
}

fn get_variable_value(name: &str) -> Option<String> {
    match name {
        "HOSTNAME" => get_fqdn().map(|fqdn| fqdn.split('.').next().unwrap_or(&fqdn).to_string()),
        "FQDN" => get_fqdn(),
        "USER" => std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok(),
        "HOME" => dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
        "RUNTIME_DIR" => Some(
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .to_string_lossy()
                .into_owned(),
        ),
        _ => std::env::var(name).ok(),
    }
}

fn get_fqdn() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
