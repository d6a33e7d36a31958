//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Smallest accepted change feed capacity
pub const MIN_EVENT_BUFFER: usize = 16;

/// Largest accepted chat message length
pub const MAX_MESSAGE_LENGTH_LIMIT: usize = 10_000;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("[{section}] {field}: {message}")]
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("Unknown sampler kind '{0}' (expected \"gpsd\" or \"none\")")]
    UnknownSamplerKind(String),

    #[error("Invalid gpsd address '{0}': expected host:port")]
    InvalidAddress(String),
}

impl ValidationError {
    fn invalid(section: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(buffer) = config.service.event_buffer
        && buffer < MIN_EVENT_BUFFER
    {
        errors.push(ValidationError::invalid(
            "service",
            "event_buffer",
            format!("must be at least {}", MIN_EVENT_BUFFER),
        ));
    }

    match config.sampler.kind.as_deref() {
        None | Some("gpsd") => {
            if let Some(address) = &config.sampler.address
                && !is_host_port(address)
            {
                errors.push(ValidationError::InvalidAddress(address.clone()));
            }
        }
        Some("none") => {}
        Some(other) => errors.push(ValidationError::UnknownSamplerKind(other.to_string())),
    }

    let tracking = &config.tracking;
    for (field, value) in [
        ("one_shot_timeout_seconds", tracking.one_shot_timeout_seconds),
        ("watch_timeout_seconds", tracking.watch_timeout_seconds),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::invalid("tracking", field, "must be greater than 0"));
        }
    }

    if let Some(len) = config.chat.max_message_length
        && !(1..=MAX_MESSAGE_LENGTH_LIMIT).contains(&len)
    {
        errors.push(ValidationError::invalid(
            "chat",
            "max_message_length",
            format!("must be between 1 and {}", MAX_MESSAGE_LENGTH_LIMIT),
        ));
    }

    errors
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.trim().is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&raw("config_version = 1")).is_empty());
    }

    #[test]
    fn rejects_small_event_buffer() {
        let errors = validate_config(&raw("config_version = 1\n[service]\nevent_buffer = 4"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("event_buffer"));
    }

    #[test]
    fn rejects_unknown_sampler() {
        let errors = validate_config(&raw("config_version = 1\n[sampler]\nkind = \"gsm\""));
        assert_eq!(errors, vec![ValidationError::UnknownSamplerKind("gsm".into())]);
    }

    #[test]
    fn rejects_bad_addresses() {
        for address in ["localhost", ":2947", "localhost:gps", ""] {
            let src = format!("config_version = 1\n[sampler]\naddress = \"{}\"", address);
            let errors = validate_config(&raw(&src));
            assert_eq!(
                errors,
                vec![ValidationError::InvalidAddress(address.into())],
                "address {:?}",
                address
            );
        }
    }

    #[test]
    fn accepts_ipv6_address() {
        let errors = validate_config(&raw(
            "config_version = 1\n[sampler]\naddress = \"[::1]:2947\"",
        ));
        assert!(errors.is_empty());
    }

    #[test]
    fn zero_maximum_age_is_allowed() {
        let errors = validate_config(&raw(
            "config_version = 1\n[tracking]\nwatch_maximum_age_seconds = 0",
        ));
        assert!(errors.is_empty());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let errors = validate_config(&raw(
            "config_version = 1\n[tracking]\none_shot_timeout_seconds = 0\nwatch_timeout_seconds = 0",
        ));
        assert_eq!(errors.len(), 2);
    }
}
