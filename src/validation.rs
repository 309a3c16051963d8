//! Small validators shared by the configuration layer.

/// Valid `application.log_level` values.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates if a given string is a usable output file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    if path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR) {
        return Err("File path must name a file, not a directory");
    }
    Ok(())
}

/// Validates that a time quantity is finite and not negative.
pub fn is_non_negative_time(value: f64) -> Result<(), &'static str> {
    if !value.is_finite() {
        return Err("Time value must be finite");
    }
    if value < 0.0 {
        return Err("Time value cannot be negative");
    }
    Ok(())
}

/// Validates a log level name (case insensitive).
pub fn is_valid_log_level(level: &str) -> Result<(), &'static str> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err("Log level must be one of: trace, debug, info, warn, error")
    }
}
