//! TCode command encoding and device identification parsing.
//!
//! Commands are single ASCII lines. Linear moves on axis `L0` carry a
//! three digit position code (`000`-`999`) followed by an interval in
//! milliseconds, e.g. `L0500I1000`.

/// Marker a TCode firmware prints when it identifies itself, followed by its version
pub const TCODE_IDENTIFIER: &str = "TCode v";

/// Native stop command, only understood by firmware at or above [`NATIVE_STOP_MIN_VERSION`]
pub const STOP_COMMAND: &str = "DSTOP";

pub const NATIVE_STOP_MIN_VERSION: f64 = 0.3;

/// Neutral position used when the firmware cannot stop natively
pub const NEUTRAL_POSITION: f64 = 0.5;
pub const NEUTRAL_DURATION_MS: u32 = 1000;

/// Interval used for moves requested through the manual position control
pub const MANUAL_DURATION_MS: u32 = 500;

const MAX_POSITION_CODE: u32 = 999;

/// Result of encoding a stop request
#[derive(Debug, Clone, PartialEq)]
pub struct StopCommand {
    pub command: String,
    /// Percentage an external position indicator should snap to, if any
    pub ui_reset: Option<f64>,
}

/// Encode a linear move to `position` (0.0 - 1.0) over `duration_ms`.
///
/// Positions at or above 1.0 map to `999`; the code is always three digits.
pub fn encode_linear(position: f64, duration_ms: u32) -> String {
    let position = if position.is_nan() { 0.0 } else { position.clamp(0.0, 0.999) };
    let code = ((position * 1000.0).round() as u32).min(MAX_POSITION_CODE);
    format!("L0{:03}I{}", code, duration_ms)
}

/// Encode a stop request for a device with the given capability
pub fn encode_stop(supports_native_stop: bool) -> StopCommand {
    if supports_native_stop {
        StopCommand {
            command: STOP_COMMAND.to_string(),
            ui_reset: None,
        }
    } else {
        StopCommand {
            command: encode_linear(NEUTRAL_POSITION, NEUTRAL_DURATION_MS),
            ui_reset: Some(NEUTRAL_POSITION * 100.0),
        }
    }
}

/// Encode a move requested through the manual position control (0 - 100 %)
pub fn manual_position(percent: f64) -> String {
    encode_linear(percent / 100.0, MANUAL_DURATION_MS)
}

/// Extract the version token from an identification line.
///
/// The marker may appear anywhere in the line.
pub fn parse_identification(line: &str) -> Option<String> {
    let start = line.find(TCODE_IDENTIFIER)?;
    Some(line[start + TCODE_IDENTIFIER.len()..].trim().to_string())
}

/// Lenient decimal parse of a version token: takes the longest numeric prefix
pub fn parse_version(version: &str) -> Option<f64> {
    let version = version.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (idx, ch) in version.char_indices() {
        match ch {
            '0'..='9' => end = idx + 1,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
    }
    version[..end].parse().ok()
}

/// Leading decimal number of `text`, allowing a sign; trailing junk is ignored
pub fn parse_leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    match text.strip_prefix('-') {
        Some(rest) => parse_version(rest).map(|n| -n),
        None => parse_version(text.strip_prefix('+').unwrap_or(text)),
    }
}

pub fn supports_native_stop(version: &str) -> bool {
    parse_version(version).map_or(false, |v| v >= NATIVE_STOP_MIN_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_code_is_always_three_digits() {
        for step in 0..=1000 {
            let position = step as f64 / 1000.0;
            let cmd = encode_linear(position, 100);
            let code: u32 = cmd[2..5].parse().expect("numeric code");
            let expected = ((position * 1000.0).round() as u32).min(999);
            assert_eq!(cmd.len(), "L0000I100".len(), "bad width for {}", position);
            assert_eq!(code, expected);
        }
    }

    #[test]
    fn test_out_of_range_positions_clamp() {
        assert_eq!(encode_linear(-0.5, 10), "L0000I10");
        assert_eq!(encode_linear(7.0, 10), "L0999I10");
        assert_eq!(encode_linear(f64::NAN, 10), "L0000I10");
    }

    #[test]
    fn test_parse_version_prefix() {
        assert_eq!(parse_version("0.3"), Some(0.3));
        assert_eq!(parse_version("0.2.1"), Some(0.2));
        assert_eq!(parse_version("0.4b"), Some(0.4));
        assert_eq!(parse_version("v0.3"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_leading_number_takes_sign() {
        assert_eq!(parse_leading_number(" -0.25"), Some(-0.25));
        assert_eq!(parse_leading_number("+.5px"), Some(0.5));
        assert_eq!(parse_leading_number("-"), None);
    }
}
