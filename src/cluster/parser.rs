//! DX spot line grammar (spec.md §4.1).
//!
//! Two grammars are tried in order; the first to match wins. Lines not
//! starting with `DX de` are not even offered to the parser (the
//! caller filters on that prefix first, matching the original).

use crate::error::ParseError;
use crate::model::RawSpot;
use once_cell::sync::Lazy;
use regex::Regex;

static DX_RE_WITH_LOCATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^DX de (\S+):\s+(\d+\.\d)\s+(\S+)\s+(.*?)\s+?(\w+) (\d+Z)\s+(\w+)$").unwrap()
});

static DX_RE_NO_LOCATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DX de (\S+):\s+(\d+\.\d)\s+(\S+)\s+(.*?)\s+?(\d+Z)$").unwrap());

/// Strip a trailing `-<digits>` skimmer suffix from a spotter callsign.
fn strip_skimmer_suffix(callsign: &str) -> String {
    static SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+$").unwrap());
    SUFFIX_RE.replace(callsign, "").into_owned()
}

/// The hard-coded skimmer filter (spec.md §4.1, §9 "Open questions").
const SKIMMER_BLACKLIST: &str = "W3LPL";

/// Parse one `DX de ...` line into a [`RawSpot`]. `cluster` is the
/// `host:port` this line arrived from.
///
/// Returns `Ok(None)` (not an error) when the line matches a grammar
/// but the spotter is on the skimmer blacklist — that's a drop, not a
/// parse failure.
pub fn parse_dx_line(line: &str, cluster: &str) -> Result<Option<RawSpot>, ParseError> {
    let line = line.trim();

    if let Some(caps) = DX_RE_WITH_LOCATORS.captures(line) {
        let spotter = strip_skimmer_suffix(&caps[1]);
        if spotter == SKIMMER_BLACKLIST {
            return Ok(None);
        }
        let frequency_khz: f64 = caps[2].parse().map_err(|_| ParseError::NoMatch)?;
        return Ok(Some(RawSpot {
            spotter_callsign: spotter,
            frequency_khz,
            dx_callsign: caps[3].to_string(),
            comment: caps[4].trim().to_string(),
            dx_locator: Some(caps[5].to_string()),
            time: caps[6].trim_end_matches('Z').to_string(),
            spotter_locator: Some(caps[7].to_string()),
            cluster: cluster.to_string(),
        }));
    }

    if let Some(caps) = DX_RE_NO_LOCATORS.captures(line) {
        let spotter = strip_skimmer_suffix(&caps[1]);
        if spotter == SKIMMER_BLACKLIST {
            return Ok(None);
        }
        let frequency_khz: f64 = caps[2].parse().map_err(|_| ParseError::NoMatch)?;
        return Ok(Some(RawSpot {
            spotter_callsign: spotter,
            frequency_khz,
            dx_callsign: caps[3].to_string(),
            comment: caps[4].trim().to_string(),
            dx_locator: None,
            time: caps[5].trim_end_matches('Z').to_string(),
            spotter_locator: None,
            cluster: cluster.to_string(),
        }));
    }

    Err(ParseError::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grammar_with_locators() {
        let line = "DX de K5TR-7:    14056.0  VE2PID/W8    CW 17 dB 22 WPM CQ FN42 2010Z FN31";
        let spot = parse_dx_line(line, "cluster.example:7300").unwrap().unwrap();
        assert_eq!(spot.spotter_callsign, "K5TR");
        assert_eq!(spot.dx_callsign, "VE2PID/W8");
        assert_eq!(spot.frequency_khz, 14056.0);
        assert_eq!(spot.time, "2010");
        assert_eq!(spot.dx_locator.as_deref(), Some("FN42"));
        assert_eq!(spot.spotter_locator.as_deref(), Some("FN31"));
    }

    #[test]
    fn parses_grammar_without_locators() {
        let line = "DX de KB8OTK:    18100.9  OD5ZZ                                       2053Z";
        let spot = parse_dx_line(line, "cluster.example:7300").unwrap().unwrap();
        assert_eq!(spot.spotter_callsign, "KB8OTK");
        assert_eq!(spot.dx_callsign, "OD5ZZ");
        assert_eq!(spot.frequency_khz, 18100.9);
        assert_eq!(spot.time, "2053");
        assert!(spot.dx_locator.is_none());
        assert!(spot.spotter_locator.is_none());
    }

    // S1
    #[test]
    fn scenario_s1_line() {
        let line = "DX de K5TR-7:    14056.0  VE2PID    CW 17 dB 22 WPM CQ             2010Z";
        let spot = parse_dx_line(line, "cluster.example:7300").unwrap().unwrap();
        assert_eq!(spot.spotter_callsign, "K5TR");
        assert_eq!(spot.dx_callsign, "VE2PID");
        assert_eq!(spot.frequency_khz, 14056.0);
        assert_eq!(spot.time, "2010");
        assert!(spot.dx_locator.is_none());
        assert!(spot.spotter_locator.is_none());
    }

    // S2
    #[test]
    fn scenario_s2_skimmer_dropped() {
        let line = "DX de W3LPL-3:    14056.0  VE2PID    CW 17 dB 22 WPM CQ             2010Z";
        let spot = parse_dx_line(line, "cluster.example:7300").unwrap();
        assert!(spot.is_none());
    }

    #[test]
    fn strips_skimmer_suffix_generally() {
        assert_eq!(strip_skimmer_suffix("K5TR-7"), "K5TR");
        assert_eq!(strip_skimmer_suffix("K5TR-12"), "K5TR");
        assert_eq!(strip_skimmer_suffix("K5TR"), "K5TR");
    }

    #[test]
    fn unmatched_line_is_parse_error() {
        let line = "this is not a spot line at all";
        assert!(parse_dx_line(line, "cluster.example:7300").is_err());
    }
}
