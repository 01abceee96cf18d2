//! Maidenhead locator decoding and the prefix-table fallback resolver
//! (spec.md §4.4, GLOSSARY "Maidenhead locator" / "Prefix table").

use once_cell::sync::Lazy;
use regex::Regex;

/// Decode a Maidenhead grid locator (4 or 6 character) to the
/// coordinates of the centre of the grid square.
pub fn locator_to_coordinates(locator: &str) -> Option<(f64, f64)> {
    let chars: Vec<char> = locator.chars().collect();
    if chars.len() < 4 {
        return None;
    }

    let field_lon = field_index(chars[0])?;
    let field_lat = field_index(chars[1])?;
    let square_lon = chars[2].to_digit(10)? as f64;
    let square_lat = chars[3].to_digit(10)? as f64;

    let mut lon = (field_lon * 20.0) - 180.0 + (square_lon * 2.0) + 1.0;
    let mut lat = (field_lat * 10.0) - 90.0 + square_lat + 0.5;

    if chars.len() >= 6 {
        let sub_lon = subsquare_index(chars[4])?;
        let sub_lat = subsquare_index(chars[5])?;
        lon = (field_lon * 20.0) - 180.0 + (square_lon * 2.0) + (sub_lon * (2.0 / 24.0)) + (1.0 / 24.0);
        lat = (field_lat * 10.0) - 90.0 + square_lat + (sub_lat * (1.0 / 24.0)) + (0.5 / 24.0);
    }

    Some((lat, lon))
}

fn field_index(c: char) -> Option<f64> {
    let c = c.to_ascii_uppercase();
    if ('A'..='R').contains(&c) {
        Some((c as u8 - b'A') as f64)
    } else {
        None
    }
}

fn subsquare_index(c: char) -> Option<f64> {
    let c = c.to_ascii_lowercase();
    if ('a'..='x').contains(&c) {
        Some((c as u8 - b'a') as f64)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
struct PrefixRow {
    regex: Regex,
    locator: String,
    country: String,
    continent: String,
}

/// Fallback geographic resolver: anchored-at-start regex match against
/// a callsign, first row wins.
pub struct PrefixTable {
    rows: Vec<PrefixRow>,
}

impl PrefixTable {
    pub fn load(csv_text: &str) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(csv_text.as_bytes());
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            if record.len() < 4 {
                continue;
            }
            let pattern = format!("^{}", &record[0]);
            rows.push(PrefixRow {
                regex: Regex::new(&pattern)?,
                locator: record[1].to_string(),
                country: record[2].to_string(),
                continent: record[3].to_string(),
            });
        }
        Ok(PrefixTable { rows })
    }

    pub fn resolve_locator(&self, callsign: &str) -> Option<String> {
        let callsign = callsign.to_uppercase();
        self.rows
            .iter()
            .find(|row| row.regex.is_match(&callsign))
            .map(|row| row.locator.clone())
    }

    pub fn resolve_country_and_continent(&self, callsign: &str) -> (Option<String>, Option<String>) {
        let callsign = callsign.to_uppercase();
        match self.rows.iter().find(|row| row.regex.is_match(&callsign)) {
            Some(row) => (Some(row.country.clone()), Some(row.continent.clone())),
            None => (None, None),
        }
    }
}

/// Trim a trailing `/M` or `/P` portable/mobile suffix before any
/// lookup (spec.md §4.4 step 2).
pub fn strip_portable_suffix(callsign: &str) -> String {
    static SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/(M|P)$").unwrap());
    SUFFIX_RE.replace(callsign, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_four_char_locator_to_square_centre() {
        // FN31 (roughly New England): field F,N -> lon field 5, lat field 13
        let (lat, lon) = locator_to_coordinates("FN31").unwrap();
        assert!((lon - (-73.0)).abs() < 1e-9);
        assert!((lat - 41.5).abs() < 1e-9);
    }

    #[test]
    fn decodes_six_char_locator_with_subsquare() {
        let (lat4, lon4) = locator_to_coordinates("FN31").unwrap();
        let (lat6, lon6) = locator_to_coordinates("FN31aa").unwrap();
        // Subsquare centre should be close to but not identical to the
        // 4-char square centre.
        assert!((lat6 - lat4).abs() < 1.0);
        assert!((lon6 - lon4).abs() < 2.0);
    }

    #[test]
    fn rejects_too_short_locator() {
        assert!(locator_to_coordinates("FN3").is_none());
    }

    fn table() -> PrefixTable {
        let csv = include_str!("../../data/prefixes.csv");
        PrefixTable::load(csv).unwrap()
    }

    #[test]
    fn resolves_known_prefix() {
        let t = table();
        assert_eq!(t.resolve_locator("K5TR").as_deref(), Some("FN31"));
        assert_eq!(t.resolve_locator("VE2PID").as_deref(), Some("FN25"));
    }

    #[test]
    fn first_match_wins_and_miss_is_none() {
        let t = table();
        assert!(t.resolve_locator("ZZZZZZ").is_none());
    }

    #[test]
    fn strips_portable_suffixes_case_insensitively() {
        assert_eq!(strip_portable_suffix("K5TR/M"), "K5TR");
        assert_eq!(strip_portable_suffix("K5TR/p"), "K5TR");
        assert_eq!(strip_portable_suffix("K5TR"), "K5TR");
    }
}
