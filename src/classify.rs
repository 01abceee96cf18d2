//! FrequencyClassifier (spec.md §4.3): static band/mode reference
//! tables, loaded once at startup, immutable thereafter.

use crate::error::ClassifyError;
use crate::model::ModeSelection;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct BandRow {
    band: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct ModeRange {
    start: f64,
    end: f64,
}

pub struct FrequencyClassifier {
    bands: Vec<BandRow>,
    modes: HashMap<String, HashMap<String, ModeRange>>,
}

/// Comment substrings checked in order, case-insensitively (spec.md §4.3).
const COMMENT_MODES: &[&str] = &["CW", "FT8", "FT4", "RTTY"];

impl FrequencyClassifier {
    pub fn load(bands_csv: &str, modes_json: &str) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bands_csv.as_bytes());
        let mut bands = Vec::new();
        for result in reader.records() {
            let record = result?;
            if record.len() < 3 {
                continue;
            }
            bands.push(BandRow {
                band: record[0].to_string(),
                start: record[1].parse()?,
                end: record[2].parse()?,
            });
        }

        let modes: HashMap<String, HashMap<String, ModeRange>> = serde_json::from_str(modes_json)?;

        Ok(FrequencyClassifier { bands, modes })
    }

    /// First row whose `[start, end]` contains the frequency. Empty
    /// string if none does.
    pub fn find_band(&self, frequency_khz: f64) -> String {
        self.bands
            .iter()
            .find(|row| row.start <= frequency_khz && frequency_khz <= row.end)
            .map(|row| row.band.clone())
            .unwrap_or_default()
    }

    /// `(band, mode, mode_selection)`, or `ClassifyError::NoBand` if
    /// the frequency falls in no band (the caller drops the spot).
    pub fn find_band_and_mode(
        &self,
        frequency_khz: f64,
        comment: &str,
    ) -> Result<(String, String, Option<ModeSelection>), ClassifyError> {
        let band = self.find_band(frequency_khz);
        if band.is_empty() {
            return Err(ClassifyError::NoBand(frequency_khz));
        }

        let upper = comment.to_uppercase();
        for candidate in COMMENT_MODES {
            if upper.contains(candidate) {
                return Ok((band, candidate.to_string(), Some(ModeSelection::Comment)));
            }
        }
        if upper.contains("DIGI") || upper.contains("VARAC") {
            return Ok((band, "DIGI".to_string(), Some(ModeSelection::Comment)));
        }

        if let Some(sub_ranges) = self.modes.get(&band) {
            for (mode, range) in sub_ranges {
                if range.start <= frequency_khz && frequency_khz < range.end {
                    return Ok((band, mode.clone(), Some(ModeSelection::Range)));
                }
            }
        }

        Ok((band, String::new(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FrequencyClassifier {
        let bands_csv = include_str!("../data/bands.csv");
        let modes_json = include_str!("../data/modes.json");
        FrequencyClassifier::load(bands_csv, modes_json).unwrap()
    }

    #[test]
    fn finds_band_for_20m() {
        let c = classifier();
        assert_eq!(c.find_band(14100.0), "20");
    }

    // S4
    #[test]
    fn scenario_s4_unclassifiable_frequency_drops() {
        let c = classifier();
        let result = c.find_band_and_mode(7350.0, "");
        assert!(result.is_err());
    }

    // S1
    #[test]
    fn scenario_s1_cw_by_comment() {
        let c = classifier();
        let (band, mode, sel) = c.find_band_and_mode(14056.0, "CW 17 dB 22 WPM CQ").unwrap();
        assert_eq!(band, "20");
        assert_eq!(mode, "CW");
        assert_eq!(sel, Some(ModeSelection::Comment));
    }

    // property 3: comment precedence over sub-range
    #[test]
    fn comment_precedence_over_range() {
        let c = classifier();
        // 14076.0 kHz falls inside the FT8 sub-range for band 20, but a
        // CW comment must win.
        let (_, mode, sel) = c.find_band_and_mode(14076.0, "CW QSO in progress").unwrap();
        assert_eq!(mode, "CW");
        assert_eq!(sel, Some(ModeSelection::Comment));
    }

    #[test]
    fn falls_back_to_range_when_no_comment_hint() {
        let c = classifier();
        let (band, mode, sel) = c.find_band_and_mode(14075.5, "").unwrap();
        assert_eq!(band, "20");
        assert_eq!(mode, "FT8");
        assert_eq!(sel, Some(ModeSelection::Range));
    }

    #[test]
    fn empty_mode_when_no_range_and_no_comment() {
        let c = classifier();
        let (band, mode, sel) = c.find_band_and_mode(14200.0, "").unwrap();
        assert_eq!(band, "20");
        assert_eq!(mode, "");
        assert_eq!(sel, None);
    }

    #[test]
    fn never_panics_for_arbitrary_finite_frequency() {
        let c = classifier();
        for khz in [0.0, 1.0, 999999.0, 14074.5, -1.0_f64.abs()] {
            let _ = c.find_band_and_mode(khz, "whatever");
        }
    }
}
