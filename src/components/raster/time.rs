use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;

use crate::{
    components::{band_id::BandId, raster::Raster},
    errors::Result,
};

/// Band metadata key holding the acquisition time.
pub const TIME: &str = "time";

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Reads a timestamp as written in band metadata. Values without an
/// offset are UTC; a bare date is its midnight.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

impl Raster {
    /// Time of every band in order, or of `band` alone. Bands without a
    /// readable `time` entry give `None`.
    pub fn time(&self, band: Option<BandId>) -> Result<Vec<Option<DateTime<Utc>>>> {
        let ordinals: Vec<usize> = match band {
            Some(band) => vec![band.resolve(&self.working)?],
            None => (1..=self.working.band_count()).collect(),
        };
        ordinals
            .into_iter()
            .map(|ordinal| {
                let time = self.working.band(ordinal)?.metadata().get(TIME).and_then(parse_time);
                if time.is_none() {
                    debug!("Band {ordinal} has no time");
                }
                Ok(time)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{
        metadata::Metadata,
        raster::{fixtures::config, BandInput},
    };
    use chrono::TimeZone;
    use ndarray::Array2;
    use rstest::rstest;

    #[rstest]
    #[case("2012-01-01", Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).single())]
    #[case("2012-01-01T10:30:00Z", Utc.with_ymd_and_hms(2012, 1, 1, 10, 30, 0).single())]
    #[case("2012-01-01T10:30:00+02:00", Utc.with_ymd_and_hms(2012, 1, 1, 8, 30, 0).single())]
    #[case("2012-01-01 10:30:00", Utc.with_ymd_and_hms(2012, 1, 1, 10, 30, 0).single())]
    #[case(" 2012-01-01T10:30 ", Utc.with_ymd_and_hms(2012, 1, 1, 10, 30, 0).single())]
    #[case("yesterday", None)]
    #[case("", None)]
    fn timestamps(#[case] value: &str, #[case] expected: Option<DateTime<Utc>>) {
        assert_eq!(parse_time(value), expected);
    }

    #[test]
    fn fractional_seconds_are_kept() {
        let time = parse_time("2012-01-01 10:30:00.250").unwrap();
        assert_eq!(time.timestamp_subsec_millis(), 250);
    }

    #[test_log::test]
    fn time_of_every_band_or_one() {
        let mut raster = Raster::open("scene.tif", config().0).unwrap();
        raster
            .add_band(
                BandInput::array(&Array2::<u8>::zeros((4, 4))),
                Metadata::from_iter([("BandName", "B"), (TIME, "2013-06-30T12:00:00Z")]),
                None,
            )
            .unwrap();
        let noon = Utc.with_ymd_and_hms(2013, 6, 30, 12, 0, 0).single();
        assert_eq!(raster.time(None).unwrap(), vec![None, noon]);
        assert_eq!(raster.time(Some("B".into())).unwrap(), vec![noon]);
        assert_eq!(raster.time(Some(BandId::Number(1))).unwrap(), vec![None]);
        assert!(raster.time(Some(BandId::Number(3))).is_err());
    }
}
