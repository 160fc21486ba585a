//! Sunrise equation and the parabolic PV output curve.
//!
//! Output is a deliberate simplification: zero outside daylight, a parabola
//! from sunrise to sunset peaking at the midpoint of the two. It is not an
//! irradiance model.

use time::{Date, OffsetDateTime, UtcOffset};

use crate::config::PvConfig;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const EARTH_TILT_DEG: f64 = 23.4397;
// Refraction plus solar disc radius.
const HORIZON_ALTITUDE_DEG: f64 = -0.833;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarWindow {
    pub sunrise: OffsetDateTime,
    pub sunset: OffsetDateTime,
}

impl SolarWindow {
    pub fn solar_noon(&self) -> OffsetDateTime {
        self.sunrise + (self.sunset - self.sunrise) / 2_i32
    }

    pub fn output_kw(&self, t: OffsetDateTime, max_kw: i64) -> i64 {
        output_kw(t, self.sunrise, self.sunset, max_kw)
    }

    fn to_offset(self, offset: UtcOffset) -> Self {
        Self {
            sunrise: self.sunrise.to_offset(offset),
            sunset: self.sunset.to_offset(offset),
        }
    }
}

fn sin_deg(x: f64) -> f64 {
    x.to_radians().sin()
}

fn julian_to_utc(j: f64) -> Option<OffsetDateTime> {
    let secs = ((j - UNIX_EPOCH_JD) * SECONDS_PER_DAY).round();
    OffsetDateTime::from_unix_timestamp(secs as i64).ok()
}

/// Sunrise and sunset (UTC) at `lat`/`lon` degrees on `date`, from the
/// sunrise equation with the sun's centre at -0.833° altitude.
///
/// Returns `None` when the sun stays below the horizon all day. When it never
/// sets, the window is the 24 hours centred on solar noon.
pub fn sunrise_sunset(date: Date, lat: f64, lon: f64) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let n = f64::from(date.to_julian_day()) - J2000 + 0.0008;
    let mean_noon = n - lon / 360.0;

    let anomaly = (357.5291 + 0.985_600_28 * mean_noon).rem_euclid(360.0);
    let center = 1.9148 * sin_deg(anomaly) + 0.02 * sin_deg(2.0 * anomaly) + 0.0003 * sin_deg(3.0 * anomaly);
    let ecliptic_lon = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let transit = J2000 + mean_noon + 0.0053 * sin_deg(anomaly) - 0.0069 * sin_deg(2.0 * ecliptic_lon);

    let sin_decl = sin_deg(ecliptic_lon) * sin_deg(EARTH_TILT_DEG);
    let cos_decl = sin_decl.asin().cos();
    let cos_hour_angle =
        (sin_deg(HORIZON_ALTITUDE_DEG) - sin_deg(lat) * sin_decl) / (lat.to_radians().cos() * cos_decl);

    if cos_hour_angle.is_nan() || cos_hour_angle > 1.0 {
        return None;
    }
    let hour_angle = cos_hour_angle.max(-1.0).acos().to_degrees();

    let sunrise = julian_to_utc(transit - hour_angle / 360.0)?;
    let sunset = julian_to_utc(transit + hour_angle / 360.0)?;
    Some((sunrise, sunset))
}

/// Inclusive at both ends.
pub fn is_daylight(t: OffsetDateTime, sunrise: OffsetDateTime, sunset: OffsetDateTime) -> bool {
    sunrise <= t && t <= sunset
}

/// `floor(max * (1 - (|t - zenith| / half_span)^2))` inside daylight, 0 outside,
/// where zenith is the midpoint of sunrise and sunset.
pub fn output_kw(t: OffsetDateTime, sunrise: OffsetDateTime, sunset: OffsetDateTime, max_kw: i64) -> i64 {
    if !is_daylight(t, sunrise, sunset) {
        return 0;
    }
    let half_span = (sunset - sunrise).as_seconds_f64() / 2.0;
    if half_span <= 0.0 {
        return 0;
    }
    let zenith: OffsetDateTime = sunrise + (sunset - sunrise) / 2_i32;
    let x = (t - zenith).as_seconds_f64().abs() / half_span;
    let kw = (max_kw as f64 * (1.0 - x * x)).floor() as i64;
    kw.clamp(0, max_kw.max(0))
}

/// PV output at the configured site. Windows are computed for the site's
/// local calendar date.
#[derive(Debug, Clone)]
pub struct SolarModel {
    pub latitude: f64,
    pub longitude: f64,
    pub offset: UtcOffset,
    pub max_output_kw: i64,
}

impl SolarModel {
    pub fn new(latitude: f64, longitude: f64, offset: UtcOffset, max_output_kw: i64) -> Self {
        Self {
            latitude,
            longitude,
            offset,
            max_output_kw,
        }
    }

    pub fn from_config(cfg: &PvConfig, offset: UtcOffset) -> Self {
        Self::new(cfg.latitude, cfg.longitude, offset, cfg.max_total_output_kw())
    }

    /// Local date of `t` at the site.
    pub fn site_date(&self, t: OffsetDateTime) -> Date {
        t.to_offset(self.offset).date()
    }

    /// Daylight window for `date`, in site time.
    pub fn window(&self, date: Date) -> Option<SolarWindow> {
        sunrise_sunset(date, self.latitude, self.longitude)
            .map(|(sunrise, sunset)| SolarWindow { sunrise, sunset }.to_offset(self.offset))
    }

    pub fn output_kw_at(&self, t: OffsetDateTime) -> i64 {
        self.window(self.site_date(t))
            .map_or(0, |w| w.output_kw(t, self.max_output_kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, offset};
    use time::Duration;

    const MUNICH: (f64, f64) = (48.1351, 11.5820);

    fn assert_near(actual: OffsetDateTime, expected: OffsetDateTime) {
        let diff = (actual - expected).abs();
        assert!(diff <= Duration::minutes(2), "{actual} vs {expected}");
    }

    #[test]
    fn munich_midsummer_window() {
        let (rise, set) = sunrise_sunset(date!(2024-06-21), MUNICH.0, MUNICH.1).unwrap();
        assert_near(rise, datetime!(2024-06-21 03:14:37 UTC));
        assert_near(set, datetime!(2024-06-21 19:18:38 UTC));
    }

    #[test]
    fn munich_midwinter_window() {
        let (rise, set) = sunrise_sunset(date!(2024-12-21), MUNICH.0, MUNICH.1).unwrap();
        assert_near(rise, datetime!(2024-12-21 07:02:34 UTC));
        assert_near(set, datetime!(2024-12-21 15:23:27 UTC));
    }

    #[test]
    fn reference_day_scenario() {
        let rise = datetime!(2024-06-21 08:00:00 UTC);
        let set = datetime!(2024-06-21 18:00:00 UTC);

        assert_eq!(output_kw(datetime!(2024-06-21 13:00:00 UTC), rise, set, 3_200), 3_200);
        assert_eq!(output_kw(datetime!(2024-06-21 08:00:00 UTC), rise, set, 3_200), 0);
        assert_eq!(output_kw(datetime!(2024-06-21 10:30:00 UTC), rise, set, 3_200), 2_400);
    }

    #[test]
    fn odd_length_window_peaks_at_its_midpoint() {
        let w = SolarWindow {
            sunrise: datetime!(2024-06-21 08:00:00 UTC),
            sunset: datetime!(2024-06-21 18:00:01 UTC),
        };
        assert_eq!(w.solar_noon(), datetime!(2024-06-21 13:00:00.5 UTC));
        assert_eq!(w.output_kw(w.solar_noon(), 3_200), 3_200);
        assert!(w.output_kw(datetime!(2024-06-21 13:00:00 UTC), 3_200) < 3_200);
    }

    #[test]
    fn no_output_outside_daylight() {
        let rise = datetime!(2024-06-21 08:00:00 UTC);
        let set = datetime!(2024-06-21 18:00:00 UTC);
        for t in [
            datetime!(2024-06-21 00:00:00 UTC),
            datetime!(2024-06-21 07:59:59 UTC),
            datetime!(2024-06-21 18:00:01 UTC),
            datetime!(2024-06-21 23:55:00 UTC),
        ] {
            assert!(!is_daylight(t, rise, set));
            assert_eq!(output_kw(t, rise, set, 3_200), 0);
        }
        assert!(is_daylight(rise, rise, set));
        assert!(is_daylight(set, rise, set));
    }

    #[test]
    fn curve_is_symmetric_and_bounded() {
        let rise = datetime!(2024-06-21 05:13:00 UTC);
        let set = datetime!(2024-06-21 21:17:00 UTC);
        let noon = SolarWindow { sunrise: rise, sunset: set }.solar_noon();

        for minutes in (0..=482).step_by(7) {
            let d = Duration::minutes(minutes);
            let before = output_kw(noon - d, rise, set, 3_200);
            let after = output_kw(noon + d, rise, set, 3_200);
            assert_eq!(before, after, "±{minutes} min");
            assert!((0..=3_200).contains(&before));
            assert!(before <= output_kw(noon, rise, set, 3_200));
        }
    }

    #[test]
    fn degenerate_window_yields_zero() {
        let t = datetime!(2024-06-21 12:00:00 UTC);
        assert_eq!(output_kw(t, t, t, 3_200), 0);
    }

    #[test]
    fn polar_night_has_no_window() {
        assert!(sunrise_sunset(date!(2024-12-21), 78.22, 15.65).is_none());
        let model = SolarModel::new(78.22, 15.65, offset!(+1), 3_200);
        assert_eq!(model.output_kw_at(datetime!(2024-12-21 12:00:00 +1)), 0);
    }

    #[test]
    fn midnight_sun_spans_a_full_day_around_noon() {
        let (rise, set) = sunrise_sunset(date!(2024-06-21), 78.22, 15.65).unwrap();
        assert_near(set - Duration::DAY, rise);

        let model = SolarModel::new(78.22, 15.65, offset!(+1), 3_200);
        let w = model.window(date!(2024-06-21)).unwrap();
        assert!(w.output_kw(w.solar_noon(), 3_200) >= 3_199);
        assert!(model.output_kw_at(datetime!(2024-06-21 03:00:00 +1)) > 0);
    }

    #[test]
    fn model_uses_site_date_and_offset() {
        let model = SolarModel::new(MUNICH.0, MUNICH.1, offset!(+1), 3_200);
        let w = model.window(date!(2024-06-21)).unwrap();
        assert_eq!(w.sunrise.offset(), offset!(+1));
        assert_near(w.sunrise, datetime!(2024-06-21 04:14:37 +1));

        // 00:30 local is still the previous UTC day but the same site date.
        assert_eq!(model.site_date(datetime!(2024-06-20 23:30:00 UTC)), date!(2024-06-21));
        assert_eq!(model.output_kw_at(datetime!(2024-06-21 00:30:00 +1)), 0);

        let noon = model.output_kw_at(w.solar_noon());
        assert!(noon >= 3_199, "{noon}");
    }
}
