//! Sunrise, solar noon and sunset from the sunrise equation.

use chrono::{DateTime, NaiveDate, Utc};

/// Julian date of 2000-01-01 12:00 UTC.
const J2000: f64 = 2_451_545.0;
/// Julian date of the unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
/// Sun's centre altitude at apparent sunrise (refraction + disc radius).
const HORIZON_DEGREES: f64 = -0.833;
const EARTH_TILT_DEGREES: f64 = 23.4397;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarTimes {
    /// `None` during polar night or midnight sun.
    pub sunrise: Option<DateTime<Utc>>,
    pub noon: DateTime<Utc>,
    pub sunset: Option<DateTime<Utc>>,
}

/// Solar events for the calendar `date` at the given place (degrees, east positive).
pub fn solar_times(date: NaiveDate, latitude: f64, longitude: f64) -> SolarTimes {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN);
    let days = (date - epoch).num_days() as f64;
    let mean_solar_noon = days - longitude / 360.0;

    let anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let anomaly_rad = anomaly.to_radians();
    let center = 1.9148 * anomaly_rad.sin()
        + 0.02 * (2.0 * anomaly_rad).sin()
        + 0.0003 * (3.0 * anomaly_rad).sin();
    let ecliptic_longitude = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let ecliptic_rad = ecliptic_longitude.to_radians();

    let transit = J2000 + mean_solar_noon + 0.0053 * anomaly_rad.sin()
        - 0.0069 * (2.0 * ecliptic_rad).sin();

    let sin_declination = ecliptic_rad.sin() * EARTH_TILT_DEGREES.to_radians().sin();
    let cos_declination = sin_declination.asin().cos();
    let latitude_rad = latitude.to_radians();
    let cos_hour_angle = (HORIZON_DEGREES.to_radians().sin()
        - latitude_rad.sin() * sin_declination)
        / (latitude_rad.cos() * cos_declination);

    let (sunrise, sunset) = if cos_hour_angle.is_finite() && cos_hour_angle.abs() <= 1.0 {
        let half_day = cos_hour_angle.acos().to_degrees() / 360.0;
        (
            Some(julian_to_utc(transit - half_day)),
            Some(julian_to_utc(transit + half_day)),
        )
    } else {
        (None, None)
    };

    SolarTimes {
        sunrise,
        noon: julian_to_utc(transit),
        sunset,
    }
}

fn julian_to_utc(julian: f64) -> DateTime<Utc> {
    let millis = ((julian - UNIX_EPOCH_JD) * SECONDS_PER_DAY * 1000.0).round() as i64;
    DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(millis)
}
