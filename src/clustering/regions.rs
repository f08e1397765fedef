//! Fixed world regions used by the spatial fallback

use crate::storage::GeoCoordinate;

/// Named region, in matching order. [`Region::Other`] catches everything
/// the nine boxes miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    NorthAmerica,
    SouthAmerica,
    MiddleEast,
    Europe,
    Africa,
    SouthAsia,
    EastAsia,
    SoutheastAsia,
    Oceania,
    Other,
}

/// Inclusive latitude and longitude ranges
struct BoundingBox {
    lat: (f64, f64),
    lon: (f64, f64),
}

impl BoundingBox {
    fn contains(&self, point: GeoCoordinate) -> bool {
        (self.lat.0..=self.lat.1).contains(&point.latitude)
            && (self.lon.0..=self.lon.1).contains(&point.longitude)
    }
}

impl Region {
    pub const ALL: [Region; 10] = [
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::MiddleEast,
        Region::Europe,
        Region::Africa,
        Region::SouthAsia,
        Region::EastAsia,
        Region::SoutheastAsia,
        Region::Oceania,
        Region::Other,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "North America",
            Region::SouthAmerica => "South America",
            Region::MiddleEast => "Middle East",
            Region::Europe => "Europe",
            Region::Africa => "Africa",
            Region::SouthAsia => "South Asia",
            Region::EastAsia => "East Asia",
            Region::SoutheastAsia => "Southeast Asia",
            Region::Oceania => "Oceania",
            Region::Other => "Other",
        }
    }

    /// Stable identifier used as the cluster id
    pub fn slug(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "north-america",
            Region::SouthAmerica => "south-america",
            Region::MiddleEast => "middle-east",
            Region::Europe => "europe",
            Region::Africa => "africa",
            Region::SouthAsia => "south-asia",
            Region::EastAsia => "east-asia",
            Region::SoutheastAsia => "southeast-asia",
            Region::Oceania => "oceania",
            Region::Other => "other",
        }
    }

    /// Rough visual center, used before any member is assigned
    pub fn approximate_center(&self) -> GeoCoordinate {
        let (lat, lon) = match self {
            Region::NorthAmerica => (40.0, -100.0),
            Region::SouthAmerica => (-15.0, -60.0),
            Region::MiddleEast => (29.0, 45.0),
            Region::Europe => (50.0, 10.0),
            Region::Africa => (2.0, 20.0),
            Region::SouthAsia => (22.0, 78.0),
            Region::EastAsia => (35.0, 115.0),
            Region::SoutheastAsia => (5.0, 110.0),
            Region::Oceania => (-25.0, 135.0),
            Region::Other => (0.0, 0.0),
        };
        GeoCoordinate::new(lat, lon)
    }

    fn bounds(&self) -> Option<BoundingBox> {
        let (lat, lon) = match self {
            Region::NorthAmerica => ((7.0, 84.0), (-170.0, -50.0)),
            Region::SouthAmerica => ((-56.0, 7.0), (-92.0, -30.0)),
            Region::MiddleEast => ((12.0, 42.0), (25.0, 63.0)),
            Region::Europe => ((35.0, 72.0), (-25.0, 45.0)),
            Region::Africa => ((-35.0, 37.0), (-18.0, 52.0)),
            Region::SouthAsia => ((5.0, 38.0), (60.0, 92.0)),
            Region::EastAsia => ((20.0, 55.0), (92.0, 146.0)),
            Region::SoutheastAsia => ((-11.0, 20.0), (92.0, 141.0)),
            Region::Oceania => ((-50.0, 0.0), (110.0, 180.0)),
            Region::Other => return None,
        };
        Some(BoundingBox { lat, lon })
    }

    /// First region whose box contains `point`; longitudes outside
    /// [-180, 180] are wrapped first
    pub fn classify(point: GeoCoordinate) -> Region {
        let point = GeoCoordinate::new(point.latitude, normalize_longitude(point.longitude));
        Self::ALL
            .into_iter()
            .find(|region| region.bounds().is_some_and(|b| b.contains(point)))
            .unwrap_or(Region::Other)
    }
}

/// Wrap a longitude into [-180, 180]
pub fn normalize_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_classify_landmarks() {
        let cases = [
            ((40.7, -74.0), Region::NorthAmerica),
            ((-23.5, -46.6), Region::SouthAmerica),
            ((24.7, 46.7), Region::MiddleEast),
            ((48.85, 2.35), Region::Europe),
            ((-1.3, 36.8), Region::Africa),
            ((28.6, 77.2), Region::SouthAsia),
            ((35.7, 139.7), Region::EastAsia),
            ((13.7, 100.5), Region::SoutheastAsia),
            ((-33.9, 151.2), Region::Oceania),
            ((-75.0, 0.0), Region::Other),
        ];
        for ((lat, lon), expected) in cases {
            assert_eq!(
                Region::classify(GeoCoordinate::new(lat, lon)),
                expected,
                "({lat}, {lon})"
            );
        }
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        // Inside both the Middle East and Europe boxes
        assert_eq!(Region::classify(GeoCoordinate::new(38.0, 35.0)), Region::MiddleEast);
    }

    #[test]
    fn test_normalize_longitude() {
        assert_relative_eq!(normalize_longitude(190.0), -170.0);
        assert_relative_eq!(normalize_longitude(180.0), 180.0);
        assert_relative_eq!(normalize_longitude(-190.0), 170.0);
        assert_relative_eq!(normalize_longitude(540.0), -180.0);
        assert_eq!(
            Region::classify(GeoCoordinate::new(-33.9, 151.2 + 360.0)),
            Region::Oceania
        );
    }

    #[test]
    fn test_only_other_is_unbounded() {
        for region in Region::ALL {
            assert_eq!(region.bounds().is_none(), region == Region::Other);
        }
    }
}
