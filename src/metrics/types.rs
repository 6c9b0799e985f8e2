use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::errors::IngestError;

/// Kind of event stream a metric belongs to. Windows, thresholds and
/// pattern models are all keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    #[default]
    Transaction,
    Payment,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Payment => "payment",
        }
    }

    pub const ALL: [MetricType; 2] = [MetricType::Transaction, MetricType::Payment];
}

/// A geographic coordinate attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Great-circle distance to another point, in kilometers.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Round to a 0.1-degree grid cell for coarse location identity.
    pub fn grid_cell(&self) -> (i32, i32) {
        ((self.lat * 10.0).round() as i32, (self.lon * 10.0).round() as i32)
    }
}

/// A normalized transaction/payment event, the unit of ingestion.
/// Immutable once created; produced by the upstream queue consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetric {
    pub entity_id: String,
    pub transaction_id: String,
    #[serde(default)]
    pub metric_type: MetricType,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionMetric {
    /// Validate the event against data-quality bounds. Rejections are
    /// data-quality errors, never anomalies.
    pub fn validate(&self, config: &IngestConfig, now: DateTime<Utc>) -> Result<(), IngestError> {
        if self.entity_id.is_empty() {
            return Err(IngestError::MissingField("entity_id"));
        }
        if self.transaction_id.is_empty() {
            return Err(IngestError::MissingField("transaction_id"));
        }
        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(IngestError::InvalidAmount(self.amount));
        }
        let max_age = chrono::Duration::seconds(config.max_event_age_secs as i64);
        let max_skew = chrono::Duration::seconds(config.max_future_skew_secs as i64);
        if self.timestamp < now - max_age {
            return Err(IngestError::TimestampOutOfRange {
                timestamp: self.timestamp,
                reason: "too far in the past",
            });
        }
        if self.timestamp > now + max_skew {
            return Err(IngestError::TimestampOutOfRange {
                timestamp: self.timestamp,
                reason: "too far in the future",
            });
        }
        Ok(())
    }

    pub fn hour_of_day(&self) -> usize {
        use chrono::Timelike;
        self.timestamp.hour() as usize
    }

    /// 0 = Monday .. 6 = Sunday.
    pub fn day_of_week(&self) -> usize {
        use chrono::Datelike;
        self.timestamp.weekday().num_days_from_monday() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(amount: f64, timestamp: DateTime<Utc>) -> TransactionMetric {
        TransactionMetric {
            entity_id: "U1".to_string(),
            transaction_id: "tx-1".to_string(),
            metric_type: MetricType::Transaction,
            amount,
            currency: "USD".to_string(),
            category: "groceries".to_string(),
            merchant_id: None,
            location: None,
            timestamp,
        }
    }

    #[test]
    fn test_validate_accepts_sane_event() {
        let now = Utc::now();
        let m = metric(42.0, now);
        assert!(m.validate(&IngestConfig::default(), now).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        let now = Utc::now();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let m = metric(bad, now);
            assert!(matches!(
                m.validate(&IngestConfig::default(), now),
                Err(IngestError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_timestamps() {
        let now = Utc::now();
        let config = IngestConfig::default();

        let ancient = metric(10.0, now - chrono::Duration::days(60));
        assert!(matches!(
            ancient.validate(&config, now),
            Err(IngestError::TimestampOutOfRange { .. })
        ));

        let future = metric(10.0, now + chrono::Duration::hours(1));
        assert!(matches!(
            future.validate(&config, now),
            Err(IngestError::TimestampOutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_ids() {
        let now = Utc::now();
        let mut m = metric(10.0, now);
        m.entity_id = String::new();
        assert!(matches!(
            m.validate(&IngestConfig::default(), now),
            Err(IngestError::MissingField("entity_id"))
        ));
    }

    #[test]
    fn test_distance_km() {
        // London -> Paris is roughly 344 km
        let london = GeoPoint { lat: 51.5074, lon: -0.1278 };
        let paris = GeoPoint { lat: 48.8566, lon: 2.3522 };
        let d = london.distance_km(&paris);
        assert!((330.0..360.0).contains(&d), "got {}", d);
        assert!(london.distance_km(&london) < 1e-9);
    }

    #[test]
    fn test_day_of_week() {
        // 2024-01-01 was a Monday
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(metric(1.0, ts).day_of_week(), 0);
        assert_eq!(metric(1.0, ts).hour_of_day(), 12);
    }
}
