use chrono::Duration;

use crate::config::DetectionConfig;
use crate::errors::DetectorError;
use crate::metrics::TransactionMetric;
use crate::profile::RiskProfile;

use super::pattern::{extract_features, PatternModel, FEATURE_NAMES};
use super::thresholds::StatisticalThreshold;
use super::types::{AnomalyScore, AnomalyType};

type DetectorResult = Result<Option<AnomalyScore>, DetectorError>;

/// Statistical amount check: fires when the event's z-score against the
/// calibrated threshold exceeds the configured bound. Abstains while the
/// threshold is uncalibrated.
pub fn check_amount(metric: &TransactionMetric, threshold: &StatisticalThreshold) -> DetectorResult {
    if !threshold.calibrated {
        return Ok(None);
    }
    if threshold.std_dev <= 0.0 || !threshold.std_dev.is_finite() {
        return Err(DetectorError::new(
            "amount",
            format!("calibrated threshold has invalid std_dev {}", threshold.std_dev),
        ));
    }

    let z = (metric.amount - threshold.mean).abs() / threshold.std_dev;
    if z <= threshold.z_score_threshold {
        return Ok(None);
    }

    let score = (z / threshold.z_score_threshold).min(1.0);
    Ok(Some(AnomalyScore::new(
        AnomalyType::AmountAnomaly,
        score,
        format!(
            "amount {:.2} is {:.1} standard deviations from mean {:.2}",
            metric.amount, z, threshold.mean
        ),
        serde_json::json!({
            "amount": metric.amount,
            "mean": threshold.mean,
            "std_dev": threshold.std_dev,
            "z_score": z,
        }),
        metric.timestamp,
    )))
}

/// Frequency check: events in the trailing hour versus the entity's
/// historical average hourly rate. Abstains below `min_data_points`.
pub fn check_frequency(
    metric: &TransactionMetric,
    window: &[TransactionMetric],
    profile: &RiskProfile,
    config: &DetectionConfig,
) -> DetectorResult {
    if window.len() < config.min_data_points {
        return Ok(None);
    }

    let hour_ago = metric.timestamp - Duration::hours(1);
    let recent = window.iter().filter(|m| m.timestamp > hour_ago).count() as f64;

    // Rough historical baseline: lifetime count over profile age.
    let hourly_rate = (profile.history.count as f64 / profile.age_hours(metric.timestamp)).max(1e-6);
    let ratio = recent / hourly_rate;
    if ratio <= config.frequency_ratio {
        return Ok(None);
    }

    let score = (ratio / config.frequency_ratio).min(1.0);
    Ok(Some(AnomalyScore::new(
        AnomalyType::FrequencyAnomaly,
        score,
        format!(
            "{} events in the last hour, {:.1}x the historical rate",
            recent as u64, ratio
        ),
        serde_json::json!({
            "events_last_hour": recent,
            "historical_hourly_rate": hourly_rate,
            "ratio": ratio,
        }),
        metric.timestamp,
    )))
}

/// Velocity check: amount moved per unit time over the most recent samples
/// versus a rough historical velocity estimate.
pub fn check_velocity(
    metric: &TransactionMetric,
    window: &[TransactionMetric],
    profile: &RiskProfile,
    config: &DetectionConfig,
) -> DetectorResult {
    if window.len() < 2 {
        return Ok(None);
    }

    let start = window.len().saturating_sub(config.velocity_samples);
    let recent = &window[start..];
    let total: f64 = recent.iter().map(|m| m.amount).sum();
    let span_secs = (recent[recent.len() - 1].timestamp - recent[0].timestamp)
        .num_milliseconds() as f64
        / 1000.0;
    let avg_interval = (span_secs / (recent.len() - 1) as f64).max(1e-3);

    let observed = total / avg_interval;
    if !observed.is_finite() {
        return Err(DetectorError::new(
            "velocity",
            format!("non-finite velocity from total {} over {}s", total, avg_interval),
        ));
    }

    // Rough baseline: average amount spread over an hour, per second.
    let baseline = (profile.history.average_amount / 3600.0).max(1e-6);
    let ratio = observed / baseline;
    if ratio <= config.velocity_ratio {
        return Ok(None);
    }

    let score = (ratio / config.velocity_ratio).min(1.0);
    Ok(Some(AnomalyScore::new(
        AnomalyType::VelocityAnomaly,
        score,
        format!(
            "moving {:.2} per second, {:.1}x the historical velocity",
            observed, ratio
        ),
        serde_json::json!({
            "observed_velocity": observed,
            "baseline_velocity": baseline,
            "ratio": ratio,
            "samples": recent.len(),
        }),
        metric.timestamp,
    )))
}

/// Multivariate novelty check against the trained pattern model. Abstains
/// while the model is untrained.
pub fn check_pattern(
    metric: &TransactionMetric,
    model: &PatternModel,
    profile: &RiskProfile,
    config: &DetectionConfig,
) -> DetectorResult {
    if !model.trained {
        return Ok(None);
    }
    let features = extract_features(metric, profile);
    if features.len() != model.feature_stats.len() {
        return Err(DetectorError::new(
            "pattern",
            format!(
                "feature vector length {} does not match model dimensionality {}",
                features.len(),
                model.feature_stats.len()
            ),
        ));
    }

    let score = model.score(&features);
    if score <= config.alert_threshold {
        return Ok(None);
    }

    let named: serde_json::Map<String, serde_json::Value> = FEATURE_NAMES
        .iter()
        .zip(&features)
        .map(|(name, value)| (name.to_string(), serde_json::json!(value)))
        .collect();
    Ok(Some(AnomalyScore::new(
        AnomalyType::PatternAnomaly,
        score,
        "transaction deviates from the learned multivariate pattern".to_string(),
        serde_json::Value::Object(named),
        metric.timestamp,
    )))
}

/// Behavioral novelty check: unusual hour, never-seen location, or
/// never-seen merchant. Reports only the single highest-scoring reason.
/// Expects the profile as of before this event was folded in.
pub fn check_behavior(
    metric: &TransactionMetric,
    profile: &RiskProfile,
    _config: &DetectionConfig,
) -> DetectorResult {
    let mut best: Option<(f64, String, serde_json::Value)> = None;
    let mut consider = |score: f64, description: String, features: serde_json::Value| {
        if best.as_ref().map(|(s, _, _)| score > *s).unwrap_or(true) {
            best = Some((score, description, features));
        }
    };

    // Rare hour of day: under 5% of history with enough samples.
    let total = profile.behavior.total_samples();
    if total > 50 {
        if let Some(share) = profile.behavior.hour_share(metric.hour_of_day()) {
            if share < 0.05 {
                let score = (0.5 + (0.05 - share) * 8.0).min(0.9);
                consider(
                    score,
                    format!(
                        "activity at hour {} covers only {:.1}% of history",
                        metric.hour_of_day(),
                        share * 100.0
                    ),
                    serde_json::json!({
                        "hour": metric.hour_of_day(),
                        "hour_share": share,
                        "history_samples": total,
                    }),
                );
            }
        }
    }

    // Never-seen location, once the profile knows enough places.
    if let Some(location) = &metric.location {
        if profile.history.locations.len() > 5
            && !profile.history.locations.contains(&location.grid_cell())
        {
            consider(
                0.7,
                "transaction at a previously unseen location".to_string(),
                serde_json::json!({
                    "lat": location.lat,
                    "lon": location.lon,
                    "known_locations": profile.history.locations.len(),
                }),
            );
        }
    }

    // Never-seen merchant, once the profile knows enough merchants.
    if let Some(merchant) = &metric.merchant_id {
        if profile.history.merchants.len() > 10 && !profile.history.merchants.contains(merchant) {
            consider(
                0.6,
                format!("first transaction with unseen merchant {}", merchant),
                serde_json::json!({
                    "merchant_id": merchant,
                    "known_merchants": profile.history.merchants.len(),
                }),
            );
        }
    }

    Ok(best.map(|(score, description, features)| {
        AnomalyScore::new(
            AnomalyType::BehaviorAnomaly,
            score,
            description,
            features,
            metric.timestamp,
        )
    }))
}
