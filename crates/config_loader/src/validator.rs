//! 配置校验
//!
//! Derive-level range checks plus the semantic rules the derive cannot
//! express.

use contracts::{TrafficConfig, TrafficError};
use validator::Validate;

/// 校验配置合法性
pub fn validate(config: &TrafficConfig) -> Result<(), TrafficError> {
    config
        .validate()
        .map_err(|errors| TrafficError::config_validation("config", errors.to_string()))?;

    let (near, far) = config.localization.junction_check_indices;
    if near >= far {
        return Err(TrafficError::config_validation(
            "localization.junction_check_indices",
            format!("near index {near} must precede far index {far}"),
        ));
    }

    if config.collision.search_radius <= config.collision.vicinity_cell {
        return Err(TrafficError::config_validation(
            "collision.search_radius",
            "search radius must exceed one vicinity cell",
        ));
    }

    for (name, gains) in [
        ("planner.longitudinal_gains", &config.planner.longitudinal_gains),
        (
            "planner.longitudinal_highway_gains",
            &config.planner.longitudinal_highway_gains,
        ),
        ("planner.lateral_gains", &config.planner.lateral_gains),
    ] {
        if gains.iter().any(|g| !g.is_finite() || *g < 0.0) {
            return Err(TrafficError::config_validation(
                name,
                "PID gains must be finite and non-negative",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass() {
        assert!(validate(&TrafficConfig::default()).is_ok());
    }

    #[test]
    fn test_inverted_junction_indices_rejected() {
        let mut config = TrafficConfig::default();
        config.localization.junction_check_indices = (5, 2);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_negative_gain_rejected() {
        let mut config = TrafficConfig::default();
        config.planner.lateral_gains = [-1.0, 0.0, 0.0];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tiny_search_radius_rejected() {
        let mut config = TrafficConfig::default();
        config.collision.search_radius = 5.0;
        assert!(validate(&config).is_err());
    }
}
