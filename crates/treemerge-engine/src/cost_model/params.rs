use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Weights and search settings of the cost-model matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelParams {
    /// Cost of leaving a node unmatched.
    pub wn: f32,
    /// Cost of matching nodes with different labels.
    pub wr: f32,
    /// Cost per child whose image is not a child of the partner.
    pub wa: f32,
    /// Weight of the sibling-group breakup term.
    pub ws: f32,
    /// Cost of an ordering violation among siblings.
    pub wo: f32,
    /// Success probability of the geometric distribution that picks the next
    /// edge to fix while completing a matching.
    pub p_assign: f32,
    /// Lower bound of the fraction of edges kept from the previous matching.
    pub fix_lower: f32,
    /// Upper bound of the fraction of edges kept from the previous matching.
    pub fix_upper: f32,
    /// Acceptance sharpness: higher values accept worse proposals less often.
    pub beta: f32,
    pub iterations: usize,
    /// `None` seeds the generator from system entropy.
    pub seed: Option<u64>,
    /// Evaluate per-edge costs and bounds on the rayon pool.
    pub parallel: bool,
    /// Keep a uniformly chosen fraction in `[fix_lower, fix_upper]` of the
    /// previous edges; otherwise keep a random number of the cheapest ones.
    pub fix_random_percentage: bool,
    /// Integrated mode re-matches pairs whose percentage is below this value.
    pub re_match_bound: f32,
}

impl Default for CostModelParams {
    fn default() -> Self {
        Self {
            wn: 1.0,
            wr: 1.0,
            wa: 1.0,
            ws: 1.0,
            wo: 1.0,
            p_assign: 0.7,
            fix_lower: 0.25,
            fix_upper: 0.5,
            beta: 30.0,
            iterations: 100,
            seed: Some(42),
            parallel: true,
            fix_random_percentage: true,
            re_match_bound: 0.3,
        }
    }
}

impl CostModelParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("wn", self.wn),
            ("wr", self.wr),
            ("wa", self.wa),
            ("ws", self.ws),
            ("wo", self.wo),
            ("beta", self.beta),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }

        for (name, value) in [
            ("p_assign", self.p_assign),
            ("fix_lower", self.fix_lower),
            ("fix_upper", self.fix_upper),
            ("re_match_bound", self.re_match_bound),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::FractionOutOfRange { name, value });
            }
        }

        if self.fix_lower > self.fix_upper {
            return Err(ConfigError::InvertedFixRange {
                lower: self.fix_lower,
                upper: self.fix_upper,
            });
        }
        if self.iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CostModelParams::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let params = CostModelParams {
            p_assign: 1.5,
            ..Default::default()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::FractionOutOfRange {
                name: "p_assign",
                value: 1.5
            })
        );
    }

    #[test]
    fn test_rejects_inverted_fix_range() {
        let params = CostModelParams {
            fix_lower: 0.6,
            fix_upper: 0.4,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ConfigError::InvertedFixRange { .. })));
    }

    #[test]
    fn test_rejects_negative_weight_and_zero_iterations() {
        let params = CostModelParams {
            wa: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidWeight { name: "wa", .. })
        ));

        let params = CostModelParams {
            iterations: 0,
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(ConfigError::NoIterations));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: CostModelParams = serde_json::from_str(r#"{"wr": 2.0, "seed": null}"#).unwrap();
        assert_eq!(params.wr, 2.0);
        assert_eq!(params.seed, None);
        assert_eq!(params.iterations, 100);
    }
}
