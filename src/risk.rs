//! Risk Fusion (C10): combine a file's chaos score and normalized blast
//! radius (and, optionally, a churn score) into a single banded risk score
//!.

const BLAST_RADIUS_NORMALIZER: f64 = 50.0;

const CRITICAL: f64 = 0.40;
const HIGH: f64 = 0.30;
const MODERATE: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Critical,
    High,
    Moderate,
    Low,
}

impl RiskBand {
    pub fn label(self) -> &'static str {
        match self {
            RiskBand::Critical => "CRITICAL",
            RiskBand::High => "HIGH",
            RiskBand::Moderate => "MODERATE",
            RiskBand::Low => "LOW",
        }
    }
}

fn band_for(combined: f64) -> RiskBand {
    if combined >= CRITICAL {
        RiskBand::Critical
    } else if combined >= HIGH {
        RiskBand::High
    } else if combined >= MODERATE {
        RiskBand::Moderate
    } else {
        RiskBand::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedRisk {
    pub chaos: f64,
    pub normalized_blast: f64,
    pub churn: Option<f64>,
    pub combined: f64,
    pub band: RiskBand,
}

/// `normalized_blast = min(1, blast_radius/50)`; weights are `0.6/0.4`
/// (chaos/blast) without churn, `0.4/0.3/0.3` (chaos/blast/churn) with it
///.
pub fn combine_risk(chaos_score: f64, blast_radius: usize, churn: Option<f64>) -> CombinedRisk {
    let normalized_blast = (blast_radius as f64 / BLAST_RADIUS_NORMALIZER).min(1.0);
    let combined = match churn {
        Some(churn) => 0.4 * chaos_score + 0.3 * normalized_blast + 0.3 * churn,
        None => 0.6 * chaos_score + 0.4 * normalized_blast,
    };
    CombinedRisk {
        chaos: chaos_score,
        normalized_blast,
        churn,
        combined,
        band: band_for(combined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_without_churn_using_06_04_weights() {
        let risk = combine_risk(0.5, 25, None);
        assert!((risk.normalized_blast - 0.5).abs() < 1e-9);
        assert!((risk.combined - (0.6 * 0.5 + 0.4 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn combines_with_churn_using_04_03_03_weights() {
        let risk = combine_risk(0.5, 25, Some(0.2));
        assert!((risk.combined - (0.4 * 0.5 + 0.3 * 0.5 + 0.3 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn blast_radius_is_clamped_to_1() {
        let risk = combine_risk(0.0, 500, None);
        assert_eq!(risk.normalized_blast, 1.0);
    }

    #[test]
    fn bands_follow_fixed_cutoffs() {
        assert_eq!(combine_risk(1.0, 0, None).band, RiskBand::Critical);
        assert_eq!(combine_risk(0.5, 0, None).band, RiskBand::High);
        assert_eq!(combine_risk(0.35, 0, None).band, RiskBand::Moderate);
        assert_eq!(combine_risk(0.0, 0, None).band, RiskBand::Low);
    }
}
