use serde::{Deserialize, Serialize};

/// Blocking reasons a lending action is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionErrorCode {
    // existence
    MarketNotFound,
    PositionNotFound,
    ProtocolNotSupported,
    // balance
    InvalidAmount,
    InsufficientBalance,
    InsufficientSupplyPosition,
    // market state
    MarketInactive,
    MarketFrozen,
    MarketPaused,
    SupplyDisabled,
    BorrowDisabled,
    ExceedsSupplyCap,
    ExceedsBorrowCap,
    // liquidity
    InsufficientLiquidity,
    // risk
    WouldCauseLiquidation,
    InsufficientCollateral,
}

/// Non-blocking concerns surfaced alongside a validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionWarningCode {
    LowHealthFactor,
    ModerateHealthFactor,
    HighLtvUtilization,
    Overpay,
    SimulationUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionWarning {
    pub code: ActionWarningCode,
    pub message: String,
    pub severity: Severity,
}

/// Outcome of a pre-flight check; every problem found, in check order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ActionError>,
    pub warnings: Vec<ActionWarning>,
    pub insufficient_balance: bool,
    pub insufficient_liquidity: bool,
    pub exceeds_cap: bool,
    pub would_cause_liquidation: bool,
    pub projected_health_factor: Option<f64>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn error(&mut self, code: ActionErrorCode, message: impl Into<String>, suggestion: Option<&str>) {
        match code {
            ActionErrorCode::InsufficientBalance | ActionErrorCode::InsufficientSupplyPosition => {
                self.insufficient_balance = true
            }
            ActionErrorCode::InsufficientLiquidity => self.insufficient_liquidity = true,
            ActionErrorCode::ExceedsSupplyCap | ActionErrorCode::ExceedsBorrowCap => self.exceeds_cap = true,
            ActionErrorCode::WouldCauseLiquidation => self.would_cause_liquidation = true,
            _ => {}
        }
        self.valid = false;
        self.errors.push(ActionError {
            code,
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        });
    }

    pub fn warning(&mut self, code: ActionWarningCode, message: impl Into<String>, severity: Severity) {
        self.warnings.push(ActionWarning {
            code,
            message: message.into(),
            severity,
        });
    }

    pub fn has_error(&self, code: ActionErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: ActionWarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_set_derived_flags() {
        let mut result = ValidationResult::new();
        assert!(result.valid);

        result.error(ActionErrorCode::ExceedsSupplyCap, "cap", Some("reduce amount"));
        result.error(ActionErrorCode::WouldCauseLiquidation, "liq", None);
        result.warning(ActionWarningCode::LowHealthFactor, "low", Severity::High);

        assert!(!result.valid);
        assert!(result.exceeds_cap);
        assert!(result.would_cause_liquidation);
        assert!(!result.insufficient_balance);
        assert_eq!(result.errors[0].suggestion.as_deref(), Some("reduce amount"));
        assert!(result.has_warning(ActionWarningCode::LowHealthFactor));
    }

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ActionErrorCode::WouldCauseLiquidation).unwrap();
        assert_eq!(json, "\"WOULD_CAUSE_LIQUIDATION\"");
    }
}
