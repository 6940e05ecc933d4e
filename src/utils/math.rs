use alloy::primitives::U256;

pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
pub const WAD: f64 = 1e18;
pub const RAY: f64 = 1e27;

/// Lossy conversion of a raw on-chain integer to `f64`
pub fn u256_to_f64(value: U256) -> f64 {
    match u128::try_from(value) {
        Ok(small) => small as f64,
        Err(_) => value.to_string().parse::<f64>().unwrap_or(f64::MAX),
    }
}

/// Raw base units to whole token units
pub fn to_units(amount: U256, decimals: u8) -> f64 {
    u256_to_f64(amount) / 10f64.powi(decimals as i32)
}

/// Whole token units to raw base units, truncating dust below one base unit
pub fn from_units(amount: f64, decimals: u8) -> U256 {
    if !amount.is_finite() || amount <= 0.0 {
        return U256::ZERO;
    }
    let raw = (amount * 10f64.powi(decimals as i32)).floor();
    if raw < u128::MAX as f64 {
        U256::from(raw as u128)
    } else {
        format!("{:.0}", raw).parse::<U256>().unwrap_or(U256::MAX)
    }
}

pub fn wad_to_f64(value: U256) -> f64 {
    u256_to_f64(value) / WAD
}

pub fn ray_to_f64(value: U256) -> f64 {
    u256_to_f64(value) / RAY
}

/// Basis points (1e4 = 100%) to a fraction
pub fn bps_to_ratio(bps: U256) -> f64 {
    u256_to_f64(bps) / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(to_units(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(from_units(1.5, 6), U256::from(1_500_000u64));
        assert_eq!(from_units(-3.0, 18), U256::ZERO);
        assert_eq!(from_units(f64::NAN, 18), U256::ZERO);
    }

    #[test]
    fn test_large_values_do_not_saturate_early() {
        let huge = U256::from(u128::MAX) * U256::from(1000u64);
        assert!(u256_to_f64(huge) > u128::MAX as f64);
        assert_eq!(bps_to_ratio(U256::from(8250u64)), 0.825);
        assert!((ray_to_f64(U256::from(10u64).pow(U256::from(27u64))) - 1.0).abs() < 1e-12);
    }
}
