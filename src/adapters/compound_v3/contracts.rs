// Compound V3 (Comet) contract interface
use alloy::sol;

sol! {
    interface IComet {
        struct AssetInfo {
            uint8 offset;
            address asset;
            address priceFeed;
            uint64 scale;
            uint64 borrowCollateralFactor;
            uint64 liquidateCollateralFactor;
            uint64 liquidationFactor;
            uint128 supplyCap;
        }

        struct TotalsCollateral {
            uint128 totalSupplyAsset;
            uint128 _reserved;
        }

        function baseToken() external view returns (address);
        function baseTokenPriceFeed() external view returns (address);
        function numAssets() external view returns (uint8);
        function getAssetInfo(uint8 i) external view returns (AssetInfo memory);

        function getUtilization() external view returns (uint256);
        function getSupplyRate(uint256 utilization) external view returns (uint64);
        function getBorrowRate(uint256 utilization) external view returns (uint64);
        function totalSupply() external view returns (uint256);
        function totalBorrow() external view returns (uint256);
        function totalsCollateral(address asset) external view returns (TotalsCollateral memory);
        function getPrice(address priceFeed) external view returns (uint256);

        function isSupplyPaused() external view returns (bool);
        function isWithdrawPaused() external view returns (bool);

        function balanceOf(address account) external view returns (uint256);
        function borrowBalanceOf(address account) external view returns (uint256);
        function collateralBalanceOf(address account, address asset) external view returns (uint128);

        function supply(address asset, uint256 amount) external;
        function withdraw(address asset, uint256 amount) external;
    }
}

/// Comet factors and rates are 18-decimal fixed point
pub const FACTOR_SCALE: f64 = 1e18;
/// Comet price feeds report 8 decimals
pub const PRICE_SCALE: f64 = 1e8;
