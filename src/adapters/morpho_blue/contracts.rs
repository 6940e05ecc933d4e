// Morpho Blue singleton, IRM and oracle interfaces
use alloy::sol;

sol! {
    struct MarketParams {
        address loanToken;
        address collateralToken;
        address oracle;
        address irm;
        uint256 lltv;
    }

    struct Market {
        uint128 totalSupplyAssets;
        uint128 totalSupplyShares;
        uint128 totalBorrowAssets;
        uint128 totalBorrowShares;
        uint128 lastUpdate;
        uint128 fee;
    }

    interface IMorpho {
        function market(bytes32 id) external view returns (
            uint128 totalSupplyAssets,
            uint128 totalSupplyShares,
            uint128 totalBorrowAssets,
            uint128 totalBorrowShares,
            uint128 lastUpdate,
            uint128 fee
        );
        function idToMarketParams(bytes32 id) external view returns (
            address loanToken,
            address collateralToken,
            address oracle,
            address irm,
            uint256 lltv
        );
        function position(bytes32 id, address user) external view returns (
            uint256 supplyShares,
            uint128 borrowShares,
            uint128 collateral
        );

        function supply(MarketParams memory marketParams, uint256 assets, uint256 shares, address onBehalf, bytes memory data)
            external returns (uint256 assetsSupplied, uint256 sharesSupplied);
        function withdraw(MarketParams memory marketParams, uint256 assets, uint256 shares, address onBehalf, address receiver)
            external returns (uint256 assetsWithdrawn, uint256 sharesWithdrawn);
        function borrow(MarketParams memory marketParams, uint256 assets, uint256 shares, address onBehalf, address receiver)
            external returns (uint256 assetsBorrowed, uint256 sharesBorrowed);
        function repay(MarketParams memory marketParams, uint256 assets, uint256 shares, address onBehalf, bytes memory data)
            external returns (uint256 assetsRepaid, uint256 sharesRepaid);
        function supplyCollateral(MarketParams memory marketParams, uint256 assets, address onBehalf, bytes memory data) external;
        function withdrawCollateral(MarketParams memory marketParams, uint256 assets, address onBehalf, address receiver) external;
    }

    interface IIrm {
        function borrowRateView(MarketParams memory marketParams, Market memory market) external view returns (uint256);
    }

    interface IOracle {
        function price() external view returns (uint256);
    }
}

/// Oracle prices are scaled by 1e36 (adjusted for the two tokens' decimals)
pub const ORACLE_PRICE_SCALE: f64 = 1e36;
/// Virtual shares and assets guarding share price manipulation
pub const VIRTUAL_SHARES: u64 = 1_000_000;
pub const VIRTUAL_ASSETS: u64 = 1;
/// Cap on the liquidation incentive factor
pub const MAX_LIQUIDATION_INCENTIVE_FACTOR: f64 = 1.15;
pub const LIQUIDATION_CURSOR: f64 = 0.3;
