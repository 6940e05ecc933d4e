// Moonwell (Compound V2 fork) comptroller, mToken and oracle interfaces
use alloy::sol;

sol! {
    interface IComptroller {
        function getAllMarkets() external view returns (address[] memory);
        function markets(address mToken) external view returns (bool isListed, uint256 collateralFactorMantissa);
        function getAccountLiquidity(address account) external view returns (uint256 err, uint256 liquidity, uint256 shortfall);
        function getAssetsIn(address account) external view returns (address[] memory);
        function liquidationIncentiveMantissa() external view returns (uint256);
        function oracle() external view returns (address);

        function mintGuardianPaused(address mToken) external view returns (bool);
        function borrowGuardianPaused(address mToken) external view returns (bool);
        function supplyCaps(address mToken) external view returns (uint256);
        function borrowCaps(address mToken) external view returns (uint256);

        function enterMarkets(address[] memory mTokens) external returns (uint256[] memory);
        function exitMarket(address mToken) external returns (uint256);
    }

    interface IMToken {
        function underlying() external view returns (address);
        function supplyRatePerTimestamp() external view returns (uint256);
        function borrowRatePerTimestamp() external view returns (uint256);
        function getCash() external view returns (uint256);
        function totalBorrows() external view returns (uint256);
        function totalReserves() external view returns (uint256);
        function getAccountSnapshot(address account) external view returns (
            uint256 err,
            uint256 mTokenBalance,
            uint256 borrowBalance,
            uint256 exchangeRateMantissa
        );

        function mint(uint256 mintAmount) external returns (uint256);
        function redeemUnderlying(uint256 redeemAmount) external returns (uint256);
        function borrow(uint256 borrowAmount) external returns (uint256);
        function repayBorrow(uint256 repayAmount) external returns (uint256);
    }

    interface IPriceOracle {
        function getUnderlyingPrice(address mToken) external view returns (uint256);
    }
}

/// Mantissas (collateral factor, exchange rate, rates, liquidity) are 18-decimal
pub const MANTISSA_SCALE: f64 = 1e18;
