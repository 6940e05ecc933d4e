pub mod aave_v3;
pub mod base;
pub mod compound_v3;
pub mod contracts;
pub mod moonwell;
pub mod morpho_blue;
pub mod traits;

pub use aave_v3::AaveV3Adapter;
pub use compound_v3::CompoundV3Adapter;
pub use moonwell::MoonwellAdapter;
pub use morpho_blue::MorphoBlueAdapter;
pub use traits::*;
