pub mod market;
pub mod position;
pub mod protocol;
pub mod routing;
pub mod transaction;
pub mod validation;

pub use market::*;
pub use position::*;
pub use protocol::*;
pub use routing::*;
pub use transaction::*;
pub use validation::*;
