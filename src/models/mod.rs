pub mod balance;
pub mod ids;
pub mod order;
pub mod trade;
pub mod trading_pair;

pub use balance::*;
pub use ids::*;
pub use order::*;
pub use trade::*;
pub use trading_pair::*;
