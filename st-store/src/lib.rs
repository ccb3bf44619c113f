pub mod ctx;
pub mod db;
pub mod db_model_manager;
pub mod market_bmc;
pub mod transaction_bmc;

pub use ctx::*;
pub use db::*;
pub use db_model_manager::*;
pub use market_bmc::*;
pub use transaction_bmc::*;
