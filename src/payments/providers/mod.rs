pub mod cash;
pub mod mtn;
pub mod orange;

pub use cash::{CashConfig, CashProvider};
pub use mtn::{MtnConfig, MtnProvider, MTN_USSD_CODE};
pub use orange::{OrangeConfig, OrangeProvider, ORANGE_USSD_CODE};
