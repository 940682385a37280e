//! Stateless helpers shared by provider clients, the fraud engine and the orchestrator.

pub mod cipher;
pub mod crypto;
pub mod fees;
pub mod ids;
pub mod phone;
pub mod settlement;
pub mod user_agent;

pub use cipher::DataCipher;
pub use crypto::{
    generate_correlation_id, generate_webhook_signature, hash_data, mask_phone,
    mask_sensitive_data, secure_eq, verify_webhook_signature,
};
pub use fees::{
    calculate_merchant_commission, calculate_payment_fees, format_currency, validate_amount,
    AmountValidation, FeeBreakdown,
};
pub use ids::{generate_payment_code, generate_transaction_reference};
pub use phone::{
    is_phone_number_compatible, validate_and_format_phone_number, Operator, PhoneNumberInfo,
};
pub use settlement::{
    calculate_settlement_date, get_next_business_day, is_business_day, SettlementCalendar,
};
