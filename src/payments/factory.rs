use crate::helpers::fees::{calculate_payment_fees, validate_amount};
use crate::helpers::phone::{validate_and_format_phone_number, Operator};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{CashProvider, MtnProvider, OrangeProvider};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub default_provider: ProviderName,
    pub enabled_providers: Vec<ProviderName>,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderName::Mtn,
            enabled_providers: ProviderName::ALL.to_vec(),
        }
    }
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider =
            std::env::var("DEFAULT_PAYMENT_PROVIDER").unwrap_or_else(|_| "mtn".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "mtn,orange,cash".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }

        if !enabled_providers.contains(&default_provider) {
            return Err(PaymentError::ValidationError {
                message: "default provider must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            });
        }

        Ok(Self {
            default_provider,
            enabled_providers,
        })
    }
}

/// Provider clients keyed by the closed `ProviderName` enum. Each client owns
/// its HTTP connection pool and token cache, so instances are built once and shared.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn contains(&self, provider: ProviderName) -> bool {
        self.providers.contains_key(&provider)
    }

    /// Enabled providers in canonical order.
    pub fn enabled(&self) -> Vec<ProviderName> {
        ProviderName::ALL
            .iter()
            .copied()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}

pub struct PaymentProviderFactory {
    config: PaymentFactoryConfig,
}

impl PaymentProviderFactory {
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        Ok(Self { config })
    }

    pub fn with_config(config: PaymentFactoryConfig) -> Self {
        Self { config }
    }

    pub fn create_provider(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        if !self.config.enabled_providers.contains(&provider) {
            return Err(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            });
        }

        match provider {
            ProviderName::Mtn => Ok(Arc::new(MtnProvider::from_env()?)),
            ProviderName::Orange => Ok(Arc::new(OrangeProvider::from_env()?)),
            ProviderName::Cash => Ok(Arc::new(CashProvider::from_env())),
        }
    }

    pub fn build_registry(&self) -> PaymentResult<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for provider in &self.config.enabled_providers {
            registry.register(self.create_provider(*provider)?);
        }
        Ok(registry)
    }

    pub fn default_provider(&self) -> ProviderName {
        self.config.default_provider
    }

    /// Mobile-money network matching the payer's number, falling back to the default.
    pub fn default_for_phone(&self, phone: &str) -> ProviderName {
        let preferred = match validate_and_format_phone_number(phone).map(|p| p.operator) {
            Some(Operator::Mtn) => ProviderName::Mtn,
            Some(Operator::Orange) => ProviderName::Orange,
            _ => self.config.default_provider,
        };
        if self.config.enabled_providers.contains(&preferred) {
            preferred
        } else {
            self.config.default_provider
        }
    }

    pub fn cheapest_provider_for_amount(&self, amount: i64) -> ProviderName {
        self.config
            .enabled_providers
            .iter()
            .copied()
            .filter(|p| validate_amount(amount, *p, false).valid)
            .min_by_key(|p| {
                let quote = calculate_payment_fees(amount, *p);
                quote.fees + quote.taxes
            })
            .unwrap_or(self.config.default_provider)
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        self.config.enabled_providers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::CashConfig;

    #[test]
    fn provider_name_parsing_accepts_aliases() {
        assert!(matches!(ProviderName::from_str("MTN"), Ok(ProviderName::Mtn)));
        assert!(matches!(
            ProviderName::from_str("orange_money"),
            Ok(ProviderName::Orange)
        ));
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn phone_selects_matching_network() {
        let factory = PaymentProviderFactory::with_config(PaymentFactoryConfig::default());
        assert_eq!(factory.default_for_phone("+237 691 234 567"), ProviderName::Orange);
        assert_eq!(factory.default_for_phone("677123456"), ProviderName::Mtn);
        assert_eq!(factory.default_for_phone("garbage"), ProviderName::Mtn);
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let factory = PaymentProviderFactory::with_config(PaymentFactoryConfig {
            default_provider: ProviderName::Cash,
            enabled_providers: vec![ProviderName::Cash],
        });
        assert!(matches!(
            factory.create_provider(ProviderName::Mtn),
            Err(PaymentError::ValidationError { .. })
        ));
        assert_eq!(factory.list_available_providers(), vec![ProviderName::Cash]);
    }

    #[test]
    fn registry_lists_in_canonical_order() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(CashProvider::new(CashConfig::default())));
        assert_eq!(registry.enabled(), vec![ProviderName::Cash]);
        assert!(registry.get(ProviderName::Orange).is_err());
    }
}
