//! Payment gateway port.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payment gateway: {0}")]
pub struct PaymentError(pub String);

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, PaymentError>;
}
