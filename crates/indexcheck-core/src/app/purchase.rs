//! Credit purchases.
//!
//! The payment gateway owns the order and signature flow; this service only
//! checks the signature it was handed and credits the matching package once
//! per order.

use std::sync::Arc;

use serde::Serialize;

use super::ledger::CreditLedger;
use crate::domain::{CreditPackage, LedgerReason, OwnerId, PipelineError};
use crate::ports::PaymentGateway;

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub caller: Option<OwnerId>,
    pub package_id: String,
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub credits_added: u64,
    pub balance: u64,
}

pub struct PurchaseService {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<CreditLedger>,
    packages: Vec<CreditPackage>,
}

fn order_note(order_id: &str, payment_id: &str, package_id: &str) -> String {
    format!("order={order_id} payment={payment_id} package={package_id}")
}

impl PurchaseService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<CreditLedger>,
        packages: Vec<CreditPackage>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            packages,
        }
    }

    pub fn packages(&self) -> &[CreditPackage] {
        &self.packages
    }

    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseReceipt, PipelineError> {
        let owner = request.caller.ok_or_else(|| {
            PipelineError::Unauthenticated("You must be signed in to buy credits.".to_string())
        })?;
        if [&request.order_id, &request.payment_id, &request.signature]
            .iter()
            .any(|s| s.trim().is_empty())
        {
            return Err(PipelineError::InvalidArgument(
                "Order id, payment id and signature are required.".to_string(),
            ));
        }
        let package = self
            .packages
            .iter()
            .find(|p| p.id == request.package_id)
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!(
                    "Unknown credit package: {}",
                    request.package_id
                ))
            })?;

        let valid = self
            .gateway
            .verify_signature(&request.order_id, &request.payment_id, &request.signature)
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        if !valid {
            tracing::warn!(owner = %owner, order_id = %request.order_id, "payment signature rejected");
            return Err(PipelineError::FailedPrecondition(
                "Payment verification failed.".to_string(),
            ));
        }

        let order_marker = format!("order={} ", request.order_id);
        let already_credited = self.ledger.journal(&owner).await?.iter().any(|e| {
            e.reason == LedgerReason::Purchase
                && e.note.as_deref().is_some_and(|n| n.starts_with(&order_marker))
        });
        if already_credited {
            return Err(PipelineError::FailedPrecondition(format!(
                "Order {} has already been credited.",
                request.order_id
            )));
        }

        let balance = self
            .ledger
            .grant(
                &owner,
                package.credits,
                order_note(&request.order_id, &request.payment_id, &package.id),
            )
            .await?;
        tracing::info!(owner = %owner, package = %package.id, credits = package.credits, "credits purchased");
        Ok(PurchaseReceipt {
            credits_added: package.credits,
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use crate::impls::{InMemoryLedger, InMemoryPaymentGateway};
    use crate::ports::SystemClock;

    async fn service() -> (PurchaseService, Arc<InMemoryPaymentGateway>) {
        let store = Arc::new(InMemoryLedger::new());
        store.open_account(OwnerId::new("u"), 0).await;
        let ledger = Arc::new(CreditLedger::new(store, Arc::new(SystemClock)));
        let gateway = Arc::new(InMemoryPaymentGateway::new());
        let packages = vec![CreditPackage {
            id: "starter".into(),
            name: "Starter".into(),
            credits: 100,
            price: 49_900,
        }];
        (PurchaseService::new(gateway.clone(), ledger, packages), gateway)
    }

    fn request(signature: &str) -> PurchaseRequest {
        PurchaseRequest {
            caller: Some(OwnerId::new("u")),
            package_id: "starter".into(),
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
            signature: signature.into(),
        }
    }

    #[tokio::test]
    async fn verified_payment_credits_package_once() {
        let (service, gateway) = service().await;
        gateway.approve("order_1", "pay_1", "good");

        let receipt = service.purchase(request("good")).await.unwrap();
        assert_eq!(
            receipt,
            PurchaseReceipt {
                credits_added: 100,
                balance: 100
            }
        );

        let replay = service.purchase(request("good")).await.unwrap_err();
        assert_eq!(replay.code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn bad_signature_credits_nothing() {
        let (service, _) = service().await;
        let err = service.purchase(request("forged")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn unknown_package_and_anonymous_caller_are_rejected() {
        let (service, _) = service().await;

        let mut unknown = request("good");
        unknown.package_id = "platinum".into();
        assert_eq!(
            service.purchase(unknown).await.unwrap_err().code(),
            ErrorCode::InvalidArgument
        );

        let mut anonymous = request("good");
        anonymous.caller = None;
        assert_eq!(
            service.purchase(anonymous).await.unwrap_err().code(),
            ErrorCode::Unauthenticated
        );
    }

    #[tokio::test]
    async fn gateway_outage_is_internal() {
        let (service, gateway) = service().await;
        gateway.set_unavailable(true);
        let err = service.purchase(request("good")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
