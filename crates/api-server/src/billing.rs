//! Billing collaborator backed by the organization records.

use async_trait::async_trait;
use hangar_core::billing::{BillingHandler, Invoice, WebhookError};
use tracing::{info, warn};

use crate::auth::{AuthStore, BillingStatus};

pub struct OrgBillingHandler {
    auth: AuthStore,
}

impl OrgBillingHandler {
    pub fn new(auth: AuthStore) -> Self {
        Self { auth }
    }

    async fn apply(&self, invoice: &Invoice, status: BillingStatus) -> Result<(), WebhookError> {
        let Some(customer) = invoice.customer.as_deref() else {
            warn!(invoice_id = %invoice.id, "Invoice has no customer");
            return Ok(());
        };
        let updated = self
            .auth
            .apply_billing_status(customer, status)
            .await
            .map_err(|err| WebhookError::Handler(err.to_string()))?;
        match updated {
            Some(org) => info!(org_id = %org.id, invoice_id = %invoice.id, status = ?status, "Billing status updated"),
            None => warn!(customer = %customer, invoice_id = %invoice.id, "No organization for billing customer"),
        }
        Ok(())
    }
}

#[async_trait]
impl BillingHandler for OrgBillingHandler {
    async fn handle_paid(&self, invoice: &Invoice) -> Result<(), WebhookError> {
        self.apply(invoice, BillingStatus::Active).await
    }

    async fn handle_failed(&self, invoice: &Invoice) -> Result<(), WebhookError> {
        self.apply(invoice, BillingStatus::PastDue).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn invoice(customer: &str) -> Invoice {
        Invoice {
            id: "in_1".to_string(),
            customer: Some(customer.to_string()),
            amount_due: 1200,
            currency: Some("usd".to_string()),
        }
    }

    #[tokio::test]
    async fn paid_and_failed_invoices_move_the_org() {
        let dir = TempDir::new().unwrap();
        let auth = AuthStore::new(dir.path().to_path_buf(), 24).await.unwrap();
        let code = auth.issue_login_code("billing@example.com").await.unwrap();
        let user = auth.verify_login_code("billing@example.com", &code).await.unwrap();
        let org_id = auth.default_org_for(user.id).await.unwrap();
        auth.link_billing_customer(org_id, "cus_42").await.unwrap();

        let handler = OrgBillingHandler::new(auth.clone());
        handler.handle_failed(&invoice("cus_42")).await.unwrap();
        let orgs = auth.organizations_for_user(user.id).await;
        assert_eq!(orgs[0].0.billing_status, BillingStatus::PastDue);

        handler.handle_paid(&invoice("cus_42")).await.unwrap();
        let orgs = auth.organizations_for_user(user.id).await;
        assert_eq!(orgs[0].0.billing_status, BillingStatus::Active);

        handler.handle_paid(&invoice("cus_unknown")).await.unwrap();
    }
}
