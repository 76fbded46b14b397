//! Coatbay Payment Gateway adapter
//!
//! The gateway is an external collaborator. Every mutating call carries a
//! caller-supplied idempotency key, so a retry after a timeout reuses the
//! same key and the gateway deduplicates on its side. A timeout is an
//! unknown outcome, never a known failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use coatbay_types::{CoatbayError, Currency, Money, PartyId, Result};

/// Status of a payment intent at the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Succeeded,
    Canceled,
}

/// A payment intent as the gateway reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub status: IntentStatus,
    /// Charge id, present once the intent succeeded
    pub charge_id: Option<String>,
    pub amount: Money,
}

/// A completed transfer to a connected account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
}

/// A completed refund against a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
}

/// Capabilities of a connected account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatus {
    pub payouts_enabled: bool,
    pub charges_enabled: bool,
}

/// Payment gateway seam
///
/// Implementations must make every mutating call idempotent by the supplied
/// key: the same key must yield the same object, with at most one
/// gateway-side effect.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Look up (or lazily create) the gateway customer for a buyer.
    async fn ensure_customer(&self, party: PartyId, email: Option<&str>) -> Result<String>;

    async fn create_payment_intent(
        &self,
        amount: Money,
        idempotency_key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentIntent>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent>;

    /// Refresh metadata on an existing intent (used when a hold is reused).
    async fn update_intent_metadata(
        &self,
        intent_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    async fn create_transfer(
        &self,
        amount: Money,
        destination_account: &str,
        idempotency_key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Transfer>;

    async fn create_refund(
        &self,
        charge_id: &str,
        amount: Money,
        idempotency_key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<RefundReceipt>;

    async fn retrieve_account(&self, account_id: &str) -> Result<AccountStatus>;
}

#[derive(Default)]
struct MockState {
    customers: HashMap<PartyId, String>,
    intents: HashMap<String, PaymentIntent>,
    intents_by_key: HashMap<String, String>,
    transfers_by_key: HashMap<String, Transfer>,
    refunds_by_key: HashMap<String, RefundReceipt>,
    refunded_by_charge: HashMap<String, i64>,
    accounts: HashMap<String, AccountStatus>,
    fail_next_intent: bool,
    fail_next_transfer: bool,
    fail_next_refund: bool,
    transfer_calls: u64,
    refund_calls: u64,
}

/// In-memory gateway for tests and demo mode
///
/// Deduplicates by idempotency key exactly like the real gateway: a repeated
/// key returns the stored object and counts as zero additional effects.
#[derive(Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payout-enabled connected account.
    pub async fn add_account(&self, account_id: &str, payouts_enabled: bool) {
        self.state.lock().await.accounts.insert(
            account_id.to_string(),
            AccountStatus {
                payouts_enabled,
                charges_enabled: true,
            },
        );
    }

    /// Mark an intent succeeded and attach a charge, simulating the buyer
    /// completing payment.
    pub async fn settle_intent(&self, intent_id: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let intent = state.intents.get_mut(intent_id)?;
        let charge_id = format!("ch_{}", Uuid::new_v4().simple());
        intent.status = IntentStatus::Succeeded;
        intent.charge_id = Some(charge_id.clone());
        Some(charge_id)
    }

    pub async fn fail_next_intent(&self) {
        self.state.lock().await.fail_next_intent = true;
    }

    pub async fn fail_next_transfer(&self) {
        self.state.lock().await.fail_next_transfer = true;
    }

    pub async fn fail_next_refund(&self) {
        self.state.lock().await.fail_next_refund = true;
    }

    /// Number of transfer effects actually performed (dedup hits excluded).
    pub async fn transfer_effects(&self) -> u64 {
        self.state.lock().await.transfer_calls
    }

    /// Number of refund effects actually performed (dedup hits excluded).
    pub async fn refund_effects(&self) -> u64 {
        self.state.lock().await.refund_calls
    }

    /// Total refunded against a charge, for reconciliation assertions.
    pub async fn refunded_on_charge(&self, charge_id: &str) -> i64 {
        self.state
            .lock()
            .await
            .refunded_by_charge
            .get(charge_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn ensure_customer(&self, party: PartyId, _email: Option<&str>) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = state
            .customers
            .entry(party)
            .or_insert_with(|| format!("cus_{}", Uuid::new_v4().simple()));
        Ok(id.clone())
    }

    async fn create_payment_intent(
        &self,
        amount: Money,
        idempotency_key: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<PaymentIntent> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.intents_by_key.get(idempotency_key) {
            let intent = state.intents.get(existing).cloned().ok_or_else(|| {
                CoatbayError::gateway_transient("intent index out of sync")
            })?;
            return Ok(intent);
        }
        if state.fail_next_intent {
            state.fail_next_intent = false;
            return Err(CoatbayError::gateway_transient("intent creation timed out"));
        }
        if !amount.is_positive() {
            return Err(CoatbayError::Gateway {
                message: "intent amount must be positive".to_string(),
                transient: false,
            });
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            status: IntentStatus::RequiresConfirmation,
            charge_id: None,
            amount,
        };
        state.intents.insert(id.clone(), intent.clone());
        state
            .intents_by_key
            .insert(idempotency_key.to_string(), id.clone());
        info!(intent = %id, %amount, "mock gateway created payment intent");
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.state
            .lock()
            .await
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| CoatbayError::Gateway {
                message: format!("no such intent {intent_id}"),
                transient: false,
            })
    }

    async fn update_intent_metadata(
        &self,
        intent_id: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<()> {
        let state = self.state.lock().await;
        if state.intents.contains_key(intent_id) {
            Ok(())
        } else {
            Err(CoatbayError::Gateway {
                message: format!("no such intent {intent_id}"),
                transient: false,
            })
        }
    }

    async fn create_transfer(
        &self,
        amount: Money,
        destination_account: &str,
        idempotency_key: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<Transfer> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.transfers_by_key.get(idempotency_key) {
            return Ok(existing.clone());
        }
        if state.fail_next_transfer {
            state.fail_next_transfer = false;
            return Err(CoatbayError::gateway_transient("transfer timed out"));
        }
        if !state.accounts.contains_key(destination_account) {
            return Err(CoatbayError::Gateway {
                message: format!("no such account {destination_account}"),
                transient: false,
            });
        }
        let transfer = Transfer {
            id: format!("tr_{}", Uuid::new_v4().simple()),
        };
        state
            .transfers_by_key
            .insert(idempotency_key.to_string(), transfer.clone());
        state.transfer_calls += 1;
        info!(transfer = %transfer.id, %amount, account = destination_account,
            "mock gateway created transfer");
        Ok(transfer)
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount: Money,
        idempotency_key: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<RefundReceipt> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.refunds_by_key.get(idempotency_key) {
            return Ok(existing.clone());
        }
        if state.fail_next_refund {
            state.fail_next_refund = false;
            return Err(CoatbayError::gateway_transient("refund timed out"));
        }
        let receipt = RefundReceipt {
            id: format!("re_{}", Uuid::new_v4().simple()),
        };
        state
            .refunds_by_key
            .insert(idempotency_key.to_string(), receipt.clone());
        *state
            .refunded_by_charge
            .entry(charge_id.to_string())
            .or_insert(0) += amount.cents;
        state.refund_calls += 1;
        info!(refund = %receipt.id, %amount, charge = charge_id,
            "mock gateway created refund");
        Ok(receipt)
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<AccountStatus> {
        self.state
            .lock()
            .await
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| CoatbayError::Gateway {
                message: format!("no such account {account_id}"),
                transient: false,
            })
    }
}
