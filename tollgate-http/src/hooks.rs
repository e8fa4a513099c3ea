//! Lifecycle hooks for the paygate.
//!
//! Hooks observe the outcome of payment verification on protected routes:
//! record revenue, meter usage, alert on rejects. They cannot change the
//! verdict, and both methods default to no-ops so implementors override only
//! what they need. The trait is dyn-compatible for heterogeneous hook lists.

use std::future::Future;
use std::pin::Pin;

use tollgate::error::PaymentRejection;
use tollgate::proto::PaymentReceipt;

/// Observes verified and rejected payments at the paygate.
pub trait PaygateHooks: Send + Sync {
    /// Called after a proof verifies, before the request reaches the inner
    /// service.
    fn on_payment_verified<'a>(
        &'a self,
        _receipt: &'a PaymentReceipt,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }

    /// Called after a proof is rejected, before the 402 response is returned.
    fn on_payment_rejected<'a>(
        &'a self,
        _rejection: &'a PaymentRejection,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}
