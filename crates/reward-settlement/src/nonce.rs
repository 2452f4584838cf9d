use gacha_domain::{Address, H256, format_address};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

/// Process-wide nonce sequence for the operator account.
///
/// Holding the [`NonceGate`] is the critical section spanning nonce lookup,
/// signing and broadcast. The local sequence advances on
/// [`NonceGate::commit`], or when a gate is dropped after its transaction was
/// handed to the node. A gate dropped before that leaves no gap.
#[derive(Debug)]
pub struct NonceAllocator {
    operator: Address,
    next: Mutex<Option<u64>>,
}

/// Signed transaction the node may already hold under the reserved nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTransaction {
    pub tx_hash: H256,
    pub raw_hex: String,
}

#[derive(Debug)]
pub struct NonceGate<'a> {
    operator: Address,
    guard: MutexGuard<'a, Option<u64>>,
    reserved: Option<u64>,
    in_flight: Option<InFlightTransaction>,
}

impl NonceAllocator {
    #[must_use]
    pub fn new(operator: Address) -> Self {
        Self {
            operator,
            next: Mutex::new(None),
        }
    }

    pub async fn lock(&self) -> NonceGate<'_> {
        NonceGate {
            operator: self.operator,
            guard: self.next.lock().await,
            reserved: None,
            in_flight: None,
        }
    }

    /// Next nonce this process would hand out, if any was committed yet.
    pub async fn peek_next(&self) -> Option<u64> {
        *self.next.lock().await
    }
}

impl NonceGate<'_> {
    /// Picks the nonce for the transaction about to be signed: the ledger's
    /// pending count, unless this process already committed past it.
    pub fn reserve(&mut self, chain_pending: u64) -> u64 {
        let nonce = match *self.guard {
            Some(local_next) => local_next.max(chain_pending),
            None => chain_pending,
        };
        if nonce != chain_pending {
            debug!(
                operator = ?self.operator,
                chain_pending,
                nonce,
                "local nonce sequence ahead of node pending count"
            );
        }
        self.reserved = Some(nonce);
        nonce
    }

    #[must_use]
    pub fn reserved(&self) -> Option<u64> {
        self.reserved
    }

    /// Call right before the first send. From then on the reserved nonce is
    /// consumed even if the gate is dropped mid-broadcast.
    pub fn mark_in_flight(&mut self, tx: InFlightTransaction) {
        self.in_flight = Some(tx);
    }

    /// Marks the reserved nonce as used by a broadcast transaction.
    pub fn commit(mut self) {
        self.advance();
    }

    /// Hands the reserved nonce back. Only valid when the node is known not
    /// to hold the transaction.
    pub fn release(mut self) {
        self.reserved = None;
        self.in_flight = None;
    }

    fn advance(&mut self) -> Option<u64> {
        self.in_flight = None;
        let nonce = self.reserved.take()?;
        *self.guard = Some(nonce.saturating_add(1));
        Some(nonce)
    }
}

impl Drop for NonceGate<'_> {
    fn drop(&mut self) {
        let Some(tx) = self.in_flight.take() else {
            return;
        };
        if let Some(nonce) = self.advance() {
            error!(
                operator = %format_address(&self.operator),
                nonce,
                tx_hash = ?tx.tx_hash,
                raw_tx = %tx.raw_hex,
                "settlement abandoned during broadcast, nonce consumed; reconcile against the ledger"
            );
        }
    }
}
