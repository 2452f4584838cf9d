use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gacha_domain::{Address, H256, U256};

use crate::chain_client::{CallRequest, ChainClient, ChainError};
use crate::tx_builder::keccak256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    PendingNonce,
    GasPrice,
    EstimateGas,
    NetworkId,
    SendRawTransaction,
}

#[derive(Debug)]
struct MockChainState {
    chain_id: u64,
    gas_price: U256,
    gas_estimate: u64,
    ledger_nonce: u64,
    stale_pending_nonce: Option<u64>,
    failures: HashMap<MockCall, VecDeque<ChainError>>,
    lost_send_responses: u32,
    mine_on_accept: bool,
    send_delay: Option<Duration>,
    calls: HashMap<MockCall, u32>,
    accepted: Vec<Vec<u8>>,
    estimate_requests: Vec<CallRequest>,
}

/// In-process ledger for one operator account: enforces strict nonce order on
/// broadcast and can inject transport failures per call.
#[derive(Debug, Clone)]
pub struct MockChainClient {
    state: Arc<Mutex<MockChainState>>,
}

impl MockChainClient {
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState {
                chain_id,
                gas_price: U256::from(1_000_000_000_u64),
                gas_estimate: 51_000,
                ledger_nonce: 0,
                stale_pending_nonce: None,
                failures: HashMap::new(),
                lost_send_responses: 0,
                mine_on_accept: false,
                send_delay: None,
                calls: HashMap::new(),
                accepted: Vec::new(),
                estimate_requests: Vec::new(),
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockChainState) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut guard| f(&mut guard))
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.with_state(|s| s.gas_estimate = gas);
    }

    pub fn set_ledger_nonce(&self, nonce: u64) {
        self.with_state(|s| s.ledger_nonce = nonce);
    }

    /// Makes `pending_nonce` report a fixed value regardless of broadcasts,
    /// like a lagging node.
    pub fn set_stale_pending_nonce(&self, nonce: Option<u64>) {
        self.with_state(|s| s.stale_pending_nonce = nonce);
    }

    /// Queues an error returned by the next call of `call`, before any effect.
    pub fn fail_next(&self, call: MockCall, error: ChainError) {
        self.with_state(|s| s.failures.entry(call).or_default().push_back(error));
    }

    /// The next accepted broadcast reports `Unavailable` even though the
    /// ledger kept the transaction.
    pub fn lose_next_send_response(&self) {
        self.with_state(|s| s.lost_send_responses += 1);
    }

    /// Accepted transactions leave the pool at once, so resubmitting the same
    /// bytes is answered with "nonce too low" instead of "already known".
    pub fn set_mine_on_accept(&self, mine: bool) {
        self.with_state(|s| s.mine_on_accept = mine);
    }

    /// Holds every broadcast response for `delay` after the ledger accepted
    /// the transaction.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.send_delay = delay);
    }

    #[must_use]
    pub fn call_count(&self, call: MockCall) -> u32 {
        self.with_state(|s| s.calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn accepted_transactions(&self) -> Vec<Vec<u8>> {
        self.with_state(|s| s.accepted.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn accepted_nonces(&self) -> Vec<u64> {
        self.accepted_transactions()
            .iter()
            .filter_map(|raw| rlp::Rlp::new(raw).val_at::<u64>(0).ok())
            .collect()
    }

    #[must_use]
    pub fn estimate_requests(&self) -> Vec<CallRequest> {
        self.with_state(|s| s.estimate_requests.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ledger_nonce(&self) -> u64 {
        self.with_state(|s| s.ledger_nonce).unwrap_or(0)
    }

    async fn enter(&self, call: MockCall) -> Result<(), ChainError> {
        // Give concurrent callers a chance to interleave at every remote call.
        tokio::task::yield_now().await;
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChainError::Unavailable("mock state poisoned".to_string()))?;
        *state.calls.entry(call).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MockChainState>, ChainError> {
        self.state
            .lock()
            .map_err(|_| ChainError::Unavailable("mock state poisoned".to_string()))
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
        self.enter(MockCall::PendingNonce).await?;
        let state = self.state()?;
        Ok(state.stale_pending_nonce.unwrap_or(state.ledger_nonce))
    }

    async fn suggest_gas_price(&self) -> Result<U256, ChainError> {
        self.enter(MockCall::GasPrice).await?;
        Ok(self.state()?.gas_price)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError> {
        self.enter(MockCall::EstimateGas).await?;
        let mut state = self.state()?;
        state.estimate_requests.push(call.clone());
        Ok(state.gas_estimate)
    }

    async fn network_id(&self) -> Result<u64, ChainError> {
        self.enter(MockCall::NetworkId).await?;
        Ok(self.state()?.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, ChainError> {
        self.enter(MockCall::SendRawTransaction).await?;
        let nonce = rlp::Rlp::new(raw)
            .val_at::<u64>(0)
            .map_err(|e| ChainError::Rejected(format!("rlp: {e}")))?;
        let (outcome, delay) = {
            let mut state = self.state()?;
            let outcome = accept_transaction(&mut state, raw, nonce);
            (outcome, state.send_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

fn accept_transaction(
    state: &mut MockChainState,
    raw: &[u8],
    nonce: u64,
) -> Result<H256, ChainError> {
    if !state.mine_on_accept && state.accepted.iter().any(|seen| seen.as_slice() == raw) {
        return Err(ChainError::Rejected("already known".to_string()));
    }
    if nonce < state.ledger_nonce {
        return Err(ChainError::Rejected(format!(
            "nonce too low: next nonce {}, tx nonce {nonce}",
            state.ledger_nonce
        )));
    }
    if nonce > state.ledger_nonce {
        return Err(ChainError::Rejected(format!(
            "nonce too high: next nonce {}, tx nonce {nonce}",
            state.ledger_nonce
        )));
    }
    state.accepted.push(raw.to_vec());
    state.ledger_nonce += 1;
    if state.lost_send_responses > 0 {
        state.lost_send_responses -= 1;
        return Err(ChainError::Unavailable("response lost".to_string()));
    }
    Ok(H256::from(keccak256(raw)))
}
