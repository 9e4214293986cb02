//! Chain reconciliation.
//!
//! On every verification tick the host compares its chain with the chains of
//! its neighbors and adopts the best valid one.
//!
//! In normal mode (host longer than two blocks) only the tail of each
//! neighbor chain is fetched, from the host's last height, and verified on
//! top of the host's own prefix. When that yields fewer than two candidates,
//! or the host is too short to have a meaningful prefix, the whole chains are
//! fetched and verified from genesis (fork mode).
//!
//! Among the valid chains the winner is chosen by, in order:
//!
//! 1. majority: if strictly more than half of the candidates share the
//!    previous hash at the shortest candidate's last index, only those stay;
//! 2. length;
//! 3. trailing run of blocks paid to the last block's validator, capped at
//!    `tie_break_window`;
//! 4. the host's own chain;
//! 5. the smallest tip hash.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use drift_core::block_validation::{ValidationContext, registration_candidates, validate_block};
use drift_core::error::{BlockError, ChainError, NetworkError, RegistrationMismatch};
use drift_core::ledger::{Ledger, LedgerView};
use drift_core::traits::{Neighbor, Registry, Verifier};
use drift_core::types::{Address, Block, Hash256};

use crate::registration::{self, RegistryAnswers};

/// What a reconciliation round did to the host chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The host chain is still the best one.
    Kept,
    /// The host chain was replaced by the chain of `target`.
    Replaced { target: String, len: usize, tip: Hash256 },
    /// A better chain was found but the host changed during the round.
    Stale,
}

/// A chain competing in the selection.
#[derive(Debug, Clone)]
struct Candidate {
    /// `None` for the host.
    target: Option<String>,
    view: Arc<LedgerView>,
}

impl Candidate {
    fn len(&self) -> usize {
        self.view.len()
    }

    fn tip(&self) -> Hash256 {
        self.view.last_hash().unwrap_or(Hash256::ZERO)
    }

    fn is_host(&self) -> bool {
        self.target.is_none()
    }

    /// Number of trailing blocks, at most `window`, paid to the validator of
    /// the last block.
    fn validator_streak(&self, window: usize) -> usize {
        let blocks = self.view.blocks();
        let Some(last) = blocks.last().and_then(|b| b.validator()) else {
            return 0;
        };
        blocks
            .iter()
            .rev()
            .take(window)
            .take_while(|b| b.validator() == Some(last))
            .count()
    }
}

/// Compares the host chain with the neighbors' chains and adopts the winner.
pub struct ChainReconciler {
    ledger: Arc<Ledger>,
    registry: Arc<dyn Registry>,
    verifier: Arc<dyn Verifier>,
}

impl fmt::Debug for ChainReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainReconciler").finish_non_exhaustive()
    }
}

impl ChainReconciler {
    pub fn new(ledger: Arc<Ledger>, registry: Arc<dyn Registry>, verifier: Arc<dyn Verifier>) -> Self {
        Self { ledger, registry, verifier }
    }

    /// Run one reconciliation round at time `now`.
    pub async fn reconcile(&self, neighbors: &[Arc<dyn Neighbor>], now: i64) -> ReconcileOutcome {
        let host = self.ledger.copy();
        let host_len = host.len();
        let host_tip = host.last_hash();

        let mut candidates = Vec::new();
        if host_len > 2 {
            let prefix = LedgerView::from_blocks(host.blocks()[..host_len - 1].iter().cloned());
            candidates.push(Candidate { target: None, view: Arc::clone(&host) });
            candidates.extend(self.collect(neighbors, prefix, &host, now).await);
        }
        if candidates.len() < 2 && !neighbors.is_empty() {
            debug!(host_len, "reconciling in fork mode");
            candidates.clear();
            if !host.is_empty() {
                candidates.push(Candidate { target: None, view: Arc::clone(&host) });
            }
            candidates.extend(self.collect(neighbors, LedgerView::new(), &host, now).await);
        }

        let Some(winner) = select(candidates, self.ledger.settings().tie_break_window) else {
            return ReconcileOutcome::Kept;
        };
        let Some(target) = winner.target.clone() else {
            return ReconcileOutcome::Kept;
        };
        let (len, tip) = (winner.len(), winner.tip());
        let better = host_len < len || (len >= 2 && Some(tip) != host_tip);
        if !better {
            return ReconcileOutcome::Kept;
        }

        let view = Arc::try_unwrap(winner.view).unwrap_or_else(|shared| LedgerView::clone(&shared));
        if self.ledger.replace_if_tip(host_len, host_tip, view) {
            info!(neighbor = %target, len, %tip, "adopted neighbor chain");
            ReconcileOutcome::Replaced { target, len, tip }
        } else {
            warn!(neighbor = %target, "host chain changed during reconciliation, skipped");
            ReconcileOutcome::Stale
        }
    }

    /// Fetch every neighbor's chain past `base` concurrently and keep the
    /// ones that verify.
    async fn collect(
        &self,
        neighbors: &[Arc<dyn Neighbor>],
        base: LedgerView,
        host: &LedgerView,
        now: i64,
    ) -> Vec<Candidate> {
        let settings = self.ledger.settings();
        let from = base.len() as u64;
        let mut tasks = JoinSet::new();
        for neighbor in neighbors {
            let neighbor = Arc::clone(neighbor);
            let (limit, timeout) = (settings.blocks_count_limit, settings.validation_timeout());
            let interval = settings.validation_interval_nanos();
            tasks.spawn(async move {
                let blocks = fetch_blocks(neighbor.as_ref(), from, limit, timeout, interval, now).await;
                (neighbor.target().to_string(), blocks)
            });
        }

        let mut fetched = Vec::with_capacity(neighbors.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => fetched.push(result),
                Err(e) => warn!("neighbor fetch task failed: {e}"),
            }
        }
        fetched.sort_by(|a, b| a.0.cmp(&b.0));

        let mut candidates = Vec::new();
        for (target, blocks) in fetched {
            let verified = match blocks {
                Ok(blocks) => self.verify_chain(blocks, base.clone(), host, now).await,
                Err(e) => Err(ChainError::from(e)),
            };
            match verified {
                Ok(view) => candidates.push(Candidate { target: Some(target), view: Arc::new(view) }),
                Err(e) => warn!(neighbor = %target, "rejected neighbor chain: {e}"),
            }
        }
        candidates
    }

    /// Verify `blocks` as the continuation of `base` and return the resulting
    /// chain.
    ///
    /// With a non-empty `base` the first block must replace the host's last
    /// block; without one the chain starts at genesis and needs at least two
    /// blocks. Blocks identical to the host's at the same height are trusted.
    pub async fn verify_chain(
        &self,
        blocks: Vec<Block>,
        base: LedgerView,
        host: &LedgerView,
        now: i64,
    ) -> Result<LedgerView, ChainError> {
        if base.is_empty() {
            if blocks.len() < 2 {
                return Err(ChainError::ChainTooShort { len: blocks.len() });
            }
        } else {
            let expected = host.blocks().get(base.len()).map(|b| b.previous_hash);
            let first = blocks.first().map(|b| b.previous_hash);
            if first.is_none() || first != expected {
                return Err(ChainError::ChainForkMismatch(format!(
                    "chain does not continue the host at height {}",
                    base.len()
                )));
            }
        }

        let settings = self.ledger.settings();
        let ctx = ValidationContext {
            settings,
            decay: self.ledger.decay().as_ref(),
            verifier: self.verifier.as_ref(),
        };
        let interval = settings.validation_interval_nanos();
        let count = blocks.len();
        let mut view = base;

        for (offset, block) in blocks.into_iter().enumerate() {
            let height = view.len();
            if block.previous_hash != view.last_hash().unwrap_or(Hash256::ZERO) {
                return Err(ChainError::ChainForkMismatch(format!(
                    "block {height} does not link to its parent"
                )));
            }
            let known = host.blocks().get(height).is_some_and(|b| b.hash() == block.hash());
            if !known {
                validate_block(&block, &view, now, &ctx)
                    .map_err(|source| ChainError::Block { height, source })?;
                if offset + 1 == count && block.timestamp + interval > now {
                    self.check_registrations(&block, &view, height).await?;
                }
            }
            view.apply_block(Arc::new(block));
        }
        Ok(view)
    }

    /// Registry checks for a freshly produced block on top of `parent`.
    async fn check_registrations(
        &self,
        block: &Block,
        parent: &LedgerView,
        height: usize,
    ) -> Result<(), ChainError> {
        let timeout = self.ledger.settings().validation_timeout();
        let validator = block
            .validator()
            .ok_or(ChainError::Block { height, source: BlockError::MissingReward })?;
        match registration::query(self.registry.as_ref(), &validator, timeout).await {
            Ok(true) => {}
            Ok(false) => return Err(ChainError::UnregisteredValidator(validator.to_string())),
            Err(e) => return Err(ChainError::RegistryUnavailable(e.to_string())),
        }

        let candidates = registration_candidates(&block.transactions, parent, self.verifier.as_ref());
        let queried: BTreeSet<Address> = candidates
            .iter()
            .chain(&block.removed_registered_addresses)
            .copied()
            .collect();
        let answers = RegistryAnswers::collect(&self.registry, queried, timeout).await;
        if let Some((address, e)) = answers.first_error() {
            return Err(ChainError::RegistryUnavailable(format!("{address}: {e}")));
        }

        let expected: BTreeSet<Address> =
            candidates.into_iter().filter(|a| answers.approves(a)).collect();
        let claimed: BTreeSet<Address> = block.added_registered_addresses.iter().copied().collect();
        if let Some(address) = expected.difference(&claimed).next() {
            return Err(RegistrationMismatch::Missing(address.to_string()).into());
        }
        if let Some(address) = claimed.difference(&expected).next() {
            return Err(RegistrationMismatch::Extra(address.to_string()).into());
        }
        for address in &block.removed_registered_addresses {
            if !parent.is_registered(address) || !answers.rejects(address) {
                return Err(RegistrationMismatch::WronglyRemoved(address.to_string()).into());
            }
        }
        Ok(())
    }
}

/// All blocks of `neighbor` from `from`, one page of at most `limit` blocks
/// per request.
///
/// Blocks are exactly `interval` apart and none is later than `now`, so a
/// chain starting at timestamp `t` holds at most `(now - t) / interval + 1`
/// blocks. A neighbor serving more, or pages longer than `limit`, is refused.
async fn fetch_blocks(
    neighbor: &dyn Neighbor,
    from: u64,
    limit: u64,
    timeout: Duration,
    interval: i64,
    now: i64,
) -> Result<Vec<Block>, NetworkError> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut max_blocks = u64::MAX;
    let mut height = from;
    loop {
        let page = tokio::time::timeout(timeout, neighbor.get_blocks(height))
            .await
            .map_err(|_| NetworkError::Timeout)??;
        let fetched = page.len() as u64;
        if fetched > limit {
            return Err(NetworkError::InvalidResponse(format!(
                "page of {fetched} blocks exceeds limit {limit}"
            )));
        }
        blocks.extend(page);
        if let Some(first) = blocks.first().filter(|_| max_blocks == u64::MAX) {
            if first.timestamp > now {
                return Err(NetworkError::InvalidResponse(format!(
                    "block at height {from} is in the future: {}",
                    first.timestamp
                )));
            }
            max_blocks = u64::try_from((now - first.timestamp) / interval.max(1))
                .unwrap_or(u64::MAX)
                .saturating_add(1);
        }
        if blocks.len() as u64 > max_blocks {
            return Err(NetworkError::InvalidResponse(format!(
                "more than {max_blocks} blocks from height {from} before {now}"
            )));
        }
        if fetched == 0 || fetched < limit {
            return Ok(blocks);
        }
        height += fetched;
    }
}

/// Pick the winning chain among `candidates`.
fn select(mut candidates: Vec<Candidate>, tie_break_window: usize) -> Option<Candidate> {
    let min_len = candidates.iter().map(Candidate::len).min()?;
    if min_len > 0 {
        let previous = |c: &Candidate| c.view.blocks()[min_len - 1].previous_hash;
        let mut votes: HashMap<Hash256, usize> = HashMap::new();
        for candidate in &candidates {
            *votes.entry(previous(candidate)).or_default() += 1;
        }
        let majority = votes
            .into_iter()
            .find(|(_, count)| count * 2 > candidates.len())
            .map(|(hash, _)| hash);
        if let Some(hash) = majority {
            candidates.retain(|c| previous(c) == hash);
        }
    }

    let max_len = candidates.iter().map(Candidate::len).max()?;
    candidates.retain(|c| c.len() == max_len);

    let streak = |c: &Candidate| c.validator_streak(tie_break_window);
    let best_streak = candidates.iter().map(streak).max()?;
    candidates.retain(|c| streak(c) == best_streak);

    if let Some(index) = candidates.iter().position(Candidate::is_host) {
        return Some(candidates.swap_remove(index));
    }
    candidates.into_iter().min_by_key(Candidate::tip)
}
