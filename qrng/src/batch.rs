//! Resumable, strictly sequential submission over a list of addresses.
//!
//! Every address becomes complete only once its transaction is confirmed, and
//! the checkpoint is persisted right after each completion. A crash can repeat
//! at most the one transaction that was in flight.

use crate::error::{Error, Result};
use crate::ledger::TxReceipt;
use crate::utils::checksum;
use log::{error, info};
use std::collections::HashSet;
use std::future::Future;
use web3::types::Address;

/// Addresses whose submission has been confirmed, in completion order.
///
/// Two checkpoints are equal when they hold the same addresses, whatever the order.
#[derive(Debug, Clone, Default)]
pub struct RunCheckpoint {
    completed: Vec<Address>,
    index: HashSet<Address>,
}

impl PartialEq for RunCheckpoint {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for RunCheckpoint {}

impl RunCheckpoint {
    pub fn from_addresses<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        let mut checkpoint = Self::default();
        for address in addresses {
            checkpoint.insert(address);
        }
        checkpoint
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains(address)
    }

    /// Returns false when the address was already complete.
    pub fn insert(&mut self, address: Address) -> bool {
        if self.index.insert(address) {
            self.completed.push(address);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.completed.iter()
    }

    /// How many of `addresses` still need a submission.
    pub fn pending_in(&self, addresses: &[Address]) -> usize {
        addresses.iter().collect::<HashSet<_>>().into_iter().filter(|a| !self.contains(a)).count()
    }
}

/// A run stopped at `address`; `checkpoint` is what was persisted last.
#[derive(Debug)]
pub struct BatchFailure {
    pub address: Address,
    pub checkpoint: RunCheckpoint,
    pub error: Error,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch stopped at {} after {} completed: {}",
            checksum(&self.address),
            self.checkpoint.len(),
            self.error
        )
    }
}

impl std::error::Error for BatchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: usize,
    pub skipped: usize,
}

/// Walks `addresses` in order, submitting for every address not yet in the
/// checkpoint and persisting after every confirmation.
///
/// `persist` is the only way the checkpoint leaves the executor, so callers
/// decide where it lives. A failed submission persists the checkpoint as it
/// stands and ends the run; nothing is retried.
pub async fn run<S, F, P>(
    addresses: &[Address],
    mut checkpoint: RunCheckpoint,
    mut submit: S,
    mut persist: P,
) -> std::result::Result<(RunCheckpoint, RunSummary), BatchFailure>
where
    S: FnMut(Address) -> F,
    F: Future<Output = Result<TxReceipt>>,
    P: FnMut(&RunCheckpoint) -> Result<()>,
{
    let mut summary = RunSummary::default();
    for address in addresses {
        if checkpoint.contains(address) {
            info!("Already done for: {}", checksum(address));
            summary.skipped += 1;
            continue;
        }

        info!("Submitting for: {}", checksum(address));
        let outcome = match submit(*address).await {
            Ok(receipt) => receipt.into_confirmed(),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(receipt) => {
                checkpoint.insert(*address);
                summary.submitted += 1;
                info!("Confirmed {} in tx {:?}", checksum(address), receipt.hash);
                if let Err(e) = persist(&checkpoint) {
                    return Err(BatchFailure {
                        address: *address,
                        checkpoint,
                        error: e,
                    });
                }
            }
            Err(e) => {
                error!("Submission for {} failed, saving checkpoint: {}", checksum(address), e);
                if let Err(persist_err) = persist(&checkpoint) {
                    error!("Could not save checkpoint: {}", persist_err);
                }
                return Err(BatchFailure {
                    address: *address,
                    checkpoint,
                    error: e,
                });
            }
        }
    }
    Ok((checkpoint, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmitError;
    use crate::ledger::TxStatus;
    use std::cell::RefCell;
    use web3::types::H256;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn receipt(status: TxStatus) -> TxReceipt {
        TxReceipt {
            hash: H256::from_low_u64_be(1),
            status,
            block_number: Some(1),
            contract_address: None,
            logs: Vec::new(),
        }
    }

    async fn ok_submit(address: Address, calls: &RefCell<Vec<Address>>) -> Result<TxReceipt> {
        calls.borrow_mut().push(address);
        Ok(receipt(TxStatus::Confirmed))
    }

    #[tokio::test]
    async fn resumes_past_completed_addresses() {
        let calls = RefCell::new(Vec::new());
        let saved = RefCell::new(Vec::new());
        let checkpoint = RunCheckpoint::from_addresses([addr(0xaaa)]);

        let (out, summary) = run(
            &[addr(0xaaa), addr(0xbbb)],
            checkpoint,
            |a| ok_submit(a, &calls),
            |c| {
                saved.borrow_mut().push(c.clone());
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(*calls.borrow(), vec![addr(0xbbb)]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![addr(0xaaa), addr(0xbbb)]);
        assert_eq!(summary, RunSummary { submitted: 1, skipped: 1 });
        assert_eq!(saved.borrow().last(), Some(&out));
    }

    #[tokio::test]
    async fn second_run_submits_nothing() {
        let calls = RefCell::new(Vec::new());
        let list = [addr(1), addr(2), addr(3)];
        let (first, _) = run(&list, RunCheckpoint::default(), |a| ok_submit(a, &calls), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(calls.borrow().len(), 3);

        calls.borrow_mut().clear();
        let (second, summary) = run(&list, first.clone(), |a| ok_submit(a, &calls), |_| Ok(()))
            .await
            .unwrap();
        assert!(calls.borrow().is_empty());
        assert_eq!(second, first);
        assert_eq!(summary.submitted, 0);
    }

    #[tokio::test]
    async fn failure_keeps_prior_progress_and_stops() {
        let calls = RefCell::new(Vec::new());
        let saved = RefCell::new(Vec::new());
        let failure = run(
            &[addr(0xaaa), addr(0xbbb), addr(0xccc)],
            RunCheckpoint::from_addresses([addr(0xaaa)]),
            |a| {
                calls.borrow_mut().push(a);
                async { Err(Error::Submit(SubmitError::InsufficientFunds("empty".into()))) }
            },
            |c| {
                saved.borrow_mut().push(c.clone());
                Ok(())
            },
        )
        .await
        .unwrap_err();

        assert_eq!(failure.address, addr(0xbbb));
        assert_eq!(failure.checkpoint, RunCheckpoint::from_addresses([addr(0xaaa)]));
        assert!(matches!(failure.error, Error::Submit(SubmitError::InsufficientFunds(_))));
        assert_eq!(*calls.borrow(), vec![addr(0xbbb)]);
        assert_eq!(*saved.borrow(), vec![RunCheckpoint::from_addresses([addr(0xaaa)])]);
    }

    #[tokio::test]
    async fn unconfirmed_receipts_are_not_counted() {
        for status in [TxStatus::Reverted, TxStatus::Pending] {
            let failure = run(
                &[addr(1)],
                RunCheckpoint::default(),
                |_| async move { Ok(receipt(status)) },
                |_| Ok(()),
            )
            .await
            .unwrap_err();
            assert!(failure.checkpoint.is_empty());
            assert!(matches!(failure.error, Error::Submit(_)));
        }
    }

    #[tokio::test]
    async fn persists_after_every_confirmation() {
        let saved = RefCell::new(Vec::new());
        let calls = RefCell::new(Vec::new());
        run(
            &[addr(1), addr(2), addr(3)],
            RunCheckpoint::default(),
            |a| ok_submit(a, &calls),
            |c| {
                saved.borrow_mut().push(c.len());
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(*saved.borrow(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn set_membership_beats_list_position() {
        let calls = RefCell::new(Vec::new());
        let checkpoint = RunCheckpoint::from_addresses([addr(2), addr(1)]);
        let (out, _) = run(
            &[addr(3), addr(1), addr(3), addr(2), addr(4)],
            checkpoint,
            |a| ok_submit(a, &calls),
            |_| Ok(()),
        )
        .await
        .unwrap();
        assert_eq!(*calls.borrow(), vec![addr(3), addr(4)]);
        assert_eq!(out.len(), 4);
    }

    #[tokio::test]
    async fn persist_failure_after_success_is_surfaced() {
        let calls = RefCell::new(Vec::new());
        let failure = run(
            &[addr(1), addr(2)],
            RunCheckpoint::default(),
            |a| ok_submit(a, &calls),
            |_| Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))),
        )
        .await
        .unwrap_err();
        assert_eq!(failure.address, addr(1));
        assert!(failure.checkpoint.contains(&addr(1)));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn checkpoints_compare_as_sets() {
        let forward = RunCheckpoint::from_addresses(vec![addr(1), addr(2)]);
        let backward = RunCheckpoint::from_addresses(vec![addr(2), addr(1), addr(2)]);
        assert_eq!(forward, backward);
        assert_ne!(forward, RunCheckpoint::from_addresses(vec![addr(1)]));
    }

    #[test]
    fn counts_pending_addresses() {
        let checkpoint = RunCheckpoint::from_addresses([addr(1)]);
        assert_eq!(checkpoint.pending_in(&[addr(1), addr(2), addr(2), addr(3)]), 2);
    }
}
