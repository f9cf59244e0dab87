//! Log matching and the installed-filter registry behind `eth_newFilter`,
//! `eth_getFilterChanges` and friends.

use std::collections::HashMap;

use ethbloom::{Bloom, Input};
use primitive_types::{H160, H256};
use thiserror::Error;
use tracing::debug;

use crate::block::{Block, Log};
use crate::chain::{BlockTag, Chain};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter not found")]
    NotFound,
    #[error("filter {0:#x} is not a log filter")]
    NotLogFilter(u64),
}

/// Criteria shared by `eth_newFilter` and `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: BlockTag,
    pub to_block: BlockTag,
    /// Empty matches any address.
    pub addresses: Vec<H160>,
    /// One entry per topic position; `None` is a wildcard, `Some` a set of alternatives.
    pub topics: Vec<Option<Vec<H256>>>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self { from_block: BlockTag::Latest, to_block: BlockTag::Latest, addresses: Vec::new(), topics: Vec::new() }
    }
}

impl LogFilter {
    pub fn matches(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, slot)| match slot {
            None => true,
            Some(alternatives) if alternatives.is_empty() => true,
            Some(alternatives) => log.topics.get(i).is_some_and(|t| alternatives.contains(t)),
        })
    }

    /// Cheap test against a block bloom; false means no log in the block can match.
    pub fn may_match(&self, bloom: &Bloom) -> bool {
        let address_ok = self.addresses.is_empty()
            || self.addresses.iter().any(|a| bloom.contains_input(Input::Raw(a.as_bytes())));
        address_ok
            && self.topics.iter().flatten().all(|alternatives| {
                alternatives.is_empty() || alternatives.iter().any(|t| bloom.contains_input(Input::Raw(t.as_bytes())))
            })
    }

    /// Inclusive block range against a chain whose head is `head`. Numbers
    /// past the head are kept so a filter can wait for future blocks.
    pub fn range(&self, head: u64) -> (u64, u64) {
        let bound = |tag: BlockTag| match tag {
            BlockTag::Number(n) => n,
            BlockTag::Earliest => 0,
            BlockTag::Latest | BlockTag::Pending => head,
        };
        (bound(self.from_block), bound(self.to_block))
    }

    fn block_logs<'a>(&'a self, block: &'a Block) -> impl Iterator<Item = &'a Log> + 'a {
        let candidate = self.may_match(&block.header.logs_bloom);
        block.receipts.iter().filter(move |_| candidate).flat_map(|r| r.logs.iter()).filter(move |l| self.matches(l))
    }
}

/// Logs in `filter`'s range, restricted to blocks numbered `from..=to`.
fn logs_in(chain: &Chain, filter: &LogFilter, from: u64, to: u64) -> Vec<Log> {
    let (lo, hi) = filter.range(chain.latest_number());
    chain.blocks_between(lo.max(from), hi.min(to)).flat_map(|b| filter.block_logs(b)).cloned().collect()
}

/// Every log on the chain matching `filter`, as returned by `eth_getLogs`.
pub fn collect_logs(chain: &Chain, filter: &LogFilter) -> Vec<Log> {
    logs_in(chain, filter, 0, u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    Block,
    PendingTransaction,
    Log(LogFilter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChanges {
    Hashes(Vec<H256>),
    Logs(Vec<Log>),
}

#[derive(Debug, Clone)]
struct Installed {
    kind: FilterKind,
    /// Highest block already reported.
    last_polled: u64,
}

/// Installed filters keyed by id. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct FilterRegistry {
    next_id: u64,
    filters: HashMap<u64, Installed>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self { next_id: 1, filters: HashMap::new() }
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, kind: FilterKind, head: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        debug!(id, ?kind, "installed filter");
        self.filters.insert(id, Installed { kind, last_polled: head });
        id
    }

    pub fn uninstall(&mut self, id: u64) -> Result<(), FilterError> {
        self.filters.remove(&id).ok_or(FilterError::NotFound)?;
        debug!(id, "uninstalled filter");
        Ok(())
    }

    /// What happened since the previous poll of `id`.
    pub fn changes(&mut self, id: u64, chain: &Chain) -> Result<FilterChanges, FilterError> {
        let installed = self.filters.get_mut(&id).ok_or(FilterError::NotFound)?;
        let head = chain.latest_number();
        let since = installed.last_polled + 1;
        installed.last_polled = head;
        let fresh = chain.blocks_between(since, head);
        Ok(match &installed.kind {
            FilterKind::Block => FilterChanges::Hashes(fresh.map(|b| b.hash).collect()),
            FilterKind::PendingTransaction => {
                FilterChanges::Hashes(fresh.flat_map(|b| b.transactions.iter().map(|t| t.hash)).collect())
            }
            FilterKind::Log(filter) => FilterChanges::Logs(logs_in(chain, filter, since, head)),
        })
    }

    /// All logs matching a log filter, regardless of polling.
    pub fn logs(&self, id: u64, chain: &Chain) -> Result<Vec<Log>, FilterError> {
        match &self.filters.get(&id).ok_or(FilterError::NotFound)?.kind {
            FilterKind::Log(filter) => Ok(collect_logs(chain, filter)),
            _ => Err(FilterError::NotLogFilter(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(topics: Vec<H256>) -> Log {
        Log {
            address: H160::repeat_byte(0x01),
            topics,
            data: Vec::new(),
            block_number: 1,
            block_hash: H256::zero(),
            transaction_hash: H256::zero(),
            transaction_index: 0,
            log_index: 0,
            transaction_log_index: 0,
        }
    }

    fn t(b: u8) -> H256 {
        H256::repeat_byte(b)
    }

    #[test]
    fn topic_positions_and_wildcards() {
        let l = log(vec![t(0), t(1)]);
        let with = |topics: Vec<Option<Vec<H256>>>| LogFilter { topics, ..LogFilter::default() };
        assert!(with(vec![Some(vec![t(0)]), None]).matches(&l));
        assert!(with(vec![None, Some(vec![t(1)])]).matches(&l));
        assert!(!with(vec![Some(vec![t(1)]), Some(vec![t(0)])]).matches(&l));
        assert!(with(vec![Some(vec![t(9), t(0)])]).matches(&l));
        assert!(with(vec![]).matches(&l));
        assert!(!with(vec![None, None, Some(vec![t(2)])]).matches(&l));
    }

    #[test]
    fn address_set() {
        let l = log(vec![]);
        let f = LogFilter { addresses: vec![H160::repeat_byte(0x02), H160::repeat_byte(0x01)], ..LogFilter::default() };
        assert!(f.matches(&l));
        let f = LogFilter { addresses: vec![H160::repeat_byte(0x02)], ..LogFilter::default() };
        assert!(!f.matches(&l));
    }

    #[test]
    fn bloom_prescreen() {
        let mut bloom = Bloom::default();
        bloom.accrue(Input::Raw(H160::repeat_byte(0x01).as_bytes()));
        bloom.accrue(Input::Raw(t(5).as_bytes()));
        let f = LogFilter { topics: vec![None, Some(vec![t(5)])], ..LogFilter::default() };
        assert!(f.may_match(&bloom));
        let f = LogFilter { topics: vec![Some(vec![t(6)])], ..LogFilter::default() };
        assert!(!f.may_match(&bloom));
        let f = LogFilter { addresses: vec![H160::repeat_byte(0x09)], ..LogFilter::default() };
        assert!(!f.may_match(&bloom));
    }

    #[test]
    fn block_filter_reports_new_blocks_once() {
        let mut chain = Chain::new(crate::config::NodeConfig::default()).unwrap();
        let mut filters = FilterRegistry::new();
        let id = filters.install(FilterKind::Block, chain.latest_number());
        assert_eq!(id, 1);
        assert_eq!(filters.changes(id, &chain), Ok(FilterChanges::Hashes(vec![])));
        let hash = chain.seal_block().hash;
        assert_eq!(filters.changes(id, &chain), Ok(FilterChanges::Hashes(vec![hash])));
        assert_eq!(filters.changes(id, &chain), Ok(FilterChanges::Hashes(vec![])));
        assert_eq!(filters.logs(id, &chain), Err(FilterError::NotLogFilter(1)));
        assert_eq!(filters.uninstall(id), Ok(()));
        assert_eq!(filters.uninstall(id), Err(FilterError::NotFound));
        assert_eq!(filters.changes(id, &chain), Err(FilterError::NotFound));
        assert_eq!(filters.install(FilterKind::PendingTransaction, 0), 2);
    }
}
