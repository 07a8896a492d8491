//! Which managed backend owns which part of the hash space.

use chunknet_primitives::{ChunkHash, HashSpan, HostAddress, spans_cover};

/// Result of [`HashSpanIndex::group_by_host`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGroups {
    /// Each covering host with the input positions it covers, in index order.
    pub groups: Vec<(HostAddress, Vec<usize>)>,
    /// Input positions no host covers.
    pub uncovered: Vec<usize>,
}

/// Span sets of the managed backends.
///
/// Hosts keep the order they were added in, which is the order reads try
/// them. Adding a host twice merges its spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSpanIndex {
    entries: Vec<(HostAddress, Vec<HashSpan>)>,
}

impl HashSpanIndex {
    /// Index over `(host, spans)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (HostAddress, Vec<HashSpan>)>) -> Self {
        let mut index = Self::default();
        for (host, spans) in entries {
            index.insert(host, spans);
        }
        index
    }

    /// Add spans for `host`.
    pub fn insert(&mut self, host: HostAddress, spans: impl IntoIterator<Item = HashSpan>) {
        match self.entries.iter_mut().find(|(known, _)| *known == host) {
            Some((_, owned)) => {
                for span in spans {
                    if !owned.contains(&span) {
                        owned.push(span);
                    }
                }
            }
            None => self.entries.push((host, spans.into_iter().collect())),
        }
    }

    /// Number of managed hosts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no host is managed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Managed hosts in index order.
    pub fn hosts(&self) -> impl Iterator<Item = &HostAddress> {
        self.entries.iter().map(|(host, _)| host)
    }

    /// Spans owned by `host`.
    pub fn spans(&self, host: &HostAddress) -> Option<&[HashSpan]> {
        self.entries
            .iter()
            .find(|(known, _)| known == host)
            .map(|(_, spans)| spans.as_slice())
    }

    /// Hosts covering `hash`, in index order.
    pub fn covering_hosts(&self, hash: &ChunkHash) -> Vec<&HostAddress> {
        self.entries
            .iter()
            .filter(|(_, spans)| spans_cover(spans, hash))
            .map(|(host, _)| host)
            .collect()
    }

    /// Whether any host covers `hash`.
    pub fn covers(&self, hash: &ChunkHash) -> bool {
        self.entries.iter().any(|(_, spans)| spans_cover(spans, hash))
    }

    /// Map each host to the positions of `hashes` it covers.
    ///
    /// A position appears under every host covering it, or in
    /// [`HostGroups::uncovered`] when none does. Hosts covering nothing are
    /// left out.
    pub fn group_by_host(&self, hashes: &[ChunkHash]) -> HostGroups {
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.entries.len()];
        let mut uncovered = Vec::new();
        for (position, hash) in hashes.iter().enumerate() {
            let mut covered = false;
            for ((_, spans), positions) in self.entries.iter().zip(groups.iter_mut()) {
                if spans_cover(spans, hash) {
                    positions.push(position);
                    covered = true;
                }
            }
            if !covered {
                uncovered.push(position);
            }
        }

        HostGroups {
            groups: self
                .entries
                .iter()
                .zip(groups)
                .filter(|(_, positions)| !positions.is_empty())
                .map(|((host, _), positions)| (host.clone(), positions))
                .collect(),
            uncovered,
        }
    }

    /// Every managed span with overlapping and adjacent spans merged, ascending.
    pub fn union(&self) -> Vec<HashSpan> {
        let mut spans: Vec<HashSpan> = self
            .entries
            .iter()
            .flat_map(|(_, spans)| spans.iter().copied())
            .collect();
        spans.sort();

        let mut merged: Vec<HashSpan> = Vec::with_capacity(spans.len());
        for span in spans {
            if let Some(last) = merged.last_mut()
                && (last.overlaps(&span) || follows(last.end(), span.start()))
            {
                if span.end() > last.end() {
                    *last = HashSpan::new(last.start(), span.end()).unwrap_or(*last);
                }
                continue;
            }
            merged.push(span);
        }
        merged
    }
}

/// Whether `next` is the hash immediately after `end`.
fn follows(end: ChunkHash, next: ChunkHash) -> bool {
    let mut bytes = *end.as_bytes();
    for byte in bytes.iter_mut().rev() {
        let (incremented, overflow) = byte.overflowing_add(1);
        *byte = incremented;
        if !overflow {
            return ChunkHash::new(bytes) == next;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hash(first: u8) -> ChunkHash {
        let mut bytes = [0u8; 32];
        bytes[0] = first;
        ChunkHash::new(bytes)
    }

    fn span(first: u8, last: u8) -> HashSpan {
        let mut end = [0xffu8; 32];
        end[0] = last;
        HashSpan::new(hash(first), ChunkHash::new(end)).unwrap()
    }

    fn host(port: u16) -> HostAddress {
        HostAddress::new("127.0.0.1", port)
    }

    fn sample() -> HashSpanIndex {
        HashSpanIndex::new([
            (host(1), vec![span(0x00, 0x7f)]),
            (host(2), vec![span(0x40, 0xbf)]),
            (host(3), vec![span(0xf0, 0xff)]),
        ])
    }

    #[test]
    fn test_covering_hosts_keeps_index_order() {
        let index = sample();
        assert_eq!(index.covering_hosts(&hash(0x50)), vec![&host(1), &host(2)]);
        assert_eq!(index.covering_hosts(&hash(0x10)), vec![&host(1)]);
        assert!(index.covering_hosts(&hash(0xc0)).is_empty());
        assert!(!index.covers(&hash(0xc0)));
    }

    #[test]
    fn test_group_by_host() {
        let index = sample();
        let groups = index.group_by_host(&[hash(0x50), hash(0xc0), hash(0xf5), hash(0x01)]);
        assert_eq!(
            groups.groups,
            vec![(host(1), vec![0, 3]), (host(2), vec![0]), (host(3), vec![2])]
        );
        assert_eq!(groups.uncovered, vec![1]);
    }

    #[test]
    fn test_duplicate_host_merges_spans() {
        let mut index = sample();
        index.insert(host(3), [span(0xc0, 0xc0), span(0xf0, 0xff)]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.spans(&host(3)).unwrap().len(), 2);
        assert!(index.covers(&hash(0xc0)));
    }

    #[test]
    fn test_union_merges_overlapping_and_adjacent() {
        let index = sample();
        assert_eq!(index.union(), vec![span(0x00, 0xbf), span(0xf0, 0xff)]);

        let full = HashSpanIndex::new([(host(1), vec![span(0x00, 0x7f)]), (host(2), vec![span(0x80, 0xff)])]);
        assert_eq!(full.union(), vec![HashSpan::FULL]);
    }

    #[test]
    fn test_empty_index() {
        let index = HashSpanIndex::default();
        assert!(index.is_empty());
        let groups = index.group_by_host(&[hash(1), hash(2)]);
        assert!(groups.groups.is_empty());
        assert_eq!(groups.uncovered, vec![0, 1]);
        assert!(index.union().is_empty());
    }

    fn arb_span() -> impl Strategy<Value = HashSpan> {
        (any::<u8>(), any::<u8>()).prop_map(|(a, b)| span(a.min(b), a.max(b)))
    }

    fn arb_index() -> impl Strategy<Value = HashSpanIndex> {
        proptest::collection::vec(proptest::collection::vec(arb_span(), 1..4), 0..6).prop_map(
            |layout| {
                HashSpanIndex::new(
                    layout
                        .into_iter()
                        .enumerate()
                        .map(|(i, spans)| (host(i as u16), spans)),
                )
            },
        )
    }

    fn arb_hash() -> impl Strategy<Value = ChunkHash> {
        any::<[u8; 32]>().prop_map(ChunkHash::new)
    }

    proptest! {
        #[test]
        fn prop_covering_hosts_match_spans(index in arb_index(), target in arb_hash()) {
            let expected: Vec<&HostAddress> = index
                .hosts()
                .filter(|h| index.spans(h).unwrap().iter().any(|s| s.covers(&target)))
                .collect();
            prop_assert_eq!(index.covering_hosts(&target), expected);
        }

        #[test]
        fn prop_groups_partition_positions(
            index in arb_index(),
            hashes in proptest::collection::vec(arb_hash(), 0..32),
        ) {
            let groups = index.group_by_host(&hashes);
            for (position, hash) in hashes.iter().enumerate() {
                let covering = index.covering_hosts(hash);
                let grouped: Vec<&HostAddress> = groups
                    .groups
                    .iter()
                    .filter(|(_, positions)| positions.contains(&position))
                    .map(|(host, _)| host)
                    .collect();
                prop_assert_eq!(&grouped, &covering);
                prop_assert_eq!(groups.uncovered.contains(&position), covering.is_empty());
            }
        }

        #[test]
        fn prop_union_preserves_coverage(index in arb_index(), target in arb_hash()) {
            let union = index.union();
            prop_assert_eq!(spans_cover(&union, &target), index.covers(&target));
            for pair in union.windows(2) {
                prop_assert!(pair[0].end() < pair[1].start());
                prop_assert!(!follows(pair[0].end(), pair[1].start()));
            }
        }
    }
}
