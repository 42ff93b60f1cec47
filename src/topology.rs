//! Rank maps and topology subgroups (component B).
//!
//! A [`RankMap`] translates a virtual group's dense rank space
//! `[0, size)` back into the enclosing group's rank space. All three
//! kinds (`spec.md` §4.B) are O(1): identity, strided, and
//! array-backed lookup.

use std::sync::Arc;

/// A process rank. The sentinel [`Rank::INVALID`] marks "no such peer".
pub type Rank = i32;

/// Marks an invalid/absent rank (`spec.md` §3: "a sentinel value marks
/// invalid/no peer").
pub const INVALID_RANK: Rank = -1;

/// Translates a rank in a virtual group's dense `[0, size)` space into
/// the enclosing group's rank space.
///
/// `rank_map.size()` must equal the owning group's size (`spec.md`
/// §3's required invariant); callers construct a `RankMap` alongside
/// the group it belongs to and never resize it afterwards.
#[derive(Clone)]
pub enum RankMap {
    /// `eval(i) = i`.
    Full { size: usize },
    /// `eval(i) = start + i * stride`.
    Strided { start: Rank, stride: Rank, size: usize },
    /// `eval(i) = array[i]`.
    Array(Arc<[Rank]>),
}

impl RankMap {
    #[must_use]
    pub fn full(size: usize) -> Self {
        RankMap::Full { size }
    }

    #[must_use]
    pub fn strided(start: Rank, stride: Rank, size: usize) -> Self {
        RankMap::Strided { start, stride, size }
    }

    #[must_use]
    pub fn array(entries: impl Into<Arc<[Rank]>>) -> Self {
        RankMap::Array(entries.into())
    }

    /// O(1) for every kind. Returns [`INVALID_RANK`] if `i` is out of
    /// range.
    #[must_use]
    pub fn eval(&self, i: usize) -> Rank {
        if i >= self.size() {
            return INVALID_RANK;
        }
        match self {
            RankMap::Full { .. } => i as Rank,
            RankMap::Strided { start, stride, .. } => start + (i as Rank) * stride,
            RankMap::Array(arr) => arr[i],
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            RankMap::Full { size } | RankMap::Strided { size, .. } => *size,
            RankMap::Array(arr) => arr.len(),
        }
    }

    /// Cheap clone of the mapping, matching the C API's explicit
    /// `copy()`/`cleanup()` pair. `Clone` already does this in Rust;
    /// kept as a named method so call sites read the way the rest of
    /// this component's contract does.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// No-op: a `RankMap`'s resources are freed by ordinary `Drop`.
    /// Kept for symmetry with [`Self::copy`] and the C lifecycle it
    /// mirrors.
    pub fn cleanup(self) {
        drop(self);
    }
}

/// Optional placement hints used to build topology subgroups
/// (`spec.md` §3: "Provided by a user callback").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub subnet_id: Option<u32>,
    pub node_id: Option<u32>,
    pub socket_id: Option<u32>,
}

/// Per-peer info exchanged via the context's OOB allgather at group
/// creation (`spec.md` §4.G step 6): the peer's placement plus
/// whatever per-plugin address bytes the loaded plugins contributed.
#[derive(Clone, Debug, Default)]
pub struct ProcessInfo {
    pub location: Location,
    pub plugin_addr: Vec<u8>,
}

/// Whether a topology subgroup applies to the calling process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubgroupState {
    /// The caller is a member; `vgroup` describes it.
    Enabled,
    /// The caller is not a member of this subgroup.
    Disabled,
    /// Required location info was absent for one or more peers.
    Unsupported,
}

/// A topology-derived virtual group: `{myrank, size, rank_map}` plus
/// its enable/disable state, matching `spec.md` §3's vgroup shape.
#[derive(Clone)]
pub struct Subgroup {
    pub state: SubgroupState,
    pub myrank: Rank,
    pub rank_map: Option<RankMap>,
    group_id: u32,
}

impl Subgroup {
    fn unsupported(group_id: u32) -> Self {
        Subgroup { state: SubgroupState::Unsupported, myrank: INVALID_RANK, rank_map: None, group_id }
    }

    fn disabled(group_id: u32) -> Self {
        Subgroup { state: SubgroupState::Disabled, myrank: INVALID_RANK, rank_map: None, group_id }
    }

    fn enabled(myrank: Rank, members: Vec<Rank>, group_id: u32) -> Self {
        Subgroup {
            state: SubgroupState::Enabled,
            myrank,
            rank_map: Some(RankMap::array(members)),
            group_id,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, SubgroupState::Enabled)
    }

    /// The vgroup view of this subgroup, if enabled.
    #[must_use]
    pub fn as_vgroup(&self) -> Option<Vgroup> {
        self.rank_map.as_ref().map(|rm| Vgroup { myrank: self.myrank, rank_map: rm.clone(), group_id: self.group_id })
    }
}

/// The view an algorithm sees: dense local ranks plus a translation
/// back into the enclosing group's rank space (`spec.md` §3's vgroup
/// shape, used directly -- not just by topology subgroups).
#[derive(Clone)]
pub struct Vgroup {
    pub myrank: Rank,
    pub rank_map: RankMap,
    /// The enclosing group's id, folded into every p2p tag this
    /// vgroup's ops post (`spec.md` §4.C tag layout) so that two
    /// groups running the same collective concurrently never collide.
    pub group_id: u32,
}

impl Vgroup {
    #[must_use]
    pub fn size(&self) -> usize {
        self.rank_map.size()
    }

    /// Translate a local (dense) rank into the enclosing group's rank.
    #[must_use]
    pub fn group_rank(&self, local: usize) -> Rank {
        self.rank_map.eval(local)
    }
}

/// The six topology subgroups precomputed at group-create time
/// (`spec.md` §4.B).
pub struct Topology {
    pub node: Subgroup,
    pub node_leader: Subgroup,
    pub socket: Subgroup,
    pub socket_leader: Subgroup,
    pub subnet: Subgroup,
    pub subnet_leader: Subgroup,
}

impl Topology {
    /// Build all six subgroups from the group's process-info table.
    /// `my_rank` is this process's rank in the enclosing group.
    #[must_use]
    pub fn build(my_rank: Rank, infos: &[ProcessInfo], group_id: u32) -> Self {
        Topology {
            node: by_key(my_rank, infos, |l| l.node_id, group_id),
            node_leader: leader_group(my_rank, infos, |l| l.node_id, group_id),
            socket: by_key(my_rank, infos, |l| l.socket_id, group_id),
            socket_leader: leader_group(my_rank, infos, |l| l.socket_id, group_id),
            subnet: by_key(my_rank, infos, |l| l.subnet_id, group_id),
            subnet_leader: leader_group(my_rank, infos, |l| l.subnet_id, group_id),
        }
    }
}

fn by_key(my_rank: Rank, infos: &[ProcessInfo], key: impl Fn(&Location) -> Option<u32>, group_id: u32) -> Subgroup {
    if infos.iter().any(|info| key(&info.location).is_none()) {
        return Subgroup::unsupported(group_id);
    }
    let my_key = key(&infos[my_rank as usize].location);
    let members: Vec<Rank> = infos
        .iter()
        .enumerate()
        .filter(|(_, info)| key(&info.location) == my_key)
        .map(|(r, _)| r as Rank)
        .collect();
    if members.len() <= 1 {
        return Subgroup::disabled(group_id);
    }
    let myrank = members.iter().position(|&r| r == my_rank).unwrap() as Rank;
    Subgroup::enabled(myrank, members, group_id)
}

/// The "leader" subgroup: rank-0 of each distinct key value, collected
/// into one vgroup. Enabled only for processes that are themselves a
/// leader.
fn leader_group(my_rank: Rank, infos: &[ProcessInfo], key: impl Fn(&Location) -> Option<u32>, group_id: u32) -> Subgroup {
    if infos.iter().any(|info| key(&info.location).is_none()) {
        return Subgroup::unsupported(group_id);
    }
    let mut seen = std::collections::HashSet::new();
    let mut leaders = Vec::new();
    for (r, info) in infos.iter().enumerate() {
        let k = key(&info.location);
        if seen.insert(k) {
            leaders.push(r as Rank);
        }
    }
    if !leaders.contains(&my_rank) || leaders.len() <= 1 {
        return Subgroup::disabled(group_id);
    }
    let myrank = leaders.iter().position(|&r| r == my_rank).unwrap() as Rank;
    Subgroup::enabled(myrank, leaders, group_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rank_map_is_identity() {
        let m = RankMap::full(4);
        assert_eq!(m.eval(0), 0);
        assert_eq!(m.eval(3), 3);
        assert_eq!(m.eval(4), INVALID_RANK);
    }

    #[test]
    fn strided_rank_map() {
        let m = RankMap::strided(1, 2, 3);
        assert_eq!(m.eval(0), 1);
        assert_eq!(m.eval(1), 3);
        assert_eq!(m.eval(2), 5);
        assert_eq!(m.eval(3), INVALID_RANK);
    }

    #[test]
    fn array_rank_map() {
        let m = RankMap::array(vec![5, 2, 9]);
        assert_eq!(m.eval(1), 2);
        assert_eq!(m.eval(10), INVALID_RANK);
    }

    fn info(node: u32, socket: u32) -> ProcessInfo {
        ProcessInfo { location: Location { subnet_id: Some(0), node_id: Some(node), socket_id: Some(socket) }, plugin_addr: vec![] }
    }

    #[test]
    fn node_subgroup_splits_by_node_id() {
        let infos = vec![info(0, 0), info(0, 1), info(1, 0), info(1, 1)];
        let topo = Topology::build(0, &infos, 0);
        assert!(topo.node.is_enabled());
        assert_eq!(topo.node.rank_map.as_ref().unwrap().size(), 2);
        assert!(topo.subnet.is_enabled());
        assert_eq!(topo.subnet.rank_map.as_ref().unwrap().size(), 4);
    }

    #[test]
    fn missing_location_is_unsupported() {
        let mut infos = vec![info(0, 0), info(0, 1)];
        infos[1].location.node_id = None;
        let topo = Topology::build(0, &infos, 0);
        assert_eq!(topo.node.state, SubgroupState::Unsupported);
    }

    #[test]
    fn singleton_node_is_disabled() {
        let infos = vec![info(0, 0), info(1, 0)];
        let topo = Topology::build(0, &infos, 0);
        assert_eq!(topo.node.state, SubgroupState::Disabled);
    }
}
