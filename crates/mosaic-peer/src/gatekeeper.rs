//! Gatekeeper - the membership directory of one peer.
//!
//! Each peer runs exactly one gatekeeper. It maps every known peer to that
//! peer's semaphore and board proxy, in two calling conventions:
//!
//! - the **local view** holds [`SemaphoreHandle`]s and [`PuzzleHandle`]s. It
//!   is only used by this peer's controller. The entry for this peer calls
//!   straight into its own objects.
//! - the **remote view** holds plain [`ServiceRef`]s. It is what other peers
//!   get when they ask this gatekeeper for the membership.
//!
//! Both views always cover the same set of peers and both of their maps have
//! identical key sets. Mutations take a single write lock over both views, so
//! a reader never observes one view updated and the other not. Remote
//! `register_peer`/`unregister_peers` calls arrive concurrently with local
//! protocol runs; the gatekeeper only keeps the books and never takes session
//! locks itself.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::handle::{PuzzleHandle, SemaphoreHandle};
use crate::peer::PeerId;
use crate::puzzle::RemotePuzzle;
use crate::registry::{Registry, Service};
use crate::rpc::{RpcClient, ServiceRef};
use crate::semaphore::RemoteSemaphore;

/// Two parallel maps keyed by peer: who holds which lock and which board.
///
/// Views handed out by the gatekeeper are snapshots: later membership changes
/// never show up in a view that was already returned.
#[derive(Debug, Clone)]
pub struct MembershipView<L, B> {
    locks: HashMap<PeerId, L>,
    boards: HashMap<PeerId, B>,
}

/// Membership in the local calling convention.
pub type LocalView = MembershipView<SemaphoreHandle, PuzzleHandle>;

/// Membership as service references, for other peers.
pub type RemoteView = MembershipView<ServiceRef, ServiceRef>;

impl<L, B> Default for MembershipView<L, B> {
    fn default() -> Self {
        Self {
            locks: HashMap::new(),
            boards: HashMap::new(),
        }
    }
}

impl<L, B> MembershipView<L, B> {
    /// Build a view from two maps, keeping only peers present in both.
    pub fn from_maps(mut locks: HashMap<PeerId, L>, mut boards: HashMap<PeerId, B>) -> Self {
        locks.retain(|peer, _| boards.contains_key(peer));
        boards.retain(|peer, _| locks.contains_key(peer));
        Self { locks, boards }
    }

    /// Peer → lock handle.
    pub fn locks(&self) -> &HashMap<PeerId, L> {
        &self.locks
    }

    /// Peer → board handle.
    pub fn boards(&self) -> &HashMap<PeerId, B> {
        &self.boards
    }

    /// Members, in ascending order.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.locks.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Whether `peer` is a member.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.locks.contains_key(peer)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the view has no members.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// This view without the given peers.
    pub fn without(mut self, gone: &BTreeSet<PeerId>) -> Self {
        for peer in gone {
            self.remove(peer);
        }
        self
    }

    fn insert(&mut self, peer: PeerId, lock: L, board: B) {
        self.locks.insert(peer.clone(), lock);
        self.boards.insert(peer, board);
    }

    fn remove(&mut self, peer: &PeerId) -> bool {
        let lock = self.locks.remove(peer).is_some();
        let board = self.boards.remove(peer).is_some();
        lock || board
    }
}

#[derive(Debug)]
struct Directory {
    local: LocalView,
    remote: RemoteView,
}

/// The membership directory of one peer.
#[derive(Debug)]
pub struct Gatekeeper {
    id: PeerId,
    client: RpcClient,
    directory: RwLock<Directory>,
}

impl Gatekeeper {
    /// Gatekeeper of the first peer in a session: it knows only itself.
    ///
    /// Exports `puzzle` and `semaphore` through `registry`.
    pub async fn founder(
        id: PeerId,
        puzzle: Arc<RemotePuzzle>,
        semaphore: Arc<RemoteSemaphore>,
        registry: &Registry,
        client: RpcClient,
    ) -> Self {
        Self::join(id, puzzle, semaphore, registry, client, RemoteView::default()).await
    }

    /// Gatekeeper of a peer joining a session whose members are `known`.
    ///
    /// Exports `puzzle` and `semaphore` through `registry`. If `known`
    /// already contains an entry for `id`, this peer's fresh handles replace it.
    pub async fn join(
        id: PeerId,
        puzzle: Arc<RemotePuzzle>,
        semaphore: Arc<RemoteSemaphore>,
        registry: &Registry,
        client: RpcClient,
        known: RemoteView,
    ) -> Self {
        let puzzle_ref = registry.export(Service::Puzzle(Arc::clone(&puzzle))).await;
        let semaphore_ref = registry
            .export(Service::Semaphore(Arc::clone(&semaphore)))
            .await;

        let mut local = LocalView::default();
        for (peer, lock) in &known.locks {
            if let Some(board) = known.boards.get(peer) {
                local.insert(
                    peer.clone(),
                    SemaphoreHandle::remote(lock.clone(), client),
                    PuzzleHandle::remote(board.clone(), client),
                );
            }
        }
        local.insert(
            id.clone(),
            SemaphoreHandle::Local(semaphore),
            PuzzleHandle::Local(puzzle),
        );

        let mut remote = known;
        remote.insert(id.clone(), semaphore_ref, puzzle_ref);

        info!(peer = %id, members = remote.len(), "gatekeeper ready");
        Self {
            id,
            client,
            directory: RwLock::new(Directory { local, remote }),
        }
    }

    /// The peer this gatekeeper belongs to.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Snapshot of the membership in the local calling convention.
    pub async fn local_view(&self) -> LocalView {
        self.directory.read().await.local.clone()
    }

    /// Snapshot of the membership as service references.
    pub async fn remote_view(&self) -> RemoteView {
        self.directory.read().await.remote.clone()
    }

    /// Members, in ascending order.
    pub async fn peers(&self) -> Vec<PeerId> {
        self.directory.read().await.remote.peers()
    }

    /// Insert or overwrite the entry for `peer`.
    pub async fn register_peer(&self, peer: PeerId, puzzle: ServiceRef, semaphore: ServiceRef) {
        let mut directory = self.directory.write().await;
        directory.local.insert(
            peer.clone(),
            SemaphoreHandle::remote(semaphore.clone(), self.client),
            PuzzleHandle::remote(puzzle.clone(), self.client),
        );
        directory.remote.insert(peer.clone(), semaphore, puzzle);
        info!(%peer, members = directory.remote.len(), "peer registered");
    }

    /// Remove the entry for `peer`. Returns whether it was present.
    pub async fn unregister_peer(&self, peer: &PeerId) -> bool {
        self.unregister_peers(std::slice::from_ref(peer)).await == 1
    }

    /// Remove the entries for `peers`. Returns how many were present.
    pub async fn unregister_peers(&self, peers: &[PeerId]) -> usize {
        let mut directory = self.directory.write().await;
        let mut removed = 0;
        for peer in peers {
            let local = directory.local.remove(peer);
            let remote = directory.remote.remove(peer);
            if local || remote {
                removed += 1;
                info!(%peer, "peer unregistered");
            }
        }
        debug!(requested = peers.len(), removed, members = directory.remote.len(), "unregister done");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::NoopObserver;
    use mosaic_board::Board;
    use proptest::prelude::*;

    fn me() -> PeerId {
        PeerId::new("me", 1)
    }

    fn parts() -> (Arc<RemotePuzzle>, Arc<RemoteSemaphore>, Registry) {
        (
            Arc::new(RemotePuzzle::new(Board::solved(2, 2).unwrap(), Arc::new(NoopObserver))),
            Arc::new(RemoteSemaphore::new()),
            Registry::new(me()),
        )
    }

    fn refs(peer: &PeerId) -> (ServiceRef, ServiceRef) {
        (
            ServiceRef::new(peer.clone(), "puzzle-0"),
            ServiceRef::new(peer.clone(), "semaphore-1"),
        )
    }

    async fn founder() -> Gatekeeper {
        let (puzzle, semaphore, registry) = parts();
        Gatekeeper::founder(me(), puzzle, semaphore, &registry, RpcClient::default()).await
    }

    fn assert_consistent<L, B>(view: &MembershipView<L, B>) {
        let mut locks: Vec<_> = view.locks().keys().collect();
        let mut boards: Vec<_> = view.boards().keys().collect();
        locks.sort();
        boards.sort();
        assert_eq!(locks, boards);
    }

    #[tokio::test]
    async fn founder_knows_only_itself() {
        let (puzzle, semaphore, registry) = parts();
        let gk = Gatekeeper::founder(me(), puzzle, semaphore, &registry, RpcClient::default()).await;

        assert_eq!(gk.peers().await, vec![me()]);
        let local = gk.local_view().await;
        assert!(local.boards()[&me()].is_local());
        assert!(matches!(local.locks()[&me()], SemaphoreHandle::Local(_)));

        // The remote view points at services that are really exported.
        let remote = gk.remote_view().await;
        assert!(matches!(
            registry.lookup(&remote.boards()[&me()].name).await,
            Ok(Service::Puzzle(_))
        ));
        assert!(matches!(
            registry.lookup(&remote.locks()[&me()].name).await,
            Ok(Service::Semaphore(_))
        ));
    }

    #[tokio::test]
    async fn join_merges_known_peers_with_self() {
        let other = PeerId::new("other", 2);
        let (board, lock) = refs(&other);
        let mut locks = HashMap::new();
        locks.insert(other.clone(), lock.clone());
        let mut boards = HashMap::new();
        boards.insert(other.clone(), board.clone());
        let known = RemoteView::from_maps(locks, boards);

        let (puzzle, semaphore, registry) = parts();
        let gk = Gatekeeper::join(me(), puzzle, semaphore, &registry, RpcClient::default(), known)
            .await;

        assert_eq!(gk.peers().await, vec![me(), other.clone()]);
        let remote = gk.remote_view().await;
        assert_eq!(remote.boards()[&other], board);
        assert_eq!(remote.locks()[&other], lock);
        let local = gk.local_view().await;
        assert!(!local.boards()[&other].is_local());
        assert!(local.boards()[&me()].is_local());
    }

    #[test]
    fn from_maps_drops_half_entries() {
        let a = PeerId::new("a", 1);
        let b = PeerId::new("b", 1);
        let locks: HashMap<_, _> = [(a.clone(), 1), (b.clone(), 2)].into_iter().collect();
        let boards: HashMap<_, _> = [(a.clone(), 'x')].into_iter().collect();
        let view = MembershipView::from_maps(locks, boards);
        assert_eq!(view.peers(), vec![a]);
        assert_consistent(&view);
    }

    #[tokio::test]
    async fn register_then_unregister() {
        let gk = founder().await;
        let other = PeerId::new("other", 2);
        let (board, lock) = refs(&other);

        gk.register_peer(other.clone(), board, lock).await;
        assert_eq!(gk.peers().await, vec![me(), other.clone()]);

        assert!(gk.unregister_peer(&other).await);
        assert!(!gk.unregister_peer(&other).await);
        assert_eq!(gk.peers().await, vec![me()]);
    }

    #[tokio::test]
    async fn register_overwrites_existing_entry() {
        let gk = founder().await;
        let other = PeerId::new("other", 2);
        let (board, lock) = refs(&other);
        gk.register_peer(other.clone(), board, lock).await;

        let newer = ServiceRef::new(other.clone(), "puzzle-9");
        gk.register_peer(other.clone(), newer.clone(), ServiceRef::new(other.clone(), "semaphore-9"))
            .await;
        assert_eq!(gk.remote_view().await.boards()[&other], newer);
        assert_eq!(gk.peers().await.len(), 2);
    }

    #[tokio::test]
    async fn views_are_snapshots() {
        let gk = founder().await;
        let local = gk.local_view().await;
        let remote = gk.remote_view().await;

        let other = PeerId::new("other", 2);
        let (board, lock) = refs(&other);
        gk.register_peer(other.clone(), board, lock).await;

        assert!(!local.contains(&other));
        assert!(!remote.contains(&other));
        assert!(gk.remote_view().await.contains(&other));
    }

    #[tokio::test]
    async fn unregister_many_counts_present_peers() {
        let gk = founder().await;
        let b = PeerId::new("b", 2);
        let c = PeerId::new("c", 3);
        for peer in [&b, &c] {
            let (board, lock) = refs(peer);
            gk.register_peer(peer.clone(), board, lock).await;
        }

        let removed = gk
            .unregister_peers(&[b.clone(), PeerId::new("zz", 9), c.clone()])
            .await;
        assert_eq!(removed, 2);
        assert_eq!(gk.peers().await, vec![me()]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u16),
        Unregister(Vec<u16>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u16..6).prop_map(Op::Register),
            proptest::collection::vec(0u16..6, 0..4).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn key_sets_stay_identical(ops in proptest::collection::vec(op_strategy(), 0..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let gk = founder().await;
                for op in ops {
                    match op {
                        Op::Register(port) => {
                            let peer = PeerId::new("p", port);
                            let (board, lock) = refs(&peer);
                            gk.register_peer(peer, board, lock).await;
                        }
                        Op::Unregister(ports) => {
                            let peers: Vec<_> = ports.into_iter().map(|p| PeerId::new("p", p)).collect();
                            gk.unregister_peers(&peers).await;
                        }
                    }
                    let local = gk.local_view().await;
                    let remote = gk.remote_view().await;
                    assert_consistent(&local);
                    assert_consistent(&remote);
                    assert_eq!(local.peers(), remote.peers());
                }
            });
        }
    }
}
