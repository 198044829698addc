use std::{net::SocketAddr, ops::Range, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use futures::future;
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{self, Instant},
};

use super::{DistErr, Result};

/// How long a non-root rank keeps trying to reach the rendezvous endpoint.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// One end of a root <-> rank connection.
struct Peer {
    rank: usize,
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
}

impl Peer {
    fn new(rank: usize, stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Ok(Self { rank, rx, tx })
    }

    async fn send_tensor(&mut self, nums: &[f32]) -> Result<()> {
        self.tx.send(&Msg::Data(Payload::Tensor(nums))).await?;
        Ok(())
    }

    async fn send_command(&mut self, cmd: Command) -> Result<()> {
        self.tx.send(&Msg::Control(cmd)).await?;
        Ok(())
    }

    /// Receives a tensor of exactly `expected` elements, the returned slice lives in `buf`.
    async fn recv_tensor<'b>(&mut self, buf: &'b mut Vec<f32>, expected: usize) -> Result<&'b [f32]> {
        let msg: Msg = self.rx.recv_into(buf).await?;
        match msg {
            Msg::Data(Payload::Tensor(nums)) if nums.len() == expected => Ok(nums),
            Msg::Data(Payload::Tensor(nums)) => Err(DistErr::LengthMismatch {
                peer: self.rank,
                got: nums.len(),
                expected,
            }),
            Msg::Err(e) => Err(DistErr::Remote {
                peer: self.rank,
                msg: e.into_owned(),
            }),
            other => Err(DistErr::UnexpectedMessage {
                peer: self.rank,
                expected: "data/tensor",
                got: other.kind(),
            }),
        }
    }

    async fn recv_command(&mut self, buf: &mut Vec<f32>) -> Result<Command> {
        let msg: Msg = self.rx.recv_into(buf).await?;
        match msg {
            Msg::Control(cmd) => Ok(cmd),
            Msg::Err(e) => Err(DistErr::Remote {
                peer: self.rank,
                msg: e.into_owned(),
            }),
            other => Err(DistErr::UnexpectedMessage {
                peer: self.rank,
                expected: "control",
                got: other.kind(),
            }),
        }
    }

    async fn expect_command(&mut self, buf: &mut Vec<f32>, expected: Command) -> Result<()> {
        let cmd = self.recv_command(buf).await?;
        if cmd != expected {
            return Err(DistErr::UnexpectedMessage {
                peer: self.rank,
                expected: Msg::Control(expected).kind(),
                got: Msg::Control(cmd).kind(),
            });
        }

        Ok(())
    }
}

enum Topology {
    Solo,
    /// Rank 0, holding one peer per other rank, sorted by rank.
    Root(Vec<Peer>),
    Leaf(Peer),
}

/// A fixed group of `world_size` processes able to run collectives.
///
/// Ranks are wired in a star around rank 0: every collective funnels through the root, which
/// reduces in rank order and sends the same result back, so every rank observes bit-identical
/// values.
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    topology: Topology,
    buf: Vec<f32>,
}

impl ProcessGroup {
    /// Joins the process group at the rendezvous endpoint.
    ///
    /// # Arguments
    /// * `init_method` - The rendezvous endpoint, `tcp://<host>:<port>`.
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of processes in the group.
    ///
    /// # Returns
    /// The group, once every rank has joined.
    pub async fn init(init_method: &str, rank: usize, world_size: usize) -> Result<Self> {
        if rank >= world_size {
            return Err(DistErr::InvalidRank { rank, world_size });
        }

        let addr = parse_init_method(init_method)?;
        if world_size == 1 {
            return Ok(Self::solo());
        }

        if rank == 0 {
            let listener = TcpListener::bind(addr).await?;
            info!(rank = rank; "rendezvous listening at {addr}");
            Self::root(listener, world_size).await
        } else {
            Self::leaf(addr, rank, world_size).await
        }
    }

    /// A group of one, every collective is the identity.
    pub fn solo() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            topology: Topology::Solo,
            buf: Vec::new(),
        }
    }

    /// Builds rank 0 out of an already bound listener, waiting for the other
    /// `world_size - 1` ranks to say hello.
    pub async fn root(listener: TcpListener, world_size: usize) -> Result<Self> {
        if world_size <= 1 {
            return Ok(Self::solo());
        }

        let mut buf = Vec::new();
        let mut slots: Vec<Option<Peer>> = (1..world_size).map(|_| None).collect();

        for _ in 1..world_size {
            let (stream, addr) = listener.accept().await?;
            let peer = handshake(stream, addr, world_size, &mut buf).await?;

            let slot = &mut slots[peer.rank - 1];
            if slot.is_some() {
                return Err(DistErr::DuplicateRank(peer.rank));
            }

            debug!(rank = 0; "rank {} joined from {addr}", peer.rank);
            *slot = Some(peer);
        }

        let mut peers: Vec<Peer> = slots.into_iter().flatten().collect();
        let ack = Command::Hello {
            rank: 0,
            world_size,
        };

        future::try_join_all(peers.iter_mut().map(|p| p.send_command(ack.clone()))).await?;
        info!(rank = 0; "process group of {world_size} ranks is complete");

        Ok(Self {
            rank: 0,
            world_size,
            topology: Topology::Root(peers),
            buf,
        })
    }

    async fn leaf(addr: &str, rank: usize, world_size: usize) -> Result<Self> {
        let stream = connect(addr, RENDEZVOUS_TIMEOUT).await?;
        let mut root = Peer::new(0, stream)?;
        root.send_command(Command::Hello { rank, world_size }).await?;

        let mut buf = Vec::new();
        match root.recv_command(&mut buf).await? {
            Command::Hello {
                rank: 0,
                world_size: got,
            } if got == world_size => {}
            Command::Hello { rank: other, .. } if other != 0 => {
                return Err(DistErr::UnexpectedMessage {
                    peer: other,
                    expected: "control/hello from rank 0",
                    got: "control/hello",
                });
            }
            Command::Hello { world_size: got, .. } => {
                return Err(DistErr::WorldSizeMismatch {
                    peer: 0,
                    got,
                    expected: world_size,
                });
            }
            other => {
                return Err(DistErr::UnexpectedMessage {
                    peer: 0,
                    expected: "control/hello",
                    got: Msg::Control(other).kind(),
                });
            }
        }

        debug!(rank = rank; "joined the process group at {addr}");
        Ok(Self {
            rank,
            world_size,
            topology: Topology::Leaf(root),
            buf,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Blocks until every rank reaches the barrier.
    pub async fn barrier(&mut self) -> Result<()> {
        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for peer in peers.iter_mut() {
                    peer.expect_command(&mut self.buf, Command::Barrier).await?;
                }

                future::try_join_all(peers.iter_mut().map(|p| p.send_command(Command::Barrier)))
                    .await?;
            }
            Topology::Leaf(root) => {
                root.send_command(Command::Barrier).await?;
                root.expect_command(&mut self.buf, Command::Barrier).await?;
            }
        }

        Ok(())
    }

    /// Overwrites `nums` on every rank with rank 0's contents.
    pub async fn broadcast(&mut self, nums: &mut [f32]) -> Result<()> {
        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                let nums: &[f32] = nums;
                future::try_join_all(peers.iter_mut().map(|p| p.send_tensor(nums))).await?;
            }
            Topology::Leaf(root) => {
                let got = root.recv_tensor(&mut self.buf, nums.len()).await?;
                nums.copy_from_slice(got);
            }
        }

        Ok(())
    }

    /// Replaces `nums` on every rank with the element-wise sum over all ranks.
    pub async fn all_reduce(&mut self, nums: &mut [f32]) -> Result<()> {
        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for peer in peers.iter_mut() {
                    let got = peer.recv_tensor(&mut self.buf, nums.len()).await?;
                    add_assign(nums, got);
                }

                let nums: &[f32] = nums;
                future::try_join_all(peers.iter_mut().map(|p| p.send_tensor(nums))).await?;
            }
            Topology::Leaf(root) => {
                root.send_tensor(nums).await?;
                let got = root.recv_tensor(&mut self.buf, nums.len()).await?;
                nums.copy_from_slice(got);
            }
        }

        Ok(())
    }

    /// Sums `nums` over all ranks, leaving each rank with the sum of its own partition only.
    ///
    /// # Arguments
    /// * `nums` - This rank's contribution; afterwards `nums[partitions[rank]]` holds the reduced
    ///   values and the rest is unspecified.
    /// * `partitions` - The partition table, indexed by rank.
    pub async fn reduce_scatter(&mut self, nums: &mut [f32], partitions: &[Range<usize>]) -> Result<()> {
        self.check_partitions(nums.len(), partitions)?;

        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for peer in peers.iter_mut() {
                    let got = peer.recv_tensor(&mut self.buf, nums.len()).await?;
                    add_assign(nums, got);
                }

                let nums: &[f32] = nums;
                future::try_join_all(
                    peers
                        .iter_mut()
                        .map(|p| p.send_tensor(&nums[partitions[p.rank].clone()])),
                )
                .await?;
            }
            Topology::Leaf(root) => {
                root.send_tensor(nums).await?;

                let own = partitions[self.rank].clone();
                let got = root.recv_tensor(&mut self.buf, own.len()).await?;
                nums[own].copy_from_slice(got);
            }
        }

        Ok(())
    }

    /// Assembles `nums` on every rank out of each rank's own partition.
    ///
    /// # Arguments
    /// * `nums` - The full buffer; only `nums[partitions[rank]]` is read from this rank.
    /// * `partitions` - The partition table, indexed by rank.
    pub async fn all_gather(&mut self, nums: &mut [f32], partitions: &[Range<usize>]) -> Result<()> {
        self.check_partitions(nums.len(), partitions)?;

        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for peer in peers.iter_mut() {
                    let range = partitions[peer.rank].clone();
                    let got = peer.recv_tensor(&mut self.buf, range.len()).await?;
                    nums[range].copy_from_slice(got);
                }

                let nums: &[f32] = nums;
                future::try_join_all(peers.iter_mut().map(|p| p.send_tensor(nums))).await?;
            }
            Topology::Leaf(root) => {
                root.send_tensor(&nums[partitions[self.rank].clone()]).await?;
                let got = root.recv_tensor(&mut self.buf, nums.len()).await?;
                nums.copy_from_slice(got);
            }
        }

        Ok(())
    }

    /// Leaves the group in an orderly fashion; the root waits for every rank to say goodbye.
    pub async fn shutdown(mut self) -> Result<()> {
        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for peer in peers.iter_mut() {
                    peer.expect_command(&mut self.buf, Command::Disconnect).await?;
                }
            }
            Topology::Leaf(root) => root.send_command(Command::Disconnect).await?,
        }

        debug!(rank = self.rank; "left the process group");
        Ok(())
    }

    /// Tells every directly connected rank that this one failed, best effort.
    pub async fn abort(&mut self, reason: &str) {
        let peers: Vec<&mut Peer> = match &mut self.topology {
            Topology::Solo => Vec::new(),
            Topology::Root(peers) => peers.iter_mut().collect(),
            Topology::Leaf(root) => vec![root],
        };

        for peer in peers {
            if let Err(e) = peer.tx.send(&Msg::Err(reason.into())).await {
                warn!(rank = self.rank; "could not notify rank {} of the failure: {e}", peer.rank);
            }
        }
    }

    fn check_partitions(&self, len: usize, partitions: &[Range<usize>]) -> Result<()> {
        if partitions.len() != self.world_size {
            return Err(DistErr::LengthMismatch {
                peer: self.rank,
                got: partitions.len(),
                expected: self.world_size,
            });
        }

        let covered = partitions.last().map(|r| r.end).unwrap_or_default();
        if covered != len {
            return Err(DistErr::LengthMismatch {
                peer: self.rank,
                got: len,
                expected: covered,
            });
        }

        Ok(())
    }
}

/// Validates the first message of a freshly accepted connection.
async fn handshake(stream: TcpStream, addr: SocketAddr, world_size: usize, buf: &mut Vec<f32>) -> Result<Peer> {
    let mut peer = Peer::new(usize::MAX, stream)?;

    let (rank, got) = match peer.recv_command(buf).await? {
        Command::Hello {
            rank,
            world_size: theirs,
        } => (rank, theirs),
        other => {
            warn!(rank = 0; "{addr} did not start with a hello");
            return Err(DistErr::UnexpectedMessage {
                peer: usize::MAX,
                expected: "control/hello",
                got: Msg::Control(other).kind(),
            });
        }
    };

    if got != world_size {
        return Err(DistErr::WorldSizeMismatch {
            peer: rank,
            got,
            expected: world_size,
        });
    }

    if rank == 0 || rank >= world_size {
        return Err(DistErr::InvalidRank { rank, world_size });
    }

    peer.rank = rank;
    Ok(peer)
}

/// Connects to the rendezvous, retrying while the root is not listening yet.
async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let start = Instant::now();

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if start.elapsed() < timeout => {
                debug!("rendezvous at {addr} not ready: {e}");
                time::sleep(CONNECT_RETRY).await;
            }
            Err(_) => {
                return Err(DistErr::RendezvousTimeout {
                    addr: addr.to_string(),
                    waited: start.elapsed(),
                });
            }
        }
    }
}

/// Extracts `<host>:<port>` out of `tcp://<host>:<port>`.
pub fn parse_init_method(init_method: &str) -> Result<&str> {
    let invalid = || DistErr::InvalidInitMethod(init_method.to_string());

    let addr = init_method.strip_prefix("tcp://").ok_or_else(invalid)?;
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }

    Ok(addr)
}

fn add_assign(acc: &mut [f32], other: &[f32]) {
    acc.iter_mut().zip(other).for_each(|(a, b)| *a += b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::partition;

    /// Forms a process group of `world_size` ranks over loopback, sorted by rank.
    async fn loopback(world_size: usize) -> Vec<ProcessGroup> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let init_method = format!("tcp://{}", listener.local_addr().unwrap());

        let leaves = future::try_join_all(
            (1..world_size).map(|rank| ProcessGroup::init(&init_method, rank, world_size)),
        );
        let (root, leaves) = tokio::join!(ProcessGroup::root(listener, world_size), leaves);

        let mut groups = vec![root.unwrap()];
        groups.extend(leaves.unwrap());
        groups
    }

    /// Connects to `addr` and introduces itself as `rank`.
    async fn hello(addr: SocketAddr, rank: usize, world_size: usize) -> Peer {
        let mut peer = Peer::new(0, TcpStream::connect(addr).await.unwrap()).unwrap();
        peer.send_command(Command::Hello { rank, world_size }).await.unwrap();
        peer
    }

    /// Rank `r` contributes `i * (r + 1)` at index `i`, returns its owned slice after the
    /// reduce-scatter and the whole buffer after the all-gather.
    async fn scatter_then_gather(mut group: ProcessGroup) -> (Vec<f32>, Vec<f32>) {
        let partitions = partition::partitions(10, group.world_size()).unwrap();
        let rank = group.rank();
        let mut nums: Vec<f32> = (0..10).map(|i| (i * (rank + 1)) as f32).collect();

        group.reduce_scatter(&mut nums, &partitions).await.unwrap();
        let owned = nums[partitions[rank].clone()].to_vec();

        group.all_gather(&mut nums, &partitions).await.unwrap();
        group.shutdown().await.unwrap();

        (owned, nums)
    }

    #[tokio::test]
    async fn three_ranks_scatter_and_gather_uneven_partitions() {
        let groups = loopback(3).await;
        let results = future::join_all(groups.into_iter().map(scatter_then_gather)).await;

        let owned: Vec<_> = results.iter().map(|(owned, _)| owned.clone()).collect();
        assert_eq!(
            owned,
            [vec![0.0, 6.0, 12.0, 18.0], vec![24.0, 30.0, 36.0], vec![42.0, 48.0, 54.0]]
        );

        let expected: Vec<f32> = (0..10).map(|i| (i * 6) as f32).collect();
        for (_, gathered) in &results {
            assert_eq!(gathered, &expected);
        }
    }

    #[tokio::test]
    async fn three_ranks_all_reduce_and_broadcast() {
        let groups = loopback(3).await;
        let results = future::join_all(groups.into_iter().map(|mut group| async move {
            let rank = group.rank() as f32;
            let mut summed = vec![rank, 1.0];
            group.all_reduce(&mut summed).await.unwrap();

            let mut shared = vec![rank + 10.0; 3];
            group.broadcast(&mut shared).await.unwrap();
            group.barrier().await.unwrap();
            group.shutdown().await.unwrap();

            (summed, shared)
        }))
        .await;

        for (summed, shared) in results {
            assert_eq!(summed, [3.0, 3.0]);
            assert_eq!(shared, [10.0; 3]);
        }
    }

    #[tokio::test]
    async fn root_rejects_a_rank_joining_twice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let joiners = async { (hello(addr, 1, 3).await, hello(addr, 1, 3).await) };
        let (root, _peers) = tokio::join!(ProcessGroup::root(listener, 3), joiners);

        assert!(matches!(root, Err(DistErr::DuplicateRank(1))));
    }

    #[tokio::test]
    async fn root_rejects_a_different_world_size() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (root, _peer) = tokio::join!(ProcessGroup::root(listener, 2), hello(addr, 1, 3));

        assert!(matches!(
            root,
            Err(DistErr::WorldSizeMismatch {
                peer: 1,
                got: 3,
                expected: 2
            })
        ));
    }

    #[tokio::test]
    async fn length_mismatch_is_reported_back_through_abort() {
        let mut groups = loopback(2).await;
        let mut leaf = groups.pop().unwrap();
        let mut root = groups.pop().unwrap();

        let root_side = async {
            let res = root.all_reduce(&mut [1.0, 2.0, 3.0]).await;
            if let Err(e) = &res {
                root.abort(&e.to_string()).await;
            }
            res
        };
        let leaf_side = async { leaf.all_reduce(&mut [1.0, 2.0]).await };
        let (root_res, leaf_res) = tokio::join!(root_side, leaf_side);

        assert!(matches!(
            root_res,
            Err(DistErr::LengthMismatch {
                peer: 1,
                got: 2,
                expected: 3
            })
        ));
        match leaf_res {
            Err(DistErr::Remote { peer: 0, msg }) => assert!(msg.contains("length mismatch"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn leaf_rejects_an_ack_from_another_rank() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let impostor = async {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = Peer::new(1, stream).unwrap();
            peer.recv_command(&mut Vec::new()).await.unwrap();
            peer.send_command(Command::Hello {
                rank: 1,
                world_size: 2,
            })
            .await
            .unwrap();
            peer
        };
        let (_peer, leaf) = tokio::join!(impostor, ProcessGroup::leaf(&addr, 1, 2));

        assert!(matches!(leaf, Err(DistErr::UnexpectedMessage { peer: 1, .. })));
    }

    #[tokio::test]
    async fn connect_gives_up_after_the_timeout() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();

        let timeout = Duration::from_millis(300);
        match connect(&addr, timeout).await {
            Err(DistErr::RendezvousTimeout { waited, .. }) => assert!(waited >= timeout),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_tcp_init_method() {
        assert_eq!(parse_init_method("tcp://localhost:29501").unwrap(), "localhost:29501");
        assert_eq!(parse_init_method("tcp://[::1]:80").unwrap(), "[::1]:80");
    }

    #[test]
    fn rejects_other_init_methods() {
        for bad in ["env://", "file:///tmp/x", "tcp://localhost", "tcp://:1", "tcp://h:99999"] {
            assert!(matches!(parse_init_method(bad), Err(DistErr::InvalidInitMethod(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn solo_collectives_are_identity() {
        let mut group = ProcessGroup::solo();
        let mut nums = vec![1.0, 2.0, 3.0];
        let partitions = [0..3];

        group.barrier().await.unwrap();
        group.broadcast(&mut nums).await.unwrap();
        group.all_reduce(&mut nums).await.unwrap();
        group.reduce_scatter(&mut nums, &partitions).await.unwrap();
        group.all_gather(&mut nums, &partitions).await.unwrap();

        assert_eq!(nums, [1.0, 2.0, 3.0]);
        group.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn init_rejects_out_of_range_rank() {
        let err = ProcessGroup::init("tcp://localhost:1", 2, 2).await;
        assert!(matches!(err, Err(DistErr::InvalidRank { rank: 2, world_size: 2 })));
    }
}
