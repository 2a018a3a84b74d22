use crate::error::Result;
use crate::raft::{Envelope, KvStore, Log, Message, Node, NodeID, Options, BROADCAST};

use log::debug;
use std::collections::{HashSet, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// The duration of a Raft tick, the unit of time for e.g. heartbeats and
/// elections.
const TICK: Duration = Duration::from_millis(50);

/// How long to sleep when no datagrams are readable. Approximates a zero
/// timeout poll without spinning a core.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The maximum size of a datagram.
const MAX_DATAGRAM: usize = 65_535;

/// A replica server. Owns the UDP socket and the Raft node, and drives
/// both from a single cooperative loop: no other threads, no locks.
pub struct Server {
    node: Node,
    node_rx: crossbeam::channel::Receiver<Envelope>,
    socket: UdpSocket,
    broker: SocketAddr,
}

impl Server {
    /// Creates a new replica server on an ephemeral loopback endpoint. All
    /// outbound traffic goes to the broker port, which forwards datagrams
    /// by the envelope's dst field.
    pub fn new(id: NodeID, peers: HashSet<NodeID>, broker_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_nonblocking(true)?;
        let broker = SocketAddr::from(([127, 0, 0, 1], broker_port));

        let (node_tx, node_rx) = crossbeam::channel::unbounded();
        let log = Log::new(id.clone());
        let node =
            Node::new(id, peers, log, Box::new(KvStore::new()), node_tx, Options::default())?;
        Ok(Self { node, node_rx, socket, broker })
    }

    /// Serves the replica until externally terminated. Each iteration
    /// drains all readable datagrams into the intake queue, fires the
    /// node's tick when its deadline passes, dispatches the intake in
    /// arrival order, and flushes outbound messages to the broker.
    pub fn serve(self) -> Result<()> {
        let Server { mut node, node_rx, socket, broker } = self;

        // Announce ourselves, so the broker learns our endpoint.
        let hello = Envelope {
            src: node.id().clone(),
            dst: BROADCAST.to_string(),
            leader: BROADCAST.to_string(),
            message: Message::Hello,
        };
        socket.send_to(&serde_json::to_vec(&hello)?, broker)?;

        let mut intake = VecDeque::new();
        let mut buf = vec![0; MAX_DATAGRAM];
        let mut next_tick = Instant::now() + TICK;

        loop {
            // Datagrams are best-effort; undecodable ones are dropped.
            let mut received = false;
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((len, _)) => {
                        received = true;
                        match serde_json::from_slice::<Envelope>(&buf[..len]) {
                            Ok(envelope) => intake.push_back(envelope),
                            Err(err) => debug!("Dropping malformed datagram: {err}"),
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err.into()),
                }
            }

            if Instant::now() >= next_tick {
                node = node.tick()?;
                next_tick = Instant::now() + TICK;
            }

            while let Some(envelope) = intake.pop_front() {
                node = node.step(envelope)?;
            }

            while let Ok(envelope) = node_rx.try_recv() {
                socket.send_to(&serde_json::to_vec(&envelope)?, broker)?;
            }

            if !received {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}
