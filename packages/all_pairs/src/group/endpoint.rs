use std::fmt;
use std::hint;
use std::num::NonZero;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::VotingBarrier;
use crate::{Error, ParticipantId, ProcessGroup, Result, Sample, Vote};

/// The number of 64-bit data cells in the remote memory window of every group member.
///
/// The PGAS global array spans the data cells of all windows, `WINDOW_LEN` elements per member.
pub const WINDOW_LEN: usize = 8;

// How many spins a flag wait makes between deadline checks.
const SPINS_PER_CHECK: u32 = 1024;

/// State shared by all members of a local group.
#[derive(Debug)]
pub(crate) struct GroupShared {
    size: NonZero<usize>,
    receive_timeout: Duration,

    barrier: VotingBarrier,

    // One slot per member, filled by the member itself when it starts up.
    windows: Box<[OnceLock<Window>]>,

    departed: Box<[AtomicBool]>,

    gather_slots: Mutex<Vec<Option<Vec<Sample>>>>,
}

impl GroupShared {
    pub(crate) fn new(
        size: NonZero<usize>,
        barrier_timeout: Duration,
        receive_timeout: Duration,
    ) -> Self {
        let n = size.get();

        Self {
            size,
            receive_timeout,
            barrier: VotingBarrier::new(n, barrier_timeout),
            windows: (0..n).map(|_| OnceLock::new()).collect(),
            departed: (0..n).map(|_| AtomicBool::new(false)).collect(),
            gather_slots: Mutex::new((0..n).map(|_| None).collect()),
        }
    }
}

/// The remote memory window of one group member.
#[derive(Debug)]
struct Window {
    // Flag cells, one per peer, written by that peer and cleared by the owner.
    mailboxes: Box<[AtomicU64]>,

    // Data cells for one-sided access.
    cells: Box<[AtomicU64]>,

    // Passive-target access epochs are serialized per window.
    epoch: Mutex<()>,
}

impl Window {
    fn new(size: NonZero<usize>) -> Self {
        Self {
            mailboxes: (0..size.get()).map(|_| AtomicU64::new(0)).collect(),
            cells: (0..WINDOW_LEN).map(|_| AtomicU64::new(0)).collect(),
            epoch: Mutex::new(()),
        }
    }

    fn cell(&self, index: usize) -> &AtomicU64 {
        self.cells.get(index).unwrap_or_else(|| {
            panic!("window cell {index} is out of bounds, windows have {WINDOW_LEN} cells")
        })
    }

    fn mailbox(&self, peer: ParticipantId) -> &AtomicU64 {
        self.mailboxes
            .get(peer.get())
            .expect("peers are validated against the group size before mailbox access")
    }
}

#[derive(Clone, Copy, Debug)]
struct Envelope {
    payload: u64,

    // The sender waits for an acknowledgement before its send completes.
    synchronous: bool,
}

/// The per-directed-pair channels that one member uses, indexed by peer.
pub(crate) struct Channels {
    outgoing: Box<[Sender<Envelope>]>,
    incoming: Box<[Receiver<Envelope>]>,
    acks_out: Box<[Sender<()>]>,
    acks_in: Box<[Receiver<()>]>,
}

impl Channels {
    /// Creates the channels of every member, in rank order.
    pub(crate) fn for_group(size: NonZero<usize>) -> Vec<Self> {
        let (outgoing, incoming) = channel_grid::<Envelope>(size.get());
        let (acks_out, acks_in) = channel_grid::<()>(size.get());

        outgoing
            .into_iter()
            .zip(incoming)
            .zip(acks_out.into_iter().zip(acks_in))
            .map(|((outgoing, incoming), (acks_out, acks_in))| Self {
                outgoing: outgoing.into(),
                incoming: incoming.into(),
                acks_out: acks_out.into(),
                acks_in: acks_in.into(),
            })
            .collect()
    }
}

impl fmt::Debug for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channels")
            .field("peers", &self.outgoing.len())
            .finish_non_exhaustive()
    }
}

// Returns `senders[from][to]` and `receivers[to][from]`.
fn channel_grid<T>(size: usize) -> (Vec<Vec<Sender<T>>>, Vec<Vec<Receiver<T>>>) {
    let mut senders = (0..size)
        .map(|_| Vec::with_capacity(size))
        .collect::<Vec<Vec<Sender<T>>>>();
    let mut receivers = (0..size)
        .map(|_| Vec::with_capacity(size))
        .collect::<Vec<Vec<Receiver<T>>>>();

    for from_senders in &mut senders {
        for to_receivers in &mut receivers {
            let (tx, rx) = mpsc::channel();
            from_senders.push(tx);
            to_receivers.push(rx);
        }
    }

    (senders, receivers)
}

/// One member's access to a [`LocalGroup`][crate::LocalGroup].
///
/// Besides taking part in collective operations through [`ProcessGroup`], the endpoint offers
/// the communication primitives that measurement kernels are built on:
///
/// * two-sided messaging with [`send_sync()`][Self::send_sync], [`post_send()`][Self::post_send]
///   and [`receive()`][Self::receive];
/// * lock-free flag signalling with [`notify()`][Self::notify] and
///   [`await_notification()`][Self::await_notification];
/// * one-sided access to the remote memory windows of other members with
///   [`get()`][Self::get] and [`put()`][Self::put];
/// * PGAS-style reads from the global array spanning all windows with
///   [`global_get()`][Self::global_get].
///
/// Dropping the endpoint marks its member as departed.
pub struct Endpoint {
    rank: ParticipantId,
    shared: Arc<GroupShared>,
    channels: Channels,
}

impl Endpoint {
    pub(crate) fn new(rank: ParticipantId, shared: Arc<GroupShared>, channels: Channels) -> Self {
        Self {
            rank,
            shared,
            channels,
        }
    }

    /// Allocates this member's window. Every member must do this before anyone accesses windows.
    pub(crate) fn allocate_window(&self) {
        let slot = self
            .shared
            .windows
            .get(self.rank.get())
            .expect("rank is always within the group");

        slot.set(Window::new(self.shared.size))
            .expect("each member allocates its window exactly once");
    }

    /// How long receives and flag waits wait for a partner before giving up.
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        self.shared.receive_timeout
    }

    /// Sends `payload` to `to` and waits until the receiver has taken it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if the receiver has departed or does not take the
    /// message before the receive deadline.
    pub fn send_sync(&self, to: ParticipantId, payload: u64) -> Result<()> {
        self.send(to, payload, true)?;

        let acks = self.peer(&self.channels.acks_in, to)?;

        acks.recv_timeout(self.shared.receive_timeout)
            .map_err(|e| unreachable_after(to, e))
    }

    /// Sends `payload` to `to` without waiting for the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if the receiver has departed.
    pub fn post_send(&self, to: ParticipantId, payload: u64) -> Result<()> {
        self.send(to, payload, false)
    }

    /// Receives the next message sent by `from`, waiting up to the receive deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if the sender has departed or nothing arrives before
    /// the receive deadline.
    pub fn receive(&self, from: ParticipantId) -> Result<u64> {
        let incoming = self.peer(&self.channels.incoming, from)?;

        let envelope = incoming
            .recv_timeout(self.shared.receive_timeout)
            .map_err(|e| unreachable_after(from, e))?;

        if envelope.synchronous {
            self.peer(&self.channels.acks_out, from)?
                .send(())
                .map_err(|_disconnected| departed(from))?;
        }

        Ok(envelope.payload)
    }

    /// Raises a flag in the window of `to`, which it picks up with
    /// [`await_notification()`][Self::await_notification].
    ///
    /// Each direction has a single flag. If the previous flag raised for `to` has not been picked
    /// up yet, this spins until it has, so consecutive notifications are never lost.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if `to` departs or does not pick up the previous
    /// flag before the receive deadline.
    pub fn notify(&self, to: ParticipantId, token: NonZero<u64>) -> Result<()> {
        let mailbox = self.window(to)?.mailbox(self.rank);

        self.spin_until(to, "previous notification not picked up", || {
            // Only this member raises flags in this mailbox, so a lowered flag stays lowered.
            if mailbox.load(Ordering::Acquire) == 0 {
                mailbox.store(token.get(), Ordering::Release);
                Some(())
            } else {
                None
            }
        })
    }

    /// Spins until `from` raises a flag in this member's window, then lowers it and returns its
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if `from` departs or raises no flag before the
    /// receive deadline.
    pub fn await_notification(&self, from: ParticipantId) -> Result<NonZero<u64>> {
        // A flag raised just before `from` departed is still delivered.
        self.check_member(from)?;

        let mailbox = self.window(self.rank)?.mailbox(from);

        self.spin_until(from, "no notification before the receive deadline", || {
            let token = NonZero::new(mailbox.load(Ordering::Acquire))?;

            // Lowering the flag is what allows `from` to raise the next one.
            mailbox.store(0, Ordering::Release);
            Some(token)
        })
    }

    // Polls `ready` until it yields a value, giving up when `peer` departs or the receive
    // deadline passes.
    fn spin_until<T>(
        &self,
        peer: ParticipantId,
        reason: &'static str,
        mut ready: impl FnMut() -> Option<T>,
    ) -> Result<T> {
        let deadline = Instant::now()
            .checked_add(self.shared.receive_timeout)
            .expect("receive timeout is far below the end of time");

        loop {
            for _ in 0..SPINS_PER_CHECK {
                if let Some(value) = ready() {
                    return Ok(value);
                }

                hint::spin_loop();
            }

            if self.is_departed(peer) {
                return Err(departed(peer));
            }

            if Instant::now() >= deadline {
                return Err(Error::PartnerUnreachable {
                    partner: peer,
                    reason,
                });
            }

            thread::yield_now();
        }
    }

    /// Reads data cell `index` of the window of `target` in a passive-target access epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if `target` has departed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`WINDOW_LEN`].
    pub fn get(&self, target: ParticipantId, index: usize) -> Result<u64> {
        let window = self.window(target)?;

        let _epoch = window.epoch.lock();
        Ok(window.cell(index).load(Ordering::Acquire))
    }

    /// Writes data cell `index` of the window of `target` in a passive-target access epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if `target` has departed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`WINDOW_LEN`].
    pub fn put(&self, target: ParticipantId, index: usize, value: u64) -> Result<()> {
        let window = self.window(target)?;

        let _epoch = window.epoch.lock();
        window.cell(index).store(value, Ordering::Release);
        Ok(())
    }

    /// The number of elements in the global array.
    #[must_use]
    pub fn global_len(&self) -> usize {
        self.shared
            .size
            .get()
            .checked_mul(WINDOW_LEN)
            .expect("group sizes are far below usize::MAX / WINDOW_LEN")
    }

    /// The global index of the first element owned by `owner`.
    #[must_use]
    pub fn global_offset(&self, owner: ParticipantId) -> usize {
        owner
            .get()
            .checked_mul(WINDOW_LEN)
            .expect("group sizes are far below usize::MAX / WINDOW_LEN")
    }

    /// Reads element `global_index` of the global array without an access epoch.
    ///
    /// The array is distributed in blocks of [`WINDOW_LEN`] elements, block `k` living in the
    /// window of member `k`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`] if the owner of the element has departed.
    ///
    /// # Panics
    ///
    /// Panics if `global_index` is not less than [`global_len()`][Self::global_len].
    pub fn global_get(&self, global_index: usize) -> Result<u64> {
        assert!(
            global_index < self.global_len(),
            "global index {global_index} is out of bounds, the global array has {} elements",
            self.global_len()
        );

        #[expect(
            clippy::integer_division,
            reason = "block distribution, the remainder is the local index"
        )]
        let owner = ParticipantId::new(global_index / WINDOW_LEN);
        let local = global_index % WINDOW_LEN;

        Ok(self.window(owner)?.cell(local).load(Ordering::Acquire))
    }

    /// Discards every message, acknowledgement and flag addressed to this member.
    ///
    /// Only valid while no other member is communicating, such as right after a barrier.
    fn discard_in_flight(&self) {
        let mut discarded = 0_usize;

        for incoming in &self.channels.incoming {
            discarded = discarded.saturating_add(incoming.try_iter().count());
        }

        for acks in &self.channels.acks_in {
            discarded = discarded.saturating_add(acks.try_iter().count());
        }

        if let Ok(window) = self.window(self.rank) {
            for mailbox in &window.mailboxes {
                if mailbox.swap(0, Ordering::Relaxed) != 0 {
                    discarded = discarded.saturating_add(1);
                }
            }
        }

        if discarded > 0 {
            debug!(
                discarded,
                "discarded in-flight traffic of an abandoned sweep"
            );
        }
    }

    fn send(&self, to: ParticipantId, payload: u64, synchronous: bool) -> Result<()> {
        let outgoing = self.peer(&self.channels.outgoing, to)?;

        outgoing
            .send(Envelope {
                payload,
                synchronous,
            })
            .map_err(|_disconnected| departed(to))
    }

    fn check_member(&self, peer: ParticipantId) -> Result<()> {
        if peer.get() >= self.shared.size.get() {
            return Err(Error::PartnerUnreachable {
                partner: peer,
                reason: "not a member of the group",
            });
        }

        Ok(())
    }

    fn check_peer(&self, peer: ParticipantId) -> Result<()> {
        self.check_member(peer)?;

        if self.is_departed(peer) {
            return Err(departed(peer));
        }

        Ok(())
    }

    fn peer<'a, T>(&self, by_peer: &'a [T], peer: ParticipantId) -> Result<&'a T> {
        self.check_peer(peer)?;

        Ok(by_peer
            .get(peer.get())
            .expect("channels exist for every member of the group"))
    }

    fn window(&self, owner: ParticipantId) -> Result<&Window> {
        self.check_peer(owner)?;

        self.shared
            .windows
            .get(owner.get())
            .and_then(OnceLock::get)
            .ok_or(Error::PartnerUnreachable {
                partner: owner,
                reason: "window not allocated",
            })
    }

    fn is_departed(&self, peer: ParticipantId) -> bool {
        self.shared
            .departed
            .get(peer.get())
            .is_some_and(|departed| departed.load(Ordering::Acquire))
    }
}

fn departed(partner: ParticipantId) -> Error {
    Error::PartnerUnreachable {
        partner,
        reason: "partner departed from the group",
    }
}

fn unreachable_after(partner: ParticipantId, error: RecvTimeoutError) -> Error {
    match error {
        RecvTimeoutError::Timeout => Error::PartnerUnreachable {
            partner,
            reason: "nothing received before the receive deadline",
        },
        RecvTimeoutError::Disconnected => departed(partner),
    }
}

impl ProcessGroup for Endpoint {
    fn rank(&self) -> ParticipantId {
        self.rank
    }

    fn size(&self) -> NonZero<usize> {
        self.shared.size
    }

    fn barrier(&self, vote: Vote) -> Result<Vote> {
        let outcome = self.shared.barrier.wait(vote)?;

        if outcome.is_abort() {
            // Everyone has stopped communicating. Clear out leftovers of the abandoned sweep
            // and wait for the others to do the same before anyone sends again.
            self.discard_in_flight();
            self.shared.barrier.wait(Vote::Continue)?;
        }

        Ok(outcome)
    }

    fn gather(&self, samples: Vec<Sample>) -> Result<Option<Vec<Sample>>> {
        {
            let mut slots = self.shared.gather_slots.lock();
            *slots
                .get_mut(self.rank.get())
                .expect("rank is always within the group") = Some(samples);
        }

        self.shared.barrier.wait(Vote::Continue)?;

        let gathered = self.rank.is_root().then(|| {
            self.shared
                .gather_slots
                .lock()
                .iter_mut()
                .flat_map(|slot| slot.take().unwrap_or_default())
                .collect::<Vec<_>>()
        });

        // Nobody may refill a slot before the root has emptied them all.
        self.shared.barrier.wait(Vote::Continue)?;

        Ok(gathered)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(departed) = self.shared.departed.get(self.rank.get()) {
            departed.store(true, Ordering::Release);
        }

        self.shared.barrier.depart(self.rank);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish_non_exhaustive()
    }
}
