use std::num::NonZero;
use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use many_cpus::{ProcessorId, ProcessorSet};
use tracing::{Dispatch, debug, dispatcher, info_span, warn};

use super::{Channels, GroupShared};
use crate::{Endpoint, ParticipantId, ProcessGroup, Vote};

const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings of a [`LocalGroup`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalGroupOptions {
    barrier_timeout: Duration,
    receive_timeout: Duration,
    pin_processors: bool,
}

impl LocalGroupOptions {
    /// Options with a 60 second barrier deadline, a 10 second receive deadline and every member
    /// pinned to its own processor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            barrier_timeout: DEFAULT_BARRIER_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            pin_processors: true,
        }
    }

    /// Sets how long a member waits at a barrier for the others before the group is declared
    /// broken.
    #[must_use]
    pub fn barrier_timeout(self, barrier_timeout: Duration) -> Self {
        Self {
            barrier_timeout,
            ..self
        }
    }

    /// Sets how long a member waits for a partner's message or flag.
    #[must_use]
    pub fn receive_timeout(self, receive_timeout: Duration) -> Self {
        Self {
            receive_timeout,
            ..self
        }
    }

    /// Sets whether every member thread is pinned to its own processor.
    #[must_use]
    pub fn pin_processors(self, pin_processors: bool) -> Self {
        Self {
            pin_processors,
            ..self
        }
    }
}

impl Default for LocalGroupOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A process group whose members are threads of the current process.
///
/// Every member runs the same entrypoint on its own thread with its own [`Endpoint`], the way
/// every rank of a distributed job runs the same program. Members are pinned to distinct
/// processors when enough processors are available, so the measured latency reflects the path
/// between those processors.
///
/// # Example
///
/// ```
/// use all_pairs::{LocalGroup, LocalGroupOptions, ProcessGroup};
/// use new_zealand::nz;
///
/// let options = LocalGroupOptions::new().pin_processors(false);
///
/// let ranks = LocalGroup::new(nz!(3), options).run(|endpoint| endpoint.rank().get());
/// assert_eq!(ranks, vec![0, 1, 2]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct LocalGroup {
    size: NonZero<usize>,
    options: LocalGroupOptions,
}

impl LocalGroup {
    /// Creates a group of `size` members.
    #[must_use]
    pub fn new(size: NonZero<usize>, options: LocalGroupOptions) -> Self {
        Self { size, options }
    }

    /// The number of members.
    #[must_use]
    pub fn size(&self) -> NonZero<usize> {
        self.size
    }

    /// Runs `entrypoint` on every member and returns the results in rank order.
    ///
    /// Blocks until every member has returned. The tracing dispatcher of the calling thread is
    /// used on every member thread.
    ///
    /// # Panics
    ///
    /// If a member panics, the panic is resumed on the calling thread once all members are done.
    pub fn run<F, R>(&self, entrypoint: F) -> Vec<R>
    where
        F: Fn(Endpoint) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(GroupShared::new(
            self.size,
            self.options.barrier_timeout,
            self.options.receive_timeout,
        ));

        let processors = self.processors();
        let dispatch = dispatcher::get_default(Dispatch::clone);
        let entrypoint = &entrypoint;

        thread::scope(|scope| {
            let handles = Channels::for_group(self.size)
                .into_iter()
                .enumerate()
                .map(|(index, channels)| {
                    let rank = ParticipantId::new(index);
                    let processor_id = processors
                        .as_ref()
                        .and_then(|processors| processors.get(index).copied());
                    let endpoint = Endpoint::new(rank, Arc::clone(&shared), channels);
                    let dispatch = dispatch.clone();

                    thread::Builder::new()
                        .name(format!("all-pairs-{rank}"))
                        .spawn_scoped(scope, move || {
                            dispatcher::with_default(&dispatch, || {
                                member_main(endpoint, processor_id, entrypoint)
                            })
                        })
                        .expect("thread spawning failure is not supported")
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    // One distinct processor per member, or `None` if we are not pinning.
    fn processors(&self) -> Option<Vec<ProcessorId>> {
        if !self.options.pin_processors {
            return None;
        }

        let Some(processors) = ProcessorSet::builder().take(self.size) else {
            warn!(
                members = self.size.get(),
                "not enough processors to pin every group member, running unpinned"
            );
            return None;
        };

        Some(processors.processors().iter().map(|p| p.id()).collect())
    }
}

fn member_main<F, R>(endpoint: Endpoint, processor_id: Option<ProcessorId>, entrypoint: &F) -> R
where
    F: Fn(Endpoint) -> R,
{
    let span = info_span!("participant", rank = endpoint.rank().get());
    let _entered = span.enter();

    if let Some(processor_id) = processor_id {
        if let Some(processor_set) = ProcessorSet::builder()
            .filter(|p| p.id() == processor_id)
            .take_all()
        {
            processor_set.pin_current_thread_to();
            debug!(processor_id, "member pinned");
        }
    }

    // Windows are allocated after pinning so they are local to their owner's processor.
    endpoint.allocate_window();

    // Nobody touches a window before every window exists. If this fails, the entrypoint finds
    // the group broken on its first collective call.
    if let Err(e) = endpoint.barrier(Vote::Continue) {
        debug!(error = %e, "group did not assemble");
    }

    entrypoint(endpoint)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{Error, Sample, WINDOW_LEN};

    assert_impl_all!(LocalGroup: Send, Sync);
    assert_impl_all!(Endpoint: Send);

    fn unpinned() -> LocalGroupOptions {
        LocalGroupOptions::new().pin_processors(false)
    }

    fn sample(initiator: ParticipantId) -> Sample {
        Sample {
            initiator,
            partner: ParticipantId::ROOT,
            repeat: 0,
            round: 0,
            latency: Duration::from_micros(1),
        }
    }

    #[test]
    fn every_member_runs_once() {
        let runs = AtomicUsize::new(0);

        let sizes = LocalGroup::new(nz!(4), unpinned()).run(|endpoint| {
            runs.fetch_add(1, Ordering::Relaxed);
            endpoint.size().get()
        });

        assert_eq!(sizes, vec![4; 4]);
        assert_eq!(runs.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn messages_between_members() {
        let received = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            let other = ParticipantId::new(1 - endpoint.rank().get());

            if endpoint.rank().is_root() {
                endpoint.send_sync(other, 42).unwrap();
                endpoint.post_send(other, 43).unwrap();
                endpoint.receive(other).unwrap()
            } else {
                let first = endpoint.receive(other).unwrap();
                let second = endpoint.receive(other).unwrap();
                endpoint.post_send(other, first + second).unwrap();
                second
            }
        });

        assert_eq!(received, vec![85, 43]);
    }

    #[test]
    fn receive_from_silent_partner_times_out() {
        let options = unpinned().receive_timeout(Duration::from_millis(20));

        let results = LocalGroup::new(nz!(2), options).run(|endpoint| {
            let result = if endpoint.rank().is_root() {
                endpoint.receive(ParticipantId::new(1)).map(|_| ())
            } else {
                Ok(())
            };

            endpoint.barrier(Vote::Continue).unwrap();
            result
        });

        assert!(matches!(
            results[0],
            Err(Error::PartnerUnreachable { partner, .. }) if partner == ParticipantId::new(1)
        ));
        assert!(results[1].is_ok());
    }

    #[test]
    fn one_sided_access() {
        let observed = LocalGroup::new(nz!(3), unpinned()).run(|endpoint| {
            let rank = endpoint.rank();
            let next = ParticipantId::new((rank.get() + 1) % 3);

            endpoint
                .put(next, 1, 100 + u64::try_from(rank.get()).unwrap())
                .unwrap();
            endpoint.barrier(Vote::Continue).unwrap();

            let own = endpoint.get(rank, 1).unwrap();
            let global = endpoint.global_get(endpoint.global_offset(rank) + 1).unwrap();
            (own, global)
        });

        assert_eq!(observed, vec![(102, 102), (100, 100), (101, 101)]);
    }

    #[test]
    fn global_array_spans_all_windows() {
        let lengths = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| endpoint.global_len());

        assert_eq!(lengths, vec![2 * WINDOW_LEN; 2]);
    }

    #[test]
    fn notifications_round_trip() {
        let tokens = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            let other = ParticipantId::new(1 - endpoint.rank().get());

            if endpoint.rank().is_root() {
                endpoint.notify(other, nz!(7)).unwrap();
                endpoint.await_notification(other).unwrap().get()
            } else {
                let token = endpoint.await_notification(other).unwrap();
                endpoint.notify(other, token).unwrap();
                token.get()
            }
        });

        assert_eq!(tokens, vec![7, 7]);
    }

    #[test]
    fn consecutive_notifications_wait_for_pick_up() {
        let tokens = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            let other = ParticipantId::new(1 - endpoint.rank().get());

            let tokens = if endpoint.rank().is_root() {
                endpoint.notify(other, nz!(1)).unwrap();
                endpoint.notify(other, nz!(2)).unwrap();
                Vec::new()
            } else {
                // The second flag is raised while the first one is still up.
                thread::sleep(Duration::from_millis(50));

                vec![
                    endpoint.await_notification(other).unwrap().get(),
                    endpoint.await_notification(other).unwrap().get(),
                ]
            };

            endpoint.barrier(Vote::Continue).unwrap();
            tokens
        });

        assert_eq!(tokens, vec![vec![], vec![1, 2]]);
    }

    #[test]
    fn notification_never_picked_up_blocks_the_next() {
        let options = unpinned().receive_timeout(Duration::from_millis(20));

        let results = LocalGroup::new(nz!(2), options).run(|endpoint| {
            let result = if endpoint.rank().is_root() {
                endpoint.notify(ParticipantId::new(1), nz!(1)).unwrap();
                endpoint.notify(ParticipantId::new(1), nz!(2))
            } else {
                Ok(())
            };

            endpoint.barrier(Vote::Continue).unwrap();
            result
        });

        assert!(matches!(
            results[0],
            Err(Error::PartnerUnreachable { partner, .. }) if partner == ParticipantId::new(1)
        ));
        assert!(results[1].is_ok());
    }

    #[test]
    fn notification_survives_departure_of_its_sender() {
        let results = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            let other = ParticipantId::new(1 - endpoint.rank().get());

            if endpoint.rank().is_root() {
                // The sender is gone by the time the flag is picked up.
                thread::sleep(Duration::from_millis(50));

                let token = endpoint.await_notification(other).map(NonZero::get);
                let next = endpoint.await_notification(other).map(NonZero::get);
                (token, next)
            } else {
                endpoint.notify(other, nz!(9)).unwrap();
                (Ok(0), Ok(0))
            }
        });

        let (token, next) = &results[0];
        assert_eq!(*token.as_ref().unwrap(), 9);
        assert!(matches!(
            next,
            Err(Error::PartnerUnreachable { partner, .. }) if *partner == ParticipantId::new(1)
        ));
    }

    #[test]
    fn gather_delivers_everything_to_root() {
        let gathered = LocalGroup::new(nz!(3), unpinned())
            .run(|endpoint| endpoint.gather(vec![sample(endpoint.rank())]).unwrap());

        let root = gathered[0].as_ref().unwrap();
        let initiators = root.iter().map(|s| s.initiator.get()).collect::<Vec<_>>();

        assert_eq!(initiators, vec![0, 1, 2]);
        assert!(gathered[1].is_none());
        assert!(gathered[2].is_none());
    }

    #[test]
    fn abort_vote_reaches_everyone_and_clears_leftovers() {
        let results = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            let other = ParticipantId::new(1 - endpoint.rank().get());

            // A message that is never received before the sweep is abandoned.
            if endpoint.rank().is_root() {
                endpoint.post_send(other, 1).unwrap();
            }

            let vote = if endpoint.rank().is_root() {
                Vote::Continue
            } else {
                Vote::Abort {
                    participant: endpoint.rank(),
                }
            };
            let outcome = endpoint.barrier(vote).unwrap();

            if endpoint.rank().is_root() {
                endpoint.post_send(other, 2).unwrap();
                (outcome, None)
            } else {
                (outcome, Some(endpoint.receive(other).unwrap()))
            }
        });

        let abort = Vote::Abort {
            participant: ParticipantId::new(1),
        };
        assert_eq!(results, vec![(abort, None), (abort, Some(2))]);
    }

    #[test]
    fn departed_member_fails_barrier() {
        let results = LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            if endpoint.rank().is_root() {
                endpoint.barrier(Vote::Continue).map(|_| ())
            } else {
                drop(endpoint);
                Ok(())
            }
        });

        assert!(matches!(
            results[0],
            Err(Error::ParticipantDeparted { participant }) if participant == ParticipantId::new(1)
        ));
    }

    #[test]
    #[should_panic]
    fn member_panic_is_resumed() {
        LocalGroup::new(nz!(2), unpinned()).run(|endpoint| {
            assert!(!endpoint.rank().is_root(), "root member panics");
        });
    }
}
