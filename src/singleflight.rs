//! Single-flight transform coalescing (C5, spec §4.5).
//!
//! When several concurrent requests miss the cache for the same
//! fingerprint, only one of them ("the leader") actually runs the
//! transform; the rest ("followers") await the leader's shared future and
//! reuse its result. If the leader's job fails, a bounded number of
//! followers (one) may retry by becoming a new leader rather than all
//! propagating the same transient failure.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::ServerError;
use crate::fingerprint::Fingerprint;

pub type JobOutcome = Result<Arc<Vec<u8>>, ServerError>;
type SharedJob = Shared<BoxFuture<'static, JobOutcome>>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Leader,
    Follower,
}

/// Coalesces concurrent jobs keyed by fingerprint.
pub struct SingleFlight {
    inflight: DashMap<Fingerprint, SharedJob>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Register (or join) the in-flight job for `fp`. The closure that
    /// produces the job future is only invoked when this caller becomes the
    /// leader. Returns the job's shared future alongside the assigned role;
    /// the leader is responsible for driving the future to completion and
    /// for calling [`SingleFlight::release`] once it settles.
    pub fn acquire<F>(&self, fp: Fingerprint, make_job: F) -> (SharedJob, Role)
    where
        F: FnOnce() -> BoxFuture<'static, JobOutcome>,
    {
        if let Some(existing) = self.inflight.get(&fp) {
            return (existing.clone(), Role::Follower);
        }

        match self.inflight.entry(fp) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                (occupied.get().clone(), Role::Follower)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let shared: SharedJob = make_job().shared();
                vacant.insert(shared.clone());
                (shared, Role::Leader)
            }
        }
    }

    /// Remove the entry for `fp` once its job has settled, so the next
    /// request for the same fingerprint starts a fresh job rather than
    /// replaying a cached failure forever.
    pub fn release(&self, fp: &Fingerprint) {
        self.inflight.remove(fp);
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a job under single-flight coalescing, with one follower-side retry
/// if the leader's job failed (spec §4.5 edge case: a follower that joined
/// a doomed leader gets one chance to lead its own attempt rather than
/// inheriting a transient failure it had no part in).
///
/// Returns the job outcome alongside the role this caller ultimately played:
/// `Leader` if it (or its retry) actually drove the transform, `Follower` if
/// it only observed another caller's result. The pipeline surfaces this as
/// `X-Cache: miss` vs `X-Cache: coalesced` (spec §4.7/§6).
pub async fn run_coalesced<F>(
    flight: &SingleFlight,
    fp: Fingerprint,
    make_job: F,
) -> (JobOutcome, Role)
where
    F: Fn() -> BoxFuture<'static, JobOutcome>,
{
    let (job, role) = flight.acquire(fp.clone(), || make_job());
    let outcome = job.await;

    if role == Role::Leader {
        flight.release(&fp);
        return (outcome, Role::Leader);
    }

    if outcome.is_ok() {
        return (outcome, Role::Follower);
    }

    // Follower whose leader failed: try once more as a fresh leader.
    let (retry_job, retry_role) = flight.acquire(fp.clone(), || make_job());
    let retry_outcome = retry_job.await;
    if retry_role == Role::Leader {
        flight.release(&fp);
    }
    (retry_outcome, retry_role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::params::TransformParams;

    fn test_fp() -> Fingerprint {
        Fingerprint::compute(Path::new("/images/cat.jpg"), &TransformParams::default())
    }

    #[tokio::test]
    async fn second_acquire_for_same_key_is_a_follower() {
        let flight = SingleFlight::new();
        let fp = test_fp();

        let (_job1, role1) = flight.acquire(fp.clone(), || {
            async { Ok(Arc::new(vec![1, 2, 3])) }.boxed()
        });
        assert_eq!(role1, Role::Leader);

        let (_job2, role2) = flight.acquire(fp.clone(), || {
            async { Ok(Arc::new(vec![9, 9, 9])) }.boxed()
        });
        assert_eq!(role2, Role::Follower);
    }

    #[tokio::test]
    async fn follower_observes_leaders_result() {
        let flight = Arc::new(SingleFlight::new());
        let fp = test_fp();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_leader = calls.clone();
        let (leader_job, leader_role) = flight.acquire(fp.clone(), move || {
            async move {
                calls_leader.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(vec![1, 2, 3]))
            }
            .boxed()
        });
        assert_eq!(leader_role, Role::Leader);

        let calls_follower = calls.clone();
        let (follower_job, follower_role) = flight.acquire(fp.clone(), move || {
            async move {
                calls_follower.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(vec![9, 9, 9]))
            }
            .boxed()
        });
        assert_eq!(follower_role, Role::Follower);

        let (leader_result, follower_result) = tokio::join!(leader_job, follower_job);
        assert_eq!(leader_result.unwrap(), follower_result.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_allows_a_fresh_leader_for_the_same_key() {
        let flight = SingleFlight::new();
        let fp = test_fp();

        let (job, role) = flight.acquire(fp.clone(), || {
            async { Ok(Arc::new(vec![1])) }.boxed()
        });
        assert_eq!(role, Role::Leader);
        let _ = job.await;
        flight.release(&fp);

        let (_job2, role2) = flight.acquire(fp.clone(), || {
            async { Ok(Arc::new(vec![2])) }.boxed()
        });
        assert_eq!(role2, Role::Leader);
    }

    #[tokio::test]
    async fn follower_retries_once_after_leader_failure() {
        let flight = Arc::new(SingleFlight::new());
        let fp = test_fp();
        let attempt = Arc::new(AtomicUsize::new(0));

        // Leader starts and fails immediately; a follower joins before the
        // entry is released and must retry rather than inherit the failure.
        let (leader_job, leader_role) = flight.acquire(fp.clone(), {
            let attempt = attempt.clone();
            move || {
                async move {
                    attempt.fetch_add(1, Ordering::SeqCst);
                    Err(ServerError::Processing("transient".into()))
                }
                .boxed()
            }
        });
        assert_eq!(leader_role, Role::Leader);

        let flight_follower = flight.clone();
        let fp_follower = fp.clone();
        let attempt_follower = attempt.clone();
        let follower_handle = tokio::spawn(async move {
            run_coalesced(&flight_follower, fp_follower, move || {
                let attempt = attempt_follower.clone();
                async move {
                    let n = attempt.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(ServerError::Processing("transient".into()))
                    } else {
                        Ok(Arc::new(vec![42]))
                    }
                }
                .boxed()
            })
            .await
        });

        let leader_result = leader_job.await;
        assert!(leader_result.is_err());
        flight.release(&fp);

        let (follower_result, follower_role) = follower_handle.await.unwrap();
        assert!(follower_result.is_ok());
        assert_eq!(follower_role, Role::Leader);
    }
}
