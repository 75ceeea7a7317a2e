//! Job queue keyed by target id
//!
//! The target id is the de-duplication key: a target is either waiting, claimed by
//! exactly one worker, or absent. Claims are [`JobClaim`] guards; dropping a claim
//! without completing or rescheduling it releases the key.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::types::{PlatformKind, RecordId, TargetId};

/// Scheduling class; immediate jobs are always picked before timed ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobClass {
    Immediate,
    Timed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub target_id: TargetId,
    pub record_id: RecordId,
    pub platform: PlatformKind,
    pub class: JobClass,
    pub eligible_at: DateTime<Utc>,
    seq: u64,
}

impl Job {
    fn sort_key(&self) -> (JobClass, DateTime<Utc>, u64) {
        (self.class, self.eligible_at, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The target is already waiting or claimed
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// A worker holds the job; the caller must signal it instead
    Claimed,
    Missing,
}

#[derive(Default)]
struct QueueState {
    waiting: HashMap<TargetId, Job>,
    claimed: HashSet<TargetId>,
    seq: u64,
}

impl QueueState {
    fn contains(&self, target_id: &str) -> bool {
        self.waiting.contains_key(target_id) || self.claimed.contains(target_id)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a target; a `scheduled_at` in the past counts as immediate
    pub fn enqueue(
        &self,
        target_id: &str,
        record_id: &str,
        platform: PlatformKind,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EnqueueOutcome {
        let mut state = self.state();
        if state.contains(target_id) {
            return EnqueueOutcome::Duplicate;
        }

        let (class, eligible_at) = match scheduled_at {
            Some(at) if at > now => (JobClass::Timed, at),
            _ => (JobClass::Immediate, now),
        };
        let seq = state.next_seq();
        state.waiting.insert(
            target_id.to_string(),
            Job {
                target_id: target_id.to_string(),
                record_id: record_id.to_string(),
                platform,
                class,
                eligible_at,
                seq,
            },
        );
        drop(state);

        self.notify.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Make a waiting job immediately eligible, keeping its place in the queue
    ///
    /// Returns `false` when the target is not waiting (absent or already claimed).
    pub fn promote(&self, target_id: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state();
        let Some(job) = state.waiting.get_mut(target_id) else {
            return false;
        };
        job.class = JobClass::Immediate;
        if job.eligible_at > now {
            job.eligible_at = now;
        }
        drop(state);

        self.notify.notify_one();
        true
    }

    pub fn remove(&self, target_id: &str) -> RemoveOutcome {
        let mut state = self.state();
        if state.waiting.remove(target_id).is_some() {
            RemoveOutcome::Removed
        } else if state.claimed.contains(target_id) {
            RemoveOutcome::Claimed
        } else {
            RemoveOutcome::Missing
        }
    }

    /// Claim the best eligible job that `admit` accepts
    ///
    /// Eligible jobs are offered in order (immediate first, then by eligibility
    /// time, then FIFO). Jobs `admit` turns down stay waiting.
    pub fn claim_next<F>(self: &Arc<Self>, now: DateTime<Utc>, mut admit: F) -> Option<JobClaim>
    where
        F: FnMut(&Job) -> bool,
    {
        let mut state = self.state();
        let mut eligible: Vec<&Job> = state
            .waiting
            .values()
            .filter(|job| job.eligible_at <= now)
            .collect();
        eligible.sort_by_key(|job| job.sort_key());

        let chosen = eligible
            .into_iter()
            .find(|job| admit(*job))
            .map(|job| job.target_id.clone())?;

        let job = state.waiting.remove(&chosen)?;
        state.claimed.insert(chosen);
        drop(state);

        Some(JobClaim {
            queue: Arc::clone(self),
            job,
            settled: false,
        })
    }

    /// Eligible jobs right now, in claim order
    pub fn eligible(&self, now: DateTime<Utc>) -> Vec<Job> {
        let state = self.state();
        let mut jobs: Vec<Job> = state
            .waiting
            .values()
            .filter(|job| job.eligible_at <= now)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sort_key());
        jobs
    }

    pub fn get_waiting(&self, target_id: &str) -> Option<Job> {
        self.state().waiting.get(target_id).cloned()
    }

    /// Waiting or claimed
    pub fn is_tracked(&self, target_id: &str) -> bool {
        self.state().contains(target_id)
    }

    pub fn is_claimed(&self, target_id: &str) -> bool {
        self.state().claimed.contains(target_id)
    }

    pub fn waiting_len(&self) -> usize {
        self.state().waiting.len()
    }

    /// Resolves on the next enqueue, promote or reschedule
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    fn release(&self, target_id: &str) {
        self.state().claimed.remove(target_id);
    }

    fn requeue(&self, mut job: Job, at: DateTime<Utc>) {
        let mut state = self.state();
        state.claimed.remove(&job.target_id);
        job.class = JobClass::Timed;
        job.eligible_at = at;
        job.seq = state.next_seq();
        state.waiting.insert(job.target_id.clone(), job);
        drop(state);
        self.notify.notify_one();
    }
}

/// Exclusive ownership of one target's job
///
/// Only the holder of a claim may mutate the target it names.
pub struct JobClaim {
    queue: Arc<JobQueue>,
    job: Job,
    settled: bool,
}

impl JobClaim {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn target_id(&self) -> &str {
        &self.job.target_id
    }

    /// The job reached a terminal outcome; frees the key
    pub fn complete(mut self) {
        self.settled = true;
        self.queue.release(&self.job.target_id);
    }

    /// Put the job back as a timed job eligible at `at`
    pub fn retry_at(mut self, at: DateTime<Utc>) {
        self.settled = true;
        self.queue.requeue(self.job.clone(), at);
    }
}

impl Drop for JobClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.queue.release(&self.job.target_id);
        }
    }
}

impl std::fmt::Debug for JobClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobClaim").field("job", &self.job).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::new())
    }

    #[test]
    fn test_enqueue_deduplicates_waiting_and_claimed() {
        let q = queue();
        let now = Utc::now();
        assert_eq!(
            q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now),
            EnqueueOutcome::Duplicate
        );

        let claim = q.claim_next(now, |_| true).unwrap();
        assert_eq!(
            q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now),
            EnqueueOutcome::Duplicate,
            "A claimed target must not be queued again"
        );

        claim.complete();
        assert!(!q.is_claimed("t1"));
        assert_eq!(
            q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now),
            EnqueueOutcome::Enqueued
        );
    }

    #[test]
    fn test_timed_job_not_eligible_before_schedule() {
        let q = queue();
        let now = Utc::now();
        let at = now + Duration::minutes(10);
        q.enqueue("t1", "r1", PlatformKind::Youtube, Some(at), now);

        assert!(q.claim_next(now, |_| true).is_none());
        assert!(q.claim_next(at - Duration::seconds(1), |_| true).is_none());
        assert!(q.claim_next(at, |_| true).is_some());
    }

    #[test]
    fn test_past_schedule_is_immediate() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("t1", "r1", PlatformKind::Youtube, Some(now - Duration::hours(1)), now);
        assert_eq!(q.get_waiting("t1").unwrap().class, JobClass::Immediate);
    }

    #[test]
    fn test_claim_order_immediate_then_time_then_fifo() {
        let q = queue();
        let start = Utc::now();
        let early = Some(start + Duration::seconds(1));
        q.enqueue("timed-early", "r", PlatformKind::Kwai, early, start);
        q.enqueue("imm-a", "r", PlatformKind::Kwai, None, start);
        q.enqueue("imm-b", "r", PlatformKind::Kwai, None, start);

        let later = start + Duration::seconds(5);
        let order: Vec<String> = q.eligible(later).into_iter().map(|j| j.target_id).collect();
        assert_eq!(order, vec!["imm-a", "imm-b", "timed-early"]);
    }

    #[test]
    fn test_promote_makes_timed_job_eligible() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("t1", "r1", PlatformKind::Tiktok, Some(now + Duration::minutes(10)), now);

        assert!(q.promote("t1", now));
        assert_eq!(q.waiting_len(), 1, "Promotion must not duplicate the job");
        let claim = q.claim_next(now, |_| true).unwrap();
        assert_eq!(claim.target_id(), "t1");
        assert!(!q.promote("t1", now), "Claimed jobs cannot be promoted");
    }

    #[test]
    fn test_admit_rejection_defers_without_dropping() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("tiktok-1", "r", PlatformKind::Tiktok, None, now);
        q.enqueue("youtube-1", "r", PlatformKind::Youtube, None, now);

        let claim = q
            .claim_next(now, |job| job.platform != PlatformKind::Tiktok)
            .unwrap();
        assert_eq!(claim.target_id(), "youtube-1");
        assert!(q.get_waiting("tiktok-1").is_some());
    }

    #[test]
    fn test_retry_at_requeues_as_timed() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now);
        let claim = q.claim_next(now, |_| true).unwrap();

        let at = now + Duration::seconds(4);
        claim.retry_at(at);

        assert!(!q.is_claimed("t1"));
        let job = q.get_waiting("t1").unwrap();
        assert_eq!(job.class, JobClass::Timed);
        assert_eq!(job.eligible_at, at);
        assert!(q.claim_next(now, |_| true).is_none());
    }

    #[test]
    fn test_dropped_claim_releases_key() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now);
        {
            let _claim = q.claim_next(now, |_| true).unwrap();
            assert!(q.is_claimed("t1"));
        }
        assert!(!q.is_claimed("t1"));
        assert_eq!(q.waiting_len(), 0);
    }

    #[test]
    fn test_remove_reports_claimed_jobs() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("waiting", "r", PlatformKind::Tiktok, None, now);
        q.enqueue("running", "r", PlatformKind::Tiktok, None, now);
        let _claim = q.claim_next(now, |job| job.target_id == "running").unwrap();

        assert_eq!(q.remove("waiting"), RemoveOutcome::Removed);
        assert_eq!(q.remove("running"), RemoveOutcome::Claimed);
        assert_eq!(q.remove("absent"), RemoveOutcome::Missing);
    }

    #[test]
    fn test_is_tracked_covers_waiting_and_claimed() {
        let q = queue();
        let now = Utc::now();
        q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now);
        assert!(q.is_tracked("t1"));

        let claim = q.claim_next(now, |_| true).unwrap();
        assert!(q.is_tracked("t1"));
        claim.retry_at(now);
        assert!(q.is_tracked("t1"));

        q.claim_next(now, |_| true).unwrap().complete();
        assert!(!q.is_tracked("t1"));
    }

    #[test]
    fn test_concurrent_enqueue_yields_single_job() {
        let q = queue();
        let now = Utc::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || q.enqueue("t1", "r1", PlatformKind::Tiktok, None, now))
            })
            .collect();

        let enqueued = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == EnqueueOutcome::Enqueued)
            .count();
        assert_eq!(enqueued, 1);
    }
}
