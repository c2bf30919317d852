/// Lane bookkeeping for a queue
///
/// Lanes are projections of `Job.status`. Jobs are moved between lanes by the
/// queue as it drives them, and `reconcile` repairs any drift by re-reading
/// every job's authoritative status.
use crate::modules::jobs::domain::entities::Job;
use crate::modules::jobs::domain::value_objects::JobStatus;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSizes {
    pub backlog: usize,
    pub pending: usize,
    pub processing: usize,
    pub delayed: usize,
    pub completed: usize,
    pub errors: usize,
}

impl LaneSizes {
    pub fn total(&self) -> usize {
        self.backlog + self.pending + self.processing + self.delayed + self.completed + self.errors
    }
}

#[derive(Default)]
pub struct Lanes {
    backlog: VecDeque<Arc<Job>>,
    pending: VecDeque<Arc<Job>>,
    processing: VecDeque<Arc<Job>>,
    delayed: VecDeque<Arc<Job>>,
    completed: VecDeque<Arc<Job>>,
    errors: VecDeque<Arc<Job>>,
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lane(&self, status: JobStatus) -> &VecDeque<Arc<Job>> {
        match status {
            JobStatus::Backlog => &self.backlog,
            JobStatus::Pending => &self.pending,
            JobStatus::Processing => &self.processing,
            JobStatus::Delayed => &self.delayed,
            JobStatus::Completed => &self.completed,
            JobStatus::Failed => &self.errors,
        }
    }

    fn lane_mut(&mut self, status: JobStatus) -> &mut VecDeque<Arc<Job>> {
        match status {
            JobStatus::Backlog => &mut self.backlog,
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.errors,
        }
    }

    pub fn push_back(&mut self, status: JobStatus, job: Arc<Job>) {
        self.lane_mut(status).push_back(job);
    }

    pub fn push_front(&mut self, status: JobStatus, job: Arc<Job>) {
        self.lane_mut(status).push_front(job);
    }

    pub fn pop_front(&mut self, status: JobStatus) -> Option<Arc<Job>> {
        self.lane_mut(status).pop_front()
    }

    pub fn is_empty(&self, status: JobStatus) -> bool {
        self.lane(status).is_empty()
    }

    /// Remove a job from whichever lane holds it
    pub fn remove(&mut self, job_id: Uuid) -> Option<Arc<Job>> {
        for status in JobStatus::ALL {
            let lane = self.lane_mut(status);
            if let Some(index) = lane.iter().position(|job| job.id() == job_id) {
                return lane.remove(index);
            }
        }
        None
    }

    pub fn find(&self, job_id: Uuid) -> Option<Arc<Job>> {
        JobStatus::ALL
            .iter()
            .flat_map(|status| self.lane(*status).iter())
            .find(|job| job.id() == job_id)
            .cloned()
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.find(job_id).is_some()
    }

    /// Move every job whose status disagrees with its lane.
    /// Jobs that stay keep their relative order; moved jobs are appended.
    /// Returns how many jobs moved.
    pub async fn reconcile(&mut self) -> usize {
        let mut misplaced = Vec::new();

        for lane_status in JobStatus::ALL {
            let lane = std::mem::take(self.lane_mut(lane_status));
            let mut kept = VecDeque::with_capacity(lane.len());
            for job in lane {
                let actual = job.status().await;
                if actual == lane_status {
                    kept.push_back(job);
                } else {
                    misplaced.push((actual, job));
                }
            }
            *self.lane_mut(lane_status) = kept;
        }

        let moved = misplaced.len();
        for (status, job) in misplaced {
            self.push_back(status, job);
        }
        moved
    }

    /// Whether every job sits in the lane matching its status
    pub async fn is_consistent(&self) -> bool {
        for status in JobStatus::ALL {
            for job in self.lane(status) {
                if job.status().await != status {
                    return false;
                }
            }
        }
        true
    }

    /// Evict the oldest finished jobs beyond `cap` from the completed and errors lanes.
    /// Failed jobs with a retry still armed are never evicted.
    pub async fn enforce_retention(&mut self, cap: usize) -> usize {
        let mut evicted = 0;
        for status in [JobStatus::Completed, JobStatus::Failed] {
            let lane = self.lane_mut(status);
            let mut excess = lane.len().saturating_sub(cap);
            if excess == 0 {
                continue;
            }

            let mut kept = VecDeque::with_capacity(lane.len());
            for job in std::mem::take(lane) {
                if excess > 0 && job.next_retry_at().await.is_none() {
                    excess -= 1;
                    evicted += 1;
                } else {
                    kept.push_back(job);
                }
            }
            *self.lane_mut(status) = kept;
        }
        evicted
    }

    pub fn sizes(&self) -> LaneSizes {
        LaneSizes {
            backlog: self.backlog.len(),
            pending: self.pending.len(),
            processing: self.processing.len(),
            delayed: self.delayed.len(),
            completed: self.completed.len(),
            errors: self.errors.len(),
        }
    }
}
