use domain_compute::model::{entity::Job, vo::PendingJobGroup};
use uuid::Uuid;

/// Split pending HPC jobs into submission groups.
///
/// Jobs sharing a batch id are packed `tasks_per_node` at a time, except GPU
/// jobs which always get a group of their own. Jobs without a batch id are
/// singletons. Input order is kept inside every group, so callers should sort
/// by creation time first.
pub fn group_pending_jobs(jobs: Vec<Job>, node_cpu_capacity: u32) -> Vec<PendingJobGroup> {
    let mut batches: Vec<(String, Vec<Job>)> = Vec::new();
    let mut groups = Vec::new();
    for job in jobs {
        match job.batch_id.clone() {
            Some(batch_id) => match batches.iter_mut().find(|(id, _)| *id == batch_id) {
                Some((_, members)) => members.push(job),
                None => batches.push((batch_id, vec![job])),
            },
            None => groups.push(vec![job]),
        }
    }

    let mut packed = Vec::new();
    for (_, members) in batches {
        let resources = members[0].required_resources.unwrap_or_default();
        let chunk_size = if resources.needs_gpu() {
            1
        } else {
            resources.tasks_per_node(node_cpu_capacity)
        };
        packed.extend(members.chunks(chunk_size).map(<[Job]>::to_vec));
    }
    packed.extend(groups);

    packed
        .into_iter()
        .map(|jobs| PendingJobGroup {
            group_id: Uuid::new_v4().simple().to_string(),
            required_resources: jobs[0].required_resources.unwrap_or_default(),
            jobs,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use domain_compute::model::vo::{RequiredResources, RunMethod};

    use super::*;

    fn job(id: usize, batch: Option<&str>, cpu_count: u32, gpu_count: u32) -> Job {
        let job = Job::builder()
            .job_id(format!("job-{id}"))
            .run_method(Some(RunMethod::Hpc))
            .required_resources(Some(RequiredResources {
                cpu_count,
                gpu_count,
                memory_gb: 4.0,
                time_limit_sec: 60.0,
            }))
            .processor_name("p")
            .timestamp_created(id as f64)
            .build();
        Job {
            batch_id: batch.map(str::to_string),
            ..job
        }
    }

    fn sizes(groups: &[PendingJobGroup]) -> Vec<usize> {
        groups.iter().map(|g| g.jobs.len()).collect()
    }

    #[test]
    fn test_cpu_batch_is_packed_per_node() {
        let jobs: Vec<Job> = (0..5).map(|i| job(i, Some("b"), 25, 0)).collect();
        let groups = group_pending_jobs(jobs, 100);
        assert_eq!(sizes(&groups), vec![4, 1]);

        let ids: Vec<&str> = groups.iter().flat_map(|g| g.job_ids()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(unique.len(), 5);
        assert_eq!(ids[0], "job-0");
    }

    #[test]
    fn test_chunk_size_is_clamped_to_one() {
        let jobs: Vec<Job> = (0..3).map(|i| job(i, Some("b"), 300, 0)).collect();
        assert_eq!(sizes(&group_pending_jobs(jobs, 100)), vec![1, 1, 1]);
    }

    #[test]
    fn test_gpu_jobs_are_never_co_packed() {
        let jobs: Vec<Job> = (0..4).map(|i| job(i, Some("g"), 1, 1)).collect();
        let groups = group_pending_jobs(jobs, 100);
        assert_eq!(sizes(&groups), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_unbatched_jobs_are_singletons_and_batches_stay_apart() {
        let jobs = vec![
            job(0, None, 1, 0),
            job(1, Some("x"), 10, 0),
            job(2, Some("y"), 10, 0),
            job(3, Some("x"), 10, 0),
            job(4, None, 1, 0),
        ];
        let groups = group_pending_jobs(jobs, 100);
        assert_eq!(sizes(&groups), vec![2, 1, 1, 1]);
        assert_eq!(groups[0].job_ids().collect::<Vec<_>>(), vec!["job-1", "job-3"]);
        let group_ids: HashSet<&str> = groups.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(group_ids.len(), 4);
    }
}
