//! Replica-count policy.

/// Scaling policy parameters and the replica rule.
///
/// `jobs_per_worker` is an estimate, not a guarantee: it only bounds the
/// needed replica count from above, and `step_up` damps the approach so a
/// large spike converges over several ticks instead of allocating the whole
/// fleet at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingPolicy {
    /// Lower replica bound.
    pub min_replicas: u32,
    /// Upper replica bound.
    pub max_replicas: u32,
    /// Scale up when queue depth exceeds this.
    pub scale_up_threshold: i64,
    /// Scale down when queue depth falls below this.
    pub scale_down_threshold: i64,
    /// Estimated jobs one worker can absorb.
    pub jobs_per_worker: i64,
    /// Maximum replicas added per tick.
    pub step_up: u32,
    /// Maximum replicas removed per tick.
    pub step_down: u32,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            scale_up_threshold: 20,
            scale_down_threshold: 5,
            jobs_per_worker: 10,
            step_up: 2,
            step_down: 1,
        }
    }
}

impl ScalingPolicy {
    /// Checks internal consistency of the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_replicas == 0 {
            return Err("min_replicas must be at least 1".to_string());
        }
        if self.max_replicas < self.min_replicas {
            return Err(format!(
                "max_replicas {} is below min_replicas {}",
                self.max_replicas, self.min_replicas
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(format!(
                "scale_down_threshold {} must be below scale_up_threshold {}",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if self.jobs_per_worker <= 0 {
            return Err("jobs_per_worker must be positive".to_string());
        }
        if self.step_up == 0 || self.step_down == 0 {
            return Err("step sizes must be positive".to_string());
        }
        Ok(())
    }

    /// Computes the target replica count for the observed queue depth.
    ///
    /// Depths inside `[scale_down_threshold, scale_up_threshold]` leave the
    /// count unchanged; zero depth snaps to the minimum.
    pub fn target(&self, queue_depth: i64, current: u32) -> u32 {
        let target = if queue_depth == 0 {
            self.min_replicas
        } else if queue_depth > self.scale_up_threshold {
            let needed = (queue_depth + self.jobs_per_worker - 1) / self.jobs_per_worker;
            let needed = u32::try_from(needed).unwrap_or(self.max_replicas);
            current.saturating_add(self.step_up).min(needed)
        } else if queue_depth < self.scale_down_threshold && current > self.min_replicas {
            current.saturating_sub(self.step_down)
        } else {
            current
        };

        target.clamp(self.min_replicas, self.max_replicas)
    }
}
